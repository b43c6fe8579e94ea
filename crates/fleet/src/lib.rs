pub mod executor;
pub mod fleet;
pub mod notifier;
pub mod operation;
pub mod planner;
pub mod supervisor;

pub use executor::OperationExecutor;
pub use fleet::Fleet;
pub use notifier::HttpNodeNotifier;
pub use operation::{FailReason, Operation};
pub use planner::Planner;
pub use supervisor::{Supervisor, SupervisorState, TickReport, SUPERVISOR_LOCK_KEY};
