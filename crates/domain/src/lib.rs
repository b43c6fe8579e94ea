pub mod clock;
pub mod entities;
pub mod ports;
pub mod repositories;
pub mod services;
pub mod sqlx_impls;
pub mod value_objects;

pub use clock::*;
pub use entities::*;
pub use ports::*;
pub use repositories::*;
pub use orchestrator_errors::{SchedulerError, SchedulerResult};
pub use services::*;
pub use value_objects::*;
