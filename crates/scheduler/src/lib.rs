pub mod expiry_monitor;
pub mod task_scheduler;

pub use expiry_monitor::ExpiryMonitor;
pub use task_scheduler::{FailedTask, TaskScheduler};
