pub mod app_config;
pub mod database;
pub mod fleet;
pub mod logging;
pub mod scheduler;

pub use app_config::*;
pub use database::*;
pub use fleet::*;
pub use logging::*;
pub use scheduler::*;
