pub mod database;
pub mod lock;
pub mod node_provider;

pub use database::*;
pub use lock::{PostgresAdvisoryLockManager, SqliteLeaseLockManager};
pub use node_provider::LocalNodeProvider;
