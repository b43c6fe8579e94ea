pub mod manager;
pub mod mapping;
pub mod postgres;
pub mod sqlite;

pub use manager::{DatabaseManager, DatabasePool, DatabaseType};
pub use postgres::{PostgresDeploymentRepository, PostgresNodeRepository, PostgresTaskRepository};
pub use sqlite::{SqliteDeploymentRepository, SqliteNodeRepository, SqliteTaskRepository};
