pub mod sqlite_deployment_repository;
pub mod sqlite_node_repository;
pub mod sqlite_task_repository;

pub use sqlite_deployment_repository::SqliteDeploymentRepository;
pub use sqlite_node_repository::SqliteNodeRepository;
pub use sqlite_task_repository::SqliteTaskRepository;
