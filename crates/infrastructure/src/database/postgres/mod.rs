pub mod postgres_deployment_repository;
pub mod postgres_node_repository;
pub mod postgres_task_repository;

pub use postgres_deployment_repository::*;
pub use postgres_node_repository::*;
pub use postgres_task_repository::*;
