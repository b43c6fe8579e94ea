use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use orchestrator_config::DatabaseConfig;
use orchestrator_domain::{Clock, DeploymentRepository, LockManager, NodeRepository, TaskRepository};
use orchestrator_errors::{SchedulerError, SchedulerResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

use super::postgres::{
    PostgresDeploymentRepository, PostgresNodeRepository, PostgresTaskRepository,
};
use super::sqlite::{SqliteDeploymentRepository, SqliteNodeRepository, SqliteTaskRepository};
use crate::lock::{PostgresAdvisoryLockManager, SqliteLeaseLockManager};

/// Database type detection
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            DatabaseType::PostgreSQL
        } else {
            DatabaseType::SQLite
        }
    }
}

/// Database connection pool enum
#[derive(Clone)]
pub enum DatabasePool {
    PostgreSQL(sqlx::PgPool),
    SQLite(sqlx::SqlitePool),
}

impl DatabasePool {
    pub async fn new(url: &str, max_connections: u32) -> SchedulerResult<Self> {
        let config = DatabaseConfig {
            url: url.to_string(),
            max_connections,
            ..DatabaseConfig::default()
        };
        Self::from_config(&config).await
    }

    pub async fn from_config(config: &DatabaseConfig) -> SchedulerResult<Self> {
        match DatabaseType::from_url(&config.url) {
            DatabaseType::PostgreSQL => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .min_connections(config.min_connections.min(config.max_connections))
                    .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
                    .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
                    .connect(&config.url)
                    .await
                    .map_err(SchedulerError::Database)?;
                Ok(DatabasePool::PostgreSQL(pool))
            }
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::from_str(&config.url)
                    .map_err(SchedulerError::Database)?
                    .create_if_missing(true);

                // 内存库每个连接都是独立的数据库，只能使用单连接且不回收
                let pool = if config.url.contains(":memory:") {
                    SqlitePoolOptions::new()
                        .max_connections(1)
                        .min_connections(1)
                        .idle_timeout(None)
                        .max_lifetime(None)
                        .connect_with(options)
                        .await
                } else {
                    SqlitePoolOptions::new()
                        .max_connections(config.max_connections)
                        .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
                        .connect_with(options)
                        .await
                }
                .map_err(SchedulerError::Database)?;
                Ok(DatabasePool::SQLite(pool))
            }
        }
    }

    pub fn database_type(&self) -> DatabaseType {
        match self {
            DatabasePool::PostgreSQL(_) => DatabaseType::PostgreSQL,
            DatabasePool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    pub async fn migrate(&self) -> SchedulerResult<()> {
        match self {
            DatabasePool::PostgreSQL(pool) => sqlx::migrate!("./migrations/postgres")
                .run(pool)
                .await
                .map_err(|e| SchedulerError::database_error(format!("数据库迁移失败: {e}")))?,
            DatabasePool::SQLite(pool) => sqlx::migrate!("./migrations/sqlite")
                .run(pool)
                .await
                .map_err(|e| SchedulerError::database_error(format!("数据库迁移失败: {e}")))?,
        }
        info!("数据库迁移完成 ({:?})", self.database_type());
        Ok(())
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        match self {
            DatabasePool::PostgreSQL(pool) => {
                sqlx::query("SELECT 1")
                    .execute(pool)
                    .await
                    .map_err(SchedulerError::Database)?;
            }
            DatabasePool::SQLite(pool) => {
                sqlx::query("SELECT 1")
                    .execute(pool)
                    .await
                    .map_err(SchedulerError::Database)?;
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        match self {
            DatabasePool::PostgreSQL(pool) => pool.close().await,
            DatabasePool::SQLite(pool) => pool.close().await,
        }
    }
}

/// Unified database manager
pub struct DatabaseManager {
    pool: DatabasePool,
}

impl DatabaseManager {
    pub async fn new(url: &str, max_connections: u32) -> SchedulerResult<Self> {
        let pool = DatabasePool::new(url, max_connections).await?;
        Ok(Self { pool })
    }

    pub async fn from_config(config: &DatabaseConfig) -> SchedulerResult<Self> {
        let pool = DatabasePool::from_config(config).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub fn database_type(&self) -> DatabaseType {
        self.pool.database_type()
    }

    pub async fn migrate(&self) -> SchedulerResult<()> {
        self.pool.migrate().await
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        self.pool.health_check().await
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    pub fn task_repository(&self) -> Arc<dyn TaskRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => Arc::new(PostgresTaskRepository::new(pool.clone())),
            DatabasePool::SQLite(pool) => Arc::new(SqliteTaskRepository::new(pool.clone())),
        }
    }

    pub fn node_repository(&self) -> Arc<dyn NodeRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => Arc::new(PostgresNodeRepository::new(pool.clone())),
            DatabasePool::SQLite(pool) => Arc::new(SqliteNodeRepository::new(pool.clone())),
        }
    }

    pub fn deployment_repository(&self) -> Arc<dyn DeploymentRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                Arc::new(PostgresDeploymentRepository::new(pool.clone()))
            }
            DatabasePool::SQLite(pool) => Arc::new(SqliteDeploymentRepository::new(pool.clone())),
        }
    }

    /// SQLite 租约依赖时钟判断过期，PostgreSQL 由服务端控制
    pub fn lock_manager(&self, clock: Arc<dyn Clock>) -> Arc<dyn LockManager> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                Arc::new(PostgresAdvisoryLockManager::new(pool.clone()))
            }
            DatabasePool::SQLite(pool) => {
                Arc::new(SqliteLeaseLockManager::new(pool.clone(), clock))
            }
        }
    }
}
