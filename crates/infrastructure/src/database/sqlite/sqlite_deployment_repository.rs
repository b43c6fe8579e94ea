use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_domain::{Deployment, DeploymentRepository};
use orchestrator_errors::{SchedulerError, SchedulerResult};
use sqlx::SqlitePool;
use tracing::info;

use crate::database::mapping::{MappingHelpers, DEPLOYMENT_COLUMNS};

pub struct SqliteDeploymentRepository {
    pool: SqlitePool,
}

impl SqliteDeploymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeploymentRepository for SqliteDeploymentRepository {
    async fn create_active(
        &self,
        commit_id: &str,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Deployment> {
        let mut tx = self.pool.begin().await.map_err(SchedulerError::Database)?;

        sqlx::query("UPDATE deployments SET superseded_at = ?1 WHERE superseded_at IS NULL")
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(SchedulerError::Database)?;

        let sql = format!(
            "INSERT INTO deployments (commit_id, created_at, superseded_at) VALUES (?1, ?2, NULL) \
             RETURNING {DEPLOYMENT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(commit_id)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(SchedulerError::Database)?;

        tx.commit().await.map_err(SchedulerError::Database)?;

        let deployment = MappingHelpers::deployment_from_sqlite(&row)?;
        info!("新部署已生效: ID {}, commit {}", deployment.id, deployment.commit_id);
        Ok(deployment)
    }

    async fn get_active(&self) -> SchedulerResult<Option<Deployment>> {
        let sql = format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM deployments WHERE superseded_at IS NULL \
             ORDER BY id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        row.as_ref().map(MappingHelpers::deployment_from_sqlite).transpose()
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Deployment>> {
        let sql = format!("SELECT {DEPLOYMENT_COLUMNS} FROM deployments WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        row.as_ref().map(MappingHelpers::deployment_from_sqlite).transpose()
    }
}
