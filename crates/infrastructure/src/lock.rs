//! 集群锁实现
//!
//! - PostgreSQL: 在一个持有中的事务里取 `pg_try_advisory_xact_lock`，
//!   事务结束时锁自动释放；`idle_in_transaction_session_timeout` 限制最长持有时间。
//! - SQLite: 单机部署，用带过期时间的租约表代替。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orchestrator_domain::{Clock, LockLease, LockManager};
use orchestrator_errors::{SchedulerError, SchedulerResult};
use sqlx::{PgPool, Postgres, SqlitePool, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

pub struct PostgresAdvisoryLockManager {
    pool: PgPool,
}

impl PostgresAdvisoryLockManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockManager for PostgresAdvisoryLockManager {
    async fn try_acquire(
        &self,
        key: &str,
        hold: Duration,
    ) -> SchedulerResult<Option<Box<dyn LockLease>>> {
        let mut tx = self.pool.begin().await.map_err(SchedulerError::Database)?;

        sqlx::query("SELECT set_config('idle_in_transaction_session_timeout', $1, true)")
            .bind(hold.as_millis().to_string())
            .execute(&mut *tx)
            .await
            .map_err(SchedulerError::Database)?;

        let acquired: bool =
            sqlx::query_scalar("SELECT pg_try_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(key)
                .fetch_one(&mut *tx)
                .await
                .map_err(SchedulerError::Database)?;

        if !acquired {
            tx.rollback().await.map_err(SchedulerError::Database)?;
            debug!("集群锁 {} 已被其他实例持有", key);
            return Ok(None);
        }

        Ok(Some(Box::new(PostgresLockLease {
            key: key.to_string(),
            tx,
        })))
    }
}

struct PostgresLockLease {
    key: String,
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LockLease for PostgresLockLease {
    fn key(&self) -> &str {
        &self.key
    }

    async fn release(self: Box<Self>) -> SchedulerResult<()> {
        let PostgresLockLease { key, tx } = *self;
        // 超过持有时间时会话已被服务端断开，锁随之释放
        tx.commit().await.map_err(|e| {
            warn!("释放集群锁 {} 失败: {}", key, e);
            SchedulerError::LockUnavailable(format!("释放集群锁 {key} 失败: {e}"))
        })
    }
}

pub struct SqliteLeaseLockManager {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteLeaseLockManager {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

#[async_trait]
impl LockManager for SqliteLeaseLockManager {
    async fn try_acquire(
        &self,
        key: &str,
        hold: Duration,
    ) -> SchedulerResult<Option<Box<dyn LockLease>>> {
        let now = self.clock.now();
        let hold = chrono::Duration::from_std(hold)
            .map_err(|e| SchedulerError::invalid_params(format!("无效的锁持有时间: {e}")))?;
        let holder = Uuid::now_v7().to_string();

        // 只有租约不存在或已过期时才能抢占
        let row = sqlx::query(
            r#"
            INSERT INTO cluster_locks (key, holder, expires_at) VALUES (?1, ?2, ?3)
            ON CONFLICT (key) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at
            WHERE cluster_locks.expires_at < ?4
            RETURNING holder
            "#,
        )
        .bind(key)
        .bind(&holder)
        .bind(now + hold)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        if row.is_none() {
            debug!("集群锁 {} 已被其他实例持有", key);
            return Ok(None);
        }

        Ok(Some(Box::new(SqliteLockLease {
            key: key.to_string(),
            holder,
            pool: self.pool.clone(),
        })))
    }
}

struct SqliteLockLease {
    key: String,
    holder: String,
    pool: SqlitePool,
}

#[async_trait]
impl LockLease for SqliteLockLease {
    fn key(&self) -> &str {
        &self.key
    }

    async fn release(self: Box<Self>) -> SchedulerResult<()> {
        sqlx::query("DELETE FROM cluster_locks WHERE key = ?1 AND holder = ?2")
            .bind(&self.key)
            .bind(&self.holder)
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;
        Ok(())
    }
}
