use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_domain::{Task, TaskFilter, TaskRepository, TaskState, DEFAULT_LIST_LIMIT};
use orchestrator_errors::{SchedulerError, SchedulerResult};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, instrument};

use crate::database::mapping::{MappingHelpers, TASK_COLUMNS};

pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    #[instrument(skip(self, task), fields(task_id = %task.id, group_key = %task.group_key))]
    async fn create(&self, task: &Task) -> SchedulerResult<Task> {
        let sql = format!(
            r#"
            INSERT INTO tasks (id, name, payload, group_key, retry_max, retry_count, starts_after,
                created_to_started_timeout_secs, started_to_completed_timeout_secs, heartbeat_timeout_secs,
                created_at, state, last_state_transition_at, last_heartbeat_at, output, terminated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {TASK_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&task.id)
            .bind(&task.name)
            .bind(&task.payload)
            .bind(&task.group_key)
            .bind(task.retry_max)
            .bind(task.retry_count)
            .bind(task.starts_after)
            .bind(task.created_to_started_timeout_secs)
            .bind(task.started_to_completed_timeout_secs)
            .bind(task.heartbeat_timeout_secs)
            .bind(task.created_at)
            .bind(task.state)
            .bind(task.last_state_transition_at)
            .bind(task.last_heartbeat_at)
            .bind(&task.output)
            .bind(task.terminated)
            .fetch_one(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        let created = MappingHelpers::task_from_pg(&row)?;
        debug!("创建任务成功: {}", created.entity_description());
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        row.as_ref().map(MappingHelpers::task_from_pg).transpose()
    }

    #[instrument(skip(self))]
    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {TASK_COLUMNS} FROM tasks WHERE TRUE"));
        if let Some(group_key) = &filter.group_key {
            builder.push(" AND group_key = ").push_bind(group_key);
        }
        if let Some(state) = filter.state {
            builder.push(" AND state = ").push_bind(state);
        }
        builder
            .push(" ORDER BY id LIMIT ")
            .push_bind(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT));

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        rows.iter().map(MappingHelpers::task_from_pg).collect()
    }

    #[instrument(skip(self))]
    async fn heartbeat(&self, id: &str, now: DateTime<Utc>) -> SchedulerResult<Option<Task>> {
        let sql = format!(
            "UPDATE tasks SET last_heartbeat_at = $2 WHERE id = $1 RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        row.as_ref().map(MappingHelpers::task_from_pg).transpose()
    }

    #[instrument(skip(self, output), fields(from = %expected, to = %new_state))]
    async fn compare_and_transition(
        &self,
        id: &str,
        expected: TaskState,
        new_state: TaskState,
        output: Option<&JsonValue>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<Task>> {
        let sql = format!(
            r#"
            UPDATE tasks
            SET state = $3,
                last_state_transition_at = $4,
                terminated = $5,
                output = COALESCE($6, output)
            WHERE id = $1 AND state = $2
            RETURNING {TASK_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(expected)
            .bind(new_state)
            .bind(now)
            .bind(new_state.is_terminal())
            .bind(output)
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        row.as_ref().map(MappingHelpers::task_from_pg).transpose()
    }

    #[instrument(skip(self))]
    async fn dequeue(
        &self,
        group_key: &str,
        limit: i64,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Vec<Task>> {
        // SKIP LOCKED 保证并发领取的结果互不重叠
        let sql = format!(
            r#"
            UPDATE tasks
            SET state = 'STARTED', last_state_transition_at = $3, last_heartbeat_at = $3
            WHERE id IN (
                SELECT id FROM tasks
                WHERE group_key = $1 AND state = 'CREATED' AND starts_after <= $3
                ORDER BY created_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {TASK_COLUMNS}
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(group_key)
            .bind(limit)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        let mut tasks = rows
            .iter()
            .map(MappingHelpers::task_from_pg)
            .collect::<SchedulerResult<Vec<_>>>()?;
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        debug!("分组 {} 领取任务 {} 个", group_key, tasks.len());
        Ok(tasks)
    }

    #[instrument(skip(self))]
    async fn expire_timed_out(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<Task>> {
        let sql = format!(
            r#"
            WITH candidates AS (
                SELECT id FROM tasks
                WHERE (state = 'CREATED'
                        AND starts_after + created_to_started_timeout_secs * INTERVAL '1 second' < $1)
                   OR (state = 'STARTED'
                        AND (last_heartbeat_at + heartbeat_timeout_secs * INTERVAL '1 second' < $1
                          OR last_state_transition_at + started_to_completed_timeout_secs * INTERVAL '1 second' < $1))
                FOR UPDATE SKIP LOCKED
            )
            UPDATE tasks t
            SET state = 'EXPIRED',
                terminated = TRUE,
                last_state_transition_at = $1,
                output = CASE
                    WHEN t.state = 'CREATED'
                        THEN '{{"reason": "createdToStartedTimeoutSecs_exceeded"}}'::jsonb
                    WHEN t.last_heartbeat_at + t.heartbeat_timeout_secs * INTERVAL '1 second' < $1
                        THEN '{{"reason": "heartbeatTimeoutSecs_exceeded"}}'::jsonb
                    ELSE '{{"reason": "startedToCompletedTimeoutSecs_exceeded"}}'::jsonb
                END
            FROM candidates c
            WHERE t.id = c.id
            RETURNING {}
            "#,
            TASK_COLUMNS
                .split(", ")
                .map(|c| format!("t.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        rows.iter().map(MappingHelpers::task_from_pg).collect()
    }
}
