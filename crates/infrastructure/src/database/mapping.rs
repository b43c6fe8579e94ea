//! 行到实体的映射
//!
//! PostgreSQL 的 JSON 列是 JSONB，SQLite 中以 TEXT 存储，
//! 时间列在两边都直接由 sqlx 的 chrono 支持解码。

use orchestrator_domain::{Deployment, Node, Task};
use orchestrator_errors::{SchedulerError, SchedulerResult};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// 共享的列清单，保证 RETURNING 与 SELECT 的字段一致
pub const TASK_COLUMNS: &str = "id, name, payload, group_key, retry_max, retry_count, starts_after, \
     created_to_started_timeout_secs, started_to_completed_timeout_secs, heartbeat_timeout_secs, \
     created_at, state, last_state_transition_at, last_heartbeat_at, output, terminated";

pub const NODE_COLUMNS: &str = "id, routing_id, deployment_id, url, state, image, cpu_milli, \
     memory_mb, storage_mb, error, created_at, last_state_transition_at";

pub const DEPLOYMENT_COLUMNS: &str = "id, commit_id, created_at, superseded_at";

pub struct MappingHelpers;

impl MappingHelpers {
    pub fn json_to_text(value: &JsonValue) -> String {
        value.to_string()
    }

    pub fn parse_json_sqlite(row: &SqliteRow, field_name: &str) -> SchedulerResult<JsonValue> {
        let json_str: String = row.try_get(field_name)?;
        serde_json::from_str(&json_str)
            .map_err(|e| SchedulerError::Serialization(format!("解析 {field_name} 失败: {e}")))
    }

    pub fn parse_optional_json_sqlite(
        row: &SqliteRow,
        field_name: &str,
    ) -> SchedulerResult<Option<JsonValue>> {
        match row.try_get::<Option<String>, _>(field_name)? {
            Some(json_str) => serde_json::from_str(&json_str).map(Some).map_err(|e| {
                SchedulerError::Serialization(format!("解析 {field_name} 失败: {e}"))
            }),
            None => Ok(None),
        }
    }

    pub fn task_from_pg(row: &PgRow) -> SchedulerResult<Task> {
        Ok(Task {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            payload: row.try_get("payload")?,
            group_key: row.try_get("group_key")?,
            retry_max: row.try_get("retry_max")?,
            retry_count: row.try_get("retry_count")?,
            starts_after: row.try_get("starts_after")?,
            created_to_started_timeout_secs: row.try_get("created_to_started_timeout_secs")?,
            started_to_completed_timeout_secs: row.try_get("started_to_completed_timeout_secs")?,
            heartbeat_timeout_secs: row.try_get("heartbeat_timeout_secs")?,
            created_at: row.try_get("created_at")?,
            state: row.try_get("state")?,
            last_state_transition_at: row.try_get("last_state_transition_at")?,
            last_heartbeat_at: row.try_get("last_heartbeat_at")?,
            output: row.try_get("output")?,
            terminated: row.try_get("terminated")?,
        })
    }

    pub fn task_from_sqlite(row: &SqliteRow) -> SchedulerResult<Task> {
        Ok(Task {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            payload: Self::parse_json_sqlite(row, "payload")?,
            group_key: row.try_get("group_key")?,
            retry_max: row.try_get("retry_max")?,
            retry_count: row.try_get("retry_count")?,
            starts_after: row.try_get("starts_after")?,
            created_to_started_timeout_secs: row.try_get("created_to_started_timeout_secs")?,
            started_to_completed_timeout_secs: row.try_get("started_to_completed_timeout_secs")?,
            heartbeat_timeout_secs: row.try_get("heartbeat_timeout_secs")?,
            created_at: row.try_get("created_at")?,
            state: row.try_get("state")?,
            last_state_transition_at: row.try_get("last_state_transition_at")?,
            last_heartbeat_at: row.try_get("last_heartbeat_at")?,
            output: Self::parse_optional_json_sqlite(row, "output")?,
            terminated: row.try_get("terminated")?,
        })
    }

    pub fn node_from_pg(row: &PgRow) -> SchedulerResult<Node> {
        Ok(Node {
            id: row.try_get("id")?,
            routing_id: row.try_get("routing_id")?,
            deployment_id: row.try_get("deployment_id")?,
            url: row.try_get("url")?,
            state: row.try_get("state")?,
            image: row.try_get("image")?,
            cpu_milli: row.try_get("cpu_milli")?,
            memory_mb: row.try_get("memory_mb")?,
            storage_mb: row.try_get("storage_mb")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            last_state_transition_at: row.try_get("last_state_transition_at")?,
        })
    }

    pub fn node_from_sqlite(row: &SqliteRow) -> SchedulerResult<Node> {
        Ok(Node {
            id: row.try_get("id")?,
            routing_id: row.try_get("routing_id")?,
            deployment_id: row.try_get("deployment_id")?,
            url: row.try_get("url")?,
            state: row.try_get("state")?,
            image: row.try_get("image")?,
            cpu_milli: row.try_get("cpu_milli")?,
            memory_mb: row.try_get("memory_mb")?,
            storage_mb: row.try_get("storage_mb")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            last_state_transition_at: row.try_get("last_state_transition_at")?,
        })
    }

    pub fn deployment_from_pg(row: &PgRow) -> SchedulerResult<Deployment> {
        Ok(Deployment {
            id: row.try_get("id")?,
            commit_id: row.try_get("commit_id")?,
            created_at: row.try_get("created_at")?,
            superseded_at: row.try_get("superseded_at")?,
        })
    }

    pub fn deployment_from_sqlite(row: &SqliteRow) -> SchedulerResult<Deployment> {
        Ok(Deployment {
            id: row.try_get("id")?,
            commit_id: row.try_get("commit_id")?,
            created_at: row.try_get("created_at")?,
            superseded_at: row.try_get("superseded_at")?,
        })
    }
}
