use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_domain::{
    NewNode, Node, NodeRepository, NodeSearch, NodeSearchPage, NodeState, NodeStateChange,
    RoutingGroup,
};
use orchestrator_errors::{SchedulerError, SchedulerResult};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use crate::database::mapping::{MappingHelpers, NODE_COLUMNS};

pub struct SqliteNodeRepository {
    pool: SqlitePool,
}

impl SqliteNodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn push_states(builder: &mut QueryBuilder<'_, Sqlite>, states: &[NodeState]) {
        builder.push(" state IN (");
        let mut separated = builder.separated(", ");
        for state in states {
            separated.push_bind(*state);
        }
        separated.push_unseparated(")");
    }
}

#[async_trait]
impl NodeRepository for SqliteNodeRepository {
    async fn create(&self, node: &NewNode, now: DateTime<Utc>) -> SchedulerResult<Node> {
        let sql = format!(
            r#"
            INSERT INTO nodes (routing_id, deployment_id, url, state, image, cpu_milli, memory_mb,
                storage_mb, error, created_at, last_state_transition_at)
            VALUES (?1, ?2, NULL, 'PENDING', ?3, ?4, ?5, ?6, NULL, ?7, ?7)
            RETURNING {NODE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&node.routing_id)
            .bind(node.deployment_id)
            .bind(&node.image)
            .bind(node.cpu_milli)
            .bind(node.memory_mb)
            .bind(node.storage_mb)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        let created = MappingHelpers::node_from_sqlite(&row)?;
        debug!("创建节点成功: {}", created.entity_description());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Node>> {
        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        row.as_ref().map(MappingHelpers::node_from_sqlite).transpose()
    }

    async fn search(&self, search: &NodeSearch) -> SchedulerResult<NodeSearchPage> {
        if search.states.is_empty() || search.limit <= 0 {
            return Ok(NodeSearchPage::default());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT DISTINCT routing_id FROM nodes WHERE");
        Self::push_states(&mut builder, &search.states);
        if let Some(cursor) = &search.cursor {
            builder.push(" AND routing_id > ").push_bind(cursor);
        }
        builder
            .push(" ORDER BY routing_id LIMIT ")
            .push_bind(search.limit + 1);

        let mut routing_ids = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(SchedulerError::Database)?
            .iter()
            .map(|row| row.try_get::<String, _>("routing_id"))
            .collect::<Result<Vec<_>, _>>()?;

        let next_cursor = if routing_ids.len() as i64 > search.limit {
            routing_ids.truncate(search.limit as usize);
            routing_ids.last().cloned()
        } else {
            None
        };

        if routing_ids.is_empty() {
            return Ok(NodeSearchPage::default());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {NODE_COLUMNS} FROM nodes WHERE"));
        Self::push_states(&mut builder, &search.states);
        builder.push(" AND routing_id IN (");
        let mut separated = builder.separated(", ");
        for routing_id in &routing_ids {
            separated.push_bind(routing_id);
        }
        separated.push_unseparated(") ORDER BY routing_id, id");

        let nodes = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(SchedulerError::Database)?
            .iter()
            .map(MappingHelpers::node_from_sqlite)
            .collect::<SchedulerResult<Vec<_>>>()?;

        Ok(NodeSearchPage {
            groups: RoutingGroup::group(nodes),
            next_cursor,
        })
    }

    async fn update_state(
        &self,
        change: &NodeStateChange,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<Node>> {
        let sql = format!(
            r#"
            UPDATE nodes
            SET state = ?3,
                last_state_transition_at = ?4,
                url = COALESCE(?5, url),
                error = COALESCE(?6, error)
            WHERE id = ?1 AND state = ?2
            RETURNING {NODE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(change.node_id)
            .bind(change.from)
            .bind(change.to)
            .bind(now)
            .bind(&change.url)
            .bind(&change.error)
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        row.as_ref().map(MappingHelpers::node_from_sqlite).transpose()
    }

    async fn list_by_routing_id(
        &self,
        routing_id: &str,
        states: &[NodeState],
    ) -> SchedulerResult<Vec<Node>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {NODE_COLUMNS} FROM nodes WHERE routing_id = "));
        builder.push_bind(routing_id).push(" AND");
        Self::push_states(&mut builder, states);
        builder.push(" ORDER BY id");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        rows.iter().map(MappingHelpers::node_from_sqlite).collect()
    }

    async fn remove(&self, id: i64) -> SchedulerResult<Option<Node>> {
        let sql = format!("DELETE FROM nodes WHERE id = ?1 RETURNING {NODE_COLUMNS}");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        if row.is_some() {
            debug!("删除节点: {}", id);
        }
        row.as_ref().map(MappingHelpers::node_from_sqlite).transpose()
    }
}
