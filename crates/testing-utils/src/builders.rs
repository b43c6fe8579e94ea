//! Test data builders for creating test entities
//!
//! Builders start from sensible defaults so a test only spells out the
//! fields it cares about.

use chrono::{DateTime, Utc};
use orchestrator_domain::{Deployment, Node, NodeState, Task, TaskProps, TaskState};

/// Builder for creating test Task entities
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// All timestamps start at `now`
    pub fn at(now: DateTime<Utc>) -> Self {
        let props = TaskProps::new("test_task", "default", serde_json::json!({}));
        Self {
            task: Task::new(props, now),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.task.id = id.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn with_group_key(mut self, group_key: &str) -> Self {
        self.task.group_key = group_key.to_string();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.task.payload = payload;
        self
    }

    pub fn with_state(mut self, state: TaskState) -> Self {
        self.task.state = state;
        self.task.terminated = state.is_terminal();
        self
    }

    pub fn with_retries(mut self, retry_count: i32, retry_max: i32) -> Self {
        self.task.retry_count = retry_count;
        self.task.retry_max = retry_max;
        self
    }

    pub fn with_starts_after(mut self, starts_after: DateTime<Utc>) -> Self {
        self.task.starts_after = starts_after;
        self
    }

    pub fn with_timeouts(
        mut self,
        created_to_started_secs: i32,
        started_to_completed_secs: i32,
        heartbeat_secs: i32,
    ) -> Self {
        self.task.created_to_started_timeout_secs = created_to_started_secs;
        self.task.started_to_completed_timeout_secs = started_to_completed_secs;
        self.task.heartbeat_timeout_secs = heartbeat_secs;
        self
    }

    pub fn with_last_heartbeat_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.last_heartbeat_at = at;
        self
    }

    pub fn with_last_state_transition_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.last_state_transition_at = at;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Node entities
pub struct NodeBuilder {
    node: Node,
}

impl NodeBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            node: Node {
                id: 1,
                routing_id: "default".to_string(),
                deployment_id: 1,
                url: None,
                state: NodeState::Pending,
                image: "orchestrator/runner:test".to_string(),
                cpu_milli: 500,
                memory_mb: 512,
                storage_mb: 20000,
                error: None,
                created_at: now,
                last_state_transition_at: now,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.node.id = id;
        self
    }

    pub fn with_routing_id(mut self, routing_id: &str) -> Self {
        self.node.routing_id = routing_id.to_string();
        self
    }

    pub fn with_deployment_id(mut self, deployment_id: i64) -> Self {
        self.node.deployment_id = deployment_id;
        self
    }

    pub fn with_state(mut self, state: NodeState) -> Self {
        self.node.state = state;
        self
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.node.url = Some(url.to_string());
        self
    }

    pub fn with_last_state_transition_at(mut self, at: DateTime<Utc>) -> Self {
        self.node.last_state_transition_at = at;
        self
    }

    pub fn build(self) -> Node {
        self.node
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Deployment entities
pub struct DeploymentBuilder {
    deployment: Deployment,
}

impl DeploymentBuilder {
    pub fn new() -> Self {
        Self {
            deployment: Deployment {
                id: 1,
                commit_id: "test-commit".to_string(),
                created_at: Utc::now(),
                superseded_at: None,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.deployment.id = id;
        self
    }

    pub fn with_commit_id(mut self, commit_id: &str) -> Self {
        self.deployment.commit_id = commit_id.to_string();
        self
    }

    pub fn build(self) -> Deployment {
        self.deployment
    }
}

impl Default for DeploymentBuilder {
    fn default() -> Self {
        Self::new()
    }
}
