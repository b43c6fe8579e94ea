use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskState {
    #[serde(rename = "CREATED")]
    Created,
    #[serde(rename = "STARTED")]
    Started,
    #[serde(rename = "SUCCEEDED")]
    Succeeded,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "EXPIRED")]
    Expired,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

/// 允许的任务状态转换表，表外的 (from, to) 一律拒绝
pub const VALID_TASK_TRANSITIONS: [(TaskState, TaskState); 7] = [
    (TaskState::Created, TaskState::Started),
    (TaskState::Created, TaskState::Cancelled),
    (TaskState::Created, TaskState::Expired),
    (TaskState::Started, TaskState::Succeeded),
    (TaskState::Started, TaskState::Failed),
    (TaskState::Started, TaskState::Cancelled),
    (TaskState::Started, TaskState::Expired),
];

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        TaskState::Created,
        TaskState::Started,
        TaskState::Succeeded,
        TaskState::Failed,
        TaskState::Expired,
        TaskState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Created => "CREATED",
            TaskState::Started => "STARTED",
            TaskState::Succeeded => "SUCCEEDED",
            TaskState::Failed => "FAILED",
            TaskState::Expired => "EXPIRED",
            TaskState::Cancelled => "CANCELLED",
        }
    }

    /// 终态：没有任何出边
    pub fn is_terminal(&self) -> bool {
        VALID_TASK_TRANSITIONS.iter().all(|(from, _)| from != self)
    }

    pub fn can_transition_to(&self, to: TaskState) -> bool {
        VALID_TASK_TRANSITIONS.contains(&(*self, to))
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(TaskState::Created),
            "STARTED" => Ok(TaskState::Started),
            "SUCCEEDED" => Ok(TaskState::Succeeded),
            "FAILED" => Ok(TaskState::Failed),
            "EXPIRED" => Ok(TaskState::Expired),
            "CANCELLED" => Ok(TaskState::Cancelled),
            _ => Err(format!("Invalid task state: {s}")),
        }
    }
}

/// 创建任务时由调用方提供的属性
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProps {
    pub name: String,
    pub payload: JsonValue,
    pub group_key: String,
    pub retry_max: i32,
    pub retry_count: i32,
    /// 为空时取创建时间
    pub starts_after: Option<DateTime<Utc>>,
    pub created_to_started_timeout_secs: i32,
    pub started_to_completed_timeout_secs: i32,
    pub heartbeat_timeout_secs: i32,
}

impl TaskProps {
    pub fn new(name: impl Into<String>, group_key: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            name: name.into(),
            payload,
            group_key: group_key.into(),
            retry_max: 0,
            retry_count: 0,
            starts_after: None,
            created_to_started_timeout_secs: 3600,
            started_to_completed_timeout_secs: 3600,
            heartbeat_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub payload: JsonValue,
    pub group_key: String,
    pub retry_max: i32,
    pub retry_count: i32,
    pub starts_after: DateTime<Utc>,
    pub created_to_started_timeout_secs: i32,
    pub started_to_completed_timeout_secs: i32,
    pub heartbeat_timeout_secs: i32,
    pub created_at: DateTime<Utc>,
    pub state: TaskState,
    pub last_state_transition_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub output: Option<JsonValue>,
    pub terminated: bool,
}

impl Task {
    /// 以 CREATED 状态构造新任务，id 为 UUIDv7，按字典序即创建顺序
    pub fn new(props: TaskProps, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            name: props.name,
            payload: props.payload,
            group_key: props.group_key,
            retry_max: props.retry_max,
            retry_count: props.retry_count,
            starts_after: props.starts_after.unwrap_or(now),
            created_to_started_timeout_secs: props.created_to_started_timeout_secs,
            started_to_completed_timeout_secs: props.started_to_completed_timeout_secs,
            heartbeat_timeout_secs: props.heartbeat_timeout_secs,
            created_at: now,
            state: TaskState::Created,
            last_state_transition_at: now,
            last_heartbeat_at: now,
            output: None,
            terminated: false,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.retry_max
    }

    /// 基于当前任务生成一次重试的创建参数
    pub fn retry_props(&self, now: DateTime<Utc>) -> TaskProps {
        TaskProps {
            name: self.name.clone(),
            payload: self.payload.clone(),
            group_key: self.group_key.clone(),
            retry_max: self.retry_max,
            retry_count: self.retry_count + 1,
            starts_after: Some(now),
            created_to_started_timeout_secs: self.created_to_started_timeout_secs,
            started_to_completed_timeout_secs: self.started_to_completed_timeout_secs,
            heartbeat_timeout_secs: self.heartbeat_timeout_secs,
        }
    }

    /// 判断任务在 `now` 时刻是否命中超时条件，按固定顺序返回第一个命中的原因
    pub fn expiry_reason(&self, now: DateTime<Utc>) -> Option<ExpiryReason> {
        match self.state {
            TaskState::Created => {
                let deadline =
                    self.starts_after + Duration::seconds(self.created_to_started_timeout_secs as i64);
                (deadline < now).then_some(ExpiryReason::CreatedToStarted)
            }
            TaskState::Started => {
                let heartbeat_deadline =
                    self.last_heartbeat_at + Duration::seconds(self.heartbeat_timeout_secs as i64);
                let completion_deadline = self.last_state_transition_at
                    + Duration::seconds(self.started_to_completed_timeout_secs as i64);
                if heartbeat_deadline < now {
                    Some(ExpiryReason::Heartbeat)
                } else if completion_deadline < now {
                    Some(ExpiryReason::StartedToCompleted)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn entity_description(&self) -> String {
        format!(
            "任务 '{}' (ID: {}, 分组: {})",
            self.name, self.id, self.group_key
        )
    }
}

/// 任务超时原因，写入 EXPIRED 任务的 output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    CreatedToStarted,
    Heartbeat,
    StartedToCompleted,
}

impl ExpiryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpiryReason::CreatedToStarted => "createdToStartedTimeoutSecs_exceeded",
            ExpiryReason::Heartbeat => "heartbeatTimeoutSecs_exceeded",
            ExpiryReason::StartedToCompleted => "startedToCompletedTimeoutSecs_exceeded",
        }
    }

    pub fn output(&self) -> JsonValue {
        serde_json::json!({ "reason": self.as_str() })
    }
}

/// 列表查询未指定 limit 时的条数
pub const DEFAULT_LIST_LIMIT: i64 = 100;

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub group_key: Option<String>,
    pub state: Option<TaskState>,
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeState {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "STARTING")]
    Starting,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "OUTDATED")]
    Outdated,
    #[serde(rename = "FINISHING")]
    Finishing,
    #[serde(rename = "IDLE")]
    Idle,
    #[serde(rename = "TERMINATED")]
    Terminated,
    #[serde(rename = "ERROR")]
    Error,
}

impl NodeState {
    pub const ALL: [NodeState; 8] = [
        NodeState::Pending,
        NodeState::Starting,
        NodeState::Running,
        NodeState::Outdated,
        NodeState::Finishing,
        NodeState::Idle,
        NodeState::Terminated,
        NodeState::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Pending => "PENDING",
            NodeState::Starting => "STARTING",
            NodeState::Running => "RUNNING",
            NodeState::Outdated => "OUTDATED",
            NodeState::Finishing => "FINISHING",
            NodeState::Idle => "IDLE",
            NodeState::Terminated => "TERMINATED",
            NodeState::Error => "ERROR",
        }
    }

    /// TERMINATED 与 ERROR 之后只剩删除
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Terminated | NodeState::Error)
    }

    pub fn can_transition_to(&self, to: NodeState) -> bool {
        use NodeState::*;
        match (self, to) {
            (from, Error) => !from.is_terminal(),
            (Pending, Starting)
            | (Starting, Running)
            | (Running, Outdated)
            | (Outdated, Finishing)
            | (Finishing, Idle)
            | (Idle, Terminated) => true,
            _ => false,
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(NodeState::Pending),
            "STARTING" => Ok(NodeState::Starting),
            "RUNNING" => Ok(NodeState::Running),
            "OUTDATED" => Ok(NodeState::Outdated),
            "FINISHING" => Ok(NodeState::Finishing),
            "IDLE" => Ok(NodeState::Idle),
            "TERMINATED" => Ok(NodeState::Terminated),
            "ERROR" => Ok(NodeState::Error),
            _ => Err(format!("Invalid node state: {s}")),
        }
    }
}

/// 节点默认资源规格
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NodeConfig {
    pub image: String,
    pub cpu_milli: i32,
    pub memory_mb: i32,
    pub storage_mb: i32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            image: "orchestrator/runner".to_string(),
            cpu_milli: 500,
            memory_mb: 512,
            storage_mb: 20000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: i64,
    pub routing_id: String,
    pub deployment_id: i64,
    pub url: Option<String>,
    pub state: NodeState,
    pub image: String,
    pub cpu_milli: i32,
    pub memory_mb: i32,
    pub storage_mb: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_state_transition_at: DateTime<Utc>,
}

impl Node {
    /// 自上次状态转换以来经过的时间
    pub fn time_in_state(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_state_transition_at
    }

    pub fn entity_description(&self) -> String {
        format!(
            "节点 (ID: {}, 路由: {}, 状态: {})",
            self.id, self.routing_id, self.state
        )
    }
}

/// 新建节点行所需的字段
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub routing_id: String,
    pub deployment_id: i64,
    pub image: String,
    pub cpu_milli: i32,
    pub memory_mb: i32,
    pub storage_mb: i32,
}

impl NewNode {
    /// 按部署与资源规格生成节点，镜像标记为 `image:commit_id`
    pub fn for_deployment(routing_id: impl Into<String>, deployment: &Deployment, config: &NodeConfig) -> Self {
        Self {
            routing_id: routing_id.into(),
            deployment_id: deployment.id,
            image: format!("{}:{}", config.image, deployment.commit_id),
            cpu_milli: config.cpu_milli,
            memory_mb: config.memory_mb,
            storage_mb: config.storage_mb,
        }
    }
}

// ---------------------------------------------------------------------------
// Deployment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub id: i64,
    pub commit_id: String,
    pub created_at: DateTime<Utc>,
    pub superseded_at: Option<DateTime<Utc>>,
}

impl Deployment {
    pub fn is_active(&self) -> bool {
        self.superseded_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn started_task(now: DateTime<Utc>) -> Task {
        let mut task = Task::new(TaskProps::new("sync", "group-a", json!({})), now);
        task.state = TaskState::Started;
        task
    }

    #[test]
    fn test_task_state_terminal_flags() {
        assert!(!TaskState::Created.is_terminal());
        assert!(!TaskState::Started.is_terminal());
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Expired.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn test_task_transition_table_is_exhaustive() {
        for from in TaskState::ALL {
            for to in TaskState::ALL {
                let expected = VALID_TASK_TRANSITIONS.contains(&(from, to));
                assert_eq!(from.can_transition_to(to), expected, "{from} -> {to}");
            }
        }
        assert_eq!(
            TaskState::ALL
                .iter()
                .flat_map(|from| TaskState::ALL.iter().map(move |to| (*from, *to)))
                .filter(|(from, to)| from.can_transition_to(*to))
                .count(),
            7
        );
    }

    #[test]
    fn test_task_state_round_trip_strings() {
        for state in TaskState::ALL {
            assert_eq!(state.as_str().parse::<TaskState>().unwrap(), state);
        }
        assert!("RUNNING".parse::<TaskState>().is_err());
    }

    #[test]
    fn test_new_task_defaults() {
        let now = Utc::now();
        let task = Task::new(TaskProps::new("sync", "group-a", json!({"a": 1})), now);
        assert_eq!(task.state, TaskState::Created);
        assert_eq!(task.created_at, now);
        assert_eq!(task.last_state_transition_at, now);
        assert_eq!(task.last_heartbeat_at, now);
        assert!(task.output.is_none());
        assert!(!task.terminated);
    }

    #[test]
    fn test_task_ids_sort_by_creation() {
        let now = Utc::now();
        let first = Task::new(TaskProps::new("a", "g", json!(null)), now);
        let second = Task::new(TaskProps::new("b", "g", json!(null)), now);
        assert!(first.id < second.id);
    }

    #[test]
    fn test_expiry_reason_created_to_started() {
        let now = Utc::now();
        let mut props = TaskProps::new("sync", "g", json!({}));
        props.starts_after = Some(now);
        props.created_to_started_timeout_secs = 60;
        let task = Task::new(props, now);

        assert_eq!(task.expiry_reason(now + Duration::seconds(60)), None);
        assert_eq!(
            task.expiry_reason(now + Duration::seconds(61)),
            Some(ExpiryReason::CreatedToStarted)
        );
    }

    #[test]
    fn test_expiry_reason_heartbeat_before_completion() {
        let now = Utc::now();
        let mut task = started_task(now);
        task.heartbeat_timeout_secs = 30;
        task.started_to_completed_timeout_secs = 30;

        assert_eq!(
            task.expiry_reason(now + Duration::seconds(31)),
            Some(ExpiryReason::Heartbeat)
        );
    }

    #[test]
    fn test_expiry_reason_started_to_completed() {
        let now = Utc::now();
        let mut task = started_task(now);
        task.heartbeat_timeout_secs = 30;
        task.started_to_completed_timeout_secs = 100;
        task.last_heartbeat_at = now + Duration::seconds(100);

        assert_eq!(task.expiry_reason(now + Duration::seconds(101)), Some(ExpiryReason::StartedToCompleted));
        assert_eq!(task.expiry_reason(now + Duration::seconds(99)), None);
    }

    #[test]
    fn test_terminal_tasks_never_expire() {
        let now = Utc::now();
        let mut task = started_task(now);
        task.state = TaskState::Succeeded;
        assert_eq!(task.expiry_reason(now + Duration::days(365)), None);
    }

    #[test]
    fn test_expiry_reason_output() {
        assert_eq!(
            ExpiryReason::CreatedToStarted.output(),
            json!({"reason": "createdToStartedTimeoutSecs_exceeded"})
        );
    }

    #[test]
    fn test_retry_props() {
        let now = Utc::now();
        let mut props = TaskProps::new("sync", "g", json!({"x": 1}));
        props.retry_max = 2;
        let task = Task::new(props, now);
        assert!(task.can_retry());

        let retry = task.retry_props(now);
        assert_eq!(retry.retry_count, 1);
        assert_eq!(retry.payload, json!({"x": 1}));
        assert_eq!(retry.group_key, "g");
    }

    #[test]
    fn test_node_transitions() {
        assert!(NodeState::Pending.can_transition_to(NodeState::Starting));
        assert!(NodeState::Starting.can_transition_to(NodeState::Running));
        assert!(NodeState::Running.can_transition_to(NodeState::Outdated));
        assert!(NodeState::Outdated.can_transition_to(NodeState::Finishing));
        assert!(NodeState::Finishing.can_transition_to(NodeState::Idle));
        assert!(NodeState::Idle.can_transition_to(NodeState::Terminated));
        assert!(NodeState::Idle.can_transition_to(NodeState::Error));

        assert!(!NodeState::Terminated.can_transition_to(NodeState::Error));
        assert!(!NodeState::Error.can_transition_to(NodeState::Error));
        assert!(!NodeState::Running.can_transition_to(NodeState::Pending));
        assert!(!NodeState::Idle.can_transition_to(NodeState::Running));
    }

    #[test]
    fn test_new_node_for_deployment_uses_configured_storage() {
        let deployment = Deployment {
            id: 3,
            commit_id: "abc123".to_string(),
            created_at: Utc::now(),
            superseded_at: None,
        };
        let config = NodeConfig {
            image: "runner".to_string(),
            cpu_milli: 1000,
            memory_mb: 2048,
            storage_mb: 4096,
        };
        let node = NewNode::for_deployment("default", &deployment, &config);
        assert_eq!(node.image, "runner:abc123");
        assert_eq!(node.deployment_id, 3);
        assert_eq!(node.storage_mb, 4096);
        assert_eq!(node.memory_mb, 2048);
    }
}
