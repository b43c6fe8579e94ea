//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口，PostgreSQL 与 SQLite 各有一套实现。
//! 所有涉及时间的方法都显式接收 `now`，不依赖数据库的当前时间。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::entities::{Deployment, NewNode, Node, NodeState, Task, TaskFilter, TaskState};
use crate::value_objects::{NodeSearch, NodeSearchPage, NodeStateChange};
use orchestrator_errors::SchedulerResult;

/// 任务仓储抽象
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &Task) -> SchedulerResult<Task>;
    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Task>>;
    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>>;
    /// 只更新心跳时间，任务不存在时返回 None
    async fn heartbeat(&self, id: &str, now: DateTime<Utc>) -> SchedulerResult<Option<Task>>;
    /// 以 `expected` 状态为条件的单行更新，条件不满足时返回 None
    async fn compare_and_transition(
        &self,
        id: &str,
        expected: TaskState,
        new_state: TaskState,
        output: Option<&JsonValue>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<Task>>;
    /// 原子地领取至多 `limit` 个可执行任务并置为 STARTED，结果按 id 排序
    async fn dequeue(
        &self,
        group_key: &str,
        limit: i64,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Vec<Task>>;
    /// 将所有超时任务置为 EXPIRED，返回被过期的任务
    async fn expire_timed_out(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<Task>>;
}

/// 节点仓储抽象
#[async_trait]
pub trait NodeRepository: Send + Sync {
    async fn create(&self, node: &NewNode, now: DateTime<Utc>) -> SchedulerResult<Node>;
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Node>>;
    /// 按路由 ID 游标分页，同一路由 ID 的节点总在同一页
    async fn search(&self, search: &NodeSearch) -> SchedulerResult<NodeSearchPage>;
    /// 以当前状态为条件的单行更新，条件不满足时返回 None
    async fn update_state(
        &self,
        change: &NodeStateChange,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<Node>>;
    async fn list_by_routing_id(
        &self,
        routing_id: &str,
        states: &[NodeState],
    ) -> SchedulerResult<Vec<Node>>;
    /// 硬删除，返回被删除的行
    async fn remove(&self, id: i64) -> SchedulerResult<Option<Node>>;
}

/// 部署仓储抽象
#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    /// 创建新的活跃部署，并在同一事务内标记旧部署为已取代
    async fn create_active(&self, commit_id: &str, now: DateTime<Utc>) -> SchedulerResult<Deployment>;
    async fn get_active(&self) -> SchedulerResult<Option<Deployment>>;
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Deployment>>;
}
