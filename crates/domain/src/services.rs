//! # 领域服务模块
//!
//! 节点状态转换的业务规则集中在这里，Supervisor 和节点自报接口
//! 都通过 [`NodeLifecycleService`] 修改节点行。
//!
//! ## 转换规则
//!
//! - 只允许 [`NodeState::can_transition_to`] 表中的转换
//! - 每次更新都以读取到的当前状态为条件，并发修改时不会覆盖别人的结果
//! - 更新失败时重新读取节点，区分"节点已不存在"与"状态已被改变"

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::clock::Clock;
use crate::entities::{Node, NodeState};
use crate::repositories::NodeRepository;
use crate::value_objects::NodeStateChange;
use orchestrator_errors::{SchedulerError, SchedulerResult};

/// 节点生命周期服务
#[derive(Clone)]
pub struct NodeLifecycleService {
    nodes: Arc<dyn NodeRepository>,
    clock: Arc<dyn Clock>,
}

impl NodeLifecycleService {
    pub fn new(nodes: Arc<dyn NodeRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { nodes, clock }
    }

    pub fn repository(&self) -> &Arc<dyn NodeRepository> {
        &self.nodes
    }

    /// 将节点转换到新状态
    ///
    /// # 错误
    ///
    /// * `NodeNotFound` - 节点不存在
    /// * `InvalidNodeTransition` - 当前状态不允许转换到 `to`
    pub async fn transition(&self, node_id: i64, to: NodeState) -> SchedulerResult<Node> {
        self.apply(node_id, to, None, None).await
    }

    /// 将节点标记为 ERROR 并记录原因
    pub async fn fail(&self, node_id: i64, reason: &str) -> SchedulerResult<Node> {
        self.apply(node_id, NodeState::Error, None, Some(reason)).await
    }

    /// 节点启动完成后自报：STARTING -> RUNNING 并记录访问地址
    pub async fn register(&self, node_id: i64, url: &str) -> SchedulerResult<Node> {
        if url.trim().is_empty() {
            return Err(SchedulerError::validation_error("节点URL不能为空"));
        }
        self.apply(node_id, NodeState::Running, Some(url), None).await
    }

    /// 节点排空完成后自报：FINISHING -> IDLE
    pub async fn idle(&self, node_id: i64) -> SchedulerResult<Node> {
        let node = self.load(node_id).await?;
        if node.state != NodeState::Finishing {
            return Err(SchedulerError::invalid_node_transition(node.state, NodeState::Idle));
        }
        self.apply(node_id, NodeState::Idle, None, None).await
    }

    pub async fn remove(&self, node_id: i64) -> SchedulerResult<Node> {
        self.nodes
            .remove(node_id)
            .await?
            .ok_or_else(|| SchedulerError::node_not_found(node_id))
    }

    #[instrument(skip(self), fields(node_id = node_id, to = %to))]
    async fn apply(
        &self,
        node_id: i64,
        to: NodeState,
        url: Option<&str>,
        error: Option<&str>,
    ) -> SchedulerResult<Node> {
        let node = self.load(node_id).await?;
        if !node.state.can_transition_to(to) {
            return Err(SchedulerError::invalid_node_transition(node.state, to));
        }

        let mut change = NodeStateChange::new(node_id, node.state, to);
        if let Some(url) = url {
            change = change.with_url(url);
        }
        if let Some(error) = error {
            change = change.with_error(error);
        }

        match self.nodes.update_state(&change, self.clock.now()).await? {
            Some(updated) => {
                debug!("节点 {} 状态转换: {} -> {}", node_id, node.state, to);
                Ok(updated)
            }
            None => {
                // 读取之后状态被并发修改
                let current = self.load(node_id).await?;
                Err(SchedulerError::invalid_node_transition(current.state, to))
            }
        }
    }

    async fn load(&self, node_id: i64) -> SchedulerResult<Node> {
        self.nodes
            .get_by_id(node_id)
            .await?
            .ok_or_else(|| SchedulerError::node_not_found(node_id))
    }
}
