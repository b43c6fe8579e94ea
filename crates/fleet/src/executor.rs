//! 操作执行器
//!
//! 把 [`Operation`] 落实到节点提供者、通知器和节点表上。
//! 单个操作失败只影响它自己，下一轮 tick 会根据最新状态重新规划。

use std::sync::Arc;

use orchestrator_domain::{
    Clock, Deployment, NewNode, Node, NodeConfig, NodeLifecycleService, NodeNotifier,
    NodeProvider, NodeState,
};
use orchestrator_errors::SchedulerResult;
use tracing::{info, instrument, warn};

use crate::operation::{FailReason, Operation};

pub struct OperationExecutor {
    lifecycle: NodeLifecycleService,
    provider: Arc<dyn NodeProvider>,
    notifier: Arc<dyn NodeNotifier>,
    clock: Arc<dyn Clock>,
    default_node: NodeConfig,
    local_mode: bool,
}

impl OperationExecutor {
    pub fn new(
        lifecycle: NodeLifecycleService,
        provider: Arc<dyn NodeProvider>,
        notifier: Arc<dyn NodeNotifier>,
        clock: Arc<dyn Clock>,
        default_node: NodeConfig,
        local_mode: bool,
    ) -> Self {
        Self {
            lifecycle,
            provider,
            notifier,
            clock,
            default_node,
            local_mode,
        }
    }

    #[instrument(skip(self), fields(operation = %operation))]
    pub async fn execute(&self, operation: &Operation) -> SchedulerResult<()> {
        match operation {
            Operation::Create {
                routing_id,
                deployment,
            } => self.create_node(routing_id, deployment, None).await.map(|_| ()),
            Operation::Start { node } => self.start(node).await,
            Operation::Fail { node, reason } => self.fail(node, *reason).await,
            Operation::Outdate { node_id } => self
                .lifecycle
                .transition(*node_id, NodeState::Outdated)
                .await
                .map(|_| ()),
            Operation::Finishing { node } => self.finishing(node).await,
            Operation::FinishingTimeout { node } => self.finishing_timeout(node).await,
            Operation::Terminate { node } => self.terminate(node).await,
            Operation::Remove { node_id } => self.lifecycle.remove(*node_id).await.map(|_| ()),
        }
    }

    /// 为部署新建一个 PENDING 节点，未指定配置时使用默认节点配置
    pub async fn create_node(
        &self,
        routing_id: &str,
        deployment: &Deployment,
        config: Option<&NodeConfig>,
    ) -> SchedulerResult<Node> {
        let config = config.unwrap_or(&self.default_node);
        let new_node = NewNode::for_deployment(routing_id, deployment, config);
        let node = self
            .lifecycle
            .repository()
            .create(&new_node, self.clock.now())
            .await?;
        info!("已创建{}, 镜像 {}", node.entity_description(), node.image);
        Ok(node)
    }

    /// 提供者启动失败时节点保持 PENDING，下一轮重试
    async fn start(&self, node: &Node) -> SchedulerResult<()> {
        self.provider.start(node).await?;
        self.lifecycle.transition(node.id, NodeState::Starting).await?;
        Ok(())
    }

    async fn fail(&self, node: &Node, reason: FailReason) -> SchedulerResult<()> {
        if let Err(e) = self.provider.terminate(node).await {
            warn!("终止{}失败: {}", node.entity_description(), e);
        }
        self.lifecycle.fail(node.id, reason.as_str()).await?;
        warn!("{}已标记为 ERROR: {}", node.entity_description(), reason);
        Ok(())
    }

    /// 通知失败不阻止状态转换
    async fn finishing(&self, node: &Node) -> SchedulerResult<()> {
        if node.url.is_some() {
            if let Err(e) = self.notifier.notify_when_idle(node).await {
                warn!("通知{}排空失败: {}", node.entity_description(), e);
            }
        } else {
            warn!("{}没有 URL，跳过排空通知", node.entity_description());
        }
        self.lifecycle.transition(node.id, NodeState::Finishing).await?;
        Ok(())
    }

    async fn finishing_timeout(&self, node: &Node) -> SchedulerResult<()> {
        if self.local_mode {
            // 本地进程无法自报空闲
            self.lifecycle.transition(node.id, NodeState::Idle).await?;
            info!("本地模式下{}排空超时, 直接置为 IDLE", node.entity_description());
        } else {
            warn!(
                "{}排空超时, 已持续 {} 秒",
                node.entity_description(),
                node.time_in_state(self.clock.now()).num_seconds()
            );
        }
        Ok(())
    }

    /// 提供者终止失败时节点保持 IDLE，下一轮重试
    async fn terminate(&self, node: &Node) -> SchedulerResult<()> {
        self.provider.terminate(node).await?;
        self.lifecycle.transition(node.id, NodeState::Terminated).await?;
        Ok(())
    }
}
