use async_trait::async_trait;

use crate::entities::Node;
use orchestrator_errors::SchedulerResult;

/// 通知节点在空闲后自行上报
#[async_trait]
pub trait NodeNotifier: Send + Sync {
    async fn notify_when_idle(&self, node: &Node) -> SchedulerResult<()>;
}
