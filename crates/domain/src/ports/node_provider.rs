use async_trait::async_trait;

use crate::entities::Node;
use orchestrator_errors::SchedulerResult;

/// 物理计算资源的提供者
///
/// `start` 与 `terminate` 都可能被重复调用，实现必须幂等。
#[async_trait]
pub trait NodeProvider: Send + Sync {
    async fn start(&self, node: &Node) -> SchedulerResult<()>;
    async fn terminate(&self, node: &Node) -> SchedulerResult<()>;
}
