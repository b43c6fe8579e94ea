use std::time::Duration;

use async_trait::async_trait;

use orchestrator_errors::SchedulerResult;

/// 集群范围的互斥锁
#[async_trait]
pub trait LockManager: Send + Sync {
    /// 尝试获取锁，已被其他实例持有时返回 `Ok(None)`
    ///
    /// `hold` 是最长持有时间，超过后锁由存储端自动释放。
    async fn try_acquire(
        &self,
        key: &str,
        hold: Duration,
    ) -> SchedulerResult<Option<Box<dyn LockLease>>>;
}

/// 已获取的锁
#[async_trait]
pub trait LockLease: Send {
    fn key(&self) -> &str;
    async fn release(self: Box<Self>) -> SchedulerResult<()>;
}
