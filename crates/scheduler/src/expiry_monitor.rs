use std::sync::Arc;
use std::time::Duration;

use orchestrator_config::SchedulerConfig;
use orchestrator_errors::SchedulerResult;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::task_scheduler::TaskScheduler;

/// 超时扫描服务
///
/// 周期性调用 [`TaskScheduler::expires_if_timeout`]，并为过期任务安排重试。
pub struct ExpiryMonitor {
    scheduler: Arc<TaskScheduler>,
    interval: Duration,
    running: Arc<RwLock<bool>>,
}

impl ExpiryMonitor {
    pub fn new(scheduler: Arc<TaskScheduler>, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn from_config(scheduler: Arc<TaskScheduler>, config: &SchedulerConfig) -> Self {
        Self::new(scheduler, Duration::from_millis(config.expiry_interval_ms))
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// 启动扫描循环，直到 [`stop`](Self::stop) 被调用才返回
    pub async fn start(&self) -> SchedulerResult<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                info!("超时扫描服务已在运行");
                return Ok(());
            }
            *running = true;
        }

        info!("启动超时扫描服务, 周期 {:?}", self.interval);

        loop {
            if !*self.running.read().await {
                info!("收到停止信号，退出超时扫描循环");
                break;
            }

            if let Err(e) = self.run_once().await {
                error!("超时扫描时出错: {}", e);
            }

            tokio::time::sleep(self.interval).await;
        }

        Ok(())
    }

    pub async fn stop(&self) {
        info!("停止超时扫描服务");
        *self.running.write().await = false;
    }

    /// 执行一次扫描，返回被过期的任务数
    pub async fn run_once(&self) -> SchedulerResult<usize> {
        let expired = self.scheduler.expires_if_timeout().await?;
        if !expired.is_empty() {
            info!("本轮共过期 {} 个任务", expired.len());
        }

        for task in &expired {
            if let Err(e) = self.scheduler.retry(task).await {
                error!("为{}安排重试失败: {}", task.entity_description(), e);
            }
        }

        Ok(expired.len())
    }
}
