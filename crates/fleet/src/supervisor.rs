//! # Fleet Supervisor
//!
//! 周期性地对整个节点集群做一次 "规划 + 执行"。
//!
//! ## 状态
//!
//! `Stopped -> Running -> Stopping -> Stopped`，保存在实例字段中。
//!
//! ## 循环
//!
//! 每轮在集群锁 `fleet_supervisor` 内执行一次 [`Supervisor::tick`]，
//! 同一时刻集群内只有一个实例在规划和执行。拿不到锁、tick 失败或超时，
//! 都会等待 `retry_delay` 后继续。超时时设置取消标记，
//! 等正在执行的操作收尾后再释放锁。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use orchestrator_config::SupervisorConfig;
use orchestrator_domain::{
    Clock, Deployment, DeploymentRepository, LockManager, Node, NodeConfig, NodeRepository,
    NodeSearch,
};
use orchestrator_errors::{SchedulerError, SchedulerResult};
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::executor::OperationExecutor;
use crate::operation::Operation;
use crate::planner::Planner;

pub const SUPERVISOR_LOCK_KEY: &str = "fleet_supervisor";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Running,
    Stopping,
}

/// 一次 tick 的执行结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub planned: usize,
    pub executed: usize,
    pub failed: usize,
    /// 因取消而未执行的操作数
    pub skipped: usize,
}

pub struct Supervisor {
    state: RwLock<SupervisorState>,
    cancelled: AtomicBool,
    wake: Notify,
    planner: Planner,
    executor: OperationExecutor,
    nodes: Arc<dyn NodeRepository>,
    deployments: Arc<dyn DeploymentRepository>,
    locks: Arc<dyn LockManager>,
    clock: Arc<dyn Clock>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(
        planner: Planner,
        executor: OperationExecutor,
        nodes: Arc<dyn NodeRepository>,
        deployments: Arc<dyn DeploymentRepository>,
        locks: Arc<dyn LockManager>,
        clock: Arc<dyn Clock>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            state: RwLock::new(SupervisorState::Stopped),
            cancelled: AtomicBool::new(false),
            wake: Notify::new(),
            planner,
            executor,
            nodes,
            deployments,
            locks,
            clock,
            config,
        }
    }

    pub async fn state(&self) -> SupervisorState {
        *self.state.read().await
    }

    /// 启动循环，直到 [`stop`](Self::stop) 被调用才返回
    ///
    /// 正在停止时先等待上一次循环退出。
    ///
    /// # 错误
    ///
    /// * `NoActiveDeployment` - 没有活跃部署，拒绝启动
    /// * `Timeout` - 上一次循环在 `stop_timeout` 内没有退出
    pub async fn start(&self) -> SchedulerResult<()> {
        if self.state().await == SupervisorState::Stopping {
            info!("Fleet Supervisor 正在停止, 等待上一次循环退出");
            if !self.wait_until_stopped().await {
                return Err(SchedulerError::timeout_error(format!(
                    "上一次循环在 {:?} 内没有退出",
                    self.config.stop_timeout()
                )));
            }
        }

        {
            let mut state = self.state.write().await;
            if *state != SupervisorState::Stopped {
                info!("Fleet Supervisor 已在运行 ({:?})", *state);
                return Ok(());
            }
            *state = SupervisorState::Running;
        }

        match self.deployments.get_active().await {
            Ok(Some(deployment)) => {
                info!("Fleet Supervisor 已启动, 当前部署 {}", deployment.commit_id);
            }
            Ok(None) => {
                error!("Fleet Supervisor 启动失败: 没有活跃部署");
                *self.state.write().await = SupervisorState::Stopped;
                return Err(SchedulerError::NoActiveDeployment);
            }
            Err(e) => {
                error!("Fleet Supervisor 启动失败: {}", e);
                *self.state.write().await = SupervisorState::Stopped;
                return Err(e);
            }
        }

        while self.state().await == SupervisorState::Running {
            let delay = match self.locked_tick().await {
                Ok(report) => {
                    if report.planned > 0 {
                        debug!("tick 完成: {:?}", report);
                    }
                    self.config.tick_interval()
                }
                Err(e) => {
                    warn!("Fleet Supervisor: {}, {:?} 后重试", e, self.config.retry_delay());
                    self.config.retry_delay()
                }
            };
            self.pause(delay).await;
        }

        *self.state.write().await = SupervisorState::Stopped;
        info!("Fleet Supervisor 循环已退出");
        Ok(())
    }

    /// 在后台任务中运行 [`start`](Self::start)
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<SchedulerResult<()>> {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move { supervisor.start().await })
    }

    /// 请求停止并等待循环退出，最多等待 `stop_timeout`
    pub async fn stop(&self) {
        {
            let mut state = self.state.write().await;
            if *state == SupervisorState::Stopped {
                info!("Fleet Supervisor 已停止");
                return;
            }
            *state = SupervisorState::Stopping;
        }
        info!("正在停止 Fleet Supervisor...");
        self.wake.notify_waiters();

        if !self.wait_until_stopped().await {
            warn!("等待 Fleet Supervisor 停止超时 ({:?})", self.config.stop_timeout());
            return;
        }
        info!("Fleet Supervisor 已停止");
    }

    /// 循环任务被强制中止后调用，此时 `start` 已来不及写回状态
    pub(crate) async fn mark_stopped(&self) {
        *self.state.write().await = SupervisorState::Stopped;
    }

    async fn wait_until_stopped(&self) -> bool {
        let wait = async {
            while self.state().await != SupervisorState::Stopped {
                tokio::time::sleep(self.config.stop_poll_interval()).await;
            }
        };
        tokio::time::timeout(self.config.stop_timeout(), wait)
            .await
            .is_ok()
    }

    /// 规划并执行一轮
    pub async fn tick(&self) -> SchedulerResult<TickReport> {
        self.cancelled.store(false, Ordering::SeqCst);
        let plan = self.plan().await?;
        Ok(self.execute_plan(&plan).await)
    }

    /// 按路由 ID 分页遍历所有节点，生成操作列表
    ///
    /// 第一页读取失败时返回错误；后续页失败只记录日志，返回已生成的部分。
    pub async fn plan(&self) -> SchedulerResult<Vec<Operation>> {
        let deployment = self
            .deployments
            .get_active()
            .await?
            .ok_or(SchedulerError::NoActiveDeployment)?;
        let now = self.clock.now();

        let mut plan = Vec::new();
        let mut search = NodeSearch::all_states(self.config.search_page_size);
        let mut first_page = true;

        loop {
            let page = match self.nodes.search(&search).await {
                Ok(page) => page,
                Err(e) if first_page => return Err(e),
                Err(e) => {
                    error!("读取下一页节点失败 (游标 {:?}): {}", search.cursor, e);
                    break;
                }
            };
            first_page = false;

            for group in &page.groups {
                plan.extend(self.planner.plan_group(group, &deployment, now));
            }

            match page.next_cursor {
                Some(cursor) => search = search.after(cursor),
                None => break,
            }
        }

        Ok(plan)
    }

    /// 按顺序执行，每个操作前检查取消标记
    pub async fn execute_plan(&self, plan: &[Operation]) -> TickReport {
        let mut report = TickReport {
            planned: plan.len(),
            ..TickReport::default()
        };
        if !plan.is_empty() {
            info!(
                "执行计划: [{}]",
                plan.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
            );
        }

        for (index, operation) in plan.iter().enumerate() {
            if self.cancelled.load(Ordering::SeqCst) {
                report.skipped = plan.len() - index;
                warn!("tick 已取消, 剩余 {} 个操作留到下一轮", report.skipped);
                break;
            }
            match self.executor.execute(operation).await {
                Ok(()) => report.executed += 1,
                Err(e) => {
                    report.failed += 1;
                    error!("执行操作 {} 失败: {}", operation, e);
                }
            }
        }

        report
    }

    /// 为路由 ID 在当前活跃部署上创建节点
    pub async fn create_node(
        &self,
        routing_id: &str,
        config: Option<&NodeConfig>,
    ) -> SchedulerResult<Node> {
        let deployment = self.active_deployment().await?;
        self.executor.create_node(routing_id, &deployment, config).await
    }

    async fn active_deployment(&self) -> SchedulerResult<Deployment> {
        self.deployments
            .get_active()
            .await?
            .ok_or(SchedulerError::NoActiveDeployment)
    }

    async fn locked_tick(&self) -> SchedulerResult<TickReport> {
        let hold = self.config.tick_timeout();
        let lease = self
            .locks
            .try_acquire(SUPERVISOR_LOCK_KEY, hold)
            .await?
            .ok_or_else(|| {
                SchedulerError::LockUnavailable(format!("{SUPERVISOR_LOCK_KEY} 已被其他实例持有"))
            })?;

        let tick = self.tick();
        tokio::pin!(tick);

        let result = tokio::select! {
            result = &mut tick => result,
            _ = tokio::time::sleep(hold) => {
                self.cancelled.store(true, Ordering::SeqCst);
                if let Err(e) = (&mut tick).await {
                    debug!("已取消的 tick 结束: {}", e);
                }
                Err(SchedulerError::timeout_error(format!("tick 超过 {hold:?}")))
            }
        };

        if let Err(e) = lease.release().await {
            warn!("释放集群锁失败: {}", e);
        }
        result
    }

    /// 等待 `delay`，停止请求会提前唤醒
    async fn pause(&self, delay: Duration) {
        if delay.is_zero() {
            tokio::task::yield_now().await;
            return;
        }
        let notified = self.wake.notified();
        tokio::pin!(notified);
        // 先登记再检查状态，避免错过 stop 的通知
        notified.as_mut().enable();
        if self.state().await != SupervisorState::Running {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = &mut notified => {}
        }
    }
}
