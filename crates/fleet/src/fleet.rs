//! Fleet 门面
//!
//! 组装仓储、节点提供者、通知器、集群锁与 Supervisor，
//! 并提供部署发布与节点自报接口。

use std::sync::Arc;

use orchestrator_config::FleetConfig;
use orchestrator_domain::{
    Clock, Deployment, DeploymentRepository, LockManager, Node, NodeLifecycleService,
    NodeNotifier, NodeProvider, NodeState,
};
use orchestrator_errors::{SchedulerError, SchedulerResult};
use orchestrator_infrastructure::{DatabaseManager, LocalNodeProvider};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::executor::OperationExecutor;
use crate::notifier::HttpNodeNotifier;
use crate::planner::Planner;
use crate::supervisor::{Supervisor, SupervisorState};

pub struct Fleet {
    db: Arc<DatabaseManager>,
    deployments: Arc<dyn DeploymentRepository>,
    lifecycle: NodeLifecycleService,
    supervisor: Arc<Supervisor>,
    clock: Arc<dyn Clock>,
    handle: Mutex<Option<JoinHandle<SchedulerResult<()>>>>,
}

impl Fleet {
    pub fn new(
        db: Arc<DatabaseManager>,
        config: &FleetConfig,
        provider: Arc<dyn NodeProvider>,
        notifier: Arc<dyn NodeNotifier>,
        locks: Arc<dyn LockManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let nodes = db.node_repository();
        let deployments = db.deployment_repository();
        let lifecycle = NodeLifecycleService::new(nodes.clone(), clock.clone());

        let executor = OperationExecutor::new(
            lifecycle.clone(),
            provider,
            notifier,
            clock.clone(),
            config.default_node.clone(),
            config.is_local(),
        );
        let supervisor = Supervisor::new(
            Planner::new(config.effective_timeouts()),
            executor,
            nodes,
            deployments.clone(),
            locks,
            clock.clone(),
            config.supervisor.clone(),
        );

        Self {
            db,
            deployments,
            lifecycle,
            supervisor: Arc::new(supervisor),
            clock,
            handle: Mutex::new(None),
        }
    }

    /// 按配置选择节点提供者，并使用数据库对应的集群锁
    ///
    /// 远程节点提供者由嵌入方实现，通过 [`Fleet::new`] 传入。
    pub fn from_config(
        db: Arc<DatabaseManager>,
        config: &FleetConfig,
        clock: Arc<dyn Clock>,
    ) -> SchedulerResult<Self> {
        if !config.is_local() {
            return Err(SchedulerError::config_error(
                "runner_type = remote 需要通过 Fleet::new 提供 NodeProvider 实现",
            ));
        }
        let provider = Arc::new(LocalNodeProvider::from_config(&config.local_provider));
        let notifier = Arc::new(HttpNodeNotifier::from_config(&config.notify)?);
        let locks = db.lock_manager(clock.clone());
        Ok(Self::new(db, config, provider, notifier, locks, clock))
    }

    pub async fn migrate(&self) -> SchedulerResult<()> {
        self.db.migrate().await
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// 在后台启动 Supervisor
    ///
    /// # 错误
    ///
    /// * `NoActiveDeployment` - 还没有发布过部署
    pub async fn start(&self) -> SchedulerResult<()> {
        if self.deployments.get_active().await?.is_none() {
            error!("没有活跃部署, 无法启动 Fleet");
            return Err(SchedulerError::NoActiveDeployment);
        }

        let mut handle = self.handle.lock().await;
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            info!("Fleet 已在运行");
            return Ok(());
        }
        *handle = Some(self.supervisor.spawn());
        Ok(())
    }

    pub async fn stop(&self) {
        self.supervisor.stop().await;

        let Some(handle) = self.handle.lock().await.take() else {
            return;
        };
        if self.supervisor.state().await != SupervisorState::Stopped {
            warn!("Supervisor 未在超时内停止, 强制中止");
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Supervisor 任务异常结束: {}", e);
                }
            }
            self.supervisor.mark_stopped().await;
            return;
        }
        match handle.await {
            Ok(Err(e)) => warn!("Supervisor 退出时出错: {}", e),
            Err(e) => warn!("Supervisor 任务异常结束: {}", e),
            Ok(Ok(())) => {}
        }
    }

    /// 发布新部署，旧部署被标记为已取代
    pub async fn rollout(&self, commit_id: &str) -> SchedulerResult<Deployment> {
        if commit_id.trim().is_empty() {
            return Err(SchedulerError::validation_error("commit_id 不能为空"));
        }
        self.deployments
            .create_active(commit_id, self.clock.now())
            .await
    }

    pub async fn get_active_deployment(&self) -> SchedulerResult<Option<Deployment>> {
        self.deployments.get_active().await
    }

    /// 路由 ID 下任意一个 RUNNING 节点
    pub async fn get_running_node(&self, routing_id: &str) -> SchedulerResult<Option<Node>> {
        let nodes = self
            .lifecycle
            .repository()
            .list_by_routing_id(routing_id, &[NodeState::Running])
            .await?;
        Ok(nodes.into_iter().next())
    }

    pub async fn create_node(&self, routing_id: &str) -> SchedulerResult<Node> {
        self.supervisor.create_node(routing_id, None).await
    }

    /// 节点启动完成后自报 URL
    pub async fn register_node(&self, node_id: i64, url: &str) -> SchedulerResult<Node> {
        let node = self.lifecycle.register(node_id, url).await?;
        info!("{}已注册, URL {}", node.entity_description(), url);
        Ok(node)
    }

    /// 节点排空完成后自报空闲
    pub async fn idle_node(&self, node_id: i64) -> SchedulerResult<Node> {
        let node = self.lifecycle.idle(node_id).await?;
        info!("{}已空闲", node.entity_description());
        Ok(node)
    }
}
