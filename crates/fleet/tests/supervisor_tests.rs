use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use orchestrator_config::{FleetConfig, RunnerType, SupervisorConfig};
use orchestrator_domain::{Clock, ManualClock, NodeRepository, NodeState, SchedulerError};
use orchestrator_fleet::{Fleet, Supervisor, SupervisorState};
use orchestrator_testing_utils::{
    MockLockManager, MockNodeNotifier, MockNodeProvider, SqliteTestDatabase, TestEnv,
};

struct Harness {
    db: SqliteTestDatabase,
    clock: Arc<ManualClock>,
    provider: MockNodeProvider,
    notifier: MockNodeNotifier,
    locks: MockLockManager,
    fleet: Fleet,
}

impl Harness {
    fn supervisor(&self) -> &Arc<Supervisor> {
        self.fleet.supervisor()
    }
}

fn fast_config() -> FleetConfig {
    FleetConfig {
        supervisor: SupervisorConfig {
            tick_timeout_ms: 1000,
            stop_timeout_ms: 2000,
            stop_poll_interval_ms: 10,
            retry_delay_ms: 20,
            tick_interval_ms: 20,
            search_page_size: 100,
        },
        ..FleetConfig::default()
    }
}

async fn harness_with(config: FleetConfig) -> Harness {
    let db = SqliteTestDatabase::new().await.unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let provider = MockNodeProvider::new();
    let notifier = MockNodeNotifier::new();
    let locks = MockLockManager::new();
    let fleet = Fleet::new(
        db.shared_manager(),
        &config,
        Arc::new(provider.clone()),
        Arc::new(notifier.clone()),
        Arc::new(locks.clone()),
        clock.clone(),
    );
    Harness {
        db,
        clock,
        provider,
        notifier,
        locks,
        fleet,
    }
}

async fn harness() -> Harness {
    harness_with(fast_config()).await
}

#[tokio::test]
async fn test_plan_requires_active_deployment() {
    let h = harness().await;
    let err = h.supervisor().plan().await.unwrap_err();
    assert!(matches!(err, SchedulerError::NoActiveDeployment));

    let err = h.supervisor().start().await.unwrap_err();
    assert!(matches!(err, SchedulerError::NoActiveDeployment));
    assert_eq!(h.supervisor().state().await, SupervisorState::Stopped);

    assert!(matches!(
        h.fleet.start().await.unwrap_err(),
        SchedulerError::NoActiveDeployment
    ));
}

#[tokio::test]
async fn test_tick_starts_pending_nodes() {
    let h = harness().await;
    let deployment = h.fleet.rollout("c1").await.unwrap();
    let node = h
        .db
        .insert_node("r1", &deployment, NodeState::Pending, h.clock.now())
        .await
        .unwrap();

    let report = h.supervisor().tick().await.unwrap();
    assert_eq!(report.planned, 1);
    assert_eq!(report.executed, 1);
    assert_eq!(h.provider.started_ids(), vec![node.id]);
    assert_eq!(h.db.node_state(node.id).await.unwrap(), Some(NodeState::Starting));
}

#[tokio::test]
async fn test_failed_start_leaves_node_pending_and_continues() {
    let h = harness().await;
    let deployment = h.fleet.rollout("c1").await.unwrap();
    let pending = h
        .db
        .insert_node("r1", &deployment, NodeState::Pending, h.clock.now())
        .await
        .unwrap();
    let old = h.clock.now() - Duration::days(2);
    let terminated = h
        .db
        .insert_node("r2", &deployment, NodeState::Terminated, old)
        .await
        .unwrap();

    h.provider.set_fail_start(true);
    let report = h.supervisor().tick().await.unwrap();
    assert_eq!(report.planned, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.executed, 1);

    assert_eq!(h.db.node_state(pending.id).await.unwrap(), Some(NodeState::Pending));
    assert_eq!(h.db.node_state(terminated.id).await.unwrap(), None);
}

#[tokio::test]
async fn test_plan_walks_every_page() {
    let mut config = fast_config();
    config.supervisor.search_page_size = 1;
    let h = harness_with(config).await;
    let deployment = h.fleet.rollout("c1").await.unwrap();
    for routing_id in ["a", "b", "c"] {
        h.db
            .insert_node(routing_id, &deployment, NodeState::Pending, h.clock.now())
            .await
            .unwrap();
    }

    let plan = h.supervisor().plan().await.unwrap();
    assert_eq!(plan.len(), 3);
    assert!(plan.iter().all(|op| op.kind() == "START"));
}

#[tokio::test]
async fn test_rollout_replaces_running_node() {
    let h = harness().await;
    let v1 = h.fleet.rollout("c1").await.unwrap();
    let old = h
        .db
        .insert_node("r1", &v1, NodeState::Running, h.clock.now())
        .await
        .unwrap();
    h.db.set_node_url(old.id, "http://old").await.unwrap();

    let v2 = h.fleet.rollout("c2").await.unwrap();

    // 第一轮：旧节点被标记为 OUTDATED
    h.supervisor().tick().await.unwrap();
    assert_eq!(h.db.node_state(old.id).await.unwrap(), Some(NodeState::Outdated));

    // 第二轮：分组内没有可用节点，创建一个新节点
    h.supervisor().tick().await.unwrap();
    assert_eq!(h.db.count_nodes().await.unwrap(), 2);
    let page = h
        .fleet
        .supervisor()
        .plan()
        .await
        .unwrap();
    let new_id = page
        .iter()
        .find(|op| op.kind() == "START")
        .and_then(|op| op.node_id())
        .expect("new node is pending");
    let new_node = h
        .db
        .manager()
        .node_repository()
        .get_by_id(new_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(new_node.deployment_id, v2.id);
    assert!(new_node.image.ends_with(":c2"));
    assert_eq!(new_node.storage_mb, FleetConfig::default().default_node.storage_mb);

    // 第三轮：启动新节点，随后节点自报
    h.supervisor().tick().await.unwrap();
    assert_eq!(h.provider.started_ids(), vec![new_id]);
    h.fleet.register_node(new_id, "http://new").await.unwrap();
    assert_eq!(
        h.fleet.get_running_node("r1").await.unwrap().map(|n| n.id),
        Some(new_id)
    );

    // 第四轮：有新节点在运行，旧节点开始排空
    h.supervisor().tick().await.unwrap();
    assert_eq!(h.notifier.notified_ids(), vec![old.id]);
    assert_eq!(h.db.node_state(old.id).await.unwrap(), Some(NodeState::Finishing));

    // 旧节点自报空闲后被终止
    h.fleet.idle_node(old.id).await.unwrap();
    h.supervisor().tick().await.unwrap();
    assert_eq!(h.provider.terminated_ids(), vec![old.id]);
    assert_eq!(h.db.node_state(old.id).await.unwrap(), Some(NodeState::Terminated));
}

#[tokio::test]
async fn test_finishing_proceeds_when_notification_fails() {
    let h = harness().await;
    let v1 = h.fleet.rollout("c1").await.unwrap();
    let outdated = h
        .db
        .insert_node("r1", &v1, NodeState::Outdated, h.clock.now())
        .await
        .unwrap();
    h.db.set_node_url(outdated.id, "http://old").await.unwrap();
    h.db
        .insert_node("r1", &v1, NodeState::Running, h.clock.now())
        .await
        .unwrap();

    h.notifier.set_fail(true);
    h.supervisor().tick().await.unwrap();
    assert_eq!(h.notifier.notified_ids(), vec![outdated.id]);
    assert_eq!(
        h.db.node_state(outdated.id).await.unwrap(),
        Some(NodeState::Finishing)
    );
}

#[tokio::test]
async fn test_idle_node_past_timeout_is_failed_once() {
    let h = harness().await;
    let v1 = h.fleet.rollout("c1").await.unwrap();
    let stale = h.clock.now() - Duration::hours(1);
    let node = h
        .db
        .insert_node("r1", &v1, NodeState::Idle, stale)
        .await
        .unwrap();

    let plan = h.supervisor().plan().await.unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].kind(), "FAIL");

    h.provider.set_fail_terminate(true);
    h.supervisor().tick().await.unwrap();
    let failed = h
        .db
        .manager()
        .node_repository()
        .get_by_id(node.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.state, NodeState::Error);
    assert_eq!(failed.error.as_deref(), Some("idle_timeout_reached"));
}

#[tokio::test]
async fn test_terminate_failure_keeps_node_idle() {
    let h = harness().await;
    let v1 = h.fleet.rollout("c1").await.unwrap();
    let node = h
        .db
        .insert_node("r1", &v1, NodeState::Idle, h.clock.now())
        .await
        .unwrap();

    h.provider.set_fail_terminate(true);
    let report = h.supervisor().tick().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(h.db.node_state(node.id).await.unwrap(), Some(NodeState::Idle));
}

#[tokio::test]
async fn test_finishing_timeout_forces_idle_only_in_local_mode() {
    let remote = harness().await;
    let v1 = remote.fleet.rollout("c1").await.unwrap();
    let stale = remote.clock.now() - Duration::days(2);
    let node = remote
        .db
        .insert_node("r1", &v1, NodeState::Finishing, stale)
        .await
        .unwrap();
    remote.supervisor().tick().await.unwrap();
    assert_eq!(
        remote.db.node_state(node.id).await.unwrap(),
        Some(NodeState::Finishing)
    );

    let mut config = fast_config();
    config.runner_type = RunnerType::Local;
    let local = harness_with(config).await;
    let v1 = local.fleet.rollout("c1").await.unwrap();
    // 本地模式的 FINISHING 超时固定为 15 秒
    let node = local
        .db
        .insert_node("r1", &v1, NodeState::Finishing, local.clock.now())
        .await
        .unwrap();
    local.clock.advance(Duration::seconds(16));
    local.supervisor().tick().await.unwrap();
    assert_eq!(local.db.node_state(node.id).await.unwrap(), Some(NodeState::Idle));
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let h = harness().await;
    let v1 = h.fleet.rollout("c1").await.unwrap();
    let node_id = h
        .db
        .insert_node("r1", &v1, NodeState::Pending, h.clock.now())
        .await
        .unwrap()
        .id;

    h.fleet.start().await.unwrap();
    let supervisor = h.supervisor().clone();
    assert!(
        TestEnv::wait_for(
            move || {
                let supervisor = supervisor.clone();
                async move { supervisor.state().await == SupervisorState::Running }
            },
            StdDuration::from_secs(2)
        )
        .await
    );

    // 已在运行时再次启动立即返回
    h.supervisor().start().await.unwrap();
    h.fleet.start().await.unwrap();

    let provider = h.provider.clone();
    assert!(
        TestEnv::wait_for(
            move || {
                let provider = provider.clone();
                async move { provider.started_ids().contains(&node_id) }
            },
            StdDuration::from_secs(2)
        )
        .await
    );
    assert!(h.locks.acquisitions() >= 1);

    h.fleet.stop().await;
    assert_eq!(h.supervisor().state().await, SupervisorState::Stopped);
    assert!(!h.locks.is_held(orchestrator_fleet::SUPERVISOR_LOCK_KEY));

    h.fleet.stop().await;
    assert_eq!(h.supervisor().state().await, SupervisorState::Stopped);
}

#[tokio::test]
async fn test_loop_skips_tick_when_lock_is_held_elsewhere() {
    let h = harness().await;
    let v1 = h.fleet.rollout("c1").await.unwrap();
    h.db
        .insert_node("r1", &v1, NodeState::Pending, h.clock.now())
        .await
        .unwrap();

    h.locks.set_unavailable(true);
    h.fleet.start().await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(100)).await;
    assert!(h.provider.started_ids().is_empty());

    h.fleet.stop().await;
    assert_eq!(h.supervisor().state().await, SupervisorState::Stopped);
}

#[tokio::test]
async fn test_tick_timeout_cancels_remaining_operations() {
    let mut config = fast_config();
    config.supervisor.tick_timeout_ms = 100;
    config.supervisor.retry_delay_ms = 10_000;
    let h = harness_with(config).await;
    let v1 = h.fleet.rollout("c1").await.unwrap();
    for routing_id in ["a", "b", "c", "d", "e"] {
        h.db
            .insert_node(routing_id, &v1, NodeState::Pending, h.clock.now())
            .await
            .unwrap();
    }
    h.provider.set_start_delay(StdDuration::from_millis(60));

    h.fleet.start().await.unwrap();
    // 超时后进入很长的重试等待，此时只完成了一部分操作
    tokio::time::sleep(StdDuration::from_millis(400)).await;
    let started = h.provider.started_ids().len();
    assert!(started >= 1 && started < 5, "started {started} nodes");
    assert!(!h.locks.is_held(orchestrator_fleet::SUPERVISOR_LOCK_KEY));

    // 停止请求会打断重试等待
    h.fleet.stop().await;
    assert_eq!(h.supervisor().state().await, SupervisorState::Stopped);
}

#[tokio::test]
async fn test_restart_after_stop_timeout() {
    let mut config = fast_config();
    config.supervisor.stop_timeout_ms = 50;
    let h = harness_with(config).await;
    let v1 = h.fleet.rollout("c1").await.unwrap();
    let first = h
        .db
        .insert_node("r1", &v1, NodeState::Pending, h.clock.now())
        .await
        .unwrap();
    h.provider.set_start_delay(StdDuration::from_millis(300));

    h.fleet.start().await.unwrap();
    // 等循环进入耗时的 start 调用
    tokio::time::sleep(StdDuration::from_millis(50)).await;

    // 停止超时后强制中止，状态回到 Stopped，锁被释放
    h.fleet.stop().await;
    assert_eq!(h.supervisor().state().await, SupervisorState::Stopped);
    assert!(!h.locks.is_held(orchestrator_fleet::SUPERVISOR_LOCK_KEY));
    assert!(h.provider.started_ids().is_empty());

    h.provider.set_start_delay(StdDuration::ZERO);
    let second = h
        .db
        .insert_node("r2", &v1, NodeState::Pending, h.clock.now())
        .await
        .unwrap();

    h.fleet.start().await.unwrap();
    let provider = h.provider.clone();
    assert!(
        TestEnv::wait_for(
            move || {
                let provider = provider.clone();
                async move {
                    let started = provider.started_ids();
                    started.contains(&first.id) && started.contains(&second.id)
                }
            },
            StdDuration::from_secs(2)
        )
        .await
    );
    assert_eq!(h.supervisor().state().await, SupervisorState::Running);

    h.fleet.stop().await;
    assert_eq!(h.supervisor().state().await, SupervisorState::Stopped);
}

#[tokio::test]
async fn test_start_waits_for_previous_loop_to_exit() {
    let mut config = fast_config();
    config.supervisor.stop_timeout_ms = 100;
    let h = harness_with(config).await;
    let v1 = h.fleet.rollout("c1").await.unwrap();
    h.db
        .insert_node("r1", &v1, NodeState::Pending, h.clock.now())
        .await
        .unwrap();
    h.provider.set_start_delay(StdDuration::from_millis(150));

    let supervisor = h.supervisor().clone();
    let first_loop = supervisor.spawn();
    tokio::time::sleep(StdDuration::from_millis(20)).await;

    // 直接停止 Supervisor 不会中止循环，超时后仍处于 Stopping
    supervisor.stop().await;
    assert_eq!(supervisor.state().await, SupervisorState::Stopping);

    // 再次启动要等旧循环退出后接管
    let second_loop = supervisor.spawn();
    first_loop.await.unwrap().unwrap();
    let running = supervisor.clone();
    assert!(
        TestEnv::wait_for(
            move || {
                let running = running.clone();
                async move { running.state().await == SupervisorState::Running }
            },
            StdDuration::from_secs(2)
        )
        .await
    );

    supervisor.stop().await;
    assert!(second_loop.await.unwrap().is_ok());
    assert_eq!(supervisor.state().await, SupervisorState::Stopped);
}
