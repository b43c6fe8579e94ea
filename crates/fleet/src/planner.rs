//! 节点编排规划
//!
//! 对单个路由分组计算需要执行的操作，不做任何 I/O。
//! 每条规则独立求值，输出顺序固定：
//!
//! 1. 每个 PENDING 节点 START
//! 2. PENDING 超时 FAIL(pending_timeout_reached)
//! 3. STARTING 超时 FAIL(starting_timeout_reached)
//! 4. 部署不是当前活跃部署的 RUNNING 节点 OUTDATE
//! 5. 分组内存在 RUNNING 节点时，每个 OUTDATED 节点 FINISHING
//! 6. 有 OUTDATED 节点且没有 RUNNING/STARTING/PENDING 节点时 CREATE 一个新节点
//! 7. FINISHING 超时 FINISHING_TIMEOUT
//! 8. IDLE 超时 FAIL(idle_timeout_reached)，未超时则 TERMINATE
//! 9. TERMINATED 与 ERROR 超过保留时间后 REMOVE

use chrono::{DateTime, Duration, Utc};
use orchestrator_config::FleetTimeouts;
use orchestrator_domain::{Deployment, Node, NodeState, RoutingGroup};

use crate::operation::{FailReason, Operation};

#[derive(Debug, Clone)]
pub struct Planner {
    timeouts: FleetTimeouts,
}

impl Planner {
    pub fn new(timeouts: FleetTimeouts) -> Self {
        Self { timeouts }
    }

    pub fn timeouts(&self) -> &FleetTimeouts {
        &self.timeouts
    }

    pub fn plan_group(
        &self,
        group: &RoutingGroup,
        active: &Deployment,
        now: DateTime<Utc>,
    ) -> Vec<Operation> {
        let t = &self.timeouts;
        let mut plan = Vec::new();

        let pending = group.in_state(NodeState::Pending);
        let starting = group.in_state(NodeState::Starting);
        let running = group.in_state(NodeState::Running);
        let outdated = group.in_state(NodeState::Outdated);

        plan.extend(pending.iter().map(|node| Operation::Start { node: node.clone() }));

        plan.extend(
            exceeded(pending, t.pending_ms, now).map(|node| Operation::Fail {
                node: node.clone(),
                reason: FailReason::PendingTimeout,
            }),
        );

        plan.extend(
            exceeded(starting, t.starting_ms, now).map(|node| Operation::Fail {
                node: node.clone(),
                reason: FailReason::StartingTimeout,
            }),
        );

        plan.extend(
            running
                .iter()
                .filter(|node| node.deployment_id != active.id)
                .map(|node| Operation::Outdate { node_id: node.id }),
        );

        if !running.is_empty() {
            plan.extend(outdated.iter().map(|node| Operation::Finishing { node: node.clone() }));
        }

        if !outdated.is_empty() && running.len() + starting.len() + pending.len() == 0 {
            plan.push(Operation::Create {
                routing_id: group.routing_id.clone(),
                deployment: active.clone(),
            });
        }

        plan.extend(
            exceeded(group.in_state(NodeState::Finishing), t.finishing_ms, now)
                .map(|node| Operation::FinishingTimeout { node: node.clone() }),
        );

        // 每个 IDLE 节点只产生一个终结操作
        for node in group.in_state(NodeState::Idle) {
            if is_exceeded(node, t.idle_ms, now) {
                plan.push(Operation::Fail {
                    node: node.clone(),
                    reason: FailReason::IdleTimeout,
                });
            } else {
                plan.push(Operation::Terminate { node: node.clone() });
            }
        }

        plan.extend(
            exceeded(group.in_state(NodeState::Terminated), t.terminated_ms, now)
                .chain(exceeded(group.in_state(NodeState::Error), t.error_ms, now))
                .map(|node| Operation::Remove { node_id: node.id }),
        );

        plan
    }
}

fn is_exceeded(node: &Node, timeout_ms: u64, now: DateTime<Utc>) -> bool {
    let timeout = Duration::milliseconds(i64::try_from(timeout_ms).unwrap_or(i64::MAX));
    node.time_in_state(now) > timeout
}

fn exceeded<'a>(
    nodes: &'a [Node],
    timeout_ms: u64,
    now: DateTime<Utc>,
) -> impl Iterator<Item = &'a Node> + 'a {
    nodes.iter().filter(move |node| is_exceeded(node, timeout_ms, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_testing_utils::{DeploymentBuilder, NodeBuilder};

    const MINUTE_MS: u64 = 60 * 1000;

    fn timeouts() -> FleetTimeouts {
        FleetTimeouts {
            pending_ms: 5 * MINUTE_MS,
            starting_ms: 5 * MINUTE_MS,
            finishing_ms: 60 * MINUTE_MS,
            idle_ms: 30 * MINUTE_MS,
            terminated_ms: 60 * MINUTE_MS,
            error_ms: 60 * MINUTE_MS,
        }
    }

    fn node(id: i64, state: NodeState, deployment_id: i64, age: Duration, now: DateTime<Utc>) -> Node {
        NodeBuilder::new()
            .with_id(id)
            .with_routing_id("r1")
            .with_state(state)
            .with_deployment_id(deployment_id)
            .with_last_state_transition_at(now - age)
            .build()
    }

    fn group(nodes: Vec<Node>) -> RoutingGroup {
        let mut group = RoutingGroup::new("r1");
        for node in nodes {
            group.push(node);
        }
        group
    }

    fn kinds(plan: &[Operation]) -> Vec<(&'static str, Option<i64>)> {
        plan.iter().map(|op| (op.kind(), op.node_id())).collect()
    }

    #[test]
    fn test_pending_nodes_start_and_fail_on_timeout() {
        let now = Utc::now();
        let active = DeploymentBuilder::new().with_id(1).build();
        let g = group(vec![
            node(1, NodeState::Pending, 1, Duration::seconds(10), now),
            node(2, NodeState::Pending, 1, Duration::minutes(6), now),
            node(3, NodeState::Starting, 1, Duration::minutes(6), now),
        ]);

        let plan = Planner::new(timeouts()).plan_group(&g, &active, now);
        assert_eq!(
            kinds(&plan),
            vec![
                ("START", Some(1)),
                ("START", Some(2)),
                ("FAIL", Some(2)),
                ("FAIL", Some(3)),
            ]
        );
        assert!(matches!(
            plan[2],
            Operation::Fail { reason: FailReason::PendingTimeout, .. }
        ));
        assert!(matches!(
            plan[3],
            Operation::Fail { reason: FailReason::StartingTimeout, .. }
        ));
    }

    #[test]
    fn test_timeout_is_strict() {
        let now = Utc::now();
        let active = DeploymentBuilder::new().with_id(1).build();
        let g = group(vec![node(1, NodeState::Starting, 1, Duration::minutes(5), now)]);
        assert!(Planner::new(timeouts()).plan_group(&g, &active, now).is_empty());
    }

    #[test]
    fn test_running_on_old_deployment_is_outdated() {
        let now = Utc::now();
        let active = DeploymentBuilder::new().with_id(2).build();
        let g = group(vec![
            node(1, NodeState::Running, 1, Duration::minutes(1), now),
            node(2, NodeState::Running, 2, Duration::minutes(1), now),
        ]);

        let plan = Planner::new(timeouts()).plan_group(&g, &active, now);
        assert_eq!(kinds(&plan), vec![("OUTDATE", Some(1))]);
    }

    #[test]
    fn test_outdated_only_group_creates_exactly_one_node() {
        let now = Utc::now();
        let active = DeploymentBuilder::new().with_id(2).with_commit_id("new").build();
        let g = group(vec![
            node(1, NodeState::Outdated, 1, Duration::minutes(1), now),
            node(2, NodeState::Outdated, 1, Duration::minutes(1), now),
        ]);

        let plan = Planner::new(timeouts()).plan_group(&g, &active, now);
        assert_eq!(plan.len(), 1);
        match &plan[0] {
            Operation::Create { routing_id, deployment } => {
                assert_eq!(routing_id, "r1");
                assert_eq!(deployment.id, 2);
            }
            other => panic!("unexpected operation {other}"),
        }
    }

    #[test]
    fn test_outdated_with_running_drains_without_create() {
        let now = Utc::now();
        let active = DeploymentBuilder::new().with_id(2).build();
        let g = group(vec![
            node(1, NodeState::Outdated, 1, Duration::minutes(1), now),
            node(2, NodeState::Running, 2, Duration::minutes(1), now),
        ]);

        let plan = Planner::new(timeouts()).plan_group(&g, &active, now);
        assert_eq!(kinds(&plan), vec![("FINISHING", Some(1))]);
    }

    #[test]
    fn test_outdated_with_starting_replacement_waits() {
        let now = Utc::now();
        let active = DeploymentBuilder::new().with_id(2).build();
        let g = group(vec![
            node(1, NodeState::Outdated, 1, Duration::minutes(1), now),
            node(2, NodeState::Starting, 2, Duration::minutes(1), now),
        ]);

        assert!(Planner::new(timeouts()).plan_group(&g, &active, now).is_empty());
    }

    #[test]
    fn test_finishing_timeout() {
        let now = Utc::now();
        let active = DeploymentBuilder::new().with_id(1).build();
        let g = group(vec![
            node(1, NodeState::Finishing, 1, Duration::minutes(61), now),
            node(2, NodeState::Finishing, 1, Duration::minutes(1), now),
        ]);

        let plan = Planner::new(timeouts()).plan_group(&g, &active, now);
        assert_eq!(kinds(&plan), vec![("FINISHING_TIMEOUT", Some(1))]);
    }

    #[test]
    fn test_idle_past_timeout_only_fails() {
        let now = Utc::now();
        let active = DeploymentBuilder::new().with_id(1).build();
        let g = group(vec![
            node(1, NodeState::Idle, 1, Duration::minutes(1), now),
            node(2, NodeState::Idle, 1, Duration::minutes(31), now),
        ]);

        let plan = Planner::new(timeouts()).plan_group(&g, &active, now);
        assert_eq!(kinds(&plan), vec![("TERMINATE", Some(1)), ("FAIL", Some(2))]);
        assert!(matches!(
            plan[1],
            Operation::Fail { reason: FailReason::IdleTimeout, .. }
        ));
    }

    #[test]
    fn test_old_terminated_and_error_nodes_are_removed() {
        let now = Utc::now();
        let active = DeploymentBuilder::new().with_id(1).build();
        let g = group(vec![
            node(1, NodeState::Terminated, 1, Duration::minutes(61), now),
            node(2, NodeState::Terminated, 1, Duration::minutes(1), now),
            node(3, NodeState::Error, 1, Duration::minutes(61), now),
        ]);

        let plan = Planner::new(timeouts()).plan_group(&g, &active, now);
        assert_eq!(kinds(&plan), vec![("REMOVE", Some(1)), ("REMOVE", Some(3))]);
    }

    #[test]
    fn test_healthy_group_needs_nothing() {
        let now = Utc::now();
        let active = DeploymentBuilder::new().with_id(1).build();
        let g = group(vec![node(1, NodeState::Running, 1, Duration::days(3), now)]);
        assert!(Planner::new(timeouts()).plan_group(&g, &active, now).is_empty());
    }
}
