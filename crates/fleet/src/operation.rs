use std::fmt;

use orchestrator_domain::{Deployment, Node};

/// 节点因超时被标记为 ERROR 的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    PendingTimeout,
    StartingTimeout,
    IdleTimeout,
}

impl FailReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailReason::PendingTimeout => "pending_timeout_reached",
            FailReason::StartingTimeout => "starting_timeout_reached",
            FailReason::IdleTimeout => "idle_timeout_reached",
        }
    }
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次规划产生的操作
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Create {
        routing_id: String,
        deployment: Deployment,
    },
    Start {
        node: Node,
    },
    Fail {
        node: Node,
        reason: FailReason,
    },
    Outdate {
        node_id: i64,
    },
    Finishing {
        node: Node,
    },
    FinishingTimeout {
        node: Node,
    },
    Terminate {
        node: Node,
    },
    Remove {
        node_id: i64,
    },
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Create { .. } => "CREATE",
            Operation::Start { .. } => "START",
            Operation::Fail { .. } => "FAIL",
            Operation::Outdate { .. } => "OUTDATE",
            Operation::Finishing { .. } => "FINISHING",
            Operation::FinishingTimeout { .. } => "FINISHING_TIMEOUT",
            Operation::Terminate { .. } => "TERMINATE",
            Operation::Remove { .. } => "REMOVE",
        }
    }

    /// CREATE 还没有节点，返回 None
    pub fn node_id(&self) -> Option<i64> {
        match self {
            Operation::Create { .. } => None,
            Operation::Outdate { node_id } | Operation::Remove { node_id } => Some(*node_id),
            Operation::Start { node }
            | Operation::Fail { node, .. }
            | Operation::Finishing { node }
            | Operation::FinishingTimeout { node }
            | Operation::Terminate { node } => Some(node.id),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create { routing_id, deployment } => {
                write!(f, "CREATE(routing_id={}, deployment={})", routing_id, deployment.id)
            }
            Operation::Fail { node, reason } => write!(f, "FAIL(node={}, {})", node.id, reason),
            other => match other.node_id() {
                Some(id) => write!(f, "{}(node={})", other.kind(), id),
                None => f.write_str(other.kind()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_testing_utils::{DeploymentBuilder, NodeBuilder};

    #[test]
    fn test_operation_display() {
        let node = NodeBuilder::new().with_id(7).build();
        let deployment = DeploymentBuilder::new().with_id(3).build();

        assert_eq!(Operation::Start { node: node.clone() }.to_string(), "START(node=7)");
        assert_eq!(Operation::Outdate { node_id: 7 }.to_string(), "OUTDATE(node=7)");
        assert_eq!(
            Operation::Fail {
                node,
                reason: FailReason::IdleTimeout
            }
            .to_string(),
            "FAIL(node=7, idle_timeout_reached)"
        );
        let create = Operation::Create {
            routing_id: "r1".to_string(),
            deployment,
        };
        assert_eq!(create.to_string(), "CREATE(routing_id=r1, deployment=3)");
        assert_eq!(create.node_id(), None);
    }
}
