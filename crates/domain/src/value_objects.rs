use std::collections::BTreeMap;

use crate::entities::{Node, NodeState};

/// 节点分页查询条件
#[derive(Debug, Clone)]
pub struct NodeSearch {
    pub states: Vec<NodeState>,
    /// 上一页最后一个路由 ID，不含
    pub cursor: Option<String>,
    /// 每页路由 ID 数量
    pub limit: i64,
}

impl NodeSearch {
    pub fn all_states(limit: i64) -> Self {
        Self {
            states: NodeState::ALL.to_vec(),
            cursor: None,
            limit,
        }
    }

    pub fn after(&self, cursor: impl Into<String>) -> Self {
        Self {
            states: self.states.clone(),
            cursor: Some(cursor.into()),
            limit: self.limit,
        }
    }
}

/// 同一路由 ID 下按状态分组的节点
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingGroup {
    pub routing_id: String,
    pub nodes: BTreeMap<NodeState, Vec<Node>>,
}

impl RoutingGroup {
    pub fn new(routing_id: impl Into<String>) -> Self {
        Self {
            routing_id: routing_id.into(),
            nodes: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, node: Node) {
        self.nodes.entry(node.state).or_default().push(node);
    }

    pub fn in_state(&self, state: NodeState) -> &[Node] {
        self.nodes.get(&state).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, state: NodeState) -> usize {
        self.in_state(state).len()
    }

    /// 把已按 (routing_id, id) 排序的节点分组，保持路由 ID 顺序
    pub fn group(nodes: Vec<Node>) -> Vec<RoutingGroup> {
        let mut groups: Vec<RoutingGroup> = Vec::new();
        for node in nodes {
            match groups.last_mut() {
                Some(group) if group.routing_id == node.routing_id => group.push(node),
                _ => {
                    let mut group = RoutingGroup::new(node.routing_id.clone());
                    group.push(node);
                    groups.push(group);
                }
            }
        }
        groups
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeSearchPage {
    pub groups: Vec<RoutingGroup>,
    pub next_cursor: Option<String>,
}

/// 节点状态变更，`from` 作为更新条件
#[derive(Debug, Clone, PartialEq)]
pub struct NodeStateChange {
    pub node_id: i64,
    pub from: NodeState,
    pub to: NodeState,
    pub url: Option<String>,
    pub error: Option<String>,
}

impl NodeStateChange {
    pub fn new(node_id: i64, from: NodeState, to: NodeState) -> Self {
        Self {
            node_id,
            from,
            to,
            url: None,
            error: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(id: i64, routing_id: &str, state: NodeState) -> Node {
        let now = Utc::now();
        Node {
            id,
            routing_id: routing_id.to_string(),
            deployment_id: 1,
            url: None,
            state,
            image: "runner:abc".to_string(),
            cpu_milli: 500,
            memory_mb: 512,
            storage_mb: 512,
            error: None,
            created_at: now,
            last_state_transition_at: now,
        }
    }

    #[test]
    fn test_group_keeps_routing_order_and_states() {
        let groups = RoutingGroup::group(vec![
            node(1, "a", NodeState::Running),
            node(2, "a", NodeState::Outdated),
            node(3, "a", NodeState::Running),
            node(4, "b", NodeState::Idle),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].routing_id, "a");
        assert_eq!(groups[0].count(NodeState::Running), 2);
        assert_eq!(groups[0].count(NodeState::Outdated), 1);
        assert_eq!(groups[0].count(NodeState::Pending), 0);
        assert_eq!(groups[1].in_state(NodeState::Idle)[0].id, 4);
    }

    #[test]
    fn test_search_after_keeps_filters() {
        let search = NodeSearch::all_states(10).after("r-5");
        assert_eq!(search.cursor.as_deref(), Some("r-5"));
        assert_eq!(search.states.len(), 8);
        assert_eq!(search.limit, 10);
    }
}
