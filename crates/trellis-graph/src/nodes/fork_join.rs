//! Parallel forks
//!
//! A fork runs its branches concurrently. It is always followed, in the
//! same sequence, by a `JOIN` companion whose `joinOn` lists the last task
//! of every branch; the join is refreshed on serialization and moves and
//! dies together with its fork.

use serde_json::{json, Value};
use trellis_geometry::{EntryPoint, Point};

use crate::layout::{self, LayoutCx};
use crate::node::{Node, NodeBehavior, NodeCore, NodeKind};
use crate::nodes::{composite, SimpleNode};
use crate::registry::Factory;
use crate::task::{tasks_from_value, TaskDefinition};

#[derive(Debug, Clone)]
pub struct ForkJoinNode {
    pub(crate) core: NodeCore,
    pub(crate) branches: Vec<Vec<Node>>,
    /// Id of the JOIN sibling
    pub(crate) companion_id: Option<String>,
}

impl ForkJoinNode {
    pub fn from_raw(raw: TaskDefinition, factory: &Factory<'_>) -> Self {
        let branches = parse_branches(&raw, &mut Vec::new(), factory);
        Self {
            core: NodeCore::new(raw),
            branches,
            companion_id: None,
        }
    }

    pub fn branches(&self) -> &[Vec<Node>] {
        &self.branches
    }

    pub fn companion_id(&self) -> Option<&str> {
        self.companion_id.as_deref()
    }

    /// Ids of the last task of every non-empty branch
    pub fn join_on(&self) -> Vec<String> {
        self.branches
            .iter()
            .filter_map(|branch| branch.last())
            .map(|node| node.id().to_string())
            .collect()
    }

    /// Append a branch holding a placeholder; returns its index
    pub fn add_branch(&mut self, max_branches: usize) -> Option<String> {
        if self.branches.len() >= max_branches {
            log::debug!("Fork '{}' already has {} branches", self.core.id, self.branches.len());
            return None;
        }
        self.branches.push(vec![Node::Simple(SimpleNode::placeholder())]);
        Some((self.branches.len() - 1).to_string())
    }

    /// Remove a branch by index, keeping at least two
    pub fn remove_branch(&mut self, index: usize) -> Option<Vec<Node>> {
        if self.branches.len() <= 2 || index >= self.branches.len() {
            return None;
        }
        Some(self.branches.remove(index))
    }
}

/// Branches of `forkTasks`, reusing nodes from `old` by id
fn parse_branches(raw: &TaskDefinition, old: &mut Vec<Node>, factory: &Factory<'_>) -> Vec<Vec<Node>> {
    raw.get("forkTasks")
        .and_then(Value::as_array)
        .map(|branches| {
            branches
                .iter()
                .map(|branch| composite::rebuild_list(old, tasks_from_value(branch), factory))
                .collect()
        })
        .unwrap_or_default()
}

/// Branches keyed by index, as used in connector ids
fn keyed(branches: &mut [Vec<Node>]) -> Vec<(String, &mut Vec<Node>)> {
    branches
        .iter_mut()
        .enumerate()
        .map(|(index, branch)| (index.to_string(), branch))
        .collect()
}

impl NodeBehavior for ForkJoinNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn kind(&self) -> NodeKind {
        NodeKind::ForkJoin
    }

    fn child_lists(&self) -> Vec<&Vec<Node>> {
        self.branches.iter().collect()
    }

    fn child_lists_mut(&mut self) -> Vec<&mut Vec<Node>> {
        self.branches.iter_mut().collect()
    }

    fn to_raw(&self) -> TaskDefinition {
        let mut raw = self.core.raw.clone();
        let branches: Vec<Vec<TaskDefinition>> = self.branches.iter().map(|b| composite::serialize_list(b)).collect();
        raw.insert("forkTasks", json!(branches));
        raw
    }

    fn apply_raw(&mut self, raw: TaskDefinition, factory: &Factory<'_>) {
        self.core.raw = raw;
        self.check(factory.context());
        let mut old: Vec<Node> = std::mem::take(&mut self.branches).into_iter().flatten().collect();
        self.branches = parse_branches(&self.core.raw, &mut old, factory);
    }

    fn after_create(&mut self) -> Vec<Node> {
        if self.companion_id.is_some() {
            return Vec::new();
        }
        let mut join = SimpleNode::new(TaskDefinition::join(self.join_on()));
        join.core.companion_of = Some(self.core.id.clone());
        self.companion_id = Some(join.core.id.clone());
        vec![Node::Simple(join)]
    }

    fn sibling_companion(&self) -> Option<&str> {
        self.companion_id.as_deref()
    }

    fn layout(&mut self, cursor: &mut Point, cx: &LayoutCx<'_>) {
        let mut lists: Vec<&mut Vec<Node>> = self.branches.iter_mut().collect();
        layout::place_branches(&mut self.core, &mut lists, cursor, cx);
    }

    fn entry_point(&self, cx: &LayoutCx<'_>) -> EntryPoint {
        let tails: Vec<&Node> = self.branches.iter().filter_map(|branch| branch.last()).collect();
        layout::branches_entry(&self.core, &tails, cx)
    }

    fn render_edges(&mut self, cx: &LayoutCx<'_>, is_last: bool) {
        layout::branch_edges(&mut self.core, keyed(&mut self.branches), cx, is_last);
    }

    fn render_controllers(&mut self, cx: &LayoutCx<'_>) {
        let can_add = self.branches.len() < cx.max_branches;
        let can_remove = self.branches.len() > 2;
        layout::branch_controllers(&mut self.core, keyed(&mut self.branches), cx, can_add, can_remove);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_spawns_join() {
        let factory = Factory::for_tests();
        let nodes = factory.create(TaskDefinition::template("FORK_JOIN", "fork"));
        assert_eq!(nodes.len(), 2);

        let fork = nodes[0].as_fork_join().unwrap();
        assert_eq!(fork.branches().len(), 2);
        assert_eq!(fork.companion_id(), Some(nodes[1].id()));
        assert_eq!(nodes[1].task_type(), "JOIN");
        assert_eq!(nodes[1].companion_of(), Some(nodes[0].id()));
    }

    #[test]
    fn test_branch_bounds() {
        let factory = Factory::for_tests();
        let mut nodes = factory.create(TaskDefinition::template("FORK_JOIN", "fork"));
        let fork = nodes[0].as_fork_join_mut().unwrap();

        assert!(fork.remove_branch(0).is_none());
        assert_eq!(fork.add_branch(3), Some("2".to_string()));
        assert!(fork.add_branch(3).is_none());
        assert!(fork.remove_branch(2).is_some());
        assert_eq!(fork.branches().len(), 2);
    }

    #[test]
    fn test_join_on_lists_branch_tails() {
        let factory = Factory::for_tests();
        let mut raw = TaskDefinition::new("FORK_JOIN", "fork", "fork");
        raw.insert(
            "forkTasks",
            json!([
                [{"taskReferenceName": "a1", "type": "SIMPLE"}, {"taskReferenceName": "a2", "type": "SIMPLE"}],
                [],
                [{"taskReferenceName": "c1", "type": "SIMPLE"}]
            ]),
        );
        let nodes = factory.create(raw);
        let fork = nodes[0].as_fork_join().unwrap();
        assert_eq!(fork.join_on(), vec!["a2".to_string(), "c1".to_string()]);
    }
}
