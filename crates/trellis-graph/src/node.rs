//! The node tree
//!
//! Every step of a workflow is a `Node`. The set of variants is closed, so
//! `Node` is an enum over one struct per kind. Each struct owns a `NodeCore`
//! with the state all nodes share and implements `NodeBehavior`; the
//! behaviour every composite has in common (insert, detach, hydration,
//! execution bookkeeping) is written once as default methods over the
//! variant's child lists.
//!
//! Nodes never hold references to their parent or to the graph. Operations
//! that need to know where they are in the tree receive an `Ancestry`
//! describing the containers above them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use trellis_geometry::{Boundary, EntryPoint, Point, Size};

use crate::catalog::DefinitionCatalog;
use crate::context::GraphContext;
use crate::error::Result;
use crate::execution::{ExecutionState, NodeStatus, TaskExecution};
use crate::ids;
use crate::layout::{self, Connector, Controller, LayoutCx, LayoutResult};
use crate::nodes::{composite, EndpointNode, ForkJoinNode, LoopNode, SimpleNode, SubWorkflowNode, SwitchNode};
use crate::registry::Factory;
use crate::task::TaskDefinition;

/// Discriminant of the node variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Simple,
    Endpoint,
    Loop,
    ForkJoin,
    Switch,
    SubWorkflow,
}

/// State shared by every node variant
#[derive(Debug, Clone)]
pub struct NodeCore {
    /// Equal to the task's reference name
    pub(crate) id: String,
    pub(crate) raw: TaskDefinition,
    pub(crate) position: Point,
    pub(crate) size: Size,
    pub(crate) edges: Vec<Connector>,
    pub(crate) controllers: Vec<Controller>,
    /// Owner of a companion node (loop of a collector, fork of a join)
    pub(crate) companion_of: Option<String>,
    /// Id of the placeholder this node took the place of; restored when the
    /// sequence is emptied again
    pub(crate) replaced_placeholder: Option<String>,
    /// Latest task record per execution instance
    pub(crate) executions: HashMap<String, ExecutionState>,
}

impl NodeCore {
    pub fn new(mut raw: TaskDefinition) -> Self {
        if raw.reference_name().is_empty() {
            let prefix = match raw.task_type() {
                "" => "task".to_string(),
                other => other.to_lowercase(),
            };
            let generated = format!("{}_{}", prefix, ids::nano_id());
            log::warn!("Task without reference name, assigning '{}'", generated);
            raw.set_reference_name(&generated);
        }
        Self {
            id: raw.reference_name().to_string(),
            raw,
            position: Point::ZERO,
            size: Size::default(),
            edges: Vec::new(),
            controllers: Vec::new(),
            companion_of: None,
            replaced_placeholder: None,
            executions: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn raw(&self) -> &TaskDefinition {
        &self.raw
    }

    pub fn execution(&self, instance: &str) -> Option<&ExecutionState> {
        self.executions.get(instance)
    }

    /// Cache a task record; returns true only if the cached state changed
    pub fn update_execution(&mut self, instance: &str, record: &TaskExecution) -> bool {
        let next = ExecutionState::from(record);
        if self.executions.get(instance) == Some(&next) {
            return false;
        }
        self.executions.insert(instance.to_string(), next);
        true
    }

    pub fn clear_execution(&mut self, instance: &str) -> bool {
        self.executions.remove(instance).is_some()
    }
}

/// Where an insert is aimed
#[derive(Debug, Clone, Copy)]
pub struct InsertRequest<'a> {
    pub target_id: &'a str,
    pub insert_before: bool,
    pub context: &'a GraphContext,
}

/// The containers between the root and the node handling an operation
#[derive(Debug, Clone, Default)]
pub struct Ancestry {
    /// Ids and referenced names of enclosing sub-workflows, seeded with the
    /// edited workflow's own id
    pub(crate) names: Vec<String>,
    pub(crate) in_loop: bool,
}

impl Ancestry {
    pub fn root(context: &GraphContext) -> Self {
        Self {
            names: context.workflow_id.iter().cloned().collect(),
            in_loop: false,
        }
    }

    /// Ancestry as seen from inside `node`
    pub fn enter(&self, node: &Node) -> Self {
        let mut next = self.clone();
        match node {
            Node::Loop(_) => next.in_loop = true,
            Node::SubWorkflow(sub) => {
                next.names.push(sub.core.id.clone());
                next.names.push(sub.referenced_name().to_string());
            }
            _ => {}
        }
        next
    }

    /// First referenced workflow in `nodes` that already encloses the target
    pub(crate) fn conflict(&self, nodes: &[Node]) -> Option<String> {
        nodes
            .iter()
            .flat_map(Node::referenced_workflows)
            .find(|name| self.names.contains(name))
    }
}

/// Result of offering nodes to a container
#[derive(Debug)]
pub enum InsertOutcome {
    /// Ids of the inserted top-level nodes
    Inserted(Vec<String>),
    /// The target was found but the insert is not allowed; nodes handed back
    Rejected(Vec<Node>),
    /// The target is not in this subtree; nodes handed back
    NotFound(Vec<Node>),
}

/// Result of detaching a node from a container
#[derive(Debug)]
pub enum Detach {
    Detached {
        /// The removed node and its sibling companion, if any
        nodes: Vec<Node>,
        /// Ids of emptied wrappers removed along the way
        dropped: Vec<String>,
    },
    /// The node exists but cannot be removed on its own
    Refused,
    NotFound,
}

/// Shared state of a hydration pass
pub struct HydrationScope<'a> {
    pub(crate) factory: Factory<'a>,
    pub(crate) catalog: &'a dyn DefinitionCatalog,
    /// Referenced names currently being expanded, outermost first
    pub(crate) path: Vec<String>,
}

impl<'a> HydrationScope<'a> {
    pub fn new(factory: Factory<'a>, catalog: &'a dyn DefinitionCatalog) -> Self {
        let path = factory.context().workflow_id.iter().cloned().collect();
        Self { factory, catalog, path }
    }
}

/// Behaviour shared by all node variants
///
/// Leaf behaviour is the default. Composites expose their children through
/// `child_lists`/`child_lists_mut` and override layout and serialization.
pub trait NodeBehavior {
    fn core(&self) -> &NodeCore;
    fn core_mut(&mut self) -> &mut NodeCore;
    fn kind(&self) -> NodeKind;

    /// Child sequences in display order
    fn child_lists(&self) -> Vec<&Vec<Node>> {
        Vec::new()
    }

    fn child_lists_mut(&mut self) -> Vec<&mut Vec<Node>> {
        Vec::new()
    }

    /// Persisted definition with embedded child lists refreshed
    fn to_raw(&self) -> TaskDefinition {
        self.core().raw.clone()
    }

    /// Normalize the raw definition after construction or replacement
    fn check(&mut self, _context: &GraphContext) {}

    /// Sibling companions that must be created alongside this node
    fn after_create(&mut self) -> Vec<Node> {
        Vec::new()
    }

    /// Id of a companion living next to this node in the same list
    fn sibling_companion(&self) -> Option<&str> {
        None
    }

    /// Whether an emptied child list gets a placeholder
    fn keeps_placeholder(&self) -> bool {
        true
    }

    /// Whether children can be inserted into or removed from this node
    fn is_editable(&self) -> bool {
        true
    }

    fn insert_child(&mut self, nodes: Vec<Node>, request: &InsertRequest<'_>, ancestry: &Ancestry) -> InsertOutcome {
        if !self.is_editable() {
            return InsertOutcome::NotFound(nodes);
        }
        let wraps_loops = self.kind() != NodeKind::SubWorkflow;
        composite::insert_into(self.child_lists_mut(), wraps_loops, nodes, request, ancestry)
    }

    fn detach_child(&mut self, target_id: &str) -> Detach {
        if !self.is_editable() {
            return Detach::NotFound;
        }
        let keep = self.keeps_placeholder();
        composite::detach_from(self.child_lists_mut(), target_id, keep)
    }

    /// Replace this node's own definition
    fn apply_raw(&mut self, raw: TaskDefinition, factory: &Factory<'_>) {
        self.core_mut().raw = raw;
        self.check(factory.context());
    }

    /// Expand referenced sub-workflows below this node
    fn check_children(&mut self, scope: &mut HydrationScope<'_>) -> Result<bool> {
        let mut changed = false;
        for list in self.child_lists_mut() {
            for child in list.iter_mut() {
                changed |= child.check_children(scope)?;
            }
        }
        Ok(changed)
    }

    /// Drop children obtained through hydration
    fn restore_children(&mut self) -> bool {
        let mut changed = false;
        for list in self.child_lists_mut() {
            for child in list.iter_mut() {
                changed |= child.restore_children();
            }
        }
        changed
    }

    fn layout(&mut self, cursor: &mut Point, cx: &LayoutCx<'_>) {
        layout::place_leaf(self.core_mut(), cursor, cx);
    }

    fn entry_point(&self, cx: &LayoutCx<'_>) -> EntryPoint {
        layout::leaf_entry(self.core(), cx)
    }

    fn render_edges(&mut self, cx: &LayoutCx<'_>, is_last: bool) {
        layout::leaf_edges(self.core_mut(), cx, is_last);
    }

    fn render_controllers(&mut self, cx: &LayoutCx<'_>) {
        let out = self.entry_point(cx).output;
        let controller = cx.insert_after(&self.core().id, out);
        self.core_mut().controllers = vec![controller];
    }

    /// Child lists that take part in layout
    fn visible_lists(&self, _cx: &LayoutCx<'_>) -> Vec<&Vec<Node>> {
        self.child_lists()
    }

    /// A transparent node draws only its children
    fn is_transparent(&self, _cx: &LayoutCx<'_>) -> bool {
        false
    }

    fn update_execution_task(&mut self, instance: &str, record: &TaskExecution) -> bool {
        self.core_mut().update_execution(instance, record)
    }
}

/// A node of the workflow tree
#[derive(Debug, Clone)]
pub enum Node {
    Simple(SimpleNode),
    Endpoint(EndpointNode),
    Loop(LoopNode),
    ForkJoin(ForkJoinNode),
    Switch(SwitchNode),
    SubWorkflow(SubWorkflowNode),
}

macro_rules! dispatch {
    ($node:expr, $inner:ident => $body:expr) => {
        match $node {
            Node::Simple($inner) => $body,
            Node::Endpoint($inner) => $body,
            Node::Loop($inner) => $body,
            Node::ForkJoin($inner) => $body,
            Node::Switch($inner) => $body,
            Node::SubWorkflow($inner) => $body,
        }
    };
}

impl NodeBehavior for Node {
    fn core(&self) -> &NodeCore {
        dispatch!(self, n => n.core())
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        dispatch!(self, n => n.core_mut())
    }

    fn kind(&self) -> NodeKind {
        dispatch!(self, n => n.kind())
    }

    fn child_lists(&self) -> Vec<&Vec<Node>> {
        dispatch!(self, n => n.child_lists())
    }

    fn child_lists_mut(&mut self) -> Vec<&mut Vec<Node>> {
        dispatch!(self, n => n.child_lists_mut())
    }

    fn to_raw(&self) -> TaskDefinition {
        dispatch!(self, n => n.to_raw())
    }

    fn check(&mut self, context: &GraphContext) {
        dispatch!(self, n => n.check(context))
    }

    fn after_create(&mut self) -> Vec<Node> {
        dispatch!(self, n => n.after_create())
    }

    fn sibling_companion(&self) -> Option<&str> {
        dispatch!(self, n => n.sibling_companion())
    }

    fn keeps_placeholder(&self) -> bool {
        dispatch!(self, n => n.keeps_placeholder())
    }

    fn is_editable(&self) -> bool {
        dispatch!(self, n => n.is_editable())
    }

    fn insert_child(&mut self, nodes: Vec<Node>, request: &InsertRequest<'_>, ancestry: &Ancestry) -> InsertOutcome {
        dispatch!(self, n => n.insert_child(nodes, request, ancestry))
    }

    fn detach_child(&mut self, target_id: &str) -> Detach {
        dispatch!(self, n => n.detach_child(target_id))
    }

    fn apply_raw(&mut self, raw: TaskDefinition, factory: &Factory<'_>) {
        dispatch!(self, n => n.apply_raw(raw, factory))
    }

    fn check_children(&mut self, scope: &mut HydrationScope<'_>) -> Result<bool> {
        dispatch!(self, n => n.check_children(scope))
    }

    fn restore_children(&mut self) -> bool {
        dispatch!(self, n => n.restore_children())
    }

    fn layout(&mut self, cursor: &mut Point, cx: &LayoutCx<'_>) {
        dispatch!(self, n => n.layout(cursor, cx))
    }

    fn entry_point(&self, cx: &LayoutCx<'_>) -> EntryPoint {
        dispatch!(self, n => n.entry_point(cx))
    }

    fn render_edges(&mut self, cx: &LayoutCx<'_>, is_last: bool) {
        dispatch!(self, n => n.render_edges(cx, is_last))
    }

    fn render_controllers(&mut self, cx: &LayoutCx<'_>) {
        dispatch!(self, n => n.render_controllers(cx))
    }

    fn visible_lists(&self, cx: &LayoutCx<'_>) -> Vec<&Vec<Node>> {
        dispatch!(self, n => n.visible_lists(cx))
    }

    fn is_transparent(&self, cx: &LayoutCx<'_>) -> bool {
        dispatch!(self, n => n.is_transparent(cx))
    }

    fn update_execution_task(&mut self, instance: &str, record: &TaskExecution) -> bool {
        dispatch!(self, n => n.update_execution_task(instance, record))
    }
}

impl Node {
    pub fn id(&self) -> &str {
        &self.core().id
    }

    pub fn task_type(&self) -> &str {
        self.core().raw.task_type()
    }

    /// The stored definition, without refreshed child lists
    pub fn raw(&self) -> &TaskDefinition {
        &self.core().raw
    }

    pub fn position(&self) -> Point {
        self.core().position
    }

    pub fn size(&self) -> Size {
        self.core().size
    }

    pub fn edges(&self) -> &[Connector] {
        &self.core().edges
    }

    pub fn controllers(&self) -> &[Controller] {
        &self.core().controllers
    }

    pub fn is_placeholder(&self) -> bool {
        ids::is_placeholder(self.id())
    }

    pub fn is_companion(&self) -> bool {
        self.core().companion_of.is_some()
    }

    pub fn companion_of(&self) -> Option<&str> {
        self.core().companion_of.as_deref()
    }

    /// Direct children across all child lists
    pub fn children(&self) -> Vec<&Node> {
        self.child_lists().into_iter().flatten().collect()
    }

    pub fn find(&self, id: &str) -> Option<&Node> {
        if self.id() == id {
            return Some(self);
        }
        self.child_lists()
            .into_iter()
            .flatten()
            .find_map(|child| child.find(id))
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Node> {
        if self.id() == id {
            return Some(self);
        }
        for list in self.child_lists_mut() {
            for child in list.iter_mut() {
                if let Some(found) = child.find_mut(id) {
                    return Some(found);
                }
            }
        }
        None
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    /// Like `find`, without entering read-only children
    pub fn find_editable(&self, id: &str) -> Option<&Node> {
        if self.id() == id {
            return Some(self);
        }
        if !self.is_editable() {
            return None;
        }
        self.child_lists()
            .into_iter()
            .flatten()
            .find_map(|child| child.find_editable(id))
    }

    pub fn find_editable_mut(&mut self, id: &str) -> Option<&mut Node> {
        if self.id() == id {
            return Some(self);
        }
        if !self.is_editable() {
            return None;
        }
        for list in self.child_lists_mut() {
            for child in list.iter_mut() {
                if let Some(found) = child.find_editable_mut(id) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Ids of the subtree, without read-only children
    pub fn editable_ids(&self) -> Vec<String> {
        let mut ids = vec![self.id().to_string()];
        if self.is_editable() {
            for list in self.child_lists() {
                for child in list {
                    ids.extend(child.editable_ids());
                }
            }
        }
        ids
    }

    /// Pre-order walk of the subtree
    pub fn visit<'a, F: FnMut(&'a Node)>(&'a self, f: &mut F) {
        f(self);
        for list in self.child_lists() {
            for child in list {
                child.visit(f);
            }
        }
    }

    pub fn visit_mut<F: FnMut(&mut Node)>(&mut self, f: &mut F) {
        f(self);
        for list in self.child_lists_mut() {
            for child in list.iter_mut() {
                child.visit_mut(f);
            }
        }
    }

    /// Ids of this node and all of its descendants
    pub fn all_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        self.visit(&mut |node| ids.push(node.id().to_string()));
        ids
    }

    /// Consume the node, returning the ids it took out of the tree
    pub fn destroy(self) -> Vec<String> {
        self.all_ids()
    }

    /// Referenced workflow names of every sub-workflow in the subtree
    pub fn referenced_workflows(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.visit(&mut |node| {
            if let Node::SubWorkflow(sub) = node {
                if !sub.is_nested() {
                    names.push(sub.referenced_name().to_string());
                }
            }
        });
        names
    }

    pub fn execution(&self, instance: &str) -> Option<&ExecutionState> {
        self.core().execution(instance)
    }

    pub fn status(&self, instance: &str) -> NodeStatus {
        self.execution(instance).map(|state| state.status).unwrap_or_default()
    }

    /// Forget an instance across the subtree
    pub fn clear_execution(&mut self, instance: &str) -> bool {
        let mut changed = false;
        self.visit_mut(&mut |node| {
            changed |= node.core_mut().clear_execution(instance);
            if let Node::SubWorkflow(sub) = node {
                changed |= sub.forget_instance(instance);
            }
        });
        changed
    }

    /// Carry execution and view state over from an earlier copy of this node
    pub(crate) fn adopt_state(&mut self, previous: &Node) {
        self.core_mut().executions = previous.core().executions.clone();
        if let (Node::SubWorkflow(sub), Node::SubWorkflow(old)) = (self, previous) {
            sub.adopt_state(old);
        }
    }

    /// Extent of the laid-out subtree, by node positions
    pub fn boundary(&self, cx: &LayoutCx<'_>) -> Boundary {
        let children = self
            .visible_lists(cx)
            .into_iter()
            .fold(Boundary::EMPTY, |acc, list| acc.union(layout::sequence_boundary(list, cx)));
        if self.is_transparent(cx) {
            children
        } else {
            Boundary::at(self.position()).union(children)
        }
    }

    pub fn move_by(&mut self, dx: f64, dy: f64) {
        self.visit_mut(&mut |node| {
            let core = node.core_mut();
            core.position = core.position.translated(dx, dy);
        });
    }

    pub(crate) fn collect_layout(&self, cx: &LayoutCx<'_>, result: &mut LayoutResult) {
        layout::collect(self, cx, result);
    }

    /// Whether this node is a nested sub-workflow with nothing left to wrap
    pub(crate) fn is_emptied_wrapper(&self) -> bool {
        match self {
            Node::SubWorkflow(sub) => sub.is_nested() && sub.children.iter().all(Node::is_companion),
            _ => false,
        }
    }

    pub fn as_loop(&self) -> Option<&LoopNode> {
        match self {
            Node::Loop(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_fork_join(&self) -> Option<&ForkJoinNode> {
        match self {
            Node::ForkJoin(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_fork_join_mut(&mut self) -> Option<&mut ForkJoinNode> {
        match self {
            Node::ForkJoin(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_switch(&self) -> Option<&SwitchNode> {
        match self {
            Node::Switch(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_switch_mut(&mut self) -> Option<&mut SwitchNode> {
        match self {
            Node::Switch(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_sub_workflow(&self) -> Option<&SubWorkflowNode> {
        match self {
            Node::SubWorkflow(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_sub_workflow_mut(&mut self) -> Option<&mut SubWorkflowNode> {
        match self {
            Node::SubWorkflow(node) => Some(node),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::task_types::SIMPLE;

    #[test]
    fn test_core_generates_missing_reference_name() {
        let core = NodeCore::new(TaskDefinition::new(SIMPLE, "", "tool"));
        assert!(core.id().starts_with("simple_"));
        assert_eq!(core.raw().reference_name(), core.id());
    }

    #[test]
    fn test_update_execution_reports_changes_only() {
        let mut core = NodeCore::new(TaskDefinition::new(SIMPLE, "a", "tool"));
        let record = TaskExecution::with_status(NodeStatus::InProgress);
        assert!(core.update_execution("i1", &record));
        assert!(!core.update_execution("i1", &record));
        assert!(core.update_execution("i1", &TaskExecution::with_status(NodeStatus::Completed)));
        assert!(core.clear_execution("i1"));
        assert!(core.execution("i1").is_none());
    }

    #[test]
    fn test_find_and_ids() {
        let node = Node::Loop(LoopNode::from_raw(
            {
                let mut raw = TaskDefinition::new("DO_WHILE", "loop", "loop");
                raw.insert("loopOver", serde_json::json!([{"taskReferenceName": "x", "type": "SIMPLE"}]));
                raw
            },
            &Factory::for_tests(),
        ));
        assert!(node.contains("x"));
        assert_eq!(node.find("x").map(Node::id), Some("x"));
        assert_eq!(node.all_ids(), vec!["loop".to_string(), "x".to_string()]);
    }

    #[test]
    fn test_ancestry_tracks_loops_and_sub_workflows() {
        let context = GraphContext::new("root");
        let root = Ancestry::root(&context);
        assert_eq!(root.names, vec!["root".to_string()]);

        let looped = Node::Loop(LoopNode::from_raw(TaskDefinition::new("DO_WHILE", "l", "l"), &Factory::for_tests()));
        assert!(root.enter(&looped).in_loop);
        assert!(!root.in_loop);
    }
}
