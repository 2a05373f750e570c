//! The editable workflow graph
//!
//! `WorkflowGraph` owns the root sequence framed by synthetic start and end
//! endpoints, and is the single entry point for editing, layout, hydration
//! and execution reconciliation.
//!
//! # Key Concepts
//!
//! - **Rejectable edits**: inserts, deletes and moves that would break an
//!   invariant return `false`/`None` and leave the tree untouched.
//! - **Checkpoints**: every applied edit pushes a compressed snapshot of the
//!   serialized definition, so `undo`/`redo` simply reload a snapshot.
//! - **Execution instances**: execution state is cached per instance id;
//!   applying the same trace twice reports no change.
//!
//! # Example
//!
//! ```ignore
//! use trellis_graph::{GraphConfig, GraphContext, WorkflowGraph};
//!
//! let mut graph = WorkflowGraph::parse_json(GraphContext::new("wf-1"), GraphConfig::default(), json)?;
//! let id = graph.insert_task("a", "DO_WHILE", "loop", false);
//! let layout = graph.layout();
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use trellis_geometry::{Direction, Point, Size};

use crate::catalog::DefinitionCatalog;
use crate::config::GraphConfig;
use crate::context::GraphContext;
use crate::error::{GraphError, Result};
use crate::events::{EventSink, GraphEvent, NullEventSink};
use crate::execution::{ExecutionRecord, InstanceState, NodeStatus, TaskExecution, WorkflowStatus};
use crate::layout::{self, LayoutCx, LayoutResult};
use crate::node::{Ancestry, Detach, HydrationScope, InsertOutcome, InsertRequest, Node, NodeBehavior};
use crate::nodes::{composite, EndpointNode, SimpleNode};
use crate::registry::{Factory, NodeRegistry};
use crate::task::TaskDefinition;
use crate::undo::UndoStack;
use crate::validation::{validate_tree, ValidationError};

/// A graph shared between an editor and the async collaborators
///
/// The reconciler and the catalog lock it only between fetches, so edits
/// can land while a request is in flight.
pub type SharedGraph = Mutex<WorkflowGraph>;

/// A workflow being edited, laid out and observed
pub struct WorkflowGraph {
    context: GraphContext,
    config: GraphConfig,
    registry: NodeRegistry,
    start: Node,
    end: Node,
    nodes: Vec<Node>,
    direction: Direction,
    executions: HashMap<String, InstanceState>,
    active_instance: Option<String>,
    undo: UndoStack,
    events: Arc<dyn EventSink>,
    canvas: Size,
}

impl WorkflowGraph {
    /// Create an empty workflow (a single placeholder)
    pub fn new(context: GraphContext, config: GraphConfig) -> Self {
        let undo = UndoStack::new(config.undo_depth);
        let mut graph = Self {
            context,
            config,
            registry: NodeRegistry::with_builtins(),
            start: Node::Endpoint(EndpointNode::start()),
            end: Node::Endpoint(EndpointNode::end()),
            nodes: vec![Node::Simple(SimpleNode::placeholder())],
            direction: Direction::default(),
            executions: HashMap::new(),
            active_instance: None,
            undo,
            events: Arc::new(NullEventSink),
            canvas: Size::default(),
        };
        graph.checkpoint();
        graph
    }

    /// Replace the registry; call before loading definitions
    pub fn with_registry(mut self, registry: NodeRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn from_definitions(context: GraphContext, config: GraphConfig, tasks: Vec<TaskDefinition>) -> Self {
        let mut graph = Self::new(context, config);
        graph.load(tasks);
        graph
    }

    /// Build a graph from a JSON array of task definitions
    pub fn parse_json(context: GraphContext, config: GraphConfig, json: &str) -> Result<Self> {
        let tasks = TaskDefinition::list_from_json(json)?;
        Ok(Self::from_definitions(context, config, tasks))
    }

    /// Replace the whole tree, resetting history and execution state
    pub fn load(&mut self, tasks: Vec<TaskDefinition>) {
        self.rebuild(tasks);
        self.executions.clear();
        self.active_instance = None;
        self.start = Node::Endpoint(EndpointNode::start());
        self.end = Node::Endpoint(EndpointNode::end());
        self.undo.clear();
        self.checkpoint();
        log::debug!("Loaded workflow with {} root node(s)", self.nodes.len());
        self.emit(GraphEvent::NeedsRender);
    }

    fn rebuild(&mut self, tasks: Vec<TaskDefinition>) {
        let factory = Factory::new(&self.registry, &self.context);
        let mut nodes = factory.create_all(tasks);
        composite::ensure_placeholder(&mut nodes, true);
        self.nodes = nodes;
    }

    /// The canonical persisted form of the workflow
    pub fn serialize(&self) -> Vec<TaskDefinition> {
        composite::serialize_list(&self.nodes)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.serialize())?)
    }

    pub fn context(&self) -> &GraphContext {
        &self.context
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Root sequence, without the endpoints
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn start(&self) -> &Node {
        &self.start
    }

    pub fn end(&self) -> &Node {
        &self.end
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn set_direction(&mut self, direction: Direction) {
        if self.direction != direction {
            self.direction = direction;
            self.emit(GraphEvent::NeedsRender);
        }
    }

    /// Canvas size computed by the last layout
    pub fn canvas(&self) -> Size {
        self.canvas
    }

    /// Any node by id, endpoints and hydrated children included
    pub fn node(&self, id: &str) -> Option<&Node> {
        if self.start.id() == id {
            return Some(&self.start);
        }
        if self.end.id() == id {
            return Some(&self.end);
        }
        self.nodes.iter().find_map(|node| node.find(id))
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        if self.start.id() == id {
            return Some(&mut self.start);
        }
        if self.end.id() == id {
            return Some(&mut self.end);
        }
        self.nodes.iter_mut().find_map(|node| node.find_mut(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    /// Ids of every editable node, endpoints excluded
    pub fn ids(&self) -> Vec<String> {
        self.nodes.iter().flat_map(Node::editable_ids).collect()
    }

    fn is_endpoint(&self, id: &str) -> bool {
        id == self.start.id() || id == self.end.id()
    }

    /// Ids a new or updated node must not take: every editable node plus
    /// the endpoints
    fn reserved_ids(&self) -> HashSet<String> {
        let mut ids: HashSet<String> = self.ids().into_iter().collect();
        ids.insert(self.start.id().to_string());
        ids.insert(self.end.id().to_string());
        ids
    }

    // ========================================================================
    // Editing
    // ========================================================================

    /// Build nodes for a definition, companions included
    pub fn create_nodes(&self, raw: TaskDefinition) -> Vec<Node> {
        Factory::new(&self.registry, &self.context).create(raw)
    }

    /// Build a fresh tool instance with pre-filled composite bodies
    pub fn create_task(&self, task_type: &str, name: &str) -> Vec<Node> {
        self.create_nodes(TaskDefinition::template(task_type, name))
    }

    /// Insert `nodes` next to `target_id`
    ///
    /// Returns false, leaving the tree untouched, if the target does not
    /// exist, an id would be duplicated, or a sub-workflow would end up
    /// inside itself.
    pub fn insert_nodes(&mut self, target_id: &str, nodes: Vec<Node>, insert_before: bool) -> bool {
        if nodes.is_empty() {
            return false;
        }

        let mut existing = self.reserved_ids();
        for id in nodes.iter().flat_map(Node::editable_ids) {
            if !existing.insert(id.clone()) {
                log::warn!("Refusing to insert duplicate node id '{}'", id);
                return false;
            }
        }

        match self.insert_unchecked(target_id, nodes, insert_before) {
            InsertOutcome::Inserted(ids) => {
                log::debug!("Inserted {:?} {} '{}'", ids, if insert_before { "before" } else { "after" }, target_id);
                self.commit();
                if let Some(first) = ids.first() {
                    self.emit(GraphEvent::focus(first));
                }
                true
            }
            InsertOutcome::Rejected(_) => false,
            InsertOutcome::NotFound(_) => {
                log::debug!("Insert target '{}' not found", target_id);
                false
            }
        }
    }

    fn insert_unchecked(&mut self, target_id: &str, nodes: Vec<Node>, insert_before: bool) -> InsertOutcome {
        let Some((target_id, insert_before)) = self.resolve_target(target_id, insert_before) else {
            return InsertOutcome::Rejected(nodes);
        };
        let request = InsertRequest {
            target_id: &target_id,
            insert_before,
            context: &self.context,
        };
        let ancestry = Ancestry::root(&self.context);
        composite::insert_into(vec![&mut self.nodes], true, nodes, &request, &ancestry)
    }

    /// Map inserts around the endpoints onto the root sequence
    fn resolve_target(&self, target_id: &str, insert_before: bool) -> Option<(String, bool)> {
        if target_id == self.start.id() {
            if insert_before {
                return None;
            }
            return self.nodes.first().map(|first| (first.id().to_string(), true));
        }
        if target_id == self.end.id() {
            if !insert_before {
                return None;
            }
            return self.nodes.last().map(|last| (last.id().to_string(), false));
        }
        Some((target_id.to_string(), insert_before))
    }

    /// Create a tool instance and insert it; returns the new node's id
    pub fn insert_task(&mut self, target_id: &str, task_type: &str, name: &str, insert_before: bool) -> Option<String> {
        let nodes = self.create_task(task_type, name);
        let id = nodes.first()?.id().to_string();
        self.insert_nodes(target_id, nodes, insert_before).then_some(id)
    }

    /// Delete a node and its companions
    ///
    /// Returns every id removed from the tree, or `None` if the node cannot
    /// be deleted (endpoints, placeholders, companions, read-only children).
    pub fn delete_node(&mut self, id: &str) -> Option<Vec<String>> {
        if self.is_endpoint(id) {
            return None;
        }
        match composite::detach_from(vec![&mut self.nodes], id, true) {
            Detach::Detached { nodes, dropped } => {
                let mut removed: Vec<String> = nodes.into_iter().flat_map(Node::destroy).collect();
                removed.extend(dropped);
                log::debug!("Deleted '{}', removing {:?}", id, removed);
                self.commit();
                Some(removed)
            }
            Detach::Refused | Detach::NotFound => None,
        }
    }

    /// Move a node (with its companion) next to another node
    pub fn move_node(&mut self, source_id: &str, target_id: &str, insert_before: bool) -> bool {
        if source_id == target_id || self.is_endpoint(source_id) {
            return false;
        }
        let Some(source) = self.nodes.iter().find_map(|node| node.find_editable(source_id)) else {
            return false;
        };
        if source.contains(target_id) || source.sibling_companion() == Some(target_id) {
            log::debug!("Refusing to move '{}' into its own subtree", source_id);
            return false;
        }

        let snapshot = self.nodes.clone();
        let detached = match composite::detach_from(vec![&mut self.nodes], source_id, true) {
            Detach::Detached { nodes, .. } => nodes,
            Detach::Refused | Detach::NotFound => return false,
        };

        match self.insert_unchecked(target_id, detached, insert_before) {
            InsertOutcome::Inserted(_) => {
                log::debug!("Moved '{}' next to '{}'", source_id, target_id);
                self.commit();
                true
            }
            InsertOutcome::Rejected(_) | InsertOutcome::NotFound(_) => {
                self.nodes = snapshot;
                false
            }
        }
    }

    /// Current definition of one node, children re-embedded
    pub fn task_definition(&self, id: &str) -> Result<TaskDefinition> {
        self.node(id)
            .map(|node| node.to_raw())
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))
    }

    /// Replace a node's definition in place
    ///
    /// Embedded child lists are parsed again, keeping existing children by
    /// id. Rejected if the reference name changes or a child id of the new
    /// definition is already used elsewhere in the tree.
    pub fn update_raw(&mut self, id: &str, raw: TaskDefinition) -> bool {
        if self.is_endpoint(id) {
            return false;
        }
        let reference = crate::ids::normalize_sub_workflow_name(raw.reference_name());
        if reference != id {
            log::warn!("Refusing to change reference name of '{}' to '{}'", id, reference);
            return false;
        }
        let Some(current) = self.nodes.iter().find_map(|node| node.find_editable(id)) else {
            return false;
        };

        let factory = Factory::new(&self.registry, &self.context);
        let mut taken = self.reserved_ids();
        for replaced in current.editable_ids() {
            taken.remove(&replaced);
        }
        for incoming in factory.construct(raw.clone()).editable_ids() {
            if !taken.insert(incoming.clone()) {
                log::warn!("Refusing to update '{}': id '{}' is already in use", id, incoming);
                return false;
            }
        }

        let Some(node) = self.nodes.iter_mut().find_map(|node| node.find_editable_mut(id)) else {
            return false;
        };
        node.apply_raw(raw, &factory);
        self.commit();
        true
    }

    /// Add a fork branch or an incrementally named switch case
    pub fn add_branch(&mut self, id: &str) -> Option<String> {
        let max = self.config.max_branches;
        let added = match self.nodes.iter_mut().find_map(|node| node.find_editable_mut(id))? {
            Node::ForkJoin(fork) => fork.add_branch(max),
            Node::Switch(switch) => switch.add_branch_incremental(max),
            _ => None,
        };
        if added.is_some() {
            self.commit();
        }
        added
    }

    /// Add a switch case with a chosen name
    pub fn add_switch_branch(&mut self, id: &str, name: &str) -> bool {
        let max = self.config.max_branches;
        let added = self
            .nodes
            .iter_mut()
            .find_map(|node| node.find_editable_mut(id))
            .and_then(Node::as_switch_mut)
            .is_some_and(|switch| switch.add_branch(name, max));
        if added {
            self.commit();
        }
        added
    }

    /// Remove a switch case (by name) or fork branch (by index)
    ///
    /// Returns the ids removed with the branch.
    pub fn remove_branch(&mut self, id: &str, branch: &str) -> Option<Vec<String>> {
        let removed = match self.nodes.iter_mut().find_map(|node| node.find_editable_mut(id))? {
            Node::ForkJoin(fork) => fork.remove_branch(branch.parse().ok()?),
            Node::Switch(switch) => switch.remove_branch(branch),
            _ => None,
        }?;
        let ids: Vec<String> = removed.into_iter().flat_map(Node::destroy).collect();
        self.commit();
        Some(ids)
    }

    pub fn focus_node(&self, id: &str) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.emit(GraphEvent::focus(id));
        true
    }

    // ========================================================================
    // Hydration
    // ========================================================================

    /// Expand referenced sub-workflows from `catalog`
    ///
    /// On a cycle every hydrated child is dropped again and the error is
    /// returned.
    pub fn hydrate(&mut self, catalog: &dyn DefinitionCatalog) -> Result<bool> {
        let factory = Factory::new(&self.registry, &self.context);
        let mut scope = HydrationScope::new(factory, catalog);
        let outcome = self
            .nodes
            .iter_mut()
            .try_fold(false, |changed, node| Ok::<_, GraphError>(node.check_children(&mut scope)? || changed));

        match outcome {
            Ok(changed) => {
                if changed {
                    log::info!("Hydrated referenced sub-workflows");
                    self.emit(GraphEvent::NeedsRender);
                }
                Ok(changed)
            }
            Err(e) => {
                log::warn!("Hydration failed: {}", e);
                self.restore_children();
                Err(e)
            }
        }
    }

    /// Drop every hydrated child
    pub fn restore_children(&mut self) -> bool {
        let mut changed = false;
        for node in self.nodes.iter_mut() {
            changed |= node.restore_children();
        }
        if changed {
            self.emit(GraphEvent::NeedsRender);
        }
        changed
    }

    /// Referenced sub-workflows still waiting for a definition
    pub fn unresolved_references(&self) -> Vec<(String, Option<u32>)> {
        let mut references = Vec::new();
        for node in &self.nodes {
            node.visit(&mut |node| {
                if let Node::SubWorkflow(sub) = node {
                    let reference = (sub.referenced_name().to_string(), sub.version());
                    if !sub.is_nested() && !sub.is_hydrated() && !references.contains(&reference) {
                        references.push(reference);
                    }
                }
            });
        }
        references
    }

    pub fn set_collapsed(&mut self, id: &str, collapsed: bool) -> bool {
        let Some(sub) = self.node_mut(id).and_then(Node::as_sub_workflow_mut) else {
            return false;
        };
        sub.set_collapsed(collapsed);
        self.emit(GraphEvent::NeedsRender);
        true
    }

    // ========================================================================
    // Layout
    // ========================================================================

    /// Lay out the whole tree and collect what a renderer needs
    ///
    /// Positions are normalized so the top-left node sits at the origin.
    pub fn layout(&mut self) -> LayoutResult {
        let expand_all = self.is_running();
        let cx = LayoutCx {
            direction: self.direction,
            config: &self.config.layout,
            max_branches: self.config.max_branches,
            expand_all,
        };

        let mut cursor = Point::ZERO;
        self.start.layout(&mut cursor, &cx);
        layout::layout_sequence(self.nodes.iter_mut(), &mut cursor, &cx);
        self.end.layout(&mut cursor, &cx);

        let bounds = self
            .start
            .boundary(&cx)
            .union(layout::sequence_boundary(&self.nodes, &cx))
            .union(self.end.boundary(&cx));
        let (dx, dy) = (-bounds.left, -bounds.top);
        self.start.move_by(dx, dy);
        for node in self.nodes.iter_mut() {
            node.move_by(dx, dy);
        }
        self.end.move_by(dx, dy);
        self.canvas = Size::new(
            bounds.right - bounds.left + cx.config.node_size.width,
            bounds.bottom - bounds.top + cx.config.node_size.height,
        );

        self.start.render_edges(&cx, false);
        layout::sequence_edges(&mut self.nodes, &cx, false);
        self.end.render_edges(&cx, true);

        self.start.render_controllers(&cx);
        layout::sequence_controllers(&mut self.nodes, &cx);
        self.end.render_controllers(&cx);

        let mut result = LayoutResult {
            direction: self.direction,
            nodes: Vec::new(),
            connectors: Vec::new(),
            controllers: Vec::new(),
            canvas: self.canvas,
        };
        self.start.collect_layout(&cx, &mut result);
        for node in &self.nodes {
            node.collect_layout(&cx, &mut result);
        }
        self.end.collect_layout(&cx, &mut result);
        log::debug!(
            "Laid out {} node(s), {} connector(s)",
            result.nodes.len(),
            result.connectors.len()
        );
        result
    }

    // ========================================================================
    // Execution
    // ========================================================================

    fn is_running(&self) -> bool {
        self.active_instance
            .as_deref()
            .is_some_and(|instance| self.execution_status(instance) == WorkflowStatus::Running)
    }

    pub fn active_instance(&self) -> Option<&str> {
        self.active_instance.as_deref()
    }

    pub fn execution_status(&self, instance: &str) -> WorkflowStatus {
        self.executions
            .get(instance)
            .map(|state| state.status)
            .unwrap_or_default()
    }

    pub fn node_status(&self, instance: &str, id: &str) -> NodeStatus {
        self.node(id).map(|node| node.status(instance)).unwrap_or_default()
    }

    /// Validate the tree, reset `instance` and mark it running
    pub fn begin_execution(&mut self, instance: &str) -> Result<()> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(GraphError::Validation(errors));
        }
        self.clear_execution(instance);
        self.executions.insert(
            instance.to_string(),
            InstanceState {
                status: WorkflowStatus::Running,
                fingerprint: None,
            },
        );
        self.start
            .update_execution_task(instance, &TaskExecution::with_status(NodeStatus::Completed));
        self.active_instance = Some(instance.to_string());
        log::info!("Execution '{}' started", instance);
        self.emit(GraphEvent::NeedsRender);
        Ok(())
    }

    /// Apply a top-level execution trace; returns whether anything changed
    pub fn apply_execution(&mut self, instance: &str, record: &ExecutionRecord) -> bool {
        let fingerprint = record.fingerprint();
        let state = self.executions.entry(instance.to_string()).or_default();
        let mut changed = state.fingerprint.as_ref() != Some(&fingerprint);
        let finished = state.status == WorkflowStatus::Running && record.status != WorkflowStatus::Running;
        state.status = record.status;
        state.fingerprint = Some(fingerprint);

        if finished {
            changed |= self
                .end
                .update_execution_task(instance, &TaskExecution::with_status(NodeStatus::Completed));
        }

        for task in &record.tasks {
            let Some(reference) = task.reference_name() else {
                continue;
            };
            match self.nodes.iter_mut().find_map(|node| node.find_editable_mut(reference)) {
                Some(node) => changed |= node.update_execution_task(instance, task),
                None => log::debug!("No node for task '{}' in execution '{}'", reference, instance),
            }
        }

        if changed {
            self.emit(GraphEvent::NeedsRender);
        }
        changed
    }

    /// Sub-workflow nodes whose sub-execution may have progressed
    ///
    /// Returns `(node id, sub-execution instance id)` pairs.
    pub fn pending_sub_executions(&self, instance: &str) -> Vec<(String, String)> {
        let mut pending = Vec::new();
        for node in &self.nodes {
            node.visit(&mut |node| {
                if let Some(execution) = node.as_sub_workflow().and_then(|sub| sub.sub_execution_id(instance)) {
                    pending.push((node.id().to_string(), execution.to_string()));
                }
            });
        }
        pending
    }

    /// Apply a fetched sub-execution to the node that spawned it
    ///
    /// Results for nodes that no longer exist are discarded.
    pub fn apply_sub_execution(&mut self, instance: &str, node_id: &str, record: &ExecutionRecord) -> bool {
        let sub = self
            .nodes
            .iter_mut()
            .find_map(|node| node.find_mut(node_id))
            .and_then(Node::as_sub_workflow_mut);
        let Some(sub) = sub else {
            log::warn!("Discarding sub-execution for missing node '{}'", node_id);
            return false;
        };
        let changed = sub.apply_sub_execution(instance, record);
        if changed {
            self.emit(GraphEvent::NeedsRender);
        }
        changed
    }

    /// Forget all state of an execution instance
    pub fn clear_execution(&mut self, instance: &str) -> bool {
        let mut changed = self.executions.remove(instance).is_some();
        changed |= self.start.clear_execution(instance);
        changed |= self.end.clear_execution(instance);
        for node in self.nodes.iter_mut() {
            changed |= node.clear_execution(instance);
        }
        if self.active_instance.as_deref() == Some(instance) {
            self.active_instance = None;
        }
        if changed {
            self.emit(GraphEvent::NeedsRender);
        }
        changed
    }

    // ========================================================================
    // History
    // ========================================================================

    /// Record the current definition in the undo history
    pub fn checkpoint(&mut self) {
        if let Err(e) = self.undo.push(&self.serialize()) {
            log::warn!("Failed to record undo snapshot: {}", e);
        }
    }

    pub fn undo(&mut self) -> Result<bool> {
        match self.undo.undo() {
            Some(tasks) => self.restore_snapshot(tasks?),
            None => Ok(false),
        }
    }

    pub fn redo(&mut self) -> Result<bool> {
        match self.undo.redo() {
            Some(tasks) => self.restore_snapshot(tasks?),
            None => Ok(false),
        }
    }

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }

    /// Rebuild from a snapshot; nodes that survive keep their execution
    /// state, collapse flag and hydrated children
    fn restore_snapshot(&mut self, tasks: Vec<TaskDefinition>) -> Result<bool> {
        let previous = std::mem::take(&mut self.nodes);
        self.rebuild(tasks);

        let mut by_id: HashMap<&str, &Node> = HashMap::new();
        for node in &previous {
            node.visit(&mut |node| {
                by_id.insert(node.id(), node);
            });
        }
        for node in self.nodes.iter_mut() {
            node.visit_mut(&mut |node| {
                if let Some(old) = by_id.get(node.id()).copied() {
                    node.adopt_state(old);
                }
            });
        }

        self.emit(GraphEvent::Updated);
        self.emit(GraphEvent::NeedsRender);
        Ok(true)
    }

    // ========================================================================
    // Misc
    // ========================================================================

    pub fn validate(&self) -> Vec<ValidationError> {
        validate_tree(self)
    }

    /// Checkpoint and notify after an applied edit
    fn commit(&mut self) {
        self.checkpoint();
        self.emit(GraphEvent::Updated);
        self.emit(GraphEvent::NeedsRender);
    }

    fn emit(&self, event: GraphEvent) {
        if let Err(e) = self.events.send(event) {
            log::warn!("Failed to deliver graph event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::VecEventSink;
    use serde_json::json;

    fn graph(tasks: serde_json::Value) -> WorkflowGraph {
        let tasks: Vec<TaskDefinition> = serde_json::from_value(tasks).unwrap();
        WorkflowGraph::from_definitions(GraphContext::new("wf"), GraphConfig::default(), tasks)
    }

    fn simple(id: &str) -> serde_json::Value {
        json!({"name": "tool", "taskReferenceName": id, "type": "SIMPLE"})
    }

    fn root_ids(graph: &WorkflowGraph) -> Vec<&str> {
        graph.nodes().iter().map(Node::id).collect()
    }

    #[test]
    fn test_empty_graph_has_placeholder() {
        let graph = WorkflowGraph::new(GraphContext::default(), GraphConfig::default());
        assert_eq!(graph.nodes().len(), 1);
        assert!(graph.nodes()[0].is_placeholder());
    }

    #[test]
    fn test_insert_around_endpoints() {
        let mut graph = graph(json!([simple("a")]));
        assert!(graph.insert_nodes("workflow_start", graph.create_nodes(TaskDefinition::new("SIMPLE", "s", "t")), false));
        assert!(graph.insert_nodes("workflow_end", graph.create_nodes(TaskDefinition::new("SIMPLE", "e", "t")), true));
        assert_eq!(root_ids(&graph), ["s", "a", "e"]);

        assert!(!graph.insert_nodes("workflow_start", graph.create_nodes(TaskDefinition::new("SIMPLE", "x", "t")), true));
        assert!(!graph.insert_nodes("workflow_end", graph.create_nodes(TaskDefinition::new("SIMPLE", "x", "t")), false));
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let mut graph = graph(json!([simple("a"), simple("b")]));
        let nodes = graph.create_nodes(TaskDefinition::new("SIMPLE", "b", "t"));
        assert!(!graph.insert_nodes("a", nodes, false));
        assert_eq!(root_ids(&graph), ["a", "b"]);
    }

    #[test]
    fn test_delete_endpoint_and_companion_refused() {
        let mut graph = graph(json!([simple("a")]));
        assert!(graph.delete_node("workflow_start").is_none());

        let fork = graph.insert_task("a", "FORK_JOIN", "fork", false).unwrap();
        let join = graph.nodes()[2].id().to_string();
        assert!(graph.delete_node(&join).is_none());

        let removed = graph.delete_node(&fork).unwrap();
        assert!(removed.contains(&fork));
        assert!(removed.contains(&join));
        assert_eq!(root_ids(&graph), ["a"]);
    }

    #[test]
    fn test_move_refuses_own_subtree() {
        let mut graph = graph(json!([
            simple("a"),
            {"name": "loop", "taskReferenceName": "loop", "type": "DO_WHILE", "loopOver": [simple("x")]}
        ]));
        assert!(!graph.move_node("loop", "x", false));
        assert!(graph.move_node("x", "a", true));
        assert_eq!(root_ids(&graph), ["x", "a", "loop"]);

        let looped = graph.node("loop").and_then(Node::as_loop).unwrap();
        assert!(looped.body()[0].is_placeholder());
    }

    #[test]
    fn test_update_raw_rejects_id_change() {
        let mut graph = graph(json!([simple("a")]));
        let mut raw = TaskDefinition::new("SIMPLE", "a", "tool");
        raw.insert("description", json!("changed"));
        assert!(graph.update_raw("a", raw));
        assert_eq!(graph.serialize()[0].get("description"), Some(&json!("changed")));

        assert!(!graph.update_raw("a", TaskDefinition::new("SIMPLE", "b", "tool")));
        assert!(matches!(graph.task_definition("b"), Err(GraphError::NodeNotFound(id)) if id == "b"));
    }

    #[test]
    fn test_update_raw_rejects_ids_used_elsewhere() {
        let mut graph = graph(json!([
            simple("a"),
            {"name": "sw", "taskReferenceName": "sw", "type": "SWITCH", "decisionCases": {"l": [simple("l1")], "r": [simple("r1")]}}
        ]));
        let before = graph.serialize();

        let mut raw = graph.task_definition("sw").unwrap();
        raw.insert("decisionCases", json!({"l": [simple("a")], "r": [simple("r1")]}));
        assert!(!graph.update_raw("sw", raw.clone()));
        raw.insert("decisionCases", json!({"l": [simple("workflow_end")], "r": [simple("r1")]}));
        assert!(!graph.update_raw("sw", raw.clone()));
        assert_eq!(graph.serialize(), before);

        // Ids the node already owns may be kept or moved between its cases
        raw.insert("decisionCases", json!({"l": [simple("r1"), simple("l1")], "r": [simple("r2")]}));
        assert!(graph.update_raw("sw", raw));
        assert!(graph.validate().is_empty());
        let cases: Vec<Vec<&str>> = graph
            .node("sw")
            .and_then(Node::as_switch)
            .unwrap()
            .branches()
            .iter()
            .map(|branch| branch.nodes.iter().map(Node::id).collect())
            .collect();
        assert_eq!(cases, [vec!["r1", "l1"], vec!["r2"]]);
    }

    #[test]
    fn test_insert_rejects_endpoint_ids() {
        let mut graph = graph(json!([simple("a")]));
        for id in ["workflow_start", "workflow_end"] {
            let nodes = graph.create_nodes(TaskDefinition::new("SIMPLE", id, "tool"));
            assert!(!graph.insert_nodes("a", nodes, false));
        }
        assert_eq!(root_ids(&graph), ["a"]);
    }

    #[test]
    fn test_update_raw_reparses_loop_and_nested_bodies() {
        let mut graph = graph(json!([
            {"name": "loop", "taskReferenceName": "loop", "type": "DO_WHILE", "loopOver": [simple("x")]},
            {
                "name": "sub_workflow_nested_k",
                "taskReferenceName": "sub_workflow_nested_k",
                "type": "SUB_WORKFLOW",
                "subWorkflowParam": {"name": "sub_workflow_nested_k", "workflowDefinition": {"name": "sub_workflow_nested_k", "tasks": [simple("n1")]}}
            }
        ]));

        let mut raw = graph.task_definition("loop").unwrap();
        let mut body = raw.task_list("loopOver");
        body.insert(1, TaskDefinition::new("SIMPLE", "y", "tool"));
        raw.insert("loopOver", json!(body));
        assert!(graph.update_raw("loop", raw));

        let saved = graph.task_definition("loop").unwrap().task_list("loopOver");
        let ids: Vec<&str> = saved.iter().map(TaskDefinition::reference_name).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(&ids[..2], ["x", "y"]);
        let looped = graph.node("loop").and_then(Node::as_loop).unwrap();
        assert_eq!(looped.collector().map(Node::id), Some(ids[2]));

        let mut raw = graph.task_definition("sub_workflow_nested_k").unwrap();
        raw.set_path(
            &["subWorkflowParam", "workflowDefinition", "tasks"],
            json!([simple("n1"), simple("n2")]),
        );
        assert!(graph.update_raw("sub_workflow_nested_k", raw));
        assert!(graph.contains("n2"));
        let fork = graph.insert_task("n2", "FORK_JOIN", "fork", false).unwrap();
        let mut raw = graph.task_definition(&fork).unwrap();
        raw.insert("forkTasks", json!([[simple("f1")], [simple("g1")], [simple("h1")]]));
        assert!(graph.update_raw(&fork, raw));
        assert_eq!(graph.node(&fork).and_then(Node::as_fork_join).unwrap().join_on(), ["f1", "g1", "h1"]);
    }

    #[test]
    fn test_undo_keeps_execution_and_hydration_state() {
        let mut graph = graph(json!([
            simple("a"),
            {"name": "billing", "taskReferenceName": "billing", "type": "SUB_WORKFLOW", "subWorkflowParam": {"name": "billing", "version": 1}}
        ]));
        let catalog = crate::catalog::WorkflowCatalog::new();
        catalog.insert("billing", 1, vec![TaskDefinition::new("SIMPLE", "b1", "tool")]);
        assert!(graph.hydrate(&catalog).unwrap());
        assert!(graph.set_collapsed("billing", true));

        graph.begin_execution("i1").unwrap();
        let record: ExecutionRecord = serde_json::from_value(json!({
            "status": "RUNNING",
            "tasks": [{"status": "COMPLETED", "workflowTask": {"taskReferenceName": "a"}}]
        }))
        .unwrap();
        assert!(graph.apply_execution("i1", &record));

        graph.insert_task("a", "SIMPLE", "tool", false).unwrap();
        assert!(graph.undo().unwrap());

        assert_eq!(graph.node_status("i1", "a"), NodeStatus::Completed);
        let sub = graph.node("billing").and_then(Node::as_sub_workflow).unwrap();
        assert!(sub.is_hydrated());
        assert!(sub.is_collapsed());
        assert!(graph.contains("b1"));
        assert!(!graph.apply_execution("i1", &record));
    }

    #[test]
    fn test_branch_editing_through_graph() {
        let mut graph = graph(json!([simple("a")]));
        let switch = graph.insert_task("a", "SWITCH", "switch", false).unwrap();

        assert_eq!(graph.add_branch(&switch), Some("branch3".to_string()));
        assert!(graph.add_switch_branch(&switch, "other"));
        assert!(!graph.add_switch_branch(&switch, "9bad"));
        assert!(graph.remove_branch(&switch, "branch3").is_some());
        assert!(graph.add_branch("a").is_none());

        let fork = graph.insert_task("a", "FORK_JOIN", "fork", false).unwrap();
        assert_eq!(graph.add_branch(&fork), Some("2".to_string()));
        let removed = graph.remove_branch(&fork, "2").unwrap();
        assert_eq!(removed.len(), 1);
        assert!(graph.remove_branch(&fork, "0").is_none());
    }

    #[test]
    fn test_undo_redo_restore_definitions() {
        let mut graph = graph(json!([simple("a")]));
        assert!(!graph.can_undo());

        graph.insert_task("a", "SIMPLE", "tool", false).unwrap();
        assert_eq!(graph.nodes().len(), 2);

        assert!(graph.undo().unwrap());
        assert_eq!(root_ids(&graph), ["a"]);
        assert!(graph.redo().unwrap());
        assert_eq!(graph.nodes().len(), 2);
        assert!(!graph.redo().unwrap());
    }

    #[test]
    fn test_edits_emit_events() {
        let sink = Arc::new(VecEventSink::new());
        let mut graph = graph(json!([simple("a")])).with_event_sink(sink.clone());

        let id = graph.insert_task("a", "SIMPLE", "tool", false).unwrap();
        let events = sink.events();
        assert!(events.contains(&GraphEvent::Updated));
        assert!(events.contains(&GraphEvent::focus(&id)));

        sink.clear();
        assert!(graph.focus_node("a"));
        assert!(!graph.focus_node("missing"));
        assert_eq!(sink.events(), vec![GraphEvent::focus("a")]);
    }

    #[test]
    fn test_begin_execution_requires_valid_tree() {
        let mut graph = WorkflowGraph::new(GraphContext::default(), GraphConfig::default());
        assert!(matches!(graph.begin_execution("i1"), Err(GraphError::Validation(_))));

        let mut graph = graph_with_a();
        graph.begin_execution("i1").unwrap();
        assert_eq!(graph.execution_status("i1"), WorkflowStatus::Running);
        assert_eq!(graph.node_status("i1", "workflow_start"), NodeStatus::Completed);
        assert_eq!(graph.active_instance(), Some("i1"));
    }

    fn graph_with_a() -> WorkflowGraph {
        graph(json!([simple("a")]))
    }

    #[test]
    fn test_end_completes_when_execution_finishes() {
        let mut graph = graph_with_a();
        graph.begin_execution("i1").unwrap();

        let running: ExecutionRecord = serde_json::from_value(json!({
            "status": "RUNNING",
            "tasks": [{"status": "IN_PROGRESS", "workflowTask": {"taskReferenceName": "a"}}]
        }))
        .unwrap();
        assert!(graph.apply_execution("i1", &running));
        assert_eq!(graph.node_status("i1", "a"), NodeStatus::InProgress);
        assert_eq!(graph.node_status("i1", "workflow_end"), NodeStatus::Default);

        let done: ExecutionRecord = serde_json::from_value(json!({
            "status": "COMPLETED",
            "tasks": [{"status": "COMPLETED", "workflowTask": {"taskReferenceName": "a"}}]
        }))
        .unwrap();
        assert!(graph.apply_execution("i1", &done));
        assert_eq!(graph.node_status("i1", "workflow_end"), NodeStatus::Completed);

        assert!(graph.clear_execution("i1"));
        assert_eq!(graph.node_status("i1", "a"), NodeStatus::Default);
        assert!(graph.active_instance().is_none());
    }

    #[test]
    fn test_layout_normalizes_to_origin() {
        let mut graph = graph(json!([
            simple("a"),
            {"name": "sw", "taskReferenceName": "sw", "type": "SWITCH", "decisionCases": {
                "l": [simple("l1")], "r": [simple("r1")]
            }}
        ]));
        let result = graph.layout();

        let min_x = result.nodes.iter().map(|n| n.position.x).fold(f64::INFINITY, f64::min);
        let min_y = result.nodes.iter().map(|n| n.position.y).fold(f64::INFINITY, f64::min);
        assert_eq!(min_x, 0.0);
        assert_eq!(min_y, 0.0);
        assert!(result.canvas.width >= 80.0 + 2.0 * 190.0);
        assert!(result.connector("sw_l").is_some());
        assert!(result.connector("sw_r_join").is_some());
        assert!(result.connector("workflow_end").is_none());
    }
}
