//! `SUB_WORKFLOW` nodes
//!
//! A sub-workflow comes in two flavours, told apart by its id:
//!
//! - Nested (`sub_workflow_nested_*`): owns an embedded definition whose
//!   tasks are real, editable children. Nested sub-workflows are drawn
//!   transparently, as if their children sat in the enclosing sequence.
//!   They mostly exist to wrap a loop placed inside another loop.
//! - Referenced: points at another stored workflow by name and version.
//!   Its children are read-only and only exist after hydration from a
//!   `DefinitionCatalog`; they are never written back.

use std::collections::HashMap;

use serde_json::{json, Value};
use trellis_geometry::{EntryPoint, Point};

use crate::context::GraphContext;
use crate::error::{GraphError, Result};
use crate::execution::ExecutionRecord;
use crate::ids;
use crate::layout::{self, LayoutCx};
use crate::node::{HydrationScope, Node, NodeBehavior, NodeCore, NodeKind};
use crate::nodes::composite;
use crate::registry::Factory;
use crate::task::TaskDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubWorkflowMode {
    Nested,
    Referenced,
}

#[derive(Debug, Clone)]
pub struct SubWorkflowNode {
    pub(crate) core: NodeCore,
    pub(crate) children: Vec<Node>,
    pub(crate) mode: SubWorkflowMode,
    /// Children were loaded from a catalog and are not persisted
    pub(crate) hydrated: bool,
    pub(crate) collapsed: bool,
    /// Fingerprint of the last sub-execution applied, per top-level instance
    pub(crate) sub_fingerprints: HashMap<String, Value>,
}

impl SubWorkflowNode {
    pub fn from_raw(mut raw: TaskDefinition, factory: &Factory<'_>) -> Self {
        let reference = ids::normalize_sub_workflow_name(raw.reference_name());
        raw.set_reference_name(&reference);

        let mode = if ids::is_nested_sub_workflow(&reference) {
            SubWorkflowMode::Nested
        } else {
            SubWorkflowMode::Referenced
        };
        let children = match mode {
            SubWorkflowMode::Nested => factory.create_all(nested_tasks(&raw)),
            SubWorkflowMode::Referenced => Vec::new(),
        };

        Self {
            core: NodeCore::new(raw),
            children,
            mode,
            hydrated: false,
            collapsed: false,
            sub_fingerprints: HashMap::new(),
        }
    }

    /// Nested sub-workflow owning `nodes`
    pub fn wrap(nodes: Vec<Node>, context: &GraphContext) -> Self {
        let mut node = Self {
            core: NodeCore::new(TaskDefinition::nested_sub_workflow(Vec::new())),
            children: nodes,
            mode: SubWorkflowMode::Nested,
            hydrated: false,
            collapsed: false,
            sub_fingerprints: HashMap::new(),
        };
        node.check(context);
        node
    }

    pub fn mode(&self) -> SubWorkflowMode {
        self.mode
    }

    pub fn is_nested(&self) -> bool {
        self.mode == SubWorkflowMode::Nested
    }

    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    pub fn is_collapsed(&self) -> bool {
        self.collapsed
    }

    pub fn set_collapsed(&mut self, collapsed: bool) {
        self.collapsed = collapsed;
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// Name of the workflow this node runs
    pub fn referenced_name(&self) -> &str {
        self.core
            .raw
            .get_path(&["subWorkflowParam", "name"])
            .and_then(Value::as_str)
            .unwrap_or(&self.core.id)
    }

    pub fn version(&self) -> Option<u32> {
        self.core
            .raw
            .get_path(&["subWorkflowParam", "version"])
            .and_then(Value::as_u64)
            .and_then(|version| u32::try_from(version).ok())
    }

    /// Whether children take part in layout
    pub fn shows_children(&self, cx: &LayoutCx<'_>) -> bool {
        !self.children.is_empty()
            && match self.mode {
                SubWorkflowMode::Nested => true,
                SubWorkflowMode::Referenced => self.hydrated && (!self.collapsed || cx.expand_all),
            }
    }

    /// Instance id of the execution this node spawned in `instance`
    pub fn sub_execution_id(&self, instance: &str) -> Option<&str> {
        self.core
            .execution(instance)
            .filter(|state| state.status.has_sub_execution())
            .and_then(|state| state.sub_workflow_id())
    }

    /// Apply a sub-execution trace to the children
    ///
    /// Child state is cached under the top-level `instance`. Returns true if
    /// the trace differs from the one applied last or any child changed.
    pub fn apply_sub_execution(&mut self, instance: &str, record: &ExecutionRecord) -> bool {
        let fingerprint = record.fingerprint();
        let mut changed = self.sub_fingerprints.get(instance) != Some(&fingerprint);

        for task in &record.tasks {
            let Some(reference) = task.reference_name() else {
                continue;
            };
            let child = self
                .children
                .iter_mut()
                .find_map(|child| child.find_mut(reference));
            if let Some(child) = child {
                changed |= child.update_execution_task(instance, task);
            }
        }

        self.sub_fingerprints.insert(instance.to_string(), fingerprint);
        changed
    }

    /// Take over collapse state, sub-execution fingerprints and, if the
    /// reference is unchanged, hydrated children
    pub(crate) fn adopt_state(&mut self, previous: &SubWorkflowNode) {
        self.collapsed = previous.collapsed;
        self.sub_fingerprints = previous.sub_fingerprints.clone();
        let same_reference =
            previous.referenced_name() == self.referenced_name() && previous.version() == self.version();
        if !self.is_nested() && !self.hydrated && previous.hydrated && same_reference {
            self.children = previous.children.clone();
            self.hydrated = true;
        }
    }

    pub(crate) fn forget_instance(&mut self, instance: &str) -> bool {
        self.sub_fingerprints.remove(instance).is_some()
    }

    fn drop_hydration(&mut self) -> bool {
        if !self.hydrated {
            return false;
        }
        self.children.clear();
        self.hydrated = false;
        true
    }

    fn check_descendants(&mut self, scope: &mut HydrationScope<'_>) -> Result<bool> {
        let mut changed = false;
        for child in self.children.iter_mut() {
            changed |= child.check_children(scope)?;
        }
        Ok(changed)
    }
}

/// Tasks of the embedded definition
fn nested_tasks(raw: &TaskDefinition) -> Vec<TaskDefinition> {
    raw.get_path(&["subWorkflowParam", "workflowDefinition", "tasks"])
        .map(crate::task::tasks_from_value)
        .unwrap_or_default()
}

/// `inputParameters.version`, else `fallback`, else 1
fn canonical_version(raw: &TaskDefinition, fallback: Option<&Value>) -> u64 {
    raw.get_path(&["inputParameters", "version"])
        .and_then(parse_version)
        .or_else(|| fallback.and_then(parse_version))
        .unwrap_or(1)
}

fn parse_version(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

impl NodeBehavior for SubWorkflowNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn kind(&self) -> NodeKind {
        NodeKind::SubWorkflow
    }

    fn child_lists(&self) -> Vec<&Vec<Node>> {
        vec![&self.children]
    }

    fn child_lists_mut(&mut self) -> Vec<&mut Vec<Node>> {
        vec![&mut self.children]
    }

    fn to_raw(&self) -> TaskDefinition {
        let mut raw = self.core.raw.clone();
        if self.is_nested() {
            raw.set_path(
                &["subWorkflowParam", "workflowDefinition", "tasks"],
                json!(composite::serialize_list(&self.children)),
            );
        }
        raw
    }

    fn check(&mut self, context: &GraphContext) {
        let nested = self.is_nested();
        let raw = &mut self.core.raw;

        if !raw.get("inputParameters").is_some_and(Value::is_object) {
            raw.insert("inputParameters", json!({}));
        }
        let name = ids::normalize_sub_workflow_name(raw.name());
        raw.set_name(&name);
        let reference = ids::normalize_sub_workflow_name(raw.reference_name());
        raw.set_reference_name(&reference);
        self.core.id = reference;

        let from_input = raw
            .get_path(&["inputParameters", "name"])
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        let final_name = match from_input {
            Some(name) => name,
            None if nested => self.core.id.clone(),
            None => name.replacen(ids::SUB_WORKFLOW_PREFIX, "", 1),
        };
        raw.set_path(&["subWorkflowParam", "name"], json!(final_name));

        if nested {
            raw.set_path(&["subWorkflowParam", "workflowDefinition", "name"], json!(final_name));
        } else {
            let fallback = raw.get_path(&["subWorkflowParam", "version"]).cloned();
            let version = canonical_version(raw, fallback.as_ref());
            raw.set_path(&["subWorkflowParam", "version"], json!(version));
            raw.set_path(&["inputParameters", "version"], json!(version));
        }

        if let Some(team_id) = &context.team_id {
            raw.set_path(&["inputParameters", "__context", "teamId"], json!(team_id));
        }
    }

    fn keeps_placeholder(&self) -> bool {
        !self.is_nested()
    }

    fn is_editable(&self) -> bool {
        self.is_nested()
    }

    /// Keep the version canonical and drop children of a stale reference
    fn apply_raw(&mut self, mut raw: TaskDefinition, factory: &Factory<'_>) {
        let previous_name = self.referenced_name().to_string();
        let previous_version = self.version();

        let fallback = self.core.raw.get_path(&["subWorkflowParam", "version"]).cloned();
        let version = canonical_version(&raw, fallback.as_ref());
        raw.set_path(&["subWorkflowParam", "version"], json!(version));

        self.core.raw = raw;
        self.check(factory.context());

        if self.is_nested() {
            let mut old = std::mem::take(&mut self.children);
            self.children = composite::rebuild_list(&mut old, nested_tasks(&self.core.raw), factory);
        } else if self.referenced_name() != previous_name || self.version() != previous_version {
            self.drop_hydration();
        }
    }

    fn check_children(&mut self, scope: &mut HydrationScope<'_>) -> Result<bool> {
        if self.is_nested() {
            return self.check_descendants(scope);
        }

        let name = self.referenced_name().to_string();
        if scope.path.contains(&name) {
            let mut chain = scope.path.clone();
            chain.push(name.clone());
            return Err(GraphError::SubWorkflowCycle { name, chain });
        }

        let mut changed = false;
        if !self.hydrated {
            match scope.catalog.definition(&name, self.version()) {
                Some(tasks) if !tasks.is_empty() => {
                    log::debug!("Hydrating sub-workflow '{}' with {} task(s)", name, tasks.len());
                    self.children = scope.factory.create_all(tasks);
                    self.hydrated = true;
                    changed = true;
                }
                _ => {
                    log::debug!("No definition for sub-workflow '{}' yet", name);
                    return Ok(false);
                }
            }
        }

        scope.path.push(name);
        let result = self.check_descendants(scope);
        scope.path.pop();
        Ok(result? || changed)
    }

    fn restore_children(&mut self) -> bool {
        if self.is_nested() {
            let mut changed = false;
            for child in self.children.iter_mut() {
                changed |= child.restore_children();
            }
            return changed;
        }
        self.drop_hydration()
    }

    fn layout(&mut self, cursor: &mut Point, cx: &LayoutCx<'_>) {
        if !self.shows_children(cx) {
            layout::place_leaf(&mut self.core, cursor, cx);
        } else if self.is_transparent(cx) {
            layout::place_header(&mut self.core, cursor, cx);
            layout::layout_sequence(self.children.iter_mut(), cursor, cx);
        } else {
            layout::place_body(&mut self.core, &mut self.children, cursor, cx);
        }
    }

    fn entry_point(&self, cx: &LayoutCx<'_>) -> EntryPoint {
        if !self.shows_children(cx) {
            return layout::leaf_entry(&self.core, cx);
        }
        match (self.is_transparent(cx), self.children.first(), self.children.last()) {
            (true, Some(first), Some(last)) => EntryPoint {
                input: first.entry_point(cx).input,
                output: last.entry_point(cx).output,
            },
            _ => layout::body_entry(&self.core, &self.children, cx),
        }
    }

    fn render_edges(&mut self, cx: &LayoutCx<'_>, is_last: bool) {
        if !self.shows_children(cx) {
            layout::leaf_edges(&mut self.core, cx, is_last);
        } else if self.is_transparent(cx) {
            self.core.edges.clear();
            layout::sequence_edges(&mut self.children, cx, is_last);
        } else {
            layout::body_edges(&mut self.core, &mut self.children, cx, is_last, false);
        }
    }

    fn render_controllers(&mut self, cx: &LayoutCx<'_>) {
        if self.shows_children(cx) && self.is_transparent(cx) {
            self.core.controllers.clear();
            layout::sequence_controllers(&mut self.children, cx);
            return;
        }
        let out = self.entry_point(cx).output;
        self.core.controllers = vec![cx.insert_after(&self.core.id, out)];
    }

    fn visible_lists(&self, cx: &LayoutCx<'_>) -> Vec<&Vec<Node>> {
        if self.shows_children(cx) {
            vec![&self.children]
        } else {
            Vec::new()
        }
    }

    fn is_transparent(&self, _cx: &LayoutCx<'_>) -> bool {
        self.is_nested() && !self.children.is_empty()
    }
}
