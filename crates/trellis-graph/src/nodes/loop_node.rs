//! `DO_WHILE` loops
//!
//! A loop owns a body sequence (`loopOver`). The last member of the body is
//! always a collector task whose `inputParameters.loopTaskReferenceName`
//! points back at the loop; it gathers the output of each iteration and is
//! never removed on its own.

use serde_json::{json, Value};
use trellis_geometry::{EntryPoint, Point};

use crate::ids;
use crate::layout::{self, LayoutCx};
use crate::node::{Node, NodeBehavior, NodeCore, NodeKind};
use crate::nodes::composite;
use crate::nodes::SimpleNode;
use crate::registry::Factory;
use crate::task::TaskDefinition;

#[derive(Debug, Clone)]
pub struct LoopNode {
    pub(crate) core: NodeCore,
    pub(crate) body: Vec<Node>,
    /// Id of the collector at the end of `body`
    pub(crate) companion_id: Option<String>,
}

impl LoopNode {
    pub fn from_raw(raw: TaskDefinition, factory: &Factory<'_>) -> Self {
        let body = factory.create_all(raw.task_list("loopOver"));
        let mut node = Self {
            core: NodeCore::new(raw),
            body,
            companion_id: None,
        };
        node.adopt_collector();
        node
    }

    pub fn body(&self) -> &[Node] {
        &self.body
    }

    pub fn collector(&self) -> Option<&Node> {
        let id = self.companion_id.as_deref()?;
        self.body.iter().find(|node| node.id() == id)
    }

    fn is_collector_for(node: &Node, loop_id: &str) -> bool {
        node.id().starts_with(ids::COLLECTOR_PREFIX)
            && node
                .raw()
                .get_path(&["inputParameters", "loopTaskReferenceName"])
                .and_then(Value::as_str)
                == Some(loop_id)
    }

    /// Link an existing collector from the body, keeping exactly one and
    /// moving it to the end
    fn adopt_collector(&mut self) {
        let loop_id = self.core.id.clone();
        let mut collectors: Vec<usize> = self
            .body
            .iter()
            .enumerate()
            .filter(|(_, node)| Self::is_collector_for(node, &loop_id))
            .map(|(index, _)| index)
            .collect();
        let Some(first) = collectors.first().copied() else {
            return;
        };

        for index in collectors.drain(1..).rev() {
            let extra = self.body.remove(index);
            log::warn!("Loop '{}' has more than one collector, dropping '{}'", loop_id, extra.id());
        }

        let mut collector = self.body.remove(first);
        collector.core_mut().companion_of = Some(loop_id);
        self.companion_id = Some(collector.id().to_string());
        self.body.push(collector);
    }
}

impl NodeBehavior for LoopNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Loop
    }

    fn child_lists(&self) -> Vec<&Vec<Node>> {
        vec![&self.body]
    }

    fn child_lists_mut(&mut self) -> Vec<&mut Vec<Node>> {
        vec![&mut self.body]
    }

    fn to_raw(&self) -> TaskDefinition {
        let mut raw = self.core.raw.clone();
        raw.insert("loopOver", json!(composite::serialize_list(&self.body)));
        raw
    }

    /// Parse `loopOver` again, keeping body nodes by id and the collector
    fn apply_raw(&mut self, raw: TaskDefinition, factory: &Factory<'_>) {
        self.core.raw = raw;
        self.check(factory.context());
        let mut old = std::mem::take(&mut self.body);
        self.body = composite::rebuild_list(&mut old, self.core.raw.task_list("loopOver"), factory);
        self.companion_id = None;
        self.adopt_collector();
        self.after_create();
    }

    fn after_create(&mut self) -> Vec<Node> {
        if self.companion_id.is_none() {
            let mut collector = SimpleNode::new(TaskDefinition::loop_collector(&self.core.id));
            collector.core.companion_of = Some(self.core.id.clone());
            self.companion_id = Some(collector.core.id.clone());
            self.body.push(Node::Simple(collector));
        }
        composite::ensure_placeholder(&mut self.body, true);
        Vec::new()
    }

    fn layout(&mut self, cursor: &mut Point, cx: &LayoutCx<'_>) {
        layout::place_body(&mut self.core, &mut self.body, cursor, cx);
    }

    fn entry_point(&self, cx: &LayoutCx<'_>) -> EntryPoint {
        layout::body_entry(&self.core, &self.body, cx)
    }

    fn render_edges(&mut self, cx: &LayoutCx<'_>, is_last: bool) {
        layout::body_edges(&mut self.core, &mut self.body, cx, is_last, true);
    }

    fn render_controllers(&mut self, cx: &LayoutCx<'_>) {
        layout::sequence_controllers(&mut self.body, cx);
        let out = self.entry_point(cx).output;
        self.core.controllers = vec![cx.insert_after(&self.core.id, out)];
    }
}
