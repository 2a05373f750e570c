//! Synthetic start and end markers
//!
//! Endpoints frame the root sequence. They take part in layout and carry
//! execution state, but are never serialized and cannot be deleted.

use trellis_geometry::Point;

use crate::layout::LayoutCx;
use crate::node::{NodeBehavior, NodeCore, NodeKind};
use crate::task::TaskDefinition;

/// Which end of the workflow an endpoint marks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Start,
    End,
}

#[derive(Debug, Clone)]
pub struct EndpointNode {
    pub(crate) core: NodeCore,
    pub(crate) endpoint: EndpointKind,
}

impl EndpointNode {
    pub const START_ID: &'static str = "workflow_start";
    pub const END_ID: &'static str = "workflow_end";

    pub fn start() -> Self {
        Self::new(EndpointKind::Start, Self::START_ID)
    }

    pub fn end() -> Self {
        Self::new(EndpointKind::End, Self::END_ID)
    }

    fn new(endpoint: EndpointKind, id: &str) -> Self {
        Self {
            core: NodeCore::new(TaskDefinition::new("", id, id)),
            endpoint,
        }
    }

    pub fn endpoint(&self) -> EndpointKind {
        self.endpoint
    }
}

impl NodeBehavior for EndpointNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Endpoint
    }

    fn render_controllers(&mut self, cx: &LayoutCx<'_>) {
        self.core.controllers = match self.endpoint {
            EndpointKind::Start => {
                let out: Point = self.entry_point(cx).output;
                vec![cx.insert_after(&self.core.id, out)]
            }
            EndpointKind::End => Vec::new(),
        };
    }
}
