//! Leaf tasks

use crate::node::{NodeBehavior, NodeCore, NodeKind};
use crate::registry::Factory;
use crate::task::TaskDefinition;

/// A task with no children
#[derive(Debug, Clone)]
pub struct SimpleNode {
    pub(crate) core: NodeCore,
}

impl SimpleNode {
    pub fn new(raw: TaskDefinition) -> Self {
        Self {
            core: NodeCore::new(raw),
        }
    }

    pub fn from_raw(raw: TaskDefinition, _factory: &Factory<'_>) -> Self {
        Self::new(raw)
    }

    /// Stand-in for an empty sequence
    pub fn placeholder() -> Self {
        Self::new(TaskDefinition::placeholder())
    }

    /// Placeholder reusing an id that left the tree earlier
    pub fn placeholder_with_id(id: &str) -> Self {
        Self::new(TaskDefinition::placeholder_with_id(id))
    }
}

impl NodeBehavior for SimpleNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Simple
    }
}
