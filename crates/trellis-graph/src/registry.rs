//! Node type registry
//!
//! Maps the `type` field of a task definition to the constructor of a node
//! variant. Hosts may register extra task types that behave like one of the
//! built-in variants; unknown types fall back to a simple node so their
//! definitions still round-trip.
//!
//! # Usage
//!
//! ```ignore
//! use trellis_graph::{Factory, GraphContext, NodeRegistry, SimpleNode, Node};
//!
//! let mut registry = NodeRegistry::with_builtins();
//! registry.register("LLM_CHAT", |raw, _| Node::Simple(SimpleNode::new(raw)));
//!
//! let context = GraphContext::new("workflow-1");
//! let nodes = Factory::new(&registry, &context).create(task);
//! ```

use std::collections::HashMap;

use crate::context::GraphContext;
use crate::node::{Node, NodeBehavior};
use crate::nodes::{ForkJoinNode, LoopNode, SimpleNode, SubWorkflowNode, SwitchNode};
use crate::task::task_types::{DO_WHILE, FORK_JOIN, HUMAN, JOIN, SIMPLE, SUB_WORKFLOW, SWITCH};
use crate::task::TaskDefinition;

/// Builds a node from its definition; children are built through the factory
pub type NodeConstructor = fn(TaskDefinition, &Factory<'_>) -> Node;

/// Registry of task types and their node constructors
pub struct NodeRegistry {
    constructors: HashMap<String, NodeConstructor>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with every built-in task type
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for task_type in [SIMPLE, HUMAN, JOIN] {
            registry.register(task_type, |raw, factory| Node::Simple(SimpleNode::from_raw(raw, factory)));
        }
        registry.register(DO_WHILE, |raw, factory| Node::Loop(LoopNode::from_raw(raw, factory)));
        registry.register(FORK_JOIN, |raw, factory| Node::ForkJoin(ForkJoinNode::from_raw(raw, factory)));
        registry.register(SWITCH, |raw, factory| Node::Switch(SwitchNode::from_raw(raw, factory)));
        registry.register(SUB_WORKFLOW, |raw, factory| {
            Node::SubWorkflow(SubWorkflowNode::from_raw(raw, factory))
        });
        registry
    }

    /// Register (or replace) the constructor for a task type
    pub fn register(&mut self, task_type: &str, constructor: NodeConstructor) {
        self.constructors.insert(task_type.to_string(), constructor);
    }

    pub fn get(&self, task_type: &str) -> Option<NodeConstructor> {
        self.constructors.get(task_type).copied()
    }

    /// Check if a task type is registered
    pub fn has_node_type(&self, task_type: &str) -> bool {
        self.constructors.contains_key(task_type)
    }

    /// List all registered task types
    pub fn node_types(&self) -> Vec<&str> {
        self.constructors.keys().map(|s| s.as_str()).collect()
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` with the same type.
    pub fn merge(&mut self, other: NodeRegistry) {
        self.constructors.extend(other.constructors);
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates nodes for one graph
///
/// Bundles the registry with the graph's context so that constructors of
/// composite nodes can build their children the same way.
#[derive(Clone, Copy)]
pub struct Factory<'a> {
    registry: &'a NodeRegistry,
    context: &'a GraphContext,
}

impl<'a> Factory<'a> {
    pub fn new(registry: &'a NodeRegistry, context: &'a GraphContext) -> Self {
        Self { registry, context }
    }

    pub fn context(&self) -> &'a GraphContext {
        self.context
    }

    pub fn registry(&self) -> &'a NodeRegistry {
        self.registry
    }

    /// Build and normalize a single node, without companions
    pub fn construct(&self, raw: TaskDefinition) -> Node {
        let mut node = match self.registry.get(raw.task_type()) {
            Some(constructor) => constructor(raw, self),
            None => {
                log::warn!(
                    "Unknown task type '{}' for '{}', treating it as a simple task",
                    raw.task_type(),
                    raw.reference_name()
                );
                Node::Simple(SimpleNode::from_raw(raw, self))
            }
        };
        node.check(self.context);
        node
    }

    /// Build a node followed by the companions it spawns
    pub fn create(&self, raw: TaskDefinition) -> Vec<Node> {
        self.create_all(vec![raw])
    }

    /// Build a sequence, adopting a `JOIN` that directly follows a fork
    pub fn create_all(&self, tasks: Vec<TaskDefinition>) -> Vec<Node> {
        let mut nodes = Vec::with_capacity(tasks.len());
        let mut tasks = tasks.into_iter().peekable();

        while let Some(raw) = tasks.next() {
            let mut node = self.construct(raw);
            let adopts_join = matches!(node, Node::ForkJoin(_))
                && tasks.peek().is_some_and(|next| next.task_type() == JOIN);

            if adopts_join {
                if let Some(join_raw) = tasks.next() {
                    let mut join = self.construct(join_raw);
                    join.core_mut().companion_of = Some(node.id().to_string());
                    if let Node::ForkJoin(fork) = &mut node {
                        fork.companion_id = Some(join.id().to_string());
                    }
                    nodes.push(node);
                    nodes.push(join);
                    continue;
                }
            }

            let companions = node.after_create();
            nodes.push(node);
            nodes.extend(companions);
        }
        nodes
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Factory<'static> {
        let registry: &'static NodeRegistry = Box::leak(Box::new(NodeRegistry::with_builtins()));
        let context: &'static GraphContext = Box::leak(Box::new(GraphContext::default()));
        Factory::new(registry, context)
    }
}
