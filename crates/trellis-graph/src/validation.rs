//! Structural validation of the editable tree
//!
//! Run before an execution starts. Referenced sub-workflow children are
//! skipped since they are validated with their own workflow.

use std::collections::HashSet;

use crate::graph::WorkflowGraph;
use crate::node::{Node, NodeBehavior};
use crate::registry::NodeRegistry;

/// A structural problem in the tree
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Two nodes share a reference name
    DuplicateId { node_id: String },
    /// A placeholder was never replaced by a real task
    Placeholder { node_id: String },
    /// A task type has no registered constructor
    UnknownNodeType { node_id: String, node_type: String },
    /// A fork is not directly followed by its join
    MissingJoin { node_id: String },
    /// A switch or fork with fewer than two branches
    TooFewBranches { node_id: String, count: usize },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateId { node_id } => write!(f, "Duplicate node id '{}'", node_id),
            Self::Placeholder { node_id } => write!(f, "Placeholder '{}' must be replaced by a task", node_id),
            Self::UnknownNodeType { node_id, node_type } => {
                write!(f, "Unknown node type '{}' for node '{}'", node_type, node_id)
            }
            Self::MissingJoin { node_id } => write!(f, "Fork '{}' is not followed by its join", node_id),
            Self::TooFewBranches { node_id, count } => {
                write!(f, "Node '{}' has {} branch(es), at least 2 are required", node_id, count)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a whole graph, returning every problem found
pub fn validate_tree(graph: &WorkflowGraph) -> Vec<ValidationError> {
    validate_nodes(graph.nodes(), graph.registry())
}

/// Validate a root sequence against `registry`
pub fn validate_nodes(nodes: &[Node], registry: &NodeRegistry) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    validate_list(nodes, registry, &mut seen, &mut errors);
    errors
}

fn validate_list(
    nodes: &[Node],
    registry: &NodeRegistry,
    seen: &mut HashSet<String>,
    errors: &mut Vec<ValidationError>,
) {
    for (index, node) in nodes.iter().enumerate() {
        let node_id = node.id().to_string();
        if !seen.insert(node_id.clone()) {
            errors.push(ValidationError::DuplicateId { node_id: node_id.clone() });
        }
        if node.is_placeholder() {
            errors.push(ValidationError::Placeholder { node_id: node_id.clone() });
        } else if !registry.has_node_type(node.task_type()) {
            errors.push(ValidationError::UnknownNodeType {
                node_id: node_id.clone(),
                node_type: node.task_type().to_string(),
            });
        }

        match node {
            Node::ForkJoin(fork) => {
                let joined = nodes
                    .get(index + 1)
                    .is_some_and(|next| Some(next.id()) == fork.companion_id());
                if !joined {
                    errors.push(ValidationError::MissingJoin { node_id: node_id.clone() });
                }
                if fork.branches().len() < 2 {
                    errors.push(ValidationError::TooFewBranches {
                        node_id,
                        count: fork.branches().len(),
                    });
                }
            }
            Node::Switch(switch) if switch.branches().len() < 2 => {
                errors.push(ValidationError::TooFewBranches {
                    node_id,
                    count: switch.branches().len(),
                });
            }
            Node::SubWorkflow(sub) if !sub.is_nested() => continue,
            _ => {}
        }

        for list in node.child_lists() {
            validate_list(list, registry, seen, errors);
        }
    }
}
