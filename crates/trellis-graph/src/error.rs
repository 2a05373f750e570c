//! Error types for the graph engine

use thiserror::Error;

use crate::validation::ValidationError;

/// Result type alias using GraphError
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors that can occur while building or editing a workflow graph
///
/// Edits that are merely not applicable (duplicate ids, self insertion,
/// deleting a placeholder) are reported through `bool`/`Option` return
/// values instead; these variants are reserved for corrupted input and
/// infrastructure failures.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A referenced sub-workflow transitively embeds itself
    #[error("Sub-workflow cycle: '{name}' is re-entered via {}", .chain.join(" -> "))]
    SubWorkflowCycle { name: String, chain: Vec<String> },

    /// A task definition could not be interpreted
    #[error("Invalid task definition: {0}")]
    InvalidDefinition(String),

    /// The addressed node does not exist
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// The tree failed pre-execution validation
    #[error("Workflow failed validation with {} error(s)", .0.len())]
    Validation(Vec<ValidationError>),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),
}

impl GraphError {
    /// Create an invalid definition error with a message
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidDefinition(msg.into())
    }
}
