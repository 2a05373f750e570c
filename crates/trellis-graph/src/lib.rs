//! Trellis Graph - editable workflow graphs for the client side
//!
//! This crate holds a workflow definition as a tree of nodes while it is
//! being edited and observed. It supports:
//!
//! - Sequential tasks, do/while loops, fork/join, switch branches and
//!   sub-workflows (nested or referenced by name)
//! - Structural edits that reject anything breaking the tree's invariants
//! - Deterministic layout with connector paths, in both render directions
//! - Lazy hydration of referenced sub-workflows from a definition catalog
//! - Reconciliation against remote execution traces, sub-executions included
//! - Compressed snapshot-based undo/redo
//!
//! # Architecture
//!
//! - `WorkflowGraph`: the root sequence between start and end endpoints
//! - `Node`: one enum variant per node kind, sharing `NodeBehavior`
//! - `NodeRegistry`: task type to constructor table used by the `Factory`
//! - `WorkflowCatalog` / `ExecutionReconciler`: the only async edges
//! - `EventSink`: how the graph tells a host to focus or re-render
//!
//! # Example
//!
//! ```ignore
//! use trellis_graph::{GraphConfig, GraphContext, WorkflowGraph};
//!
//! let mut graph = WorkflowGraph::parse_json(GraphContext::new("orders"), GraphConfig::default(), json)?;
//! graph.insert_task("charge_card", "SWITCH", "check_amount", false);
//! let layout = graph.layout();
//! let saved = graph.serialize();
//! ```

pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod execution;
pub mod graph;
pub mod ids;
pub mod layout;
pub mod node;
pub mod nodes;
pub mod reconciler;
pub mod registry;
pub mod task;
pub mod undo;
pub mod validation;

// Re-export key types
pub use catalog::{DefinitionCatalog, DefinitionSource, SourceError, WorkflowCatalog};
pub use config::{GraphConfig, LayoutConfig};
pub use context::GraphContext;
pub use error::{GraphError, Result};
pub use events::{EventError, EventSink, GraphEvent, NullEventSink, VecEventSink};
pub use execution::{ExecutionRecord, ExecutionState, NodeStatus, TaskExecution, WorkflowStatus};
pub use graph::{SharedGraph, WorkflowGraph};
pub use layout::{Connector, Controller, ControllerAction, LayoutResult, NodePlacement};
pub use node::{Node, NodeBehavior, NodeKind};
pub use reconciler::{ExecutionReconciler, ExecutionTraceSource};
pub use registry::{Factory, NodeRegistry};
pub use task::TaskDefinition;
pub use undo::UndoStack;
pub use validation::{validate_tree, ValidationError};

// Geometry consumers will need
pub use trellis_geometry::{Boundary, Direction, EdgePath, EntryPoint, Point, Size};
