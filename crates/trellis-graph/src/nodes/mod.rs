//! Node variants
//!
//! - `SimpleNode`: leaf tasks, including placeholders, collectors and joins
//! - `EndpointNode`: the synthetic start and end markers
//! - `LoopNode`: `DO_WHILE` with a body sequence
//! - `ForkJoinNode`: parallel branches closed by a `JOIN` sibling
//! - `SwitchNode`: named cases
//! - `SubWorkflowNode`: embedded or referenced child workflows

pub(crate) mod composite;
mod endpoint;
mod fork_join;
mod loop_node;
mod simple;
mod sub_workflow;
mod switch;

pub use endpoint::{EndpointKind, EndpointNode};
pub use fork_join::ForkJoinNode;
pub use loop_node::LoopNode;
pub use simple::SimpleNode;
pub use sub_workflow::{SubWorkflowMode, SubWorkflowNode};
pub use switch::{SwitchBranch, SwitchNode};
