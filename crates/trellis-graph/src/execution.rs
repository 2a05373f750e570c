//! Execution trace records and the per-node execution cache
//!
//! Records arrive from a remote engine and are applied to the tree
//! last-write-wins. Every comparison is made against whatever was cached
//! most recently, so repeating an unchanged record is never reported as a
//! change.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields of a workflow execution that change on every poll without
/// reflecting any progress
pub const VOLATILE_EXECUTION_FIELDS: [&str; 8] = [
    "createTime",
    "updateTime",
    "startTime",
    "workflowVersion",
    "workflowName",
    "workflowDefinition",
    "startBy",
    "triggerType",
];

/// Status of a single task execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    /// Never executed in this instance
    #[default]
    Default,
    Scheduled,
    InProgress,
    Completed,
    CompletedWithErrors,
    Failed,
    FailedWithTerminalError,
    Canceled,
    TimedOut,
    Skipped,
    #[serde(other)]
    Unknown,
}

impl NodeStatus {
    /// Whether a sub-workflow in this state may already have spawned a
    /// sub-execution worth fetching
    pub fn has_sub_execution(self) -> bool {
        matches!(self, Self::InProgress | Self::Completed | Self::Scheduled)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::CompletedWithErrors
                | Self::Failed
                | Self::FailedWithTerminalError
                | Self::Canceled
                | Self::TimedOut
                | Self::Skipped
        )
    }
}

/// Status of a whole workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    /// No execution in flight
    #[default]
    Scheduled,
    Running,
    Paused,
    Completed,
    Failed,
    TimedOut,
    Terminated,
    Canceled,
    #[serde(other)]
    Unknown,
}

/// Reference to the definition a task execution was created from
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTaskRef {
    #[serde(default)]
    pub task_reference_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One task record of an execution trace
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_task_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_task: Option<WorkflowTaskRef>,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_for_incompletion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskExecution {
    /// Record carrying only a status, as used for synthetic endpoint updates
    pub fn with_status(status: NodeStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Reference name of the node this record belongs to
    pub fn reference_name(&self) -> Option<&str> {
        self.workflow_task
            .as_ref()
            .and_then(|task| task.task_reference_name.as_deref())
            .or(self.reference_task_name.as_deref())
    }

    /// Instance id of the execution spawned by a sub-workflow task
    pub fn sub_workflow_id(&self) -> Option<&str> {
        self.output_data
            .as_ref()
            .and_then(|data| data.get("subWorkflowId"))
            .and_then(Value::as_str)
    }
}

/// A workflow execution trace
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub status: WorkflowStatus,
    #[serde(default)]
    pub tasks: Vec<TaskExecution>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExecutionRecord {
    /// Comparable form of the record with volatile fields removed
    pub fn fingerprint(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            for field in VOLATILE_EXECUTION_FIELDS {
                map.remove(field);
            }
        }
        value
    }
}

/// What a node remembers about its latest task record in one instance
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub status: NodeStatus,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub input_data: Option<Value>,
    pub output_data: Option<Value>,
    pub reason_for_incompletion: Option<String>,
    pub iteration: Option<u32>,
}

impl From<&TaskExecution> for ExecutionState {
    fn from(record: &TaskExecution) -> Self {
        Self {
            status: record.status,
            start_time: record.start_time,
            end_time: record.end_time,
            input_data: record.input_data.clone(),
            output_data: record.output_data.clone(),
            reason_for_incompletion: record.reason_for_incompletion.clone(),
            iteration: record.iteration,
        }
    }
}

impl ExecutionState {
    pub fn sub_workflow_id(&self) -> Option<&str> {
        self.output_data
            .as_ref()
            .and_then(|data| data.get("subWorkflowId"))
            .and_then(Value::as_str)
    }
}

/// Graph-level bookkeeping for one execution instance
#[derive(Debug, Clone, Default)]
pub(crate) struct InstanceState {
    pub status: WorkflowStatus,
    pub fingerprint: Option<Value>,
}
