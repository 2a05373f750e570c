//! Task definitions: the persisted shape of a workflow step
//!
//! A `TaskDefinition` is an opaque JSON object discriminated by its `type`
//! field. The engine only reads the handful of fields it needs (reference
//! name, type, embedded child lists) and keeps everything else untouched,
//! in its original key order, so that unknown task types round-trip safely.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{GraphError, Result};
use crate::ids;

/// Task type discriminators understood by the built-in registry
pub mod task_types {
    pub const SIMPLE: &str = "SIMPLE";
    pub const HUMAN: &str = "HUMAN";
    pub const JOIN: &str = "JOIN";
    pub const DO_WHILE: &str = "DO_WHILE";
    pub const FORK_JOIN: &str = "FORK_JOIN";
    pub const SWITCH: &str = "SWITCH";
    pub const SUB_WORKFLOW: &str = "SUB_WORKFLOW";
}

use task_types::*;

/// One step of a workflow, as stored
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskDefinition(Map<String, Value>);

impl TaskDefinition {
    /// Create a definition with the three identifying fields
    pub fn new(task_type: &str, reference_name: &str, name: &str) -> Self {
        let mut map = Map::new();
        map.insert("name".to_string(), Value::from(name));
        map.insert("taskReferenceName".to_string(), Value::from(reference_name));
        map.insert("type".to_string(), Value::from(task_type));
        Self(map)
    }

    /// Interpret a JSON value as a task definition
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(GraphError::invalid(format!(
                "expected a task object, got {}",
                type_name(&other)
            ))),
        }
    }

    /// Parse a JSON array of task definitions
    pub fn list_from_json(json: &str) -> Result<Vec<Self>> {
        let value: Value = serde_json::from_str(json)?;
        match value {
            Value::Array(items) => Ok(tasks_from_items(items)),
            other => Err(GraphError::invalid(format!(
                "expected a task array, got {}",
                type_name(&other)
            ))),
        }
    }

    pub fn task_type(&self) -> &str {
        self.str_field("type")
    }

    pub fn reference_name(&self) -> &str {
        self.str_field("taskReferenceName")
    }

    pub fn set_reference_name(&mut self, reference_name: &str) {
        self.insert("taskReferenceName", Value::from(reference_name));
    }

    pub fn name(&self) -> &str {
        self.str_field("name")
    }

    pub fn set_name(&mut self, name: &str) {
        self.insert("name", Value::from(name));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Insert or replace a top-level field, keeping its position if present
    pub fn insert(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Read a nested field, e.g. `["inputParameters", "name"]`
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.0.get(*first)?;
        for key in rest {
            current = current.as_object()?.get(*key)?;
        }
        Some(current)
    }

    /// Write a nested field, creating (or replacing non-object) intermediates
    pub fn set_path(&mut self, path: &[&str], value: Value) {
        let Some((last, parents)) = path.split_last() else {
            return;
        };
        let mut current = &mut self.0;
        for key in parents {
            let slot = current
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            current = match slot {
                Value::Object(map) => map,
                _ => return,
            };
        }
        current.insert(last.to_string(), value);
    }

    /// Nested task list stored under a top-level key
    pub fn task_list(&self, key: &str) -> Vec<TaskDefinition> {
        self.get(key).map(tasks_from_value).unwrap_or_default()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    fn str_field(&self, key: &str) -> &str {
        self.0.get(key).and_then(Value::as_str).unwrap_or_default()
    }

    /// Placeholder step that keeps an otherwise empty sequence editable
    pub fn placeholder() -> Self {
        Self::placeholder_with_id(&ids::prefixed(ids::PLACEHOLDER_PREFIX))
    }

    pub fn placeholder_with_id(id: &str) -> Self {
        Self::new(SIMPLE, id, "fake_node")
    }

    /// Collector step that gathers the output of every loop iteration
    pub fn loop_collector(loop_id: &str) -> Self {
        let mut task = Self::new(SIMPLE, &ids::prefixed(ids::COLLECTOR_PREFIX), "collect_loop_output");
        task.insert("inputParameters", json!({ "loopTaskReferenceName": loop_id }));
        task
    }

    /// JOIN step closing a fork
    pub fn join(join_on: Vec<String>) -> Self {
        let mut task = Self::new(JOIN, &ids::prefixed(ids::JOIN_PREFIX), "join");
        task.insert("joinOn", json!(join_on));
        task
    }

    /// Sub-workflow that owns the given tasks as an embedded definition
    pub fn nested_sub_workflow(tasks: Vec<TaskDefinition>) -> Self {
        let id = ids::prefixed(ids::NESTED_SUB_WORKFLOW_PREFIX);
        let mut task = Self::new(SUB_WORKFLOW, &id, "sub_workflow");
        task.insert("inputParameters", json!({}));
        task.insert(
            "subWorkflowParam",
            json!({
                "name": id,
                "workflowDefinition": {
                    "name": id,
                    "tasks": tasks,
                }
            }),
        );
        task
    }

    /// Fresh task for a tool, with composite bodies pre-filled by placeholders
    ///
    /// The reference name is `<name>_<suffix>`. Loops get a one-placeholder
    /// body, switches get `switchTrue`/`switchFalse` cases and forks get two
    /// branches.
    pub fn template(task_type: &str, name: &str) -> Self {
        let reference_name = format!("{}_{}", name, ids::nano_id());
        let mut task = Self::new(task_type, &reference_name, name);
        task.insert("inputParameters", json!({}));
        match task_type {
            DO_WHILE => {
                task.insert("loopOver", json!([Self::placeholder()]));
            }
            SWITCH => {
                task.insert(
                    "decisionCases",
                    json!({
                        "switchTrue": [Self::placeholder()],
                        "switchFalse": [Self::placeholder()],
                    }),
                );
            }
            FORK_JOIN => {
                task.insert(
                    "forkTasks",
                    json!([[Self::placeholder()], [Self::placeholder()]]),
                );
            }
            _ => {}
        }
        task
    }
}

impl From<TaskDefinition> for Value {
    fn from(task: TaskDefinition) -> Self {
        task.into_value()
    }
}

/// Interpret a JSON array of task objects, skipping null and non-object entries
pub fn tasks_from_value(value: &Value) -> Vec<TaskDefinition> {
    match value {
        Value::Array(items) => tasks_from_items(items.clone()),
        _ => Vec::new(),
    }
}

fn tasks_from_items(items: Vec<Value>) -> Vec<TaskDefinition> {
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(TaskDefinition(map)),
            Value::Null => None,
            other => {
                log::warn!("Skipping non-object task entry of type {}", type_name(&other));
                None
            }
        })
        .collect()
}

/// Deep-merge `source` into `target`, objects recursively, other values replaced
pub fn merge_json(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, source) => *target = source.clone(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let task = TaskDefinition::new(SIMPLE, "a", "tool_a");
        assert_eq!(task.task_type(), "SIMPLE");
        assert_eq!(task.reference_name(), "a");
        assert_eq!(task.name(), "tool_a");
        assert_eq!(TaskDefinition::default().task_type(), "");
    }

    #[test]
    fn test_set_path_creates_intermediates() {
        let mut task = TaskDefinition::new(SUB_WORKFLOW, "s", "sub_workflow_x");
        task.insert("inputParameters", json!("not an object"));
        task.set_path(&["inputParameters", "__context", "teamId"], json!("team-1"));

        assert_eq!(
            task.get_path(&["inputParameters", "__context", "teamId"]),
            Some(&json!("team-1"))
        );
        assert!(task.get_path(&["inputParameters", "missing"]).is_none());
    }

    #[test]
    fn test_unknown_fields_keep_order() {
        let json = r#"[{"zeta":1,"type":"CUSTOM","alpha":{"b":2,"a":1},"taskReferenceName":"c"}]"#;
        let tasks = TaskDefinition::list_from_json(json).unwrap();
        let keys: Vec<&String> = tasks[0].as_map().keys().collect();
        assert_eq!(keys, ["zeta", "type", "alpha", "taskReferenceName"]);
        assert_eq!(serde_json::to_string(&tasks).unwrap(), json);
    }

    #[test]
    fn test_list_skips_nulls() {
        let tasks = TaskDefinition::list_from_json(r#"[null, {"taskReferenceName":"a"}]"#).unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(TaskDefinition::list_from_json(r#"{"a":1}"#).is_err());
    }

    #[test]
    fn test_templates_fill_bodies() {
        let looped = TaskDefinition::template(DO_WHILE, "loop");
        assert!(looped.reference_name().starts_with("loop_"));
        let body = looped.task_list("loopOver");
        assert_eq!(body.len(), 1);
        assert!(ids::is_placeholder(body[0].reference_name()));

        let switch = TaskDefinition::template(SWITCH, "switch");
        let cases = switch.get("decisionCases").and_then(Value::as_object).unwrap();
        assert_eq!(cases.keys().collect::<Vec<_>>(), ["switchTrue", "switchFalse"]);

        let fork = TaskDefinition::template(FORK_JOIN, "fork");
        assert_eq!(fork.get("forkTasks").and_then(Value::as_array).unwrap().len(), 2);
    }

    #[test]
    fn test_merge_json() {
        let mut target = json!({"a": {"x": 1}, "b": 1});
        merge_json(&mut target, &json!({"a": {"y": 2}, "b": [1]}));
        assert_eq!(target, json!({"a": {"x": 1, "y": 2}, "b": [1]}));
    }
}
