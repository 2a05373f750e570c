//! Async collaborators: definition sources and execution trace sources.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use trellis_graph::{
    DefinitionSource, ExecutionReconciler, ExecutionRecord, ExecutionTraceSource, GraphConfig, GraphContext,
    GraphError, GraphEvent, NodeStatus, SourceError, TaskDefinition, VecEventSink, WorkflowCatalog,
    WorkflowGraph, WorkflowStatus,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn tasks(value: Value) -> Vec<TaskDefinition> {
    serde_json::from_value(value).unwrap()
}

fn simple(id: &str) -> Value {
    json!({"name": id, "taskReferenceName": id, "type": "SIMPLE"})
}

fn referenced(id: &str, name: &str) -> Value {
    json!({"name": name, "taskReferenceName": id, "type": "SUB_WORKFLOW", "subWorkflowParam": {"name": name}})
}

/// Definition store keyed by workflow name, counting fetches
struct Store {
    workflows: HashMap<String, Vec<TaskDefinition>>,
    fetches: Mutex<Vec<String>>,
}

impl Store {
    fn new(workflows: Vec<(&str, Value)>) -> Self {
        Self {
            workflows: workflows
                .into_iter()
                .map(|(name, value)| (name.to_string(), tasks(value)))
                .collect(),
            fetches: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DefinitionSource for Store {
    async fn fetch_definition(&self, name: &str, _version: Option<u32>) -> Result<Vec<TaskDefinition>, SourceError> {
        self.fetches.lock().push(name.to_string());
        self.workflows
            .get(name)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(name.to_string()))
    }
}

#[tokio::test]
async fn resolve_fetches_nested_references() {
    init_logging();

    let graph = Mutex::new(WorkflowGraph::from_definitions(
        GraphContext::new("orders"),
        GraphConfig::default(),
        tasks(json!([simple("a"), referenced("billing", "billing"), referenced("missing", "ghost")])),
    ));
    let store = Store::new(vec![
        ("billing", json!([simple("b1"), referenced("tax", "tax")])),
        ("tax", json!([simple("t1")])),
    ]);
    let catalog = WorkflowCatalog::new();

    assert!(catalog.resolve(&graph, &store).await.unwrap());
    {
        let graph = graph.lock();
        assert!(graph.contains("b1"));
        assert!(graph.contains("t1"));
        assert_eq!(graph.unresolved_references(), vec![("ghost".to_string(), Some(1))]);
    }

    // Hydrated children are never written back
    let saved = serde_json::to_value(graph.lock().serialize()).unwrap();
    assert!(saved[1].get("subWorkflowParam").unwrap().get("workflowDefinition").is_none());

    // A second pass only fetches what is still missing
    let fetched = store.fetches.lock().len();
    assert!(!catalog.resolve(&graph, &store).await.unwrap());
    assert_eq!(store.fetches.lock().len(), fetched + 1);

    let mut graph = graph.into_inner();
    assert!(graph.restore_children());
    assert!(!graph.contains("b1"));
}

#[tokio::test]
async fn resolve_reports_cycles() {
    init_logging();
    let graph = Mutex::new(WorkflowGraph::from_definitions(
        GraphContext::new("orders"),
        GraphConfig::default(),
        tasks(json!([referenced("billing", "billing")])),
    ));
    let store = Store::new(vec![("billing", json!([referenced("loop_back", "orders")]))]);

    let err = WorkflowCatalog::new().resolve(&graph, &store).await.unwrap_err();
    assert!(matches!(err, GraphError::SubWorkflowCycle { ref chain, .. } if chain.len() == 3));
}

/// Trace source whose records can be swapped between polls
#[derive(Default)]
struct Traces {
    records: Mutex<HashMap<String, ExecutionRecord>>,
}

impl Traces {
    fn set(&self, instance: &str, record: Value) {
        self.records
            .lock()
            .insert(instance.to_string(), serde_json::from_value(record).unwrap());
    }
}

#[async_trait]
impl ExecutionTraceSource for Traces {
    async fn fetch_execution(&self, instance_id: &str) -> Result<Option<ExecutionRecord>, SourceError> {
        Ok(self.records.lock().get(instance_id).cloned())
    }
}

#[tokio::test]
async fn execution_runs_to_completion() {
    init_logging();
    let sink = Arc::new(VecEventSink::new());
    let mut graph = WorkflowGraph::from_definitions(
        GraphContext::new("orders"),
        GraphConfig::default(),
        tasks(json!([simple("a"), referenced("billing", "billing")])),
    )
    .with_event_sink(sink.clone());

    let catalog = WorkflowCatalog::new();
    catalog.insert("billing", 1, tasks(json!([simple("b1"), referenced("tax", "tax")])));
    catalog.insert("tax", 1, tasks(json!([simple("t1")])));
    graph.hydrate(&catalog).unwrap();
    assert!(graph.set_collapsed("billing", true));

    graph.begin_execution("run-1").unwrap();
    let traces = Arc::new(Traces::default());
    let reconciler = ExecutionReconciler::new(traces.clone());

    // Live execution expands collapsed sub-workflows
    assert!(graph.layout().node("b1").is_some());
    let graph = Mutex::new(graph);

    traces.set(
        "run-1",
        json!({
            "status": "RUNNING",
            "tasks": [
                {"status": "COMPLETED", "workflowTask": {"taskReferenceName": "a"}},
                {"status": "IN_PROGRESS", "workflowTask": {"taskReferenceName": "billing"}, "outputData": {"subWorkflowId": "run-2"}}
            ]
        }),
    );
    traces.set(
        "run-2",
        json!({
            "status": "RUNNING",
            "tasks": [
                {"status": "COMPLETED", "workflowTask": {"taskReferenceName": "b1"}},
                {"status": "IN_PROGRESS", "workflowTask": {"taskReferenceName": "tax"}, "outputData": {"subWorkflowId": "run-3"}}
            ]
        }),
    );
    traces.set(
        "run-3",
        json!({"status": "RUNNING", "tasks": [{"status": "IN_PROGRESS", "workflowTask": {"taskReferenceName": "t1"}}]}),
    );

    sink.clear();
    assert!(reconciler.poll(&graph, "run-1").await);
    assert_eq!(graph.lock().node_status("run-1", "b1"), NodeStatus::Completed);
    assert_eq!(graph.lock().node_status("run-1", "t1"), NodeStatus::InProgress);
    assert!(sink.events().contains(&GraphEvent::NeedsRender));

    assert!(!reconciler.poll(&graph, "run-1").await);

    traces.set(
        "run-1",
        json!({
            "status": "COMPLETED",
            "tasks": [
                {"status": "COMPLETED", "workflowTask": {"taskReferenceName": "a"}},
                {"status": "COMPLETED", "workflowTask": {"taskReferenceName": "billing"}, "outputData": {"subWorkflowId": "run-2"}}
            ]
        }),
    );
    assert!(reconciler.poll(&graph, "run-1").await);
    let mut graph = graph.into_inner();
    assert_eq!(graph.execution_status("run-1"), WorkflowStatus::Completed);
    assert_eq!(graph.node_status("run-1", "workflow_end"), NodeStatus::Completed);

    // Finished executions no longer force collapsed sub-workflows open
    assert!(graph.layout().node("b1").is_none());
}
