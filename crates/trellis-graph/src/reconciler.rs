//! Execution reconciler
//!
//! Pulls execution traces from a remote engine and applies them to a
//! `WorkflowGraph`. The top-level record is applied first; every
//! sub-workflow whose task record names a sub-execution is then fetched and
//! applied to that node's children, repeating until no new sub-execution
//! turns up (sub-workflows inside sub-workflows).
//!
//! Fetch failures are logged and treated as "no update yet"; the host's
//! polling cadence retries them. The graph is locked only while a fetched
//! trace is applied, never across a fetch, so the host keeps editing while
//! requests are in flight and results for nodes deleted meanwhile are
//! dropped.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::catalog::SourceError;
use crate::execution::ExecutionRecord;
use crate::graph::SharedGraph;

/// Async source of execution traces
#[async_trait]
pub trait ExecutionTraceSource: Send + Sync {
    /// Latest trace of an execution instance, `None` if it is not known yet
    async fn fetch_execution(&self, instance_id: &str) -> Result<Option<ExecutionRecord>, SourceError>;
}

/// Applies remote execution traces to a graph
pub struct ExecutionReconciler {
    source: Arc<dyn ExecutionTraceSource>,
}

impl ExecutionReconciler {
    pub fn new(source: Arc<dyn ExecutionTraceSource>) -> Self {
        Self { source }
    }

    /// Fetch the trace of `instance` and reconcile the graph with it
    ///
    /// Returns whether the graph needs to be rendered again.
    pub async fn poll(&self, graph: &SharedGraph, instance: &str) -> bool {
        match self.source.fetch_execution(instance).await {
            Ok(Some(record)) => self.reconcile(graph, instance, &record).await,
            Ok(None) => {
                log::debug!("No trace for execution '{}' yet", instance);
                false
            }
            Err(e) => {
                log::warn!("Failed to fetch execution '{}': {}", instance, e);
                false
            }
        }
    }

    /// Apply an already fetched top-level trace, then follow sub-executions
    pub async fn reconcile(&self, graph: &SharedGraph, instance: &str, record: &ExecutionRecord) -> bool {
        let mut changed = graph.lock().apply_execution(instance, record);
        let mut visited = HashSet::new();
        let mut applied = 0usize;

        loop {
            let pending: Vec<(String, String)> = graph
                .lock()
                .pending_sub_executions(instance)
                .into_iter()
                .filter(|(_, execution)| visited.insert(execution.clone()))
                .collect();
            if pending.is_empty() {
                break;
            }

            for (node_id, execution) in pending {
                match self.source.fetch_execution(&execution).await {
                    Ok(Some(sub)) => {
                        // The tree may have been edited while the fetch was in flight
                        changed |= graph.lock().apply_sub_execution(instance, &node_id, &sub);
                        applied += 1;
                    }
                    Ok(None) => log::debug!("No trace for sub-execution '{}' yet", execution),
                    Err(e) => log::warn!("Failed to fetch sub-execution '{}' of '{}': {}", execution, node_id, e),
                }
            }
        }

        log::info!(
            "Reconciled execution '{}' ({} sub-execution(s), changed: {})",
            instance,
            applied,
            changed
        );
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::WorkflowCatalog;
    use crate::config::GraphConfig;
    use crate::context::GraphContext;
    use crate::execution::{NodeStatus, WorkflowStatus};
    use crate::graph::WorkflowGraph;
    use crate::task::TaskDefinition;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;

    /// Trace source backed by a map; ids listed in `failing` return an error
    #[derive(Default)]
    struct MapSource {
        records: Mutex<HashMap<String, ExecutionRecord>>,
        failing: Vec<String>,
        fetches: Mutex<Vec<String>>,
    }

    impl MapSource {
        fn with(records: Vec<(&str, serde_json::Value)>) -> Self {
            let records = records
                .into_iter()
                .map(|(id, value)| (id.to_string(), serde_json::from_value(value).unwrap()))
                .collect();
            Self {
                records: Mutex::new(records),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ExecutionTraceSource for MapSource {
        async fn fetch_execution(&self, instance_id: &str) -> Result<Option<ExecutionRecord>, SourceError> {
            self.fetches.lock().push(instance_id.to_string());
            if self.failing.iter().any(|id| id == instance_id) {
                return Err(SourceError::Transport("connection reset".to_string()));
            }
            Ok(self.records.lock().get(instance_id).cloned())
        }
    }

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn hydrated_graph() -> WorkflowGraph {
        let tasks = TaskDefinition::list_from_json(
            &json!([
                {"name": "a", "taskReferenceName": "a", "type": "SIMPLE"},
                {"name": "child", "taskReferenceName": "sub", "type": "SUB_WORKFLOW", "subWorkflowParam": {"name": "child", "version": 1}}
            ])
            .to_string(),
        )
        .unwrap();
        let mut graph = WorkflowGraph::from_definitions(GraphContext::new("parent"), GraphConfig::default(), tasks);

        let catalog = WorkflowCatalog::new();
        catalog.insert("child", 1, vec![TaskDefinition::new("SIMPLE", "c1", "tool")]);
        assert!(graph.hydrate(&catalog).unwrap());
        graph
    }

    fn top_level() -> serde_json::Value {
        json!({
            "status": "RUNNING",
            "tasks": [
                {"status": "COMPLETED", "workflowTask": {"taskReferenceName": "a"}},
                {"status": "IN_PROGRESS", "workflowTask": {"taskReferenceName": "sub"}, "outputData": {"subWorkflowId": "child-1"}}
            ]
        })
    }

    fn child_trace(status: &str) -> serde_json::Value {
        json!({
            "status": "RUNNING",
            "updateTime": 1,
            "tasks": [{"status": status, "workflowTask": {"taskReferenceName": "c1"}}]
        })
    }

    #[tokio::test]
    async fn test_poll_follows_sub_executions() {
        init_logging();
        let graph = Mutex::new(hydrated_graph());
        let source = Arc::new(MapSource::with(vec![("i1", top_level()), ("child-1", child_trace("IN_PROGRESS"))]));
        let reconciler = ExecutionReconciler::new(source.clone());

        assert!(reconciler.poll(&graph, "i1").await);
        {
            let graph = graph.lock();
            assert_eq!(graph.execution_status("i1"), WorkflowStatus::Running);
            assert_eq!(graph.node_status("i1", "a"), NodeStatus::Completed);
            assert_eq!(graph.node_status("i1", "sub"), NodeStatus::InProgress);
            assert_eq!(graph.node_status("i1", "c1"), NodeStatus::InProgress);
        }
        assert_eq!(*source.fetches.lock(), vec!["i1".to_string(), "child-1".to_string()]);

        // Only a volatile field changed
        let mut bumped = child_trace("IN_PROGRESS");
        bumped["updateTime"] = json!(2);
        source.records.lock().insert("child-1".to_string(), serde_json::from_value(bumped).unwrap());
        assert!(!reconciler.poll(&graph, "i1").await);

        source
            .records
            .lock()
            .insert("child-1".to_string(), serde_json::from_value(child_trace("COMPLETED")).unwrap());
        assert!(reconciler.poll(&graph, "i1").await);
        assert_eq!(graph.lock().node_status("i1", "c1"), NodeStatus::Completed);
    }

    #[tokio::test]
    async fn test_fetch_failures_mean_no_update() {
        init_logging();
        let graph = Mutex::new(hydrated_graph());
        let source = Arc::new(MapSource {
            failing: vec!["i1".to_string()],
            ..Default::default()
        });
        let reconciler = ExecutionReconciler::new(source);
        assert!(!reconciler.poll(&graph, "i1").await);
        assert_eq!(graph.lock().node_status("i1", "a"), NodeStatus::Default);
    }

    #[tokio::test]
    async fn test_failed_sub_execution_keeps_top_level_update() {
        init_logging();
        let graph = Mutex::new(hydrated_graph());
        let source = Arc::new(MapSource {
            failing: vec!["child-1".to_string()],
            ..MapSource::with(vec![("i1", top_level())])
        });
        let reconciler = ExecutionReconciler::new(source);

        assert!(reconciler.poll(&graph, "i1").await);
        let graph = graph.lock();
        assert_eq!(graph.node_status("i1", "sub"), NodeStatus::InProgress);
        assert_eq!(graph.node_status("i1", "c1"), NodeStatus::Default);
    }

    #[tokio::test]
    async fn test_result_for_deleted_node_is_discarded() {
        let mut graph = hydrated_graph();
        let record: ExecutionRecord = serde_json::from_value(top_level()).unwrap();
        graph.apply_execution("i1", &record);
        let pending = graph.pending_sub_executions("i1");
        assert_eq!(pending, vec![("sub".to_string(), "child-1".to_string())]);

        graph.delete_node("sub").unwrap();
        let sub: ExecutionRecord = serde_json::from_value(child_trace("COMPLETED")).unwrap();
        assert!(!graph.apply_sub_execution("i1", "sub", &sub));
    }

    /// Deletes the sub-workflow from the shared graph while its trace is
    /// being fetched
    struct EditingSource {
        graph: Arc<SharedGraph>,
        inner: MapSource,
    }

    #[async_trait]
    impl ExecutionTraceSource for EditingSource {
        async fn fetch_execution(&self, instance_id: &str) -> Result<Option<ExecutionRecord>, SourceError> {
            if instance_id == "child-1" {
                assert!(self.graph.lock().delete_node("sub").is_some());
            }
            self.inner.fetch_execution(instance_id).await
        }
    }

    #[tokio::test]
    async fn test_edit_during_fetch_discards_late_result() {
        init_logging();
        let graph = Arc::new(Mutex::new(hydrated_graph()));
        let source = Arc::new(EditingSource {
            graph: graph.clone(),
            inner: MapSource::with(vec![("i1", top_level()), ("child-1", child_trace("COMPLETED"))]),
        });
        let reconciler = ExecutionReconciler::new(source.clone());

        assert!(reconciler.poll(&graph, "i1").await);
        assert_eq!(*source.inner.fetches.lock(), vec!["i1".to_string(), "child-1".to_string()]);

        let graph = graph.lock();
        assert!(!graph.contains("sub"));
        assert!(!graph.contains("c1"));
        assert_eq!(graph.node_status("i1", "a"), NodeStatus::Completed);
        assert!(graph.pending_sub_executions("i1").is_empty());
    }
}
