//! Workflow definition catalog
//!
//! Referenced sub-workflows are hydrated from a `DefinitionCatalog`, a
//! synchronous lookup of stored definitions by name and version. The
//! bundled `WorkflowCatalog` caches definitions fetched through an async
//! `DefinitionSource` (typically the workflow store's HTTP API), so the
//! graph itself never performs I/O.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use crate::error::Result;
use crate::graph::SharedGraph;
use crate::task::TaskDefinition;

/// Synchronous lookup of stored workflow definitions
pub trait DefinitionCatalog: Send + Sync {
    /// Task list of a workflow; `None` version means the latest one
    fn definition(&self, name: &str, version: Option<u32>) -> Option<Vec<TaskDefinition>>;
}

/// Failure of a remote collaborator
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// Async source of workflow definitions
#[async_trait]
pub trait DefinitionSource: Send + Sync {
    async fn fetch_definition(
        &self,
        name: &str,
        version: Option<u32>,
    ) -> std::result::Result<Vec<TaskDefinition>, SourceError>;
}

/// In-memory catalog of workflow definitions keyed by name and version
#[derive(Default)]
pub struct WorkflowCatalog {
    workflows: RwLock<HashMap<String, BTreeMap<u32, Vec<TaskDefinition>>>>,
}

impl WorkflowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, version: u32, tasks: Vec<TaskDefinition>) {
        self.workflows
            .write()
            .entry(name.to_string())
            .or_default()
            .insert(version, tasks);
    }

    pub fn contains(&self, name: &str, version: Option<u32>) -> bool {
        self.definition(name, version).is_some()
    }

    /// Fetch a definition from `source` and cache it
    pub async fn refresh(
        &self,
        source: &dyn DefinitionSource,
        name: &str,
        version: Option<u32>,
    ) -> std::result::Result<(), SourceError> {
        let tasks = source.fetch_definition(name, version).await?;
        self.insert(name, version.unwrap_or(1), tasks);
        Ok(())
    }

    /// Fetch every unresolved reference of `graph`, then hydrate it
    ///
    /// Hydration can reveal further references, so fetching repeats until
    /// nothing new turns up. Each reference is fetched at most once; fetch
    /// failures are logged and leave that sub-workflow collapsed. The graph
    /// stays unlocked while definitions are fetched.
    pub async fn resolve(&self, graph: &SharedGraph, source: &dyn DefinitionSource) -> Result<bool> {
        let mut attempted = HashSet::new();
        let mut changed = false;

        loop {
            let pending: Vec<(String, Option<u32>)> = graph
                .lock()
                .unresolved_references()
                .into_iter()
                .filter(|reference| !self.contains(&reference.0, reference.1))
                .filter(|reference| attempted.insert(reference.clone()))
                .collect();
            if pending.is_empty() {
                break;
            }

            for (name, version) in pending {
                if let Err(e) = self.refresh(source, &name, version).await {
                    log::warn!("Failed to fetch sub-workflow '{}': {}", name, e);
                }
            }
            changed |= graph.lock().hydrate(self)?;
        }

        Ok(changed)
    }
}

impl DefinitionCatalog for WorkflowCatalog {
    fn definition(&self, name: &str, version: Option<u32>) -> Option<Vec<TaskDefinition>> {
        let workflows = self.workflows.read();
        let versions = workflows.get(name)?;
        match version {
            Some(version) => versions.get(&version).cloned(),
            None => versions.values().next_back().cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource;

    #[async_trait]
    impl DefinitionSource for FixedSource {
        async fn fetch_definition(
            &self,
            name: &str,
            _version: Option<u32>,
        ) -> std::result::Result<Vec<TaskDefinition>, SourceError> {
            match name {
                "child" => Ok(vec![TaskDefinition::new("SIMPLE", "c1", "tool")]),
                other => Err(SourceError::NotFound(other.to_string())),
            }
        }
    }

    #[test]
    fn test_latest_version_lookup() {
        let catalog = WorkflowCatalog::new();
        catalog.insert("w", 1, vec![TaskDefinition::new("SIMPLE", "v1", "t")]);
        catalog.insert("w", 3, vec![TaskDefinition::new("SIMPLE", "v3", "t")]);

        assert_eq!(catalog.definition("w", None).unwrap()[0].reference_name(), "v3");
        assert_eq!(catalog.definition("w", Some(1)).unwrap()[0].reference_name(), "v1");
        assert!(catalog.definition("w", Some(2)).is_none());
        assert!(!catalog.contains("other", None));
    }

    #[tokio::test]
    async fn test_refresh_caches_and_reports_errors() {
        let _ = env_logger::builder().is_test(true).try_init();
        let catalog = WorkflowCatalog::new();
        catalog.refresh(&FixedSource, "child", Some(2)).await.unwrap();
        assert!(catalog.contains("child", Some(2)));

        let err = catalog.refresh(&FixedSource, "missing", None).await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound(name) if name == "missing"));
    }
}
