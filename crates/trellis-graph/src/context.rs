//! Explicit context threaded through node creation and normalization

use serde::{Deserialize, Serialize};

/// Identity of the workflow being edited
///
/// The workflow id seeds the sub-workflow ancestry, so a workflow can never
/// reference itself. The team id, when present, is stamped into every
/// sub-workflow's `inputParameters.__context.teamId`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphContext {
    pub workflow_id: Option<String>,
    pub team_id: Option<String>,
}

impl GraphContext {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: Some(workflow_id.into()),
            team_id: None,
        }
    }

    pub fn with_team(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }
}
