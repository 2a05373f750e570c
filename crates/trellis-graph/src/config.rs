//! Graph configuration
//!
//! All layout constants live here so hosts can tune spacing without touching
//! the layout passes. Every field has a default, so a partial JSON document
//! is a valid configuration.

use serde::{Deserialize, Serialize};
use trellis_geometry::Size;

use crate::error::Result;

/// Spacing used by the layout passes, in canvas units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LayoutConfig {
    /// Footprint of every node
    pub node_size: Size,
    /// Gap between consecutive nodes of a sequence
    pub rank_gap: f64,
    /// Gap between a loop/sub-workflow header and its body
    pub composite_gap: f64,
    /// Extra cross-axis indent of a body beyond half the header
    pub body_padding: f64,
    /// Distance before a body's first node where the head connector bends
    pub head_offset: f64,
    /// Distance between a body's last node and the composite's exit
    pub return_offset: f64,
    /// Distance after a body's last node where the exit connector bends
    pub exit_offset: f64,
    /// Gap between a branching header and its branches
    pub branch_gap: f64,
    /// Minimum cross-axis gap between neighbouring branches
    pub branch_spacing: f64,
    /// Distance before a branch's first node where its head connector bends
    pub branch_head_offset: f64,
    /// Distance between the deepest branch end and the rejoin point
    pub join_offset: f64,
    /// Corner radius of smooth connectors
    pub corner_radius: f64,
    /// Cross-axis inset of controller affordances from an anchor
    pub controller_inset: f64,
    /// Along-axis gap between an anchor and its controller affordance
    pub controller_gap: f64,
    /// Along-axis distance of a branch removal affordance before the branch
    pub branch_controller_offset: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            node_size: Size::new(80.0, 80.0),
            rank_gap: 80.0,
            composite_gap: 82.0,
            body_padding: 5.0,
            head_offset: 32.0,
            return_offset: 120.0,
            exit_offset: 48.0,
            branch_gap: 102.0,
            branch_spacing: 110.0,
            branch_head_offset: 50.0,
            join_offset: 80.0,
            corner_radius: 10.0,
            controller_inset: 16.0,
            controller_gap: 10.0,
            branch_controller_offset: 42.0,
        }
    }
}

/// Top-level graph configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GraphConfig {
    pub layout: LayoutConfig,
    /// Upper bound on switch cases and fork branches
    pub max_branches: usize,
    /// Number of undo snapshots kept
    pub undo_depth: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            layout: LayoutConfig::default(),
            max_branches: 20,
            undo_depth: 100,
        }
    }
}

impl GraphConfig {
    /// Parse a (possibly partial) JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = GraphConfig::from_json_str(r#"{"maxBranches": 4, "layout": {"rankGap": 40}}"#).unwrap();
        assert_eq!(config.max_branches, 4);
        assert_eq!(config.layout.rank_gap, 40.0);
        assert_eq!(config.layout.composite_gap, 82.0);
        assert_eq!(config.undo_depth, 100);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(GraphConfig::from_json_str("{").is_err());
    }
}
