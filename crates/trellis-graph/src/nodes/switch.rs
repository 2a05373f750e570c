//! `SWITCH` nodes with named cases

use serde_json::{json, Map, Value};
use trellis_geometry::{EntryPoint, Point};

use crate::context::GraphContext;
use crate::layout::{self, LayoutCx};
use crate::node::{Node, NodeBehavior, NodeCore, NodeKind};
use crate::nodes::{composite, SimpleNode};
use crate::registry::Factory;
use crate::task::{merge_json, tasks_from_value, TaskDefinition};

/// One named case of a switch
#[derive(Debug, Clone)]
pub struct SwitchBranch {
    pub name: String,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone)]
pub struct SwitchNode {
    pub(crate) core: NodeCore,
    pub(crate) branches: Vec<SwitchBranch>,
}

/// Case names start with a letter and contain only ASCII letters and digits
pub fn is_valid_branch_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic()) && chars.all(|c| c.is_ascii_alphanumeric())
}

impl SwitchNode {
    pub fn from_raw(raw: TaskDefinition, factory: &Factory<'_>) -> Self {
        let mut node = Self {
            core: NodeCore::new(raw),
            branches: Vec::new(),
        };
        node.parse_branches(factory);
        node
    }

    pub fn branches(&self) -> &[SwitchBranch] {
        &self.branches
    }

    pub fn branch(&self, name: &str) -> Option<&SwitchBranch> {
        self.branches.iter().find(|branch| branch.name == name)
    }

    /// Rebuild the cases from `decisionCases`, reusing existing nodes by id
    ///
    /// Cases missing from the definition are dropped; nodes that reappear
    /// keep their layout and execution state.
    fn parse_branches(&mut self, factory: &Factory<'_>) {
        let mut previous = std::mem::take(&mut self.branches);
        let cases = self
            .core
            .raw
            .get("decisionCases")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        for (name, tasks) in cases {
            let mut old = previous
                .iter_mut()
                .find(|branch| branch.name == name)
                .map(|branch| std::mem::take(&mut branch.nodes))
                .unwrap_or_default();
            let nodes = composite::rebuild_list(&mut old, tasks_from_value(&tasks), factory);
            self.branches.push(SwitchBranch { name, nodes });
        }

        for branch in previous.iter().filter(|branch| self.branch(&branch.name).is_none()) {
            log::debug!("Switch '{}' dropped case '{}'", self.core.id, branch.name);
        }
    }

    /// Add a case holding a placeholder
    pub fn add_branch(&mut self, name: &str, max_branches: usize) -> bool {
        if !is_valid_branch_name(name) {
            log::warn!("Invalid switch case name '{}'", name);
            return false;
        }
        if self.branches.len() >= max_branches || self.branch(name).is_some() {
            return false;
        }
        self.branches.push(SwitchBranch {
            name: name.to_string(),
            nodes: vec![Node::Simple(SimpleNode::placeholder())],
        });
        true
    }

    /// Add a case named `branchN` after the current count
    pub fn add_branch_incremental(&mut self, max_branches: usize) -> Option<String> {
        let mut index = self.branches.len() + 1;
        if index > max_branches {
            return None;
        }
        let mut name = format!("branch{}", index);
        while self.branch(&name).is_some() {
            index += 1;
            name = format!("branch{}", index);
        }
        self.add_branch(&name, max_branches).then_some(name)
    }

    /// Remove a case, keeping at least two
    pub fn remove_branch(&mut self, name: &str) -> Option<Vec<Node>> {
        if self.branches.len() <= 2 {
            return None;
        }
        let index = self.branches.iter().position(|branch| branch.name == name)?;
        Some(self.branches.remove(index).nodes)
    }
}

fn keyed(branches: &mut [SwitchBranch]) -> Vec<(String, &mut Vec<Node>)> {
    branches
        .iter_mut()
        .map(|branch| (branch.name.clone(), &mut branch.nodes))
        .collect()
}

impl NodeBehavior for SwitchNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Switch
    }

    fn child_lists(&self) -> Vec<&Vec<Node>> {
        self.branches.iter().map(|branch| &branch.nodes).collect()
    }

    fn child_lists_mut(&mut self) -> Vec<&mut Vec<Node>> {
        self.branches.iter_mut().map(|branch| &mut branch.nodes).collect()
    }

    fn to_raw(&self) -> TaskDefinition {
        let mut raw = self.core.raw.clone();
        let cases: Map<String, Value> = self
            .branches
            .iter()
            .map(|branch| (branch.name.clone(), json!(composite::serialize_list(&branch.nodes))))
            .collect();
        raw.insert("decisionCases", Value::Object(cases));
        raw
    }

    /// Hoist `inputParameters.parameters` into `inputParameters`
    fn check(&mut self, _context: &GraphContext) {
        let parameters = self
            .core
            .raw
            .get_path(&["inputParameters", "parameters"])
            .filter(|value| value.as_object().is_some_and(|map| !map.is_empty()))
            .cloned();
        if let Some(parameters) = parameters {
            let mut input = self.core.raw.get("inputParameters").cloned().unwrap_or_else(|| json!({}));
            merge_json(&mut input, &parameters);
            self.core.raw.insert("inputParameters", input);
        }
    }

    fn apply_raw(&mut self, raw: TaskDefinition, factory: &Factory<'_>) {
        self.core.raw = raw;
        self.check(factory.context());
        self.parse_branches(factory);
    }

    fn layout(&mut self, cursor: &mut Point, cx: &LayoutCx<'_>) {
        let mut lists: Vec<&mut Vec<Node>> = self.branches.iter_mut().map(|branch| &mut branch.nodes).collect();
        layout::place_branches(&mut self.core, &mut lists, cursor, cx);
    }

    fn entry_point(&self, cx: &LayoutCx<'_>) -> EntryPoint {
        let tails: Vec<&Node> = self.branches.iter().filter_map(|branch| branch.nodes.last()).collect();
        layout::branches_entry(&self.core, &tails, cx)
    }

    fn render_edges(&mut self, cx: &LayoutCx<'_>, is_last: bool) {
        layout::branch_edges(&mut self.core, keyed(&mut self.branches), cx, is_last);
    }

    fn render_controllers(&mut self, cx: &LayoutCx<'_>) {
        let can_add = self.branches.len() < cx.max_branches;
        let can_remove = self.branches.len() > 2;
        layout::branch_controllers(&mut self.core, keyed(&mut self.branches), cx, can_add, can_remove);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn switch(cases: Value) -> Node {
        let mut raw = TaskDefinition::new("SWITCH", "sw", "switch");
        raw.insert("decisionCases", cases);
        Factory::for_tests().create(raw).remove(0)
    }

    #[test]
    fn test_branch_names() {
        assert!(is_valid_branch_name("case1"));
        assert!(is_valid_branch_name("A"));
        assert!(!is_valid_branch_name("1case"));
        assert!(!is_valid_branch_name("case_1"));
        assert!(!is_valid_branch_name(""));
    }

    #[test]
    fn test_empty_cases_stay_empty() {
        let node = switch(json!({"a": [], "b": [{"taskReferenceName": "x", "type": "SIMPLE"}]}));
        let sw = node.as_switch().unwrap();
        assert!(sw.branch("a").unwrap().nodes.is_empty());
        assert_eq!(sw.branch("b").unwrap().nodes.len(), 1);
    }

    #[test]
    fn test_add_and_remove_cases() {
        let mut node = switch(json!({"switchTrue": [], "switchFalse": []}));
        let sw = node.as_switch_mut().unwrap();

        assert!(!sw.add_branch("bad name", 20));
        assert!(!sw.add_branch("switchTrue", 20));
        assert_eq!(sw.add_branch_incremental(20), Some("branch3".to_string()));
        assert!(sw.branch("branch3").unwrap().nodes[0].is_placeholder());
        assert_eq!(sw.add_branch_incremental(4), Some("branch4".to_string()));
        assert_eq!(sw.add_branch_incremental(4), None);

        assert!(sw.remove_branch("branch3").is_some());
        assert!(sw.remove_branch("branch4").is_some());
        assert!(sw.remove_branch("switchTrue").is_none());
    }

    #[test]
    fn test_parameters_are_hoisted() {
        let mut raw = TaskDefinition::new("SWITCH", "sw", "switch");
        raw.insert(
            "inputParameters",
            json!({"switchCaseValue": "${a}", "parameters": {"switchCaseValue": "${b}", "extra": 1}}),
        );
        let node = Factory::for_tests().create(raw).remove(0);
        assert_eq!(node.raw().get_path(&["inputParameters", "switchCaseValue"]), Some(&json!("${b}")));
        assert_eq!(node.raw().get_path(&["inputParameters", "extra"]), Some(&json!(1)));
    }

    #[test]
    fn test_apply_raw_reuses_nodes() {
        let mut node = switch(json!({"a": [{"taskReferenceName": "x", "type": "SIMPLE"}], "b": []}));
        if let Some(x) = node.find_mut("x") {
            x.core_mut().position = Point::new(7.0, 7.0);
        }

        let mut raw = node.to_raw();
        raw.insert(
            "decisionCases",
            json!({"a": [{"taskReferenceName": "x", "type": "SIMPLE", "description": "d"}, {"taskReferenceName": "y", "type": "SIMPLE"}]}),
        );
        node.apply_raw(raw, &Factory::for_tests());

        let sw = node.as_switch().unwrap();
        assert_eq!(sw.branches().len(), 1);
        let x = node.find("x").unwrap();
        assert_eq!(x.position(), Point::new(7.0, 7.0));
        assert_eq!(x.raw().get("description"), Some(&json!("d")));
        assert!(node.contains("y"));
    }
}
