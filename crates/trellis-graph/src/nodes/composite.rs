//! List operations shared by every container
//!
//! The root sequence, loop bodies, fork branches, switch cases and nested
//! sub-workflows are all plain `Vec<Node>`s; inserting, detaching and
//! serializing them follows the same rules wherever they appear.

use crate::node::{Ancestry, Detach, InsertOutcome, InsertRequest, Node, NodeBehavior, NodeKind};
use crate::nodes::{SimpleNode, SubWorkflowNode};
use crate::registry::Factory;
use crate::task::{task_types::JOIN, TaskDefinition};

/// Offer `nodes` to a set of child lists, descending until the target is found
pub(crate) fn insert_into(
    mut lists: Vec<&mut Vec<Node>>,
    wraps_loops: bool,
    nodes: Vec<Node>,
    request: &InsertRequest<'_>,
    ancestry: &Ancestry,
) -> InsertOutcome {
    for list in lists.iter_mut() {
        if list.iter().any(|node| node.id() == request.target_id) {
            return insert_at_target(list, wraps_loops, nodes, request, ancestry);
        }
    }

    let mut nodes = nodes;
    for list in lists {
        for child in list.iter_mut() {
            let inner = ancestry.enter(child);
            match child.insert_child(nodes, request, &inner) {
                InsertOutcome::NotFound(returned) => nodes = returned,
                done => return done,
            }
        }
    }
    InsertOutcome::NotFound(nodes)
}

/// Insert next to a target known to be a direct member of `list`
pub(crate) fn insert_at_target(
    list: &mut Vec<Node>,
    wraps_loops: bool,
    nodes: Vec<Node>,
    request: &InsertRequest<'_>,
    ancestry: &Ancestry,
) -> InsertOutcome {
    let Some(mut index) = list.iter().position(|node| node.id() == request.target_id) else {
        return InsertOutcome::NotFound(nodes);
    };

    if let Some(name) = ancestry.conflict(&nodes) {
        log::warn!(
            "Refusing to insert sub-workflow '{}' inside itself (target '{}')",
            name,
            request.target_id
        );
        return InsertOutcome::Rejected(nodes);
    }

    let mut nodes = if wraps_loops && ancestry.in_loop && nodes.iter().any(|node| node.kind() == NodeKind::Loop) {
        log::debug!("Wrapping nested loop in a sub-workflow before '{}'", request.target_id);
        vec![Node::SubWorkflow(SubWorkflowNode::wrap(nodes, request.context))]
    } else {
        nodes
    };

    let mut replaced = None;
    let target = &list[index];
    if target.is_placeholder() {
        replaced = Some(list.remove(index).id().to_string());
    } else if request.insert_before {
        // A join must stay directly after its fork
        if let Some(owner) = target.companion_of() {
            if let Some(owner_index) = list.iter().position(|node| node.id() == owner) {
                index = owner_index;
            }
        }
    } else if let Some(companion) = target.sibling_companion() {
        index = list
            .iter()
            .position(|node| node.id() == companion)
            .map_or(index + 1, |companion_index| companion_index + 1);
    } else if let Some(owner) = target.companion_of() {
        // A loop's collector stays last in the body
        if list.iter().any(|node| node.id() == owner) {
            index += 1;
        }
    } else {
        index += 1;
    }

    if let Some(first) = nodes.first_mut() {
        first.core_mut().replaced_placeholder = replaced;
    }
    let ids: Vec<String> = nodes.iter().map(|node| node.id().to_string()).collect();
    list.splice(index..index, nodes);
    InsertOutcome::Inserted(ids)
}

/// Remove a node from whichever list holds it
pub(crate) fn detach_from(mut lists: Vec<&mut Vec<Node>>, target_id: &str, keep_placeholder: bool) -> Detach {
    for list in lists.iter_mut() {
        if list.iter().any(|node| node.id() == target_id) {
            return detach_direct(list, target_id, keep_placeholder);
        }
    }

    for list in lists {
        let mut hit = None;
        for (index, child) in list.iter_mut().enumerate() {
            match child.detach_child(target_id) {
                Detach::NotFound => continue,
                outcome => {
                    hit = Some((index, outcome));
                    break;
                }
            }
        }
        let Some((index, outcome)) = hit else {
            continue;
        };
        return match outcome {
            Detach::Detached { nodes, mut dropped } => {
                if list[index].is_emptied_wrapper() {
                    let mut wrapper = list.remove(index);
                    log::debug!("Dropping emptied wrapper '{}'", wrapper.id());
                    let replaced = wrapper.core_mut().replaced_placeholder.take();
                    dropped.extend(wrapper.destroy());
                    restore_placeholder(list, keep_placeholder, replaced);
                }
                Detach::Detached { nodes, dropped }
            }
            other => other,
        };
    }
    Detach::NotFound
}

/// Remove a direct member of `list` together with its sibling companion
pub(crate) fn detach_direct(list: &mut Vec<Node>, target_id: &str, keep_placeholder: bool) -> Detach {
    let Some(index) = list.iter().position(|node| node.id() == target_id) else {
        return Detach::NotFound;
    };
    let target = &list[index];
    if target.is_placeholder() || target.is_companion() {
        log::debug!("Refusing to detach '{}'", target_id);
        return Detach::Refused;
    }

    let mut node = list.remove(index);
    let replaced = node.core_mut().replaced_placeholder.take();
    let mut nodes = Vec::with_capacity(2);
    if let Some(companion) = node.sibling_companion() {
        if let Some(companion_index) = list.iter().position(|n| n.id() == companion) {
            nodes.push(list.remove(companion_index));
        }
    }
    nodes.insert(0, node);

    restore_placeholder(list, keep_placeholder, replaced);
    Detach::Detached {
        nodes,
        dropped: Vec::new(),
    }
}

/// Keep a sequence editable: a list holding nothing but companions gets a
/// placeholder at its head
pub(crate) fn ensure_placeholder(list: &mut Vec<Node>, keep_placeholder: bool) {
    restore_placeholder(list, keep_placeholder, None);
}

/// `ensure_placeholder`, reusing the id of the placeholder a removed node had
/// replaced
///
/// While the sequence still holds other nodes the id is handed to the new
/// head, so that emptying the sequence later brings the same placeholder back.
pub(crate) fn restore_placeholder(list: &mut Vec<Node>, keep_placeholder: bool, replaced: Option<String>) {
    if keep_placeholder && list.iter().all(Node::is_companion) {
        let placeholder = match replaced {
            Some(id) => SimpleNode::placeholder_with_id(&id),
            None => SimpleNode::placeholder(),
        };
        list.insert(0, Node::Simple(placeholder));
    } else if let Some(id) = replaced {
        if let Some(head) = list.iter_mut().find(|node| !node.is_companion()) {
            head.core_mut().replaced_placeholder.get_or_insert(id);
        }
    }
}

/// Build a sequence from `tasks`, taking nodes with a matching id out of
/// `old` instead of creating them again
///
/// Reused nodes get their new definition applied and keep their layout and
/// execution state.
pub(crate) fn rebuild_list(old: &mut Vec<Node>, tasks: Vec<TaskDefinition>, factory: &Factory<'_>) -> Vec<Node> {
    let mut nodes = Vec::with_capacity(tasks.len());
    let mut pending = Vec::new();
    for task in tasks {
        match old.iter().position(|node| node.id() == task.reference_name()) {
            Some(index) => {
                nodes.extend(factory.create_all(std::mem::take(&mut pending)));
                let mut node = old.remove(index);
                node.apply_raw(task, factory);
                nodes.push(node);
            }
            None => pending.push(task),
        }
    }
    nodes.extend(factory.create_all(pending));
    nodes
}

/// Serialize a sequence, refreshing each join's `joinOn` from its fork
pub(crate) fn serialize_list(nodes: &[Node]) -> Vec<TaskDefinition> {
    let mut tasks = Vec::with_capacity(nodes.len());
    for (index, node) in nodes.iter().enumerate() {
        let mut raw = node.to_raw();
        if raw.task_type() == JOIN {
            let fork = index
                .checked_sub(1)
                .and_then(|prev| nodes[prev].as_fork_join())
                .filter(|fork| node.companion_of() == Some(fork.core().id()));
            if let Some(fork) = fork {
                raw.insert("joinOn", serde_json::json!(fork.join_on()));
            }
        }
        tasks.push(raw);
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GraphContext;
    use serde_json::json;

    fn simple(id: &str) -> Node {
        Node::Simple(SimpleNode::new(TaskDefinition::new("SIMPLE", id, id)))
    }

    fn ids(list: &[Node]) -> Vec<&str> {
        list.iter().map(Node::id).collect()
    }

    #[test]
    fn test_insert_replaces_placeholder() {
        let mut list = vec![Node::Simple(SimpleNode::placeholder())];
        let target = list[0].id().to_string();
        let context = GraphContext::default();
        let request = InsertRequest {
            target_id: &target,
            insert_before: false,
            context: &context,
        };

        let outcome = insert_at_target(&mut list, true, vec![simple("a")], &request, &Ancestry::default());
        assert!(matches!(outcome, InsertOutcome::Inserted(ref ids) if ids == &["a".to_string()]));
        assert_eq!(ids(&list), ["a"]);
    }

    #[test]
    fn test_detach_restores_replaced_placeholder() {
        let mut list = vec![Node::Simple(SimpleNode::placeholder())];
        let placeholder = list[0].id().to_string();
        let context = GraphContext::default();
        let request = InsertRequest {
            target_id: &placeholder,
            insert_before: false,
            context: &context,
        };
        insert_at_target(&mut list, true, vec![simple("a")], &request, &Ancestry::default());
        let request = InsertRequest {
            target_id: "a",
            insert_before: false,
            context: &context,
        };
        insert_at_target(&mut list, true, vec![simple("b")], &request, &Ancestry::default());

        // Removing the node that replaced the placeholder first hands the id on
        detach_direct(&mut list, "a", true);
        assert_eq!(ids(&list), ["b"]);
        detach_direct(&mut list, "b", true);
        assert_eq!(ids(&list), [placeholder.as_str()]);
    }

    #[test]
    fn test_insert_after_fork_skips_join() {
        let factory = Factory::for_tests();
        let mut list = factory.create(TaskDefinition::template("FORK_JOIN", "fork"));
        list.push(simple("tail"));
        let fork_id = list[0].id().to_string();
        let context = GraphContext::default();
        let request = InsertRequest {
            target_id: &fork_id,
            insert_before: false,
            context: &context,
        };

        insert_at_target(&mut list, true, vec![simple("a")], &request, &Ancestry::default());
        assert_eq!(list[2].id(), "a");
        assert_eq!(list[3].id(), "tail");
    }

    #[test]
    fn test_insert_before_join_lands_before_fork() {
        let factory = Factory::for_tests();
        let mut list = factory.create(TaskDefinition::template("FORK_JOIN", "fork"));
        let join_id = list[1].id().to_string();
        let context = GraphContext::default();
        let request = InsertRequest {
            target_id: &join_id,
            insert_before: true,
            context: &context,
        };

        insert_at_target(&mut list, true, vec![simple("a")], &request, &Ancestry::default());
        assert_eq!(list[0].id(), "a");
        assert!(list[1].as_fork_join().is_some());
    }

    #[test]
    fn test_detach_last_node_installs_placeholder() {
        let mut list = vec![simple("a")];
        let outcome = detach_direct(&mut list, "a", true);
        assert!(matches!(outcome, Detach::Detached { ref nodes, .. } if nodes.len() == 1));
        assert_eq!(list.len(), 1);
        assert!(list[0].is_placeholder());

        let placeholder = list[0].id().to_string();
        assert!(matches!(detach_direct(&mut list, &placeholder, true), Detach::Refused));
    }

    #[test]
    fn test_detach_fork_takes_join() {
        let factory = Factory::for_tests();
        let mut list = factory.create(TaskDefinition::template("FORK_JOIN", "fork"));
        list.insert(0, simple("head"));
        let fork_id = list[1].id().to_string();
        let join_id = list[2].id().to_string();

        assert!(matches!(detach_direct(&mut list, &join_id, true), Detach::Refused));
        match detach_direct(&mut list, &fork_id, true) {
            Detach::Detached { nodes, .. } => assert_eq!(nodes.len(), 2),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(ids(&list), ["head"]);
    }

    #[test]
    fn test_serialize_refreshes_join_on() {
        let factory = Factory::for_tests();
        let list = factory.create(TaskDefinition::template("FORK_JOIN", "fork"));
        let fork = list[0].as_fork_join().unwrap();
        let expected = json!(fork.join_on());

        let tasks = serialize_list(&list);
        assert_eq!(tasks[1].get("joinOn"), Some(&expected));
        assert_eq!(expected.as_array().map(Vec::len), Some(2));
    }
}
