//! Node lookup and dependency ordering for a playbook version.
//!
//! The index is computed once when a [`Playbook`](crate::Playbook) is built and
//! answers every cross-reference query in O(1).

use std::collections::{BTreeSet, HashMap};

use milestone_types::{MilestoneError, Result};

use crate::graph::World;

/// Position of a node: world index (in display order) and node index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeLocation {
    pub world: usize,
    pub node: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybookIndex {
    nodes: HashMap<String, NodeLocation>,
    worlds: HashMap<String, usize>,
    branch_sources: HashMap<String, Vec<String>>,
    loop_sources: HashMap<String, Vec<String>>,
    dependency_order: Vec<NodeLocation>,
}

impl PlaybookIndex {
    /// Index `worlds`, failing on duplicate ids, dangling references, or a
    /// prerequisite cycle.
    ///
    /// Outcome branches that route back to a node their source already depends
    /// on are recorded as loops: they neither gate their target nor constrain
    /// the dependency order.
    pub fn build(worlds: &[World]) -> Result<Self> {
        let mut nodes: HashMap<String, NodeLocation> = HashMap::new();
        let mut world_positions = HashMap::new();
        let mut declared: Vec<NodeLocation> = Vec::new();

        for (wi, world) in worlds.iter().enumerate() {
            if world_positions.insert(world.id.clone(), wi).is_some() {
                return Err(MilestoneError::DefinitionIntegrity(format!(
                    "world id '{}' is declared twice",
                    world.id
                )));
            }
            for (ni, node) in world.nodes.iter().enumerate() {
                let loc = NodeLocation { world: wi, node: ni };
                if let Some(first) = nodes.insert(node.id.clone(), loc) {
                    return Err(MilestoneError::DuplicateNodeId {
                        node: node.id.clone(),
                        first_world: worlds[first.world].id.clone(),
                        second_world: world.id.clone(),
                    });
                }
                declared.push(loc);
            }
        }

        for world in worlds {
            for node in &world.nodes {
                let references = node
                    .prerequisites
                    .iter()
                    .chain(node.next.iter())
                    .chain(node.outcomes.iter().flat_map(|o| o.next.iter()));
                for target in references {
                    if !nodes.contains_key(target) {
                        return Err(MilestoneError::DefinitionIntegrity(format!(
                            "node '{}' references unknown node '{target}'",
                            node.id
                        )));
                    }
                }
            }
        }

        let node_at = |i: usize| &worlds[declared[i].world].nodes[declared[i].node];
        let rank: HashMap<&str, usize> = (0..declared.len())
            .map(|i| (node_at(i).id.as_str(), i))
            .collect();

        let mut deps: Vec<BTreeSet<usize>> = (0..declared.len())
            .map(|i| {
                node_at(i)
                    .prerequisites
                    .iter()
                    .filter_map(|p| rank.get(p.as_str()).copied())
                    .collect()
            })
            .collect();

        let cycle = cycle_members(&deps);
        if !cycle.is_empty() {
            let names: Vec<&str> = cycle.iter().map(|&i| node_at(i).id.as_str()).collect();
            return Err(MilestoneError::DefinitionIntegrity(format!(
                "dependency cycle among nodes: {}",
                names.join(", ")
            )));
        }

        let branches: Vec<(usize, usize)> = (0..declared.len())
            .flat_map(|i| {
                node_at(i)
                    .branch_targets()
                    .into_iter()
                    .filter_map(|t| rank.get(t).copied())
                    .map(move |t| (i, t))
                    .collect::<Vec<_>>()
            })
            .collect();
        let loops = loop_branches(&deps, &branches);

        let mut branch_sources: HashMap<String, Vec<String>> = HashMap::new();
        let mut loop_sources: HashMap<String, Vec<String>> = HashMap::new();
        for (&(source, target), is_loop) in branches.iter().zip(loops) {
            let sources = if is_loop {
                &mut loop_sources
            } else {
                deps[target].insert(source);
                &mut branch_sources
            };
            sources
                .entry(node_at(target).id.clone())
                .or_default()
                .push(node_at(source).id.clone());
        }

        let (order, _) = kahn_order(&deps);
        if order.len() != declared.len() {
            return Err(MilestoneError::DefinitionIntegrity(
                "outcome branches do not form a forward order".into(),
            ));
        }

        Ok(PlaybookIndex {
            nodes,
            worlds: world_positions,
            branch_sources,
            loop_sources,
            dependency_order: order.into_iter().map(|i| declared[i]).collect(),
        })
    }

    pub fn location(&self, node_id: &str) -> Option<NodeLocation> {
        self.nodes.get(node_id).copied()
    }

    pub fn world_position(&self, world_id: &str) -> Option<usize> {
        self.worlds.get(world_id).copied()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Sources whose forward outcome branches gate `node_id`.
    pub fn branch_sources(&self, node_id: &str) -> &[String] {
        self.branch_sources
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Sources whose outcome branches route back to `node_id` for rework.
    pub fn loop_sources(&self, node_id: &str) -> &[String] {
        self.loop_sources
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn dependency_order(&self) -> &[NodeLocation] {
        &self.dependency_order
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Graph helpers over declaration indices
// ---------------------------------------------------------------------------

/// Kahn's algorithm over `deps` (node to its upstream nodes). Ready nodes are
/// taken lowest index first so the order is deterministic. Also returns each
/// node's leftover in-degree, non-zero only on or behind a cycle.
pub(crate) fn kahn_order(deps: &[BTreeSet<usize>]) -> (Vec<usize>, Vec<usize>) {
    let mut in_degree: Vec<usize> = deps.iter().map(BTreeSet::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); deps.len()];
    for (node, ups) in deps.iter().enumerate() {
        for &up in ups {
            dependents[up].push(node);
        }
    }

    let mut ready: BTreeSet<usize> = (0..deps.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(deps.len());
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &dependent in &dependents[i] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }
    (order, in_degree)
}

/// Nodes on a dependency cycle (or on a path between two cycles), ascending.
/// Nodes that merely hang off a cycle are excluded.
pub(crate) fn cycle_members(deps: &[BTreeSet<usize>]) -> Vec<usize> {
    let (_, leftover) = kahn_order(deps);
    let mut remaining: Vec<bool> = leftover.iter().map(|d| *d > 0).collect();

    // Peel sinks: a remaining node nothing remaining depends on.
    let mut fan_out = vec![0usize; deps.len()];
    for (node, ups) in deps.iter().enumerate() {
        if remaining[node] {
            for &up in ups {
                if remaining[up] {
                    fan_out[up] += 1;
                }
            }
        }
    }
    let mut sinks: Vec<usize> = (0..deps.len())
        .filter(|&i| remaining[i] && fan_out[i] == 0)
        .collect();
    while let Some(i) = sinks.pop() {
        remaining[i] = false;
        for &up in &deps[i] {
            if remaining[up] {
                fan_out[up] -= 1;
                if fan_out[up] == 0 {
                    sinks.push(up);
                }
            }
        }
    }

    (0..deps.len()).filter(|&i| remaining[i]).collect()
}

/// Classify branch edges `(source, target)`, taken in order, as loops. An edge
/// loops when its target already reaches its source through prerequisites and
/// the forward branches accepted before it. `prerequisites` must be acyclic.
pub(crate) fn loop_branches(prerequisites: &[BTreeSet<usize>], branches: &[(usize, usize)]) -> Vec<bool> {
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); prerequisites.len()];
    for (node, ups) in prerequisites.iter().enumerate() {
        for &up in ups {
            dependents[up].push(node);
        }
    }
    branches
        .iter()
        .map(|&(source, target)| {
            let is_loop = reaches(&dependents, target, source);
            if !is_loop {
                dependents[source].push(target);
            }
            is_loop
        })
        .collect()
}

fn reaches(dependents: &[Vec<usize>], from: usize, to: usize) -> bool {
    let mut seen = vec![false; dependents.len()];
    let mut stack = vec![from];
    while let Some(i) = stack.pop() {
        if i == to {
            return true;
        }
        if !std::mem::replace(&mut seen[i], true) {
            stack.extend(&dependents[i]);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Playbook;
    use milestone_playbook::parse_document;
    use serde_json::json;

    fn waiting(id: &str, prereqs: &[&str]) -> serde_json::Value {
        json!({"id": id, "type": "waiting", "prerequisites": prereqs})
    }

    fn build(worlds: serde_json::Value) -> Result<Playbook> {
        let doc = json!({"playbook_id": "pb", "version": "1", "worlds": worlds});
        Playbook::from_document(parse_document(&doc.to_string())?)
    }

    #[test]
    fn lookup_is_total() {
        let pb = build(json!([
            {"id": "W1", "order": 1, "nodes": [waiting("A", &[]), waiting("B", &["A"])]},
            {"id": "W2", "order": 2, "nodes": [waiting("C", &["B"])]}
        ]))
        .unwrap();
        for id in ["A", "B", "C"] {
            assert_eq!(pb.node(id).unwrap().id, id);
        }
        assert_eq!(pb.world_of("C").unwrap().id, "W2");
        assert!(pb.node("Z").is_none());
        assert_eq!(pb.len(), 3);
    }

    #[test]
    fn duplicate_id_across_worlds_fails_fast() {
        let err = build(json!([
            {"id": "W1", "nodes": [waiting("A", &[])]},
            {"id": "W2", "nodes": [waiting("A", &[])]}
        ]))
        .unwrap_err();
        match err {
            MilestoneError::DuplicateNodeId {
                node,
                first_world,
                second_world,
            } => {
                assert_eq!(node, "A");
                assert_eq!(first_world, "W1");
                assert_eq!(second_world, "W2");
            }
            other => panic!("expected DuplicateNodeId, got {other:?}"),
        }
    }

    #[test]
    fn dangling_reference_fails() {
        let err = build(json!([{"id": "W1", "nodes": [waiting("A", &["ghost"])]}])).unwrap_err();
        assert!(err.to_string().contains("unknown node 'ghost'"));
    }

    #[test]
    fn cycle_fails() {
        let err = build(json!([
            {"id": "W1", "nodes": [waiting("A", &["B"]), waiting("B", &["A"])]}
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("dependency cycle among nodes: A, B"));
    }

    #[test]
    fn cycle_message_names_only_cycle_nodes() {
        let err = build(json!([
            {"id": "W1", "nodes": [
                waiting("A", &["B"]),
                waiting("B", &["A"]),
                waiting("C", &["B"]),
                waiting("D", &["C"])
            ]}
        ]))
        .unwrap_err();
        assert!(err.to_string().ends_with("dependency cycle among nodes: A, B"), "{err}");
    }

    #[test]
    fn cycle_members_skips_nodes_hanging_off_a_cycle() {
        let deps: Vec<BTreeSet<usize>> = vec![
            BTreeSet::new(),
            BTreeSet::from([0, 3]),
            BTreeSet::from([1]),
            BTreeSet::from([2]),
            BTreeSet::from([3]),
            BTreeSet::from([5]),
        ];
        assert_eq!(cycle_members(&deps), vec![1, 2, 3, 5]);
        assert!(cycle_members(&deps[..1]).is_empty());
    }

    #[test]
    fn branch_back_to_an_ancestor_is_a_loop() {
        let pb = build(json!([
            {"id": "W1", "nodes": [
                waiting("A", &[]),
                {"id": "D", "type": "decision", "prerequisites": ["A"], "outcomes": [
                    {"value": "ok", "next": ["B"]},
                    {"value": "rework", "next": ["A"]}
                ]},
                waiting("B", &[])
            ]}
        ]))
        .unwrap();
        assert!(pb.branch_sources("A").is_empty());
        assert_eq!(pb.loop_sources("A"), ["D".to_string()]);
        assert_eq!(pb.branch_sources("B"), ["D".to_string()]);
        let order: Vec<&str> = pb.dependency_order().map(|(_, n)| n.id.as_str()).collect();
        assert_eq!(order, vec!["A", "D", "B"]);
    }

    #[test]
    fn mutual_branches_keep_the_first_as_forward() {
        let decision = |id: &str, to: &str| {
            json!({"id": id, "type": "decision", "outcomes": [{"value": "go", "next": [to]}]})
        };
        let pb = build(json!([{"id": "W1", "nodes": [decision("P", "Q"), decision("Q", "P")]}]))
            .unwrap();
        assert_eq!(pb.branch_sources("Q"), ["P".to_string()]);
        assert_eq!(pb.loop_sources("P"), ["Q".to_string()]);
        assert!(pb.branch_sources("P").is_empty());
    }

    #[test]
    fn self_branch_is_a_loop() {
        let pb = build(json!([{"id": "W1", "nodes": [
            {"id": "R", "type": "decision", "outcomes": [{"value": "again", "next": ["R"]}]}
        ]}]))
        .unwrap();
        assert_eq!(pb.loop_sources("R"), ["R".to_string()]);
        assert!(pb.branch_sources("R").is_empty());
    }

    #[test]
    fn dependency_order_respects_prerequisites_and_branches() {
        let pb = build(json!([
            {"id": "W1", "nodes": [
                waiting("late", &["mid"]),
                {"id": "X", "type": "waiting"},
                waiting("mid", &["root"]),
                {"id": "root", "type": "decision", "outcomes": [{"value": "go", "next": ["X"]}]}
            ]}
        ]))
        .unwrap();
        let order: Vec<&str> = pb.dependency_order().map(|(_, n)| n.id.as_str()).collect();
        assert_eq!(order, vec!["root", "X", "mid", "late"]);
        assert_eq!(pb.branch_sources("X"), ["root".to_string()]);
        assert!(pb.branch_sources("mid").is_empty());
    }
}
