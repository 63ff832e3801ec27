use std::collections::HashSet;

use serde::Serialize;

use milestone_types::NodeState;

use crate::graph::Playbook;
use crate::resolver::ResolvedView;

/// Completion counts for one visible world.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorldProgress {
    pub world_id: String,
    pub total: usize,
    pub done: usize,
}

impl WorldProgress {
    /// Fraction of visible nodes that are done; an empty world counts as complete.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.done as f64 / self.total as f64
        }
    }

    pub fn is_complete(&self) -> bool {
        self.done == self.total
    }
}

pub fn world_progress(view: &ResolvedView<'_>) -> Vec<WorldProgress> {
    view.worlds
        .iter()
        .map(|w| WorldProgress {
            world_id: w.id.to_string(),
            total: w.nodes.len(),
            done: w.nodes.iter().filter(|n| n.state == NodeState::Done).count(),
        })
        .collect()
}

/// Done and total counts across every visible node.
pub fn overall_progress(view: &ResolvedView<'_>) -> (usize, usize) {
    world_progress(view)
        .iter()
        .fold((0, 0), |(done, total), w| (done + w.done, total + w.total))
}

/// Nodes of `world_id` with no successor inside the same world.
pub fn terminal_nodes<'p>(playbook: &'p Playbook, world_id: &str) -> Vec<&'p str> {
    let Some(world) = playbook.world(world_id) else {
        return Vec::new();
    };
    let members: HashSet<&str> = world.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut has_successor: HashSet<&str> = HashSet::new();

    for node in &world.nodes {
        let mut successors = node
            .next
            .iter()
            .chain(node.outcomes.iter().flat_map(|o| o.next.iter()));
        if successors.any(|s| members.contains(s.as_str())) {
            has_successor.insert(node.id.as_str());
        }
        // A prerequisite also points forward to its dependent.
        for p in &node.prerequisites {
            if members.contains(p.as_str()) {
                has_successor.insert(p.as_str());
            }
        }
    }

    world
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| !has_successor.contains(id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::resolve;
    use milestone_playbook::parse_document;
    use milestone_types::{ProcessFlags, RawNodeState, RawStateMap};
    use serde_json::json;

    fn playbook() -> Playbook {
        let doc = json!({
            "playbook_id": "pb",
            "version": "1",
            "worlds": [
                {"id": "W1", "order": 1, "nodes": [
                    {"id": "A", "type": "waiting"},
                    {"id": "B", "type": "waiting", "prerequisites": ["A"]},
                    {"id": "C", "type": "waiting", "prerequisites": ["A"]}
                ]},
                {"id": "W2", "order": 2, "nodes": [
                    {"id": "D", "type": "waiting", "prerequisites": ["B", "C"]}
                ]}
            ]
        });
        Playbook::from_document(parse_document(&doc.to_string()).unwrap()).unwrap()
    }

    #[test]
    fn counts_done_per_world() {
        let pb = playbook();
        let mut raw = RawStateMap::new();
        raw.insert("A".into(), RawNodeState::new(NodeState::Done));
        raw.insert("B".into(), RawNodeState::new(NodeState::Done));
        let view = resolve(&pb, &raw, &ProcessFlags::new());

        let progress = world_progress(&view);
        assert_eq!(progress[0].world_id, "W1");
        assert_eq!((progress[0].done, progress[0].total), (2, 3));
        assert!((progress[0].ratio() - 2.0 / 3.0).abs() < f64::EPSILON);
        assert!(!progress[1].is_complete());
        assert_eq!(overall_progress(&view), (2, 4));
    }

    #[test]
    fn terminal_nodes_ignore_cross_world_successors() {
        let pb = playbook();
        assert_eq!(terminal_nodes(&pb, "W1"), vec!["B", "C"]);
        assert_eq!(terminal_nodes(&pb, "W2"), vec!["D"]);
        assert!(terminal_nodes(&pb, "W9").is_empty());
    }
}
