//! Per-world edge lists for diagram rendering.
//!
//! Rendering is world-scoped while gating is global, so edges with an endpoint
//! outside the world are dropped here even though the resolver honors them.

use std::collections::HashSet;

use serde::Serialize;

use crate::graph::Playbook;
use crate::resolver::ResolvedView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Prerequisite → dependent.
    Default,
    /// Node carrying a visibility condition → its `next`.
    Conditional,
    /// Node → outcome target.
    Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

impl Edge {
    fn new(from: &str, to: &str, kind: EdgeKind) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            kind,
        }
    }
}

/// Edges of `world_id`. Unknown worlds yield an empty list.
pub fn edges_for_world(playbook: &Playbook, world_id: &str) -> Vec<Edge> {
    let Some(world) = playbook.world(world_id) else {
        return Vec::new();
    };
    let members: HashSet<&str> = world.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut seen = HashSet::new();
    let mut edges = Vec::new();
    let mut push = |edge: Edge| {
        if members.contains(edge.from.as_str())
            && members.contains(edge.to.as_str())
            && seen.insert(edge.clone())
        {
            edges.push(edge);
        }
    };

    for node in &world.nodes {
        for prerequisite in &node.prerequisites {
            push(Edge::new(prerequisite, &node.id, EdgeKind::Default));
        }
        for target in node.outcomes.iter().flat_map(|o| o.next.iter()) {
            push(Edge::new(&node.id, target, EdgeKind::Outcome));
        }
        if node.condition.is_some() {
            for target in &node.next {
                push(Edge::new(&node.id, target, EdgeKind::Conditional));
            }
        }
    }
    edges
}

/// Edges of `world_id` restricted to nodes visible in `view`.
pub fn visible_edges(playbook: &Playbook, view: &ResolvedView<'_>, world_id: &str) -> Vec<Edge> {
    if view.world(world_id).is_none() {
        return Vec::new();
    }
    edges_for_world(playbook, world_id)
        .into_iter()
        .filter(|e| !view.is_hidden(&e.from) && !view.is_hidden(&e.to))
        .collect()
}
