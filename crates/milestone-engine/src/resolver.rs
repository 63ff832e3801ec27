//! State resolution: definition + raw submission snapshot → view model.
//!
//! A single pass over [`Playbook::dependency_order`] computes every node's state:
//!
//! 1. A node whose own or whose world's visibility condition is false is hidden.
//!    Hidden nodes are left out of the view and count as satisfied for anything
//!    that depends on them.
//! 2. A persisted `done`, `submitted`, `waiting` or `needs_fixes` is kept as is.
//! 3. Otherwise the node is `active` when every visible prerequisite is `done`
//!    and, if other nodes branch to it, one visible branch source is `done` and
//!    routed here. A gateway in that position passes straight through to `done`.
//! 4. Everything else is `locked`.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use milestone_playbook::{pick_locale, LocalizedText};
use milestone_types::{NodeState, ProcessFlags, RawStateMap};

use crate::condition::{evaluate_condition, EvalContext};
use crate::graph::{NodeDefinition, NodeKind, Playbook, VisibilityCondition, World};
use crate::outcome_selection::select_branch;

/// The resolved view of one journey through a playbook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedView<'p> {
    pub playbook_id: &'p str,
    pub version: &'p str,
    /// Visible worlds, by display order.
    pub worlds: Vec<WorldView<'p>>,
    #[serde(skip)]
    states: BTreeMap<&'p str, NodeState>,
    #[serde(skip)]
    hidden: BTreeSet<&'p str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorldView<'p> {
    pub id: &'p str,
    pub order: i32,
    pub title: &'p LocalizedText,
    pub nodes: Vec<NodeView<'p>>,
}

/// A node definition annotated with its resolved state and owning world.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeView<'p> {
    pub id: &'p str,
    pub world_id: &'p str,
    pub kind: NodeKind,
    pub state: NodeState,
    #[serde(skip)]
    pub definition: &'p NodeDefinition,
}

impl<'p> ResolvedView<'p> {
    /// Resolved state of a visible node.
    pub fn state_of(&self, node_id: &str) -> Option<NodeState> {
        self.states.get(node_id).copied()
    }

    /// Every visible node with its state, sorted by node id.
    pub fn states(&self) -> impl Iterator<Item = (&'p str, NodeState)> + '_ {
        self.states.iter().map(|(id, state)| (*id, *state))
    }

    pub fn is_hidden(&self, node_id: &str) -> bool {
        self.hidden.contains(node_id)
    }

    pub fn hidden_nodes(&self) -> impl Iterator<Item = &'p str> + '_ {
        self.hidden.iter().copied()
    }

    pub fn world(&self, world_id: &str) -> Option<&WorldView<'p>> {
        self.worlds.iter().find(|w| w.id == world_id)
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeView<'p>> {
        self.nodes().find(|n| n.id == node_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeView<'p>> {
        self.worlds.iter().flat_map(|w| w.nodes.iter())
    }

    /// Visible nodes currently in `state`.
    pub fn in_state(&self, state: NodeState) -> impl Iterator<Item = &NodeView<'p>> {
        self.nodes().filter(move |n| n.state == state)
    }
}

impl<'p> WorldView<'p> {
    pub fn title_in(&self, locale: &str) -> &'p str {
        pick_locale(self.title, locale).unwrap_or(self.id)
    }
}

impl<'p> NodeView<'p> {
    pub fn title_in(&self, locale: &str) -> &'p str {
        pick_locale(&self.definition.title, locale).unwrap_or(self.id)
    }
}

fn visible(condition: Option<&VisibilityCondition>, ctx: &EvalContext<'_>) -> bool {
    condition.map_or(true, |c| evaluate_condition(&c.expr, ctx))
}

fn hidden_nodes<'p>(playbook: &'p Playbook, ctx: &EvalContext<'_>) -> BTreeSet<&'p str> {
    let mut hidden = BTreeSet::new();
    for world in playbook.worlds() {
        let world_visible = visible(world.condition.as_ref(), ctx);
        if !world_visible {
            tracing::debug!(world = %world.id, "World hidden by condition");
        }
        for node in &world.nodes {
            if !world_visible || !visible(node.condition.as_ref(), ctx) {
                hidden.insert(node.id.as_str());
            }
        }
    }
    hidden
}

/// Resolve every node of `playbook` against one user's raw states and process flags.
///
/// Pure: the same inputs always yield the same view.
pub fn resolve<'p>(
    playbook: &'p Playbook,
    raw: &RawStateMap,
    flags: &ProcessFlags,
) -> ResolvedView<'p> {
    let ctx = EvalContext::new(raw, flags);
    let hidden = hidden_nodes(playbook, &ctx);
    let mut states: BTreeMap<&'p str, NodeState> = BTreeMap::new();

    for (_, node) in playbook.dependency_order() {
        if hidden.contains(node.id.as_str()) {
            continue;
        }
        let state = resolve_node(playbook, node, raw, &ctx, &hidden, &states);
        states.insert(node.id.as_str(), state);
    }

    let worlds = playbook
        .worlds()
        .iter()
        .filter(|w| visible(w.condition.as_ref(), &ctx))
        .map(|w| world_view(w, &states))
        .collect();

    tracing::debug!(
        playbook = %playbook.id,
        resolved = states.len(),
        hidden = hidden.len(),
        "Resolved journey"
    );

    ResolvedView {
        playbook_id: &playbook.id,
        version: &playbook.version,
        worlds,
        states,
        hidden,
    }
}

fn world_view<'p>(world: &'p World, states: &BTreeMap<&'p str, NodeState>) -> WorldView<'p> {
    WorldView {
        id: &world.id,
        order: world.order,
        title: &world.title,
        nodes: world
            .nodes
            .iter()
            .filter_map(|n| {
                states.get(n.id.as_str()).map(|&state| NodeView {
                    id: &n.id,
                    world_id: &world.id,
                    kind: n.kind,
                    state,
                    definition: n,
                })
            })
            .collect(),
    }
}

fn resolve_node(
    playbook: &Playbook,
    node: &NodeDefinition,
    raw: &RawStateMap,
    ctx: &EvalContext<'_>,
    hidden: &BTreeSet<&str>,
    states: &BTreeMap<&str, NodeState>,
) -> NodeState {
    if let Some(persisted) = raw.get(&node.id).map(|r| r.state) {
        if persisted.is_authoritative() {
            return persisted;
        }
    }

    let done = |id: &str| hidden.contains(id) || states.get(id) == Some(&NodeState::Done);

    if !node.prerequisites.iter().all(|p| done(p.as_str())) {
        return NodeState::Locked;
    }

    let sources: Vec<&str> = playbook
        .branch_sources(&node.id)
        .iter()
        .map(String::as_str)
        .filter(|s| !hidden.contains(s))
        .collect();
    if !sources.is_empty() {
        let routed_here = sources.iter().any(|source_id| {
            states.get(source_id) == Some(&NodeState::Done)
                && playbook.node(source_id).is_some_and(|source| {
                    let own = raw.get(*source_id).map(|r| &r.submitted_fields);
                    select_branch(source, &ctx.with_own(own)).contains(&node.id)
                })
        });
        if !routed_here {
            return NodeState::Locked;
        }
    }

    if node.kind == NodeKind::Gateway {
        NodeState::Done
    } else {
        NodeState::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use milestone_playbook::parse_document;
    use milestone_types::RawNodeState;
    use serde_json::json;

    fn build(doc: serde_json::Value) -> Playbook {
        Playbook::from_document(parse_document(&doc.to_string()).unwrap()).unwrap()
    }

    fn raw(entries: &[(&str, NodeState)]) -> RawStateMap {
        entries
            .iter()
            .map(|(id, s)| (id.to_string(), RawNodeState::new(*s)))
            .collect()
    }

    fn chain() -> Playbook {
        build(json!({
            "playbook_id": "pb",
            "version": "1",
            "worlds": [{"id": "W1", "nodes": [
                {"id": "A", "type": "waiting"},
                {"id": "B", "type": "waiting", "prerequisites": ["A"]},
                {"id": "C", "type": "waiting", "prerequisites": ["B"]}
            ]}]
        }))
    }

    #[test]
    fn empty_state_activates_roots_only() {
        let pb = chain();
        let view = resolve(&pb, &RawStateMap::new(), &ProcessFlags::new());
        assert_eq!(view.state_of("A"), Some(NodeState::Active));
        assert_eq!(view.state_of("B"), Some(NodeState::Locked));
        assert_eq!(view.state_of("C"), Some(NodeState::Locked));
    }

    #[test]
    fn needs_fixes_keeps_descendants_locked() {
        let pb = chain();
        let view = resolve(
            &pb,
            &raw(&[("A", NodeState::Done), ("B", NodeState::NeedsFixes)]),
            &ProcessFlags::new(),
        );
        assert_eq!(view.state_of("B"), Some(NodeState::NeedsFixes));
        assert_eq!(view.state_of("C"), Some(NodeState::Locked));
    }

    #[test]
    fn persisted_active_and_locked_are_recomputed() {
        let pb = chain();
        let view = resolve(
            &pb,
            &raw(&[("A", NodeState::Locked), ("B", NodeState::Active)]),
            &ProcessFlags::new(),
        );
        assert_eq!(view.state_of("A"), Some(NodeState::Active));
        assert_eq!(view.state_of("B"), Some(NodeState::Locked));
    }

    #[test]
    fn explicit_state_is_never_overridden() {
        let pb = chain();
        let view = resolve(&pb, &raw(&[("C", NodeState::Done)]), &ProcessFlags::new());
        assert_eq!(view.state_of("C"), Some(NodeState::Done));
        assert_eq!(view.state_of("B"), Some(NodeState::Locked));
    }

    #[test]
    fn world_condition_hides_whole_world() {
        let pb = build(json!({
            "playbook_id": "pb",
            "version": "1",
            "worlds": [
                {"id": "W1", "order": 1, "nodes": [{"id": "A", "type": "waiting"}]},
                {"id": "W3", "order": 3, "condition": "rp_required", "nodes": [
                    {"id": "R", "type": "waiting", "prerequisites": ["A"]}
                ]},
                {"id": "W4", "order": 4, "nodes": [
                    {"id": "Z", "type": "waiting", "prerequisites": ["R"]}
                ]}
            ]
        }));
        let states = raw(&[("A", NodeState::Done)]);

        let view = resolve(&pb, &states, &ProcessFlags::new());
        assert!(view.world("W3").is_none());
        assert!(view.is_hidden("R"));
        assert_eq!(view.state_of("R"), None);
        assert_eq!(view.state_of("Z"), Some(NodeState::Active));

        let mut flags = ProcessFlags::new();
        flags.insert("rp_required".into(), json!(true));
        let view = resolve(&pb, &states, &flags);
        assert_eq!(view.state_of("R"), Some(NodeState::Active));
        assert_eq!(view.state_of("Z"), Some(NodeState::Locked));
    }

    #[test]
    fn gateway_passes_through_to_selected_branch() {
        let pb = build(json!({
            "playbook_id": "pb",
            "version": "1",
            "worlds": [{"id": "W1", "nodes": [
                {"id": "A", "type": "waiting"},
                {"id": "G", "type": "gateway", "prerequisites": ["A"],
                 "outcomes": [{"value": "rp", "when": "rp_required", "next": ["R"]}],
                 "next": ["N"]},
                {"id": "R", "type": "waiting"},
                {"id": "N", "type": "waiting"}
            ]}]
        }));

        let before = resolve(&pb, &RawStateMap::new(), &ProcessFlags::new());
        assert_eq!(before.state_of("G"), Some(NodeState::Locked));

        let states = raw(&[("A", NodeState::Done)]);
        let view = resolve(&pb, &states, &ProcessFlags::new());
        assert_eq!(view.state_of("G"), Some(NodeState::Done));
        assert_eq!(view.state_of("N"), Some(NodeState::Active));
        assert_eq!(view.state_of("R"), Some(NodeState::Locked));

        let mut flags = ProcessFlags::new();
        flags.insert("rp_required".into(), json!(true));
        let view = resolve(&pb, &states, &flags);
        assert_eq!(view.state_of("R"), Some(NodeState::Active));
        assert_eq!(view.state_of("N"), Some(NodeState::Locked));
    }

    #[test]
    fn view_keeps_world_and_declaration_order() {
        let pb = build(json!({
            "playbook_id": "pb",
            "version": "1",
            "worlds": [
                {"id": "W2", "order": 2, "nodes": [{"id": "C", "type": "waiting"}]},
                {"id": "W1", "order": 1, "nodes": [
                    {"id": "B", "type": "waiting"},
                    {"id": "A", "type": "waiting"}
                ]}
            ]
        }));
        let view = resolve(&pb, &RawStateMap::new(), &ProcessFlags::new());
        let ids: Vec<_> = view.nodes().map(|n| (n.world_id, n.id)).collect();
        assert_eq!(ids, vec![("W1", "B"), ("W1", "A"), ("W2", "C")]);
    }

    #[test]
    fn view_serializes_states() {
        let pb = chain();
        let view = resolve(&pb, &raw(&[("A", NodeState::Done)]), &ProcessFlags::new());
        let value = serde_json::to_value(&view).unwrap();
        assert_eq!(value["worlds"][0]["nodes"][1]["state"], json!("active"));
        assert_eq!(value["worlds"][0]["nodes"][1]["kind"], json!("waiting"));
    }
}
