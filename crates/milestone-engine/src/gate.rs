//! Actionability checks for the submission boundary.
//!
//! The engine never rejects a write itself; collaborators call these against a
//! fresh [`ResolvedView`] before accepting one.

use milestone_types::{FieldValues, MilestoneError, NodeState, Result};

use crate::graph::NodeKind;
use crate::resolver::{NodeView, ResolvedView};

fn visible_node<'v, 'p>(view: &'v ResolvedView<'p>, node_id: &str) -> Result<&'v NodeView<'p>> {
    if view.is_hidden(node_id) {
        return Err(MilestoneError::NodeHidden {
            node: node_id.to_string(),
        });
    }
    view.node(node_id).ok_or_else(|| MilestoneError::UnknownNode {
        node: node_id.to_string(),
    })
}

fn permitted(node: &NodeView<'_>, role: &str) -> Result<()> {
    if node.definition.can_complete(role) {
        Ok(())
    } else {
        Err(MilestoneError::RoleNotPermitted {
            node: node.id.to_string(),
            role: role.to_string(),
        })
    }
}

/// Whether `role` may open and work on `node_id` right now. Returns the
/// node's resolved state on success.
pub fn check_actionable(view: &ResolvedView<'_>, node_id: &str, role: &str) -> Result<NodeState> {
    let node = visible_node(view, node_id)?;
    if !node.state.is_actionable() {
        return Err(MilestoneError::NodeNotActionable {
            node: node_id.to_string(),
            state: node.state,
        });
    }
    permitted(node, role)?;
    Ok(node.state)
}

/// Whether `role` may move `node_id` from its resolved state to `target`.
pub fn check_transition(
    view: &ResolvedView<'_>,
    node_id: &str,
    role: &str,
    target: NodeState,
) -> Result<()> {
    let node = visible_node(view, node_id)?;
    if node.state == NodeState::Locked {
        return Err(MilestoneError::NodeNotActionable {
            node: node_id.to_string(),
            state: node.state,
        });
    }
    permitted(node, role)?;
    if !node.state.can_transition_to(target) {
        tracing::debug!(node = %node_id, from = %node.state, to = %target, "Rejected transition");
        return Err(MilestoneError::InvalidTransition {
            node: node_id.to_string(),
            from: node.state,
            to: target,
        });
    }
    Ok(())
}

/// [`check_transition`] plus readiness: moving a node to `Submitted` or
/// `Done` requires every required field and upload slot to be filled in
/// `submitted`. Gateways carry no input and are exempt.
pub fn check_submission(
    view: &ResolvedView<'_>,
    node_id: &str,
    role: &str,
    target: NodeState,
    submitted: &FieldValues,
) -> Result<()> {
    check_transition(view, node_id, role, target)?;
    if !matches!(target, NodeState::Submitted | NodeState::Done) {
        return Ok(());
    }
    let node = visible_node(view, node_id)?;
    if node.definition.kind == NodeKind::Gateway {
        return Ok(());
    }
    let missing = node.definition.requirements.missing(submitted);
    if missing.is_empty() {
        return Ok(());
    }
    tracing::debug!(node = %node_id, missing = ?missing, "Rejected incomplete submission");
    Err(MilestoneError::RequirementsNotMet {
        node: node_id.to_string(),
        missing: missing.into_iter().map(str::to_string).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Playbook;
    use crate::resolver::resolve;
    use milestone_playbook::parse_document;
    use milestone_types::{ProcessFlags, RawNodeState, RawStateMap};
    use serde_json::json;

    fn playbook() -> Playbook {
        let doc = json!({
            "playbook_id": "pb",
            "version": "1",
            "worlds": [{"id": "W1", "nodes": [
                {"id": "A", "type": "waiting", "who_can_complete": ["student"]},
                {"id": "B", "type": "waiting", "who_can_complete": ["advisor"], "prerequisites": ["A"]},
                {"id": "H", "type": "waiting", "who_can_complete": ["student"], "condition": "never_set"},
                {"id": "F", "type": "form", "who_can_complete": ["student"], "requirements": {"fields": [
                    {"key": "title", "required": true},
                    {"key": "consent", "type": "boolean", "required": true},
                    {"key": "notes"}
                ]}}
            ]}]
        });
        Playbook::from_document(parse_document(&doc.to_string()).unwrap()).unwrap()
    }

    fn states(entries: &[(&str, NodeState)]) -> RawStateMap {
        entries
            .iter()
            .map(|(id, s)| (id.to_string(), RawNodeState::new(*s)))
            .collect()
    }

    #[test]
    fn active_node_for_permitted_role() {
        let pb = playbook();
        let view = resolve(&pb, &RawStateMap::new(), &ProcessFlags::new());
        assert_eq!(check_actionable(&view, "A", "student").unwrap(), NodeState::Active);
    }

    #[test]
    fn locked_node_is_not_actionable() {
        let pb = playbook();
        let view = resolve(&pb, &RawStateMap::new(), &ProcessFlags::new());
        let err = check_actionable(&view, "B", "advisor").unwrap_err();
        assert!(matches!(
            err,
            MilestoneError::NodeNotActionable { state: NodeState::Locked, .. }
        ));
    }

    #[test]
    fn role_mismatch_is_rejected() {
        let pb = playbook();
        let view = resolve(&pb, &RawStateMap::new(), &ProcessFlags::new());
        let err = check_actionable(&view, "A", "advisor").unwrap_err();
        assert!(matches!(err, MilestoneError::RoleNotPermitted { .. }));
        assert_eq!(err.http_status(), Some(403));
    }

    #[test]
    fn hidden_and_unknown_nodes() {
        let pb = playbook();
        let view = resolve(&pb, &RawStateMap::new(), &ProcessFlags::new());
        assert!(matches!(
            check_actionable(&view, "H", "student"),
            Err(MilestoneError::NodeHidden { .. })
        ));
        assert!(matches!(
            check_actionable(&view, "Z", "student"),
            Err(MilestoneError::UnknownNode { .. })
        ));
    }

    #[test]
    fn needs_fixes_is_reopened_for_completer() {
        let pb = playbook();
        let view = resolve(&pb, &states(&[("A", NodeState::NeedsFixes)]), &ProcessFlags::new());
        assert_eq!(
            check_actionable(&view, "A", "student").unwrap(),
            NodeState::NeedsFixes
        );
        assert!(check_transition(&view, "A", "student", NodeState::Submitted).is_ok());
    }

    #[test]
    fn transitions_follow_lifecycle_table() {
        let pb = playbook();
        let view = resolve(&pb, &states(&[("A", NodeState::Submitted)]), &ProcessFlags::new());
        assert!(check_transition(&view, "A", "student", NodeState::Done).is_ok());
        let err = check_transition(&view, "A", "student", NodeState::Active).unwrap_err();
        assert!(matches!(
            err,
            MilestoneError::InvalidTransition {
                from: NodeState::Submitted,
                to: NodeState::Active,
                ..
            }
        ));

        let view = resolve(&pb, &states(&[("A", NodeState::Done)]), &ProcessFlags::new());
        assert!(check_transition(&view, "A", "student", NodeState::Submitted).is_err());
        assert!(check_transition(&view, "B", "advisor", NodeState::Submitted).is_ok());
    }

    #[test]
    fn submission_names_missing_required_inputs() {
        let pb = playbook();
        let view = resolve(&pb, &RawStateMap::new(), &ProcessFlags::new());
        let partial: FieldValues = [("title".to_string(), json!("Thesis"))].into_iter().collect();

        let err = check_submission(&view, "F", "student", NodeState::Submitted, &partial).unwrap_err();
        match &err {
            MilestoneError::RequirementsNotMet { node, missing } => {
                assert_eq!(node, "F");
                assert_eq!(missing, &vec!["consent".to_string()]);
            }
            other => panic!("expected RequirementsNotMet, got {other:?}"),
        }
        assert!(err.is_recoverable());

        let mut complete = partial.clone();
        complete.insert("consent".into(), json!(true));
        assert!(check_submission(&view, "F", "student", NodeState::Submitted, &complete).is_ok());
    }

    #[test]
    fn submission_still_checks_role_and_lifecycle_first() {
        let pb = playbook();
        let view = resolve(&pb, &RawStateMap::new(), &ProcessFlags::new());
        let empty = FieldValues::new();
        assert!(matches!(
            check_submission(&view, "F", "advisor", NodeState::Submitted, &empty),
            Err(MilestoneError::RoleNotPermitted { .. })
        ));
        assert!(check_submission(&view, "A", "student", NodeState::Submitted, &empty).is_ok());
    }
}
