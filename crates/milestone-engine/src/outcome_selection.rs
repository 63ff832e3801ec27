//! Successor selection for a completed node.
//!
//! Outcomes are tried in declaration order and the first whose match expression
//! holds against the node's own submitted fields wins. Process flags are never
//! consulted; `node_id.field` paths may still read other nodes' submissions. Without a match the node's
//! `next` list applies; with neither the node is a terminal leaf.

use serde::Serialize;

use milestone_types::{FieldValues, MilestoneError, ProcessFlags, RawStateMap, Result};

use crate::condition::{evaluate_condition, EvalContext};
use crate::graph::{NodeDefinition, Outcome, Playbook};

/// The branch a node routes to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum Branch<'p> {
    Outcome {
        index: usize,
        value: &'p str,
        targets: &'p [String],
    },
    Default { targets: &'p [String] },
    Terminal,
}

impl<'p> Branch<'p> {
    pub fn targets(&self) -> &'p [String] {
        match self {
            Branch::Outcome { targets, .. } | Branch::Default { targets } => targets,
            Branch::Terminal => &[],
        }
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.targets().iter().any(|t| t == node_id)
    }

    pub fn is_terminal(&self) -> bool {
        self.targets().is_empty()
    }
}

/// Pick the branch of `node` under `ctx`. The context's own fields should be the
/// node's submitted values.
pub fn select_branch<'p>(node: &'p NodeDefinition, ctx: &EvalContext<'_>) -> Branch<'p> {
    let ctx = ctx.own_fields_only();
    if let Some((index, outcome)) = first_match(&node.outcomes, &ctx) {
        tracing::debug!(
            node = %node.id,
            outcome = %outcome.value,
            targets = ?outcome.next,
            "Outcome matched"
        );
        return Branch::Outcome {
            index,
            value: &outcome.value,
            targets: &outcome.next,
        };
    }

    if node.next.is_empty() {
        Branch::Terminal
    } else {
        Branch::Default {
            targets: &node.next,
        }
    }
}

fn first_match<'p>(outcomes: &'p [Outcome], ctx: &EvalContext<'_>) -> Option<(usize, &'p Outcome)> {
    outcomes
        .iter()
        .enumerate()
        .find(|(_, o)| evaluate_condition(&o.matcher, ctx))
}

/// Branch that `node_id` would take if completed with `submitted`, reading other
/// nodes' submissions from `raw`.
pub fn next_for_submission<'p>(
    playbook: &'p Playbook,
    node_id: &str,
    submitted: &FieldValues,
    raw: &RawStateMap,
) -> Result<Branch<'p>> {
    let node = playbook
        .node(node_id)
        .ok_or_else(|| MilestoneError::UnknownNode {
            node: node_id.to_string(),
        })?;
    let flags = ProcessFlags::new();
    let ctx = EvalContext::new(raw, &flags).with_own(Some(submitted));
    Ok(select_branch(node, &ctx))
}
