//! Shared types, errors, and lifecycle states for the milestone workflow engine.
//!
//! This crate provides the foundational types used across all other milestone crates:
//! - `MilestoneError`: unified error taxonomy
//! - `NodeState`: the resolved lifecycle tag of a node
//! - `RawNodeState`: the per-user submission record owned by the submission collaborator
//! - `RawStateMap`: the snapshot of raw states the resolver reads

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unified error type for all milestone subsystems.
#[derive(Debug, thiserror::Error)]
pub enum MilestoneError {
    // === Parser Errors ===
    #[error("Condition parse error at line {line}, col {col}: {message}")]
    ParseError {
        line: usize,
        col: usize,
        message: String,
        source_snippet: Option<String>,
    },

    // === Definition-integrity Errors (fatal, load time) ===
    #[error("Playbook definition rejected: {0}")]
    DefinitionIntegrity(String),

    #[error("Duplicate node id '{node}' (worlds '{first_world}' and '{second_world}')")]
    DuplicateNodeId {
        node: String,
        first_world: String,
        second_world: String,
    },

    // === Gating Errors (recoverable, caller facing) ===
    #[error("Node '{node}' does not exist in this playbook")]
    UnknownNode { node: String },

    #[error("Node '{node}' is hidden for this journey")]
    NodeHidden { node: String },

    #[error("Node '{node}' is not actionable in state '{state}'")]
    NodeNotActionable { node: String, state: NodeState },

    #[error("Role '{role}' may not complete node '{node}'")]
    RoleNotPermitted { node: String, role: String },

    #[error("Node '{node}' cannot move from '{from}' to '{to}'")]
    InvalidTransition {
        node: String,
        from: NodeState,
        to: NodeState,
    },

    #[error("Node '{node}' is missing required input: {}", missing.join(", "))]
    RequirementsNotMet { node: String, missing: Vec<String> },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl MilestoneError {
    /// Returns `true` for definition errors: the playbook version must not be served.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MilestoneError::ParseError { .. }
                | MilestoneError::DefinitionIntegrity(_)
                | MilestoneError::DuplicateNodeId { .. }
        )
    }

    /// Returns `true` if the caller can recover, e.g. by re-reading the view or switching role.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MilestoneError::UnknownNode { .. }
                | MilestoneError::NodeHidden { .. }
                | MilestoneError::NodeNotActionable { .. }
                | MilestoneError::RoleNotPermitted { .. }
                | MilestoneError::InvalidTransition { .. }
                | MilestoneError::RequirementsNotMet { .. }
        )
    }

    /// Maps the error to an HTTP status code for the submission boundary.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            MilestoneError::UnknownNode { .. } | MilestoneError::NodeHidden { .. } => Some(404),
            MilestoneError::NodeNotActionable { .. } | MilestoneError::InvalidTransition { .. } => {
                Some(409)
            }
            MilestoneError::RoleNotPermitted { .. } => Some(403),
            MilestoneError::ParseError { .. }
            | MilestoneError::DefinitionIntegrity(_)
            | MilestoneError::DuplicateNodeId { .. }
            | MilestoneError::RequirementsNotMet { .. } => Some(422),
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, MilestoneError>`.
pub type Result<T> = std::result::Result<T, MilestoneError>;

// ---------------------------------------------------------------------------
// NodeState: resolved lifecycle of a node
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Locked,
    Active,
    Submitted,
    Waiting,
    NeedsFixes,
    Done,
}

impl NodeState {
    pub const ALL: [NodeState; 6] = [
        NodeState::Locked,
        NodeState::Active,
        NodeState::Submitted,
        NodeState::Waiting,
        NodeState::NeedsFixes,
        NodeState::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Locked => "locked",
            NodeState::Active => "active",
            NodeState::Submitted => "submitted",
            NodeState::Waiting => "waiting",
            NodeState::NeedsFixes => "needs_fixes",
            NodeState::Done => "done",
        }
    }

    /// Persisted tags the resolver never overrides.
    pub fn is_authoritative(&self) -> bool {
        matches!(
            self,
            NodeState::Done | NodeState::Submitted | NodeState::Waiting | NodeState::NeedsFixes
        )
    }

    /// States in which an allowed completer may open and work on the node.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            NodeState::Active | NodeState::Waiting | NodeState::NeedsFixes
        )
    }

    /// Target states the submission collaborator may write from this state.
    pub fn allowed_transitions(&self) -> &'static [NodeState] {
        match self {
            NodeState::Locked => &[],
            NodeState::Active => &[NodeState::Submitted, NodeState::Waiting, NodeState::Done],
            NodeState::Submitted => &[NodeState::Waiting, NodeState::NeedsFixes, NodeState::Done],
            NodeState::Waiting => &[NodeState::Submitted, NodeState::NeedsFixes, NodeState::Done],
            NodeState::NeedsFixes => &[NodeState::Submitted, NodeState::Done],
            NodeState::Done => &[],
        }
    }

    pub fn can_transition_to(&self, next: NodeState) -> bool {
        self.allowed_transitions().contains(&next)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeState {
    type Err = MilestoneError;

    fn from_str(s: &str) -> Result<Self> {
        NodeState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s.trim())
            .ok_or_else(|| MilestoneError::Other(format!("unknown node state '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// RawNodeState: externally persisted submission record
// ---------------------------------------------------------------------------

/// Submitted field values of one node, keyed by field key.
pub type FieldValues = BTreeMap<String, serde_json::Value>;

/// Per-(user, node) record written by the submission collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNodeState {
    pub state: NodeState,
    #[serde(default, alias = "submittedFields")]
    pub submitted_fields: FieldValues,
    #[serde(default, alias = "submittedAt", skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl RawNodeState {
    pub fn new(state: NodeState) -> Self {
        Self {
            state,
            submitted_fields: FieldValues::new(),
            submitted_at: None,
        }
    }

    /// Builder-style helper to attach one submitted field.
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.submitted_fields.insert(key.into(), value);
        self
    }

    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.submitted_fields.get(key)
    }
}

/// Snapshot of raw states for one user, keyed by node id.
pub type RawStateMap = BTreeMap<String, RawNodeState>;

/// Named process flags supplied by the caller (e.g. `rp_required`).
pub type ProcessFlags = BTreeMap<String, serde_json::Value>;
