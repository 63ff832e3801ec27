//! Milestone workflow engine.
//!
//! Turns an authored playbook into an indexed graph of worlds and nodes, then
//! answers three questions for a journey: which state every node is in
//! ([`resolve`]), which connectors to draw between a world's nodes
//! ([`edges_for_world`]), and which branch a submitted node leads to
//! ([`select_branch`]). All of them are pure functions over the playbook, the
//! persisted raw node states and the process flags.

pub mod condition;
pub mod edges;
pub mod events;
pub mod gate;
pub mod graph;
pub mod index;
pub mod load;
pub mod outcome_selection;
pub mod progress;
pub mod registry;
pub mod resolver;
pub mod validation;

pub use condition::{evaluate_condition, is_truthy, EvalContext};
pub use edges::{edges_for_world, visible_edges, Edge, EdgeKind};
pub use events::{diff_views, EventEmitter, JourneyEvent};
pub use gate::{check_actionable, check_submission, check_transition};
pub use graph::{
    FieldSpec, FieldType, NamedCondition, NodeDefinition, NodeKind, Outcome, Playbook,
    Requirements, Role, Timer, UploadSlot, Validation, VisibilityCondition, World,
};
pub use index::{NodeLocation, PlaybookIndex};
pub use load::{load_playbook, load_playbook_file, load_source, LoadOptions, LoadedPlaybook};
pub use outcome_selection::{next_for_submission, select_branch, Branch};
pub use progress::{overall_progress, terminal_nodes, world_progress, WorldProgress};
pub use registry::PlaybookRegistry;
pub use resolver::{resolve, NodeView, ResolvedView, WorldView};
pub use validation::{validate, validate_or_raise, Diagnostic, LintRule, Severity};
