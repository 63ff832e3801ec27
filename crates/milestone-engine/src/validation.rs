//! Playbook validation: lint rules and diagnostics.
//!
//! Rules run over the raw [`PlaybookDocument`] so that one pass reports every
//! problem, not just the first. Call [`validate`] for advisory diagnostics or
//! [`validate_or_raise`] to reject a document with any `Error`-severity issue.

use std::collections::{BTreeSet, HashMap, HashSet};

use milestone_playbook::{parse_condition, NodeDoc, PlaybookDocument, WorldDoc};
use milestone_types::{MilestoneError, Result};

use crate::graph::typed_shape;
use crate::index::{cycle_members, loop_branches};

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub node_id: Option<String>,
    pub edge: Option<(String, String)>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        }
    }
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, doc: &PlaybookDocument) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn all_nodes(doc: &PlaybookDocument) -> impl Iterator<Item = (&WorldDoc, &NodeDoc)> {
    doc.worlds
        .iter()
        .flat_map(|w| w.nodes.iter().map(move |n| (w, n)))
}

fn node_ids(doc: &PlaybookDocument) -> HashSet<&str> {
    all_nodes(doc).map(|(_, n)| n.id.as_str()).collect()
}

fn outcome_targets(node: &NodeDoc) -> impl Iterator<Item = &String> {
    node.outcomes.iter().flat_map(|o| o.next.iter())
}

/// Outcome targets, plus `next` as the fallback branch when outcomes exist.
fn branch_targets(node: &NodeDoc) -> Vec<&str> {
    if node.outcomes.is_empty() {
        return Vec::new();
    }
    let mut targets: Vec<&str> = Vec::new();
    for t in outcome_targets(node).chain(node.next.iter()) {
        if !targets.contains(&t.as_str()) {
            targets.push(t.as_str());
        }
    }
    targets
}

/// Declared nodes with their prerequisites as declaration indices. Self
/// references and unknown ids are skipped; a duplicated id resolves to its
/// first declaration.
fn prerequisite_graph(doc: &PlaybookDocument) -> (Vec<&NodeDoc>, HashMap<&str, usize>, Vec<BTreeSet<usize>>) {
    let nodes: Vec<&NodeDoc> = all_nodes(doc).map(|(_, n)| n).collect();
    let mut rank: HashMap<&str, usize> = HashMap::new();
    for (i, node) in nodes.iter().enumerate() {
        rank.entry(node.id.as_str()).or_insert(i);
    }
    let deps = nodes
        .iter()
        .map(|node| {
            node.prerequisites
                .iter()
                .filter(|p| **p != node.id)
                .filter_map(|p| rank.get(p.as_str()).copied())
                .collect()
        })
        .collect();
    (nodes, rank, deps)
}

fn is_flag_name(reference: &str) -> bool {
    let trimmed = reference.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct DuplicateNodeIdRule;
impl LintRule for DuplicateNodeIdRule {
    fn name(&self) -> &str { "duplicate_node_id" }
    fn apply(&self, doc: &PlaybookDocument) -> Vec<Diagnostic> {
        let mut first_seen: HashMap<&str, &str> = HashMap::new();
        let mut diags = Vec::new();
        for (world, node) in all_nodes(doc) {
            if let Some(first_world) = first_seen.insert(&node.id, &world.id) {
                diags.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Error,
                    message: format!(
                        "Node id '{}' is declared in world '{}' and again in '{}'",
                        node.id, first_world, world.id
                    ),
                    node_id: Some(node.id.clone()),
                    edge: None,
                    fix: Some("Give every node a playbook-wide unique id".into()),
                });
            }
        }
        let mut worlds = HashSet::new();
        for world in &doc.worlds {
            if !worlds.insert(world.id.as_str()) {
                diags.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Error,
                    message: format!("World id '{}' is declared more than once", world.id),
                    node_id: None,
                    edge: None,
                    fix: None,
                });
            }
        }
        diags
    }
}

struct DanglingReferenceRule;
impl LintRule for DanglingReferenceRule {
    fn name(&self) -> &str { "dangling_reference" }
    fn apply(&self, doc: &PlaybookDocument) -> Vec<Diagnostic> {
        let ids = node_ids(doc);
        let mut diags = Vec::new();
        for (_, node) in all_nodes(doc) {
            let references = node
                .prerequisites
                .iter()
                .map(|p| ("prerequisite", p.as_str(), (p.clone(), node.id.clone())))
                .chain(node.next.iter().map(|n| ("next", n.as_str(), (node.id.clone(), n.clone()))))
                .chain(
                    outcome_targets(node)
                        .map(|t| ("outcome target", t.as_str(), (node.id.clone(), t.clone()))),
                );
            for (what, target, edge) in references {
                if !ids.contains(target) {
                    diags.push(Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Error,
                        message: format!(
                            "Node '{}' has {what} '{target}' which does not exist",
                            node.id
                        ),
                        node_id: Some(node.id.clone()),
                        edge: Some(edge),
                        fix: Some(format!("Declare node '{target}' or remove the reference")),
                    });
                }
            }
        }
        diags
    }
}

struct PrerequisiteCycleRule;
impl LintRule for PrerequisiteCycleRule {
    fn name(&self) -> &str { "prerequisite_cycle" }
    fn apply(&self, doc: &PlaybookDocument) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for (_, node) in all_nodes(doc) {
            if node.prerequisites.contains(&node.id) {
                diags.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Error,
                    message: format!("Node '{}' lists itself as a prerequisite", node.id),
                    node_id: Some(node.id.clone()),
                    edge: Some((node.id.clone(), node.id.clone())),
                    fix: None,
                });
            }
        }

        let (nodes, _, deps) = prerequisite_graph(doc);
        let stuck: Vec<&str> = cycle_members(&deps)
            .into_iter()
            .map(|i| nodes[i].id.as_str())
            .collect();
        if !stuck.is_empty() {
            diags.push(Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("Prerequisite cycle among nodes: {}", stuck.join(", ")),
                node_id: stuck.first().map(|s| s.to_string()),
                edge: None,
                fix: Some("Remove one prerequisite edge so the chain is acyclic".into()),
            });
        }
        diags
    }
}

struct BranchLoopRule;
impl LintRule for BranchLoopRule {
    fn name(&self) -> &str { "branch_loop" }
    fn apply(&self, doc: &PlaybookDocument) -> Vec<Diagnostic> {
        let (nodes, rank, deps) = prerequisite_graph(doc);
        if !cycle_members(&deps).is_empty() {
            return vec![]; // prerequisite_cycle reports this one
        }
        let branches: Vec<(usize, usize)> = nodes
            .iter()
            .enumerate()
            .flat_map(|(i, node)| {
                branch_targets(node)
                    .into_iter()
                    .filter_map(|t| rank.get(t).copied())
                    .map(move |t| (i, t))
                    .collect::<Vec<_>>()
            })
            .collect();
        branches
            .iter()
            .zip(loop_branches(&deps, &branches))
            .filter(|(_, is_loop)| *is_loop)
            .map(|(&(source, target), _)| {
                let (source, target) = (&nodes[source].id, &nodes[target].id);
                Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Info,
                    message: format!(
                        "Node '{source}' branches back to '{target}'; the target reopens only when its state is reset"
                    ),
                    node_id: Some(source.clone()),
                    edge: Some((source.clone(), target.clone())),
                    fix: None,
                }
            })
            .collect()
    }
}

struct ConditionSyntaxRule;
impl ConditionSyntaxRule {
    fn check(&self, source: &str, location: String, node_id: Option<&str>) -> Option<Diagnostic> {
        let err = parse_condition(source).err()?;
        Some(Diagnostic {
            rule: self.name().into(),
            severity: Severity::Error,
            message: format!("{location} has invalid condition '{source}': {err}"),
            node_id: node_id.map(String::from),
            edge: None,
            fix: Some("Fix the condition expression syntax".into()),
        })
    }
}
impl LintRule for ConditionSyntaxRule {
    fn name(&self) -> &str { "condition_syntax" }
    fn apply(&self, doc: &PlaybookDocument) -> Vec<Diagnostic> {
        let table: HashSet<&str> = doc.conditions.iter().map(|c| c.id.as_str()).collect();
        let mut diags = Vec::new();

        let mut declared = HashSet::new();
        for cond in &doc.conditions {
            if !declared.insert(cond.id.as_str()) {
                diags.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Error,
                    message: format!("Condition id '{}' is declared more than once", cond.id),
                    node_id: None,
                    edge: None,
                    fix: None,
                });
            }
            diags.extend(self.check(&cond.expr, format!("Condition '{}'", cond.id), None));
        }
        for world in &doc.worlds {
            if let Some(c) = world.condition.as_deref() {
                if !table.contains(c.trim()) {
                    diags.extend(self.check(c, format!("World '{}'", world.id), None));
                }
            }
        }
        for (_, node) in all_nodes(doc) {
            if let Some(c) = node.condition.as_deref() {
                if !table.contains(c.trim()) {
                    diags.extend(self.check(c, format!("Node '{}'", node.id), Some(&node.id)));
                }
            }
            for outcome in &node.outcomes {
                if let Some(when) = outcome.when.as_deref() {
                    diags.extend(self.check(
                        when,
                        format!("Outcome '{}' of node '{}'", outcome.value, node.id),
                        Some(&node.id),
                    ));
                }
            }
        }
        diags
    }
}

struct RequirementsShapeRule;
impl LintRule for RequirementsShapeRule {
    fn name(&self) -> &str { "requirements_shape" }
    fn apply(&self, doc: &PlaybookDocument) -> Vec<Diagnostic> {
        all_nodes(doc)
            .filter_map(|(_, node)| {
                let err = typed_shape(node).err()?;
                let message = match err {
                    MilestoneError::DefinitionIntegrity(m) => m,
                    other => other.to_string(),
                };
                Some(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Error,
                    message,
                    node_id: Some(node.id.clone()),
                    edge: None,
                    fix: Some(
                        "Match the node's requirements to its type (form, upload, decision, \
                         meeting, waiting, external, boss, gateway)"
                            .into(),
                    ),
                })
            })
            .collect()
    }
}

struct UnknownWorldConditionRule;
impl LintRule for UnknownWorldConditionRule {
    fn name(&self) -> &str { "unknown_world_condition" }
    fn apply(&self, doc: &PlaybookDocument) -> Vec<Diagnostic> {
        let table: HashSet<&str> = doc.conditions.iter().map(|c| c.id.as_str()).collect();
        let world_refs = doc
            .worlds
            .iter()
            .filter_map(|w| Some((format!("World '{}'", w.id), None, w.condition.as_deref()?)));
        let node_refs = all_nodes(doc).filter_map(|(_, n)| {
            Some((format!("Node '{}'", n.id), Some(n.id.clone()), n.condition.as_deref()?))
        });

        world_refs
            .chain(node_refs)
            .filter(|(_, _, reference)| is_flag_name(reference) && !table.contains(reference.trim()))
            .map(|(owner, node_id, reference)| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!(
                    "{owner} condition '{reference}' is not in the conditions table; \
                     it will be read as a process flag"
                ),
                node_id,
                edge: None,
                fix: Some(format!("Add a condition with id '{reference}' or supply the flag")),
            })
            .collect()
    }
}

struct CompleterRoleDeclaredRule;
impl LintRule for CompleterRoleDeclaredRule {
    fn name(&self) -> &str { "completer_role_declared" }
    fn apply(&self, doc: &PlaybookDocument) -> Vec<Diagnostic> {
        if doc.roles.is_empty() {
            return vec![];
        }
        let roles: HashSet<&str> = doc.roles.iter().map(|r| r.id.as_str()).collect();
        all_nodes(doc)
            .flat_map(|(_, node)| {
                node.who_can_complete
                    .iter()
                    .filter(|r| !roles.contains(r.as_str()))
                    .map(move |role| Diagnostic {
                        rule: "completer_role_declared".into(),
                        severity: Severity::Warning,
                        message: format!(
                            "Node '{}' can be completed by undeclared role '{role}'",
                            node.id
                        ),
                        node_id: Some(node.id.clone()),
                        edge: None,
                        fix: Some(format!("Declare role '{role}' in roles[]")),
                    })
            })
            .collect()
    }
}

const NODE_ID_PATTERN: &str = r"^[A-Za-z][A-Za-z0-9_]*$";

struct NodeIdFormatRule;
impl LintRule for NodeIdFormatRule {
    fn name(&self) -> &str { "node_id_format" }
    fn apply(&self, doc: &PlaybookDocument) -> Vec<Diagnostic> {
        let Ok(re) = regex::Regex::new(NODE_ID_PATTERN) else {
            return vec![];
        };
        all_nodes(doc)
            .filter(|(_, n)| !re.is_match(&n.id))
            .map(|(_, n)| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!(
                    "Node id '{}' is not a plain identifier; it cannot be used in `node.field` conditions",
                    n.id
                ),
                node_id: Some(n.id.clone()),
                edge: None,
                fix: Some("Use letters, digits and underscores, starting with a letter".into()),
            })
            .collect()
    }
}

struct UnreachableOutcomeRule;
impl LintRule for UnreachableOutcomeRule {
    fn name(&self) -> &str { "unreachable_outcome" }
    fn apply(&self, doc: &PlaybookDocument) -> Vec<Diagnostic> {
        all_nodes(doc)
            .flat_map(|(_, node)| {
                node.outcomes
                    .iter()
                    .filter(|o| o.next.is_empty())
                    .map(move |o| Diagnostic {
                        rule: "unreachable_outcome".into(),
                        severity: Severity::Info,
                        message: format!(
                            "Outcome '{}' of node '{}' has no targets; choosing it ends the journey",
                            o.value, node.id
                        ),
                        node_id: Some(node.id.clone()),
                        edge: None,
                        fix: None,
                    })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run all built-in lint rules and return every diagnostic.
pub fn validate(doc: &PlaybookDocument) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(DuplicateNodeIdRule),
        Box::new(DanglingReferenceRule),
        Box::new(PrerequisiteCycleRule),
        Box::new(BranchLoopRule),
        Box::new(ConditionSyntaxRule),
        Box::new(RequirementsShapeRule),
        Box::new(UnknownWorldConditionRule),
        Box::new(CompleterRoleDeclaredRule),
        Box::new(NodeIdFormatRule),
        Box::new(UnreachableOutcomeRule),
    ];

    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(doc));
    }
    diagnostics
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(doc: &PlaybookDocument) -> Result<Vec<Diagnostic>> {
    let diagnostics = validate(doc);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();
    if !errors.is_empty() {
        let messages: Vec<_> = errors.iter().map(|d| d.message.clone()).collect();
        return Err(MilestoneError::DefinitionIntegrity(messages.join("; ")));
    }
    Ok(diagnostics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
