//! Load-time pipeline: parse, lint, then build the typed [`Playbook`].

use std::path::Path;

use milestone_playbook::{parse_document, read_document, SourceDocument};
use milestone_types::{MilestoneError, Result};

use crate::graph::Playbook;
use crate::validation::{validate, Diagnostic, Severity};

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Treat warning diagnostics as fatal.
    pub deny_warnings: bool,
}

/// A validated playbook plus the non-fatal diagnostics found while loading it.
#[derive(Debug)]
pub struct LoadedPlaybook {
    pub playbook: Playbook,
    pub diagnostics: Vec<Diagnostic>,
}

impl LoadedPlaybook {
    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }
}

fn is_fatal(diagnostic: &Diagnostic, options: &LoadOptions) -> bool {
    match diagnostic.severity {
        Severity::Error => true,
        Severity::Warning => options.deny_warnings,
        Severity::Info => false,
    }
}

/// Lint an already-parsed document and build its typed graph.
pub fn load_source(source: SourceDocument, options: &LoadOptions) -> Result<LoadedPlaybook> {
    let diagnostics = validate(&source.document);

    let mut fatal = Vec::new();
    for d in &diagnostics {
        match d.severity {
            Severity::Error => {
                tracing::error!(rule = %d.rule, node = ?d.node_id, "{}", d.message)
            }
            Severity::Warning => {
                tracing::warn!(rule = %d.rule, node = ?d.node_id, "{}", d.message)
            }
            Severity::Info => {
                tracing::debug!(rule = %d.rule, node = ?d.node_id, "{}", d.message)
            }
        }
        if is_fatal(d, options) {
            fatal.push(format!("{}: {}", d.rule, d.message));
        }
    }
    if !fatal.is_empty() {
        return Err(MilestoneError::DefinitionIntegrity(fatal.join("; ")));
    }

    let playbook = Playbook::from_document(source)?;
    tracing::info!(
        playbook = %playbook.id,
        version = %playbook.version,
        nodes = playbook.len(),
        diagnostics = diagnostics.len(),
        "Playbook ready"
    );
    Ok(LoadedPlaybook {
        playbook,
        diagnostics,
    })
}

/// Parse, lint, and build a playbook from JSON text.
pub fn load_playbook(source: &str, options: &LoadOptions) -> Result<LoadedPlaybook> {
    load_source(parse_document(source)?, options)
}

pub fn load_playbook_file(path: &Path, options: &LoadOptions) -> Result<LoadedPlaybook> {
    load_source(read_document(path)?, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source(nodes: serde_json::Value) -> String {
        json!({
            "playbook_id": "pb",
            "version": "1",
            "roles": [{"id": "student"}],
            "worlds": [{"id": "W1", "nodes": nodes}]
        })
        .to_string()
    }

    #[test]
    fn clean_playbook_loads() {
        let text = source(json!([
            {"id": "A", "type": "waiting", "who_can_complete": ["student"]},
            {"id": "B", "type": "waiting", "who_can_complete": ["student"], "prerequisites": ["A"]}
        ]));
        let loaded = load_playbook(&text, &LoadOptions::default()).unwrap();
        assert_eq!(loaded.playbook.len(), 2);
        assert_eq!(loaded.warnings().count(), 0);
    }

    #[test]
    fn lint_errors_are_collected_into_one_failure() {
        let text = source(json!([
            {"id": "A", "type": "waiting", "prerequisites": ["B"]},
            {"id": "B", "type": "waiting", "prerequisites": ["A"]},
            {"id": "C", "type": "waiting", "prerequisites": ["Missing"]}
        ]));
        let err = load_playbook(&text, &LoadOptions::default()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("prerequisite_cycle"), "{message}");
        assert!(message.contains("dangling_reference"), "{message}");
    }

    #[test]
    fn warnings_pass_unless_denied() {
        let text = source(json!([
            {"id": "A", "type": "waiting", "who_can_complete": ["dean"]}
        ]));
        let loaded = load_playbook(&text, &LoadOptions::default()).unwrap();
        assert_eq!(loaded.warnings().count(), 1);

        let strict = LoadOptions {
            deny_warnings: true,
        };
        assert!(load_playbook(&text, &strict).is_err());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = load_playbook("{\"playbook_id\": ", &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, MilestoneError::ParseError { .. }));
    }
}
