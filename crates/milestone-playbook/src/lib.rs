//! Playbook documents for the milestone workflow engine.
//!
//! Deserializes the authored JSON schema into [`PlaybookDocument`], computes the
//! content checksum that identifies a playbook version, and parses the small
//! condition language used by phase, node, and outcome conditions.
//!
//! # Example
//! ```
//! let expr = milestone_playbook::parse_condition("flag == \"X\" && rp_required").unwrap();
//! assert_eq!(expr.paths().len(), 2);
//! ```

pub mod document;
pub mod expr;
mod loader;

pub use document::*;
pub use expr::{parse_condition, ConditionExpr, FieldPath, Literal, Operator};
pub use loader::{checksum, parse_document, read_document, SourceDocument};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_with_outcomes_and_conditions() {
        let source = r#"{
            "playbook_id": "phd",
            "version": "v3",
            "locale_default": "ru",
            "conditions": [
                {"id": "rp_required", "expr": "S1_profile.years_since_graduation == \"more_than_3\""}
            ],
            "worlds": [
                {
                    "id": "W1",
                    "order": 1,
                    "nodes": [
                        {
                            "id": "S3",
                            "type": "decision",
                            "outcomes": [
                                {"value": "X", "next": ["S4"]},
                                {"value": "Y", "when": "flag == Y", "next": ["S5"]}
                            ]
                        },
                        {"id": "S4", "type": "form"},
                        {"id": "S5", "type": "form"}
                    ]
                }
            ]
        }"#;
        let parsed = parse_document(source).unwrap();
        let doc = &parsed.document;
        assert_eq!(doc.locale_default.as_deref(), Some("ru"));
        assert_eq!(doc.conditions[0].id, "rp_required");
        let s3 = &doc.worlds[0].nodes[0];
        assert_eq!(s3.outcomes.len(), 2);
        assert_eq!(s3.outcomes[1].when.as_deref(), Some("flag == Y"));

        for cond in &doc.conditions {
            parse_condition(&cond.expr).unwrap();
        }
    }
}
