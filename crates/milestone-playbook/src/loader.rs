use std::path::Path;

use sha2::{Digest, Sha256};

use milestone_types::{MilestoneError, Result};

use crate::document::PlaybookDocument;

/// A parsed playbook document together with the checksum of its source bytes.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub document: PlaybookDocument,
    /// Lowercase hex sha256 of the exact bytes the document was parsed from.
    pub checksum: String,
}

/// Hex-encoded sha256 of `bytes`.
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Parse a playbook document from JSON text.
pub fn parse_document(source: &str) -> Result<SourceDocument> {
    let document: PlaybookDocument = serde_json::from_str(source).map_err(|e| {
        MilestoneError::ParseError {
            line: e.line(),
            col: e.column(),
            message: format!("invalid playbook JSON: {e}"),
            source_snippet: source
                .lines()
                .nth(e.line().saturating_sub(1))
                .map(|l| l.chars().take(40).collect()),
        }
    })?;

    if document.playbook_id.trim().is_empty() {
        return Err(MilestoneError::DefinitionIntegrity(
            "playbook_id must not be empty".into(),
        ));
    }
    if document.version.trim().is_empty() {
        return Err(MilestoneError::DefinitionIntegrity(
            "version must not be empty".into(),
        ));
    }

    let checksum = checksum(source.as_bytes());
    tracing::debug!(
        playbook = %document.playbook_id,
        version = %document.version,
        worlds = document.worlds.len(),
        checksum = %checksum,
        "Parsed playbook document"
    );

    Ok(SourceDocument { document, checksum })
}

/// Read and parse a playbook document from disk.
pub fn read_document(path: &Path) -> Result<SourceDocument> {
    let source = std::fs::read_to_string(path)?;
    let parsed = parse_document(&source)?;
    tracing::info!(
        path = %path.display(),
        playbook = %parsed.document.playbook_id,
        version = %parsed.document.version,
        "Loaded playbook"
    );
    Ok(parsed)
}
