//! Loaded playbook versions.
//!
//! Several versions of one playbook may be registered at once (e.g. during a
//! migration window); exactly one of them is active for new journeys.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use milestone_types::{MilestoneError, Result};

use crate::graph::Playbook;

#[derive(Debug, Default)]
pub struct PlaybookRegistry {
    versions: BTreeMap<(String, String), Arc<Playbook>>,
    active: HashMap<String, String>,
}

impl PlaybookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a version. The first version of a playbook becomes active.
    ///
    /// Re-registering identical content is a no-op; the same `(id, version)`
    /// with a different checksum is rejected.
    pub fn register(&mut self, playbook: Playbook) -> Result<Arc<Playbook>> {
        let key = (playbook.id.clone(), playbook.version.clone());
        if let Some(existing) = self.versions.get(&key) {
            if existing.checksum == playbook.checksum {
                return Ok(Arc::clone(existing));
            }
            return Err(MilestoneError::DefinitionIntegrity(format!(
                "playbook '{}' version '{}' is already registered with checksum {}",
                key.0, key.1, existing.checksum
            )));
        }

        let playbook = Arc::new(playbook);
        self.active
            .entry(key.0.clone())
            .or_insert_with(|| key.1.clone());
        tracing::info!(
            playbook = %key.0,
            version = %key.1,
            checksum = %playbook.checksum,
            "Registered playbook version"
        );
        self.versions.insert(key, Arc::clone(&playbook));
        Ok(playbook)
    }

    /// Make `version` the active version of `playbook_id`.
    pub fn activate(&mut self, playbook_id: &str, version: &str) -> Result<()> {
        if !self
            .versions
            .contains_key(&(playbook_id.to_string(), version.to_string()))
        {
            return Err(MilestoneError::Other(format!(
                "playbook '{playbook_id}' has no version '{version}'"
            )));
        }
        let previous = self
            .active
            .insert(playbook_id.to_string(), version.to_string());
        tracing::info!(
            playbook = %playbook_id,
            version = %version,
            previous = ?previous,
            "Activated playbook version"
        );
        Ok(())
    }

    pub fn active(&self, playbook_id: &str) -> Option<Arc<Playbook>> {
        let version = self.active.get(playbook_id)?;
        self.get(playbook_id, version)
    }

    pub fn get(&self, playbook_id: &str, version: &str) -> Option<Arc<Playbook>> {
        self.versions
            .get(&(playbook_id.to_string(), version.to_string()))
            .cloned()
    }

    /// Registered versions of `playbook_id`, sorted.
    pub fn versions(&self, playbook_id: &str) -> Vec<&str> {
        self.versions
            .keys()
            .filter(|(id, _)| id == playbook_id)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Drop a version that is no longer active. Journeys holding its `Arc`
    /// keep working until they release it.
    pub fn retire(&mut self, playbook_id: &str, version: &str) -> Result<Arc<Playbook>> {
        if self.active.get(playbook_id).map(String::as_str) == Some(version) {
            return Err(MilestoneError::Other(format!(
                "cannot retire active version '{version}' of playbook '{playbook_id}'"
            )));
        }
        self.versions
            .remove(&(playbook_id.to_string(), version.to_string()))
            .ok_or_else(|| {
                MilestoneError::Other(format!(
                    "playbook '{playbook_id}' has no version '{version}'"
                ))
            })
    }
}
