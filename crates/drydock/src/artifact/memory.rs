use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{check_key, Artifact, ArtifactStore, Payload, Result};
use crate::error::ArtifactError;

/// In-memory artifact store backed by a `BTreeMap<key, Artifact>`.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    entries: Mutex<BTreeMap<String, Artifact>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Artifact>> {
        // Entries are only ever inserted whole, so a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn put(&self, key: &str, payload: Payload) -> Result<()> {
        check_key(key)?;
        match self.lock().entry(key.to_string()) {
            Entry::Occupied(_) => Err(ArtifactError::DuplicateKey(key.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Artifact::new(payload));
                Ok(())
            }
        }
    }

    fn get(&self, key: &str) -> Result<Artifact> {
        self.lock()
            .get(key)
            .cloned()
            .ok_or_else(|| ArtifactError::Missing(key.to_string()))
    }

    fn has(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}
