use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{check_key, Artifact, ArtifactStore, Payload, Result};
use crate::error::ArtifactError;

/// Disk-backed artifact store.
///
/// Layout: `<root>/artifacts/<key>.json`, one serialized [`Artifact`] per key.
/// Write-once is enforced by a no-clobber rename, so two handles on the same
/// root can never both win the same key.
pub struct FsArtifactStore {
    artifacts_dir: PathBuf,
}

impl FsArtifactStore {
    /// Create a store rooted at `root`. Creates `root/artifacts/` if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let artifacts_dir = root.as_ref().join("artifacts");
        fs::create_dir_all(&artifacts_dir)?;
        Ok(Self { artifacts_dir })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.artifacts_dir.join(format!("{key}.json"))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, key: &str, payload: Payload) -> Result<()> {
        check_key(key)?;
        let path = self.entry_path(key);
        if path.exists() {
            return Err(ArtifactError::DuplicateKey(key.to_string()));
        }

        let bytes = serde_json::to_vec(&Artifact::new(payload))?;
        let mut tmp = NamedTempFile::new_in(&self.artifacts_dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist_noclobber(&path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                ArtifactError::DuplicateKey(key.to_string())
            } else {
                ArtifactError::Io(e.error)
            }
        })?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Artifact> {
        check_key(key).map_err(|_| ArtifactError::Missing(key.to_string()))?;
        let bytes = fs::read(self.entry_path(key)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ArtifactError::Missing(key.to_string())
            } else {
                ArtifactError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn has(&self, key: &str) -> bool {
        super::is_valid_key(key) && self.entry_path(key).exists()
    }

    fn keys(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.artifacts_dir) else {
            return Vec::new();
        };
        let mut keys: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let key = name.strip_suffix(".json")?;
                super::is_valid_key(key).then(|| key.to_string())
            })
            .collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_store() -> (tempfile::TempDir, FsArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_report_roundtrip() {
        let (_dir, store) = make_store();
        let report = json!({ "findings": [], "tool": "sast" });
        store.put("sast-report", Payload::Report(report.clone())).unwrap();
        let got = store.get("sast-report").unwrap();
        assert_eq!(got.payload, Payload::Report(report));
    }

    #[test]
    fn test_write_once_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let first = FsArtifactStore::new(dir.path()).unwrap();
        let second = FsArtifactStore::new(dir.path()).unwrap();

        first.put("binary", Payload::Bytes(vec![1])).unwrap();
        let err = second.put("binary", Payload::Bytes(vec![2])).unwrap_err();
        assert!(matches!(err, ArtifactError::DuplicateKey(_)));
        assert_eq!(second.get("binary").unwrap().payload, Payload::Bytes(vec![1]));
    }

    #[test]
    fn test_get_absent_is_missing() {
        let (_dir, store) = make_store();
        let err = store.get("nope").unwrap_err();
        assert!(matches!(err, ArtifactError::Missing(ref k) if k == "nope"));
        assert!(!store.has("nope"));
    }

    #[test]
    fn test_keys_ignores_temp_files() {
        let (dir, store) = make_store();
        store.put("b", Payload::Bytes(vec![])).unwrap();
        store.put("a", Payload::Bytes(vec![])).unwrap();
        std::fs::write(dir.path().join("artifacts").join(".tmpXYZ"), b"junk").unwrap();
        assert_eq!(store.keys(), vec!["a".to_string(), "b".to_string()]);
    }
}
