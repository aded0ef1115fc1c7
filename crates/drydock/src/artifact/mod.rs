//! Write-once artifact passing between stages of a single run.

pub mod fs;
pub mod memory;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ArtifactError;

pub use fs::FsArtifactStore;
pub use memory::MemoryArtifactStore;

pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Opaque payload carried under an artifact key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Bytes(Vec<u8>),
    Path(PathBuf),
    Report(serde_json::Value),
}

impl Payload {
    /// SHA-256 over the payload contents (path payloads hash the path, not the file).
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            Payload::Bytes(bytes) => {
                hasher.update(b"bytes\0");
                hasher.update(bytes);
            }
            Payload::Path(path) => {
                hasher.update(b"path\0");
                hasher.update(path.to_string_lossy().as_bytes());
            }
            Payload::Report(value) => {
                hasher.update(b"report\0");
                hasher.update(value.to_string().as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }

    /// Render the payload as text for handing to an external tool.
    pub fn to_text(&self) -> String {
        match self {
            Payload::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Payload::Path(path) => path.to_string_lossy().into_owned(),
            Payload::Report(value) => value.to_string(),
        }
    }
}

/// A stored payload plus the moment it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Audit view of one stored artifact. Carries no payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub digest: String,
}

/// Write-once key/value store owned by one pipeline run.
///
/// Implementations must make `put` an atomic insert-if-absent.
pub trait ArtifactStore: Send + Sync {
    /// Store `payload` under `key`. Fails with `DuplicateKey` if the key exists.
    fn put(&self, key: &str, payload: Payload) -> Result<()>;

    /// Fetch the artifact under `key`. Fails with `Missing` if absent.
    fn get(&self, key: &str) -> Result<Artifact>;

    /// Whether `key` has been written.
    fn has(&self, key: &str) -> bool;

    /// All written keys, sorted.
    fn keys(&self) -> Vec<String>;

    /// Audit records for every stored artifact, sorted by key.
    fn snapshot(&self) -> Result<Vec<ArtifactRecord>> {
        self.keys()
            .into_iter()
            .map(|key| {
                let artifact = self.get(&key)?;
                Ok(ArtifactRecord {
                    digest: artifact.payload.digest(),
                    created_at: artifact.created_at,
                    key,
                })
            })
            .collect()
    }
}

/// Keys double as file names in the disk-backed store.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

pub(crate) fn check_key(key: &str) -> Result<()> {
    if is_valid_key(key) {
        Ok(())
    } else {
        Err(ArtifactError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_validation() {
        assert!(is_valid_key("image-ref"));
        assert!(is_valid_key("sast.report_v2"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key(".."));
        assert!(!is_valid_key("reports/sast"));
        assert!(!is_valid_key("with space"));
    }

    #[test]
    fn test_digest_distinguishes_payload_kinds() {
        let bytes = Payload::Bytes(b"target/app".to_vec());
        let path = Payload::Path(PathBuf::from("target/app"));
        assert_ne!(bytes.digest(), path.digest());
        assert_eq!(bytes.digest(), Payload::Bytes(b"target/app".to_vec()).digest());
    }

    #[test]
    fn test_payload_text() {
        assert_eq!(Payload::Bytes(b"v1.2.3".to_vec()).to_text(), "v1.2.3");
        assert_eq!(
            Payload::Report(json!({ "passed": true })).to_text(),
            r#"{"passed":true}"#
        );
    }
}
