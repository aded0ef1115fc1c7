//! Write-once contracts shared by both artifact stores.

use std::sync::Arc;

use drydock::{
    ArtifactError, ArtifactStore, FnExecutor, FsArtifactStore, MemoryArtifactStore, Payload,
    PipelineBuilder, PipelineName, PipelineRunner, PipelineStatus, Stage, StageContext,
    StageExecution, StageKind,
};

fn check_write_once(store: &dyn ArtifactStore) {
    assert!(!store.has("binary"));
    assert!(matches!(store.get("binary"), Err(ArtifactError::Missing(_))));

    store.put("binary", Payload::Bytes(b"v1".to_vec())).unwrap();
    assert!(store.has("binary"));

    let err = store.put("binary", Payload::Bytes(b"v2".to_vec())).unwrap_err();
    assert!(matches!(err, ArtifactError::DuplicateKey(ref k) if k == "binary"));

    // first write wins
    assert_eq!(
        store.get("binary").unwrap().payload,
        Payload::Bytes(b"v1".to_vec())
    );
}

fn check_snapshot(store: &dyn ArtifactStore) {
    store
        .put("scan-report", Payload::Report(serde_json::json!({"findings": []})))
        .unwrap();
    store.put("image-ref", Payload::Bytes(b"app:1".to_vec())).unwrap();

    let snapshot = store.snapshot().unwrap();
    let keys: Vec<&str> = snapshot.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["image-ref", "scan-report"]);
    assert_eq!(
        snapshot[0].digest,
        Payload::Bytes(b"app:1".to_vec()).digest()
    );
}

#[test]
fn test_memory_store_write_once() {
    check_write_once(&MemoryArtifactStore::new());
}

#[test]
fn test_fs_store_write_once() {
    let dir = tempfile::tempdir().unwrap();
    check_write_once(&FsArtifactStore::new(dir.path()).unwrap());
}

#[test]
fn test_memory_store_snapshot() {
    check_snapshot(&MemoryArtifactStore::new());
}

#[test]
fn test_fs_store_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    check_snapshot(&FsArtifactStore::new(dir.path()).unwrap());
}

#[test]
fn test_invalid_keys_rejected_by_both() {
    let dir = tempfile::tempdir().unwrap();
    let fs_store = FsArtifactStore::new(dir.path()).unwrap();
    let mem_store = MemoryArtifactStore::new();
    let stores: [&dyn ArtifactStore; 2] = [&fs_store, &mem_store];

    for store in stores {
        for key in ["", "..", "a/b", "with space"] {
            assert!(
                matches!(
                    store.put(key, Payload::Bytes(Vec::new())),
                    Err(ArtifactError::InvalidKey(_))
                ),
                "key {key:?} accepted"
            );
        }
    }
}

/// Test: racing writers on one key, exactly one wins
#[test]
fn test_memory_store_concurrent_put() {
    let store = Arc::new(MemoryArtifactStore::new());
    let handles: Vec<_> = (0..8u8)
        .map(|i| {
            let store = store.clone();
            std::thread::spawn(move || store.put("image-ref", Payload::Bytes(vec![i])).is_ok())
        })
        .collect();
    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(wins, 1);
}

/// Test: two handles on the same directory share write-once state
#[test]
fn test_fs_store_across_handles() {
    let dir = tempfile::tempdir().unwrap();
    let first = FsArtifactStore::new(dir.path()).unwrap();
    let second = FsArtifactStore::new(dir.path()).unwrap();

    first.put("sbom", Payload::Report(serde_json::json!({"packages": 3}))).unwrap();
    assert!(second.has("sbom"));
    assert!(matches!(
        second.put("sbom", Payload::Bytes(Vec::new())),
        Err(ArtifactError::DuplicateKey(_))
    ));
}

/// Test: a run against a disk store leaves its artifacts on disk
#[tokio::test]
async fn test_run_with_fs_store() {
    let dir = tempfile::tempdir().unwrap();
    let def = PipelineBuilder::new(PipelineName::Ci)
        .stage(
            Stage::new(
                "build",
                StageKind::Build,
                FnExecutor::new(|_: &StageContext| {
                    Ok(StageExecution::success("built")
                        .with_artifact("binary", Payload::Path("target/release/app".into())))
                }),
            )
            .output("binary"),
        )
        .build()
        .unwrap();

    let outcome = PipelineRunner::new()
        .run_with_store(&def, FsArtifactStore::new(dir.path()).unwrap(), Vec::new())
        .await;
    assert_eq!(outcome.status, PipelineStatus::Success);

    let reopened = FsArtifactStore::new(dir.path()).unwrap();
    assert_eq!(
        reopened.get("binary").unwrap().payload,
        Payload::Path("target/release/app".into())
    );
}
