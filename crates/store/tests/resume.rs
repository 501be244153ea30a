//! End-to-end resumable copy over the filesystem backend.
//!
//! Simulates an interrupted multi-target copy: enumerate sources into a
//! session, transfer part of the item stream, drop everything as a crash
//! would, then load the session back and finish from the persisted cursor.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use dm_core::session::{CommandType, SessionStore};
use dm_core::transfer::{TransferExecutor, TransferItem};
use dm_core::{RetryConfig, StorageClient};
use dm_store::{FsClient, StoreFactory};
use tempfile::TempDir;

fn fs_client(path: &Path) -> FsClient {
    let url = dm_core::url::resolve(&path.display().to_string(), &BTreeMap::new()).unwrap();
    FsClient::new(url)
}

async fn enumerate_items(source_root: &Path, target_roots: &[&Path]) -> Vec<TransferItem> {
    let client = fs_client(source_root);
    let mut rx = client.list(true, false).await.unwrap();

    let mut items = Vec::new();
    while let Some(entry) = rx.recv().await {
        let entry = entry.unwrap();
        if entry.is_dir {
            continue;
        }
        for target_root in target_roots {
            items.push(TransferItem {
                source_url: source_root.join(&entry.key).display().to_string(),
                target_url: target_root.join(&entry.key).display().to_string(),
                length: entry.size,
                content_hash: None,
            });
        }
    }
    items
}

#[tokio::test]
async fn test_interrupted_copy_resumes_without_recopying() {
    let source = TempDir::new().unwrap();
    let target_a = TempDir::new().unwrap();
    let target_b = TempDir::new().unwrap();
    let session_dir = TempDir::new().unwrap();

    std::fs::write(source.path().join("one.txt"), b"first file").unwrap();
    std::fs::write(source.path().join("two.txt"), b"second file").unwrap();
    std::fs::write(source.path().join("three.txt"), b"third file").unwrap();

    let store = SessionStore::new(session_dir.path());
    let executor = TransferExecutor::new(
        StoreFactory::shared(Default::default()),
        RetryConfig {
            max_attempts: 3,
            backoff_unit: Duration::from_millis(1),
        },
    );

    // First run: enumerate once, then transfer only the first two items
    // before the simulated crash.
    let session = store
        .create(CommandType::Cp, vec!["cp".to_string()])
        .unwrap();
    let items = enumerate_items(source.path(), &[target_a.path(), target_b.path()]).await;
    assert_eq!(items.len(), 6); // 3 files x 2 targets
    for item in &items {
        session.add_item(item).unwrap();
    }
    session.finish_populating().unwrap();

    let id = session.id();
    for (index, item) in items.iter().enumerate().take(2) {
        executor.copy_item(item).await.unwrap();
        session.mark_copied(index, item).unwrap();
    }
    drop(session);

    // A source file changes between the runs. Resume must replay the
    // recorded enumeration, not pick up the new content for items already
    // marked copied.
    let copied_before_crash = items[0].target_url.clone();
    let content_before = std::fs::read(&copied_before_crash).unwrap();
    std::fs::write(source.path().join("one.txt"), b"mutated after crash").unwrap();

    // Second run.
    let resumed = store.load(&id).unwrap();
    let replayed = resumed.items().unwrap();
    assert_eq!(replayed, items);

    let start = resumed.resume_index();
    assert_eq!(start, 2);
    for (index, item) in replayed.iter().enumerate().skip(start) {
        executor.copy_item(item).await.unwrap();
        resumed.mark_copied(index, item).unwrap();
    }
    resumed.complete().unwrap();

    // The item finished before the crash was not re-copied.
    assert_eq!(std::fs::read(&copied_before_crash).unwrap(), content_before);

    // Everything else landed on both targets.
    for target in [target_a.path(), target_b.path()] {
        assert!(target.join("one.txt").exists());
        assert_eq!(
            std::fs::read(target.join("two.txt")).unwrap(),
            b"second file"
        );
        assert_eq!(
            std::fs::read(target.join("three.txt")).unwrap(),
            b"third file"
        );
    }

    // Completion removed the session.
    assert!(store.list().unwrap().is_empty());
}

#[tokio::test]
async fn test_fanout_through_fs_factory() {
    let source = TempDir::new().unwrap();
    let target_a = TempDir::new().unwrap();
    let target_b = TempDir::new().unwrap();

    std::fs::write(source.path().join("blob.bin"), vec![7u8; 100_000]).unwrap();

    let executor = TransferExecutor::new(
        StoreFactory::shared(Default::default()),
        RetryConfig::default(),
    );

    let targets = vec![
        target_a.path().join("blob.bin").display().to_string(),
        target_b.path().join("blob.bin").display().to_string(),
    ];
    let results = executor
        .copy_fanout(
            &source.path().join("blob.bin").display().to_string(),
            &targets,
        )
        .await
        .unwrap();

    for (_, result) in &results {
        assert!(result.is_ok());
    }
    assert_eq!(
        std::fs::read(target_a.path().join("blob.bin")).unwrap(),
        vec![7u8; 100_000]
    );
    assert_eq!(
        std::fs::read(target_b.path().join("blob.bin")).unwrap(),
        vec![7u8; 100_000]
    );
}
