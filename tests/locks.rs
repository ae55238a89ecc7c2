//! Locking Integration Tests
//!
//! At most one worker owns an item, within a process and across processes
//! sharing a home directory.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{breaking_news, Harness, MockArchiver, MockSummarizer};
use newspeaker::core::{ItemBusy, ItemLocks};
use newspeaker::domain::{ContentId, RunOptions};
use tempfile::TempDir;

#[tokio::test]
async fn test_concurrent_acquire_has_single_holder() {
    let locks = ItemLocks::new();
    let id = ContentId::parse("0123456789abcdef").unwrap();
    let holders = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let locks = locks.clone();
        let id = id.clone();
        let holders = Arc::clone(&holders);
        let max_seen = Arc::clone(&max_seen);
        tasks.push(tokio::spawn(async move {
            for _ in 0..50 {
                if let Some(token) = locks.try_acquire(&id) {
                    let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    holders.fetch_sub(1, Ordering::SeqCst);
                    drop(token);
                }
                tokio::task::yield_now().await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert_eq!(locks.held_count(), 0);
}

#[test]
fn test_file_lock_excludes_second_registry() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join(".lock");
    let id = ContentId::parse("0123456789abcdef").unwrap();

    // Two registries stand in for two processes
    let first = ItemLocks::new();
    let second = ItemLocks::new();

    let mut a = first.try_acquire(&id).unwrap();
    let mut b = second.try_acquire(&id).unwrap();

    assert!(tokio_test::assert_ok!(a.lock_file(&path)));
    assert!(!tokio_test::assert_ok!(b.lock_file(&path)));
    assert!(!b.holds_file_lock());

    drop(a);
    assert!(b.lock_file(&path).unwrap());
}

#[tokio::test]
async fn test_concurrent_process_archives_once() {
    let harness = Harness::new(MockSummarizer::returning("Markets rose today."))
        .with_archiver(MockArchiver::new().with_delay(Duration::from_millis(100)));
    let orchestrator = Arc::new(harness.orchestrator());

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let orchestrator = Arc::clone(&orchestrator);
        tasks.push(tokio::spawn(async move {
            orchestrator.process(breaking_news(), RunOptions::default()).await
        }));
    }

    let mut published = 0;
    let mut busy = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(run) => {
                assert!(run.is_published(), "unexpected state {:?}", run.state);
                published += 1;
            }
            Err(e) => {
                assert!(e.downcast_ref::<ItemBusy>().is_some(), "unexpected error {:#}", e);
                busy += 1;
            }
        }
    }

    assert_eq!(published + busy, 4);
    assert!(published >= 1);
    assert_eq!(harness.archiver.calls(), 1);
    assert_eq!(harness.extractor.calls(), 1);
}

#[tokio::test]
async fn test_separate_orchestrators_share_file_lock() {
    let harness = Harness::new(MockSummarizer::returning("Markets rose today."))
        .with_archiver(MockArchiver::new().with_delay(Duration::from_millis(200)));

    // Each orchestrator has its own in-process registry
    let first = Arc::new(harness.orchestrator());
    let second = harness.orchestrator();
    let id = breaking_news().id().clone();

    let worker = {
        let first = Arc::clone(&first);
        tokio::spawn(async move { first.process(breaking_news(), RunOptions::default()).await })
    };
    // Extraction starts only once the file lock is held
    while harness.extractor.calls() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = second
        .process(breaking_news(), RunOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.downcast_ref::<ItemBusy>(), Some(&ItemBusy(id.clone())));
    assert!(!second.cancel(&id));

    let run = worker.await.unwrap().unwrap();
    assert!(run.is_published());
    assert_eq!(harness.archiver.calls(), 1);
}
