// Tests for the job scheduler: bounds, retries and fault containment

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bucketsync::sync::{Concurrency, DeleteJob, JobOutcome, SyncJob};
use bucketsync::SyncError;

use crate::common::{scheduler, InstrumentedStore};

fn seeded(store: InstrumentedStore, keys: &[&str]) -> Arc<InstrumentedStore> {
    for key in keys {
        store.inner.insert(key, key.as_bytes());
    }
    Arc::new(store)
}

#[tokio::test]
async fn test_bound_of_one_serializes_jobs() {
    let keys = ["k1", "k2", "k3", "k4", "k5"];
    let store = seeded(InstrumentedStore::slow(Duration::from_millis(50)), &keys);
    let mut scheduler = scheduler(store.clone(), Concurrency::Bounded(1), 1);

    let start = Instant::now();
    for key in keys {
        scheduler.submit(SyncJob::Delete(DeleteJob::new(key))).await;
    }
    let completions = scheduler.drain_all().await;

    assert_eq!(completions.len(), 5);
    assert!(completions.iter().all(|c| c.is_success()));
    assert_eq!(store.max_active(), 1);
    assert!(start.elapsed() >= Duration::from_millis(250));
}

#[tokio::test]
async fn test_bound_caps_active_jobs() {
    let keys = ["a", "b", "c", "d", "e", "f", "g"];
    let store = seeded(InstrumentedStore::slow(Duration::from_millis(20)), &keys);
    let mut scheduler = scheduler(store.clone(), Concurrency::Bounded(3), 1);

    for key in keys {
        scheduler.submit(SyncJob::Delete(DeleteJob::new(key))).await;
    }
    let completions = scheduler.drain_all().await;

    assert_eq!(completions.len(), keys.len());
    assert!(store.max_active() <= 3);
    assert!(store.inner.keys().is_empty());
}

#[tokio::test]
async fn test_unbounded_runs_everything_at_once() {
    let keys = ["a", "b", "c", "d", "e"];
    let store = seeded(InstrumentedStore::slow(Duration::from_millis(50)), &keys);
    let mut scheduler = scheduler(store.clone(), Concurrency::from_limit(0), 1);

    for key in keys {
        scheduler.submit(SyncJob::Delete(DeleteJob::new(key))).await;
    }
    assert_eq!(scheduler.in_flight(), 5);
    let completions = scheduler.drain_all().await;

    assert_eq!(completions.len(), 5);
    assert_eq!(store.max_active(), 5);
}

#[tokio::test]
async fn test_retries_until_success() {
    let store = seeded(InstrumentedStore::flaky(2), &["key"]);
    let mut scheduler = scheduler(store.clone(), Concurrency::Bounded(2), 3);

    scheduler.submit(SyncJob::Delete(DeleteJob::new("key"))).await;
    let completion = scheduler.drain().await.unwrap();

    assert_eq!(completion.outcome(), Some(JobOutcome::Deleted));
    assert_eq!(completion.attempts, 3);
    assert!(!store.inner.contains("key"));
}

#[tokio::test]
async fn test_exhausted_attempts_report_failure() {
    let store = seeded(InstrumentedStore::flaky(10), &["key"]);
    let mut scheduler = scheduler(store.clone(), Concurrency::Bounded(2), 3);

    scheduler.submit(SyncJob::Delete(DeleteJob::new("key"))).await;
    let completion = scheduler.drain().await.unwrap();

    assert!(!completion.is_success());
    assert_eq!(completion.attempts, 3);
    assert!(matches!(completion.result, Err(SyncError::Transfer { .. })));
    assert_eq!(store.failing_deletes.load(Ordering::SeqCst), 7);
}

#[tokio::test]
async fn test_panicking_job_releases_its_slot() {
    let store = seeded(InstrumentedStore::panicking("boom"), &["boom", "ok1", "ok2"]);
    let mut scheduler = scheduler(store.clone(), Concurrency::Bounded(1), 3);

    for key in ["boom", "ok1", "ok2"] {
        scheduler.submit(SyncJob::Delete(DeleteJob::new(key))).await;
    }
    let completions = scheduler.drain_all().await;

    assert_eq!(completions.len(), 3);
    let fault = completions
        .iter()
        .find(|c| c.job.source() == "boom")
        .unwrap();
    assert!(matches!(fault.result, Err(SyncError::Fault(ref msg)) if msg.contains("exploded")));
    assert_eq!(fault.attempts, 1);
    assert_eq!(completions.iter().filter(|c| c.is_success()).count(), 2);
}

#[tokio::test]
async fn test_each_submission_drains_once() {
    let store = seeded(InstrumentedStore::default(), &["fast"]);
    let mut scheduler = scheduler(store.clone(), Concurrency::Unbounded, 1);

    // The missing key fails on its first attempt; both finish quickly but
    // every submission still produces exactly one completion.
    scheduler.submit(SyncJob::Delete(DeleteJob::new("missing"))).await;
    scheduler.submit(SyncJob::Delete(DeleteJob::new("fast"))).await;

    let first = scheduler.drain().await.unwrap();
    let second = scheduler.drain().await.unwrap();
    assert!(scheduler.drain().await.is_none());

    let mut sources = vec![first.job.source(), second.job.source()];
    sources.sort();
    assert_eq!(sources, vec!["fast".to_string(), "missing".to_string()]);
}
