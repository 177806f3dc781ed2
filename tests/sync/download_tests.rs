// Tests for remote -> local sync runs

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bucketsync::fs::MemoryStore;
use bucketsync::sync::{Direction, ScopeRule, ScopeRules, SyncConfig, Syncer};
use tempfile::TempDir;

use crate::common::write_file;

fn download_config(root: &Path, prefix: &str) -> SyncConfig {
    SyncConfig::new(Direction::Download, root, prefix)
}

/// Every file under `root` with its content, sorted by path.
fn tree(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let content = std::fs::read(&path).unwrap();
                files.push((path, content));
            }
        }
    }
    files.sort();
    files
}

#[tokio::test]
async fn test_download_spans_every_page() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    let store = Arc::new(MemoryStore::with_page_size(2));
    for i in 1..=5 {
        store.insert(&format!("logs/{}.txt", i), format!("line {}", i));
    }
    store.insert("other/skip.txt", "not under prefix");

    let report = Syncer::new(store.clone(), download_config(&out, "logs/"))
        .run()
        .await
        .unwrap();

    assert_eq!(store.counters().list_calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.stats.files_transferred, 5);
    for i in 1..=5 {
        let content = std::fs::read(out.join("logs").join(format!("{}.txt", i))).unwrap();
        assert_eq!(content, format!("line {}", i).into_bytes());
    }
    assert!(!out.join("other").exists());
}

#[tokio::test]
async fn test_matching_local_file_is_not_fetched() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.insert("data/report.csv", "a,b\n1,2\n");
    write_file(&dir.path().join("data").join("report.csv"), b"a,b\n1,2\n");

    let report = Syncer::new(store.clone(), download_config(dir.path(), "data"))
        .run()
        .await
        .unwrap();

    assert_eq!(report.stats.files_skipped, 1);
    assert_eq!(report.stats.bytes_transferred, 0);
    assert_eq!(store.counters().get_calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.counters().bytes_read.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_changed_local_file_is_overwritten() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.insert("a.txt", "remote");
    write_file(&dir.path().join("a.txt"), b"local edit");

    let report = Syncer::new(store, download_config(dir.path(), ""))
        .run()
        .await
        .unwrap();

    assert_eq!(report.stats.files_transferred, 1);
    assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"remote");
}

#[tokio::test]
async fn test_full_download_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("mirror");
    let store = Arc::new(MemoryStore::new());
    store.insert("site/index.html", "<html/>");
    store.insert("site/css/main.css", "body{}");
    store.insert("site/img/logo 1.png", "png");

    let mut config = download_config(&out, "site");
    config.full_sync = true;

    let first = Syncer::new(store.clone(), config.clone()).run().await.unwrap();
    assert_eq!(first.stats.files_transferred, 3);
    let before = tree(&out);

    let second = Syncer::new(store.clone(), config).run().await.unwrap();

    assert_eq!(tree(&out), before);
    assert_eq!(second.stats.files_transferred, 0);
    assert_eq!(second.stats.files_skipped, 3);
    assert_eq!(second.stats.files_deleted, 0);
    assert!(out.join("site").join("img").join("logo 1.png").exists());
}

#[tokio::test]
async fn test_full_download_prunes_only_scoped_local_files() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let store = Arc::new(MemoryStore::new());
    store.insert("logs/keep.json", "{}");
    write_file(&root.join("logs").join("stale.json"), b"old");
    write_file(&root.join("logs").join("readme.txt"), b"not json");
    write_file(&root.join("archive").join("stale.json"), b"outside prefix");

    let mut config = download_config(root, "logs");
    config.rules = ScopeRules::new(vec![ScopeRule::postfix(".json")]);
    config.full_sync = true;

    let report = Syncer::new(store, config).run().await.unwrap();

    assert_eq!(report.stats.files_deleted, 1);
    assert!(root.join("logs").join("keep.json").exists());
    assert!(!root.join("logs").join("stale.json").exists());
    assert!(root.join("logs").join("readme.txt").exists());
    assert!(root.join("archive").join("stale.json").exists());
}

#[tokio::test]
async fn test_path_conflict_fails_only_that_job() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.insert("photos/a.jpg", "jpg");
    store.insert("zz.txt", "fine");
    // A regular file where the key needs a directory
    write_file(&dir.path().join("photos"), b"i am a file");

    let report = Syncer::new(store, download_config(dir.path(), ""))
        .run()
        .await
        .unwrap();

    assert_eq!(report.stats.files_failed, 1);
    assert_eq!(report.stats.files_transferred, 1);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].error.contains("path conflict"));
    assert_eq!(std::fs::read(dir.path().join("zz.txt")).unwrap(), b"fine");
}

#[tokio::test]
async fn test_directory_marker_keys_are_ignored() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.insert("docs/", "");
    store.insert("docs/a.md", "# a");

    let report = Syncer::new(store, download_config(dir.path(), "docs/"))
        .run()
        .await
        .unwrap();

    assert_eq!(report.stats.files_transferred, 1);
    assert_eq!(report.stats.files_filtered, 1);
    assert!(dir.path().join("docs").join("a.md").is_file());
}

#[tokio::test]
async fn test_download_creates_missing_root_ancestors() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("backups").join("2024").join("site");
    let store = Arc::new(MemoryStore::new());
    store.insert("a.txt", "a");
    store.insert("d/b.txt", "b");

    let report = Syncer::new(store, download_config(&out, ""))
        .run()
        .await
        .unwrap();

    assert_eq!(report.stats.files_transferred, 2);
    assert!(!report.has_failures());
    assert_eq!(std::fs::read(out.join("a.txt")).unwrap(), b"a");
    assert_eq!(std::fs::read(out.join("d").join("b.txt")).unwrap(), b"b");
}

#[tokio::test]
async fn test_key_escaping_local_root_is_refused() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    let store = Arc::new(MemoryStore::new());
    store.insert("p/../../escaped.txt", "pwn");
    store.insert("p/./dot.txt", "dot");
    store.insert("p/ok.txt", "fine");

    let mut config = download_config(&out, "p");
    config.full_sync = true;
    let report = Syncer::new(store.clone(), config).run().await.unwrap();

    assert_eq!(report.stats.files_transferred, 1);
    assert_eq!(report.stats.files_failed, 2);
    assert!(report.failures.iter().all(|f| f.error.contains("unsafe key")));
    assert!(!dir.path().join("escaped.txt").exists());
    assert_eq!(std::fs::read(out.join("p").join("ok.txt")).unwrap(), b"fine");
    assert_eq!(report.stats.files_deleted, 0);
    assert_eq!(store.counters().get_calls.load(Ordering::SeqCst), 1);
}
