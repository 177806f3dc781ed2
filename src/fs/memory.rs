//! In-process object store.
//!
//! Behaves like a single S3 bucket: keys are kept lexically sorted, listings
//! are paginated with `start-after` markers and content tags are quoted MD5
//! digests. Counters record how much data moved, which lets callers check
//! that unchanged content is never transferred. A store can start without
//! its bucket, in which case every request fails until `ensure_bucket`
//! creates it.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;

use crate::fs::backend::{
    decode_request_key, ListEntry, ListPage, ObjectHead, PutOptions, RemoteStore,
};
use crate::sync::digest::content_tag;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_tag: String,
}

/// Transfer counters.
#[derive(Debug, Default)]
pub struct StoreCounters {
    pub list_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub bytes_read: AtomicU64,
    pub put_calls: AtomicUsize,
    pub bytes_written: AtomicU64,
    pub delete_calls: AtomicUsize,
    pub create_bucket_calls: AtomicUsize,
}

/// Thread-safe in-memory bucket.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    /// Upper bound applied on top of the caller's page limit.
    max_page_size: Option<usize>,
    bucket_missing: AtomicBool,
    counters: StoreCounters,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force listings to return at most `size` keys per page.
    pub fn with_page_size(size: usize) -> Self {
        Self {
            max_page_size: Some(size.max(1)),
            ..Self::default()
        }
    }

    /// A store whose bucket does not exist yet.
    pub fn without_bucket() -> Self {
        Self {
            bucket_missing: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn bucket_exists(&self) -> bool {
        !self.bucket_missing.load(Ordering::SeqCst)
    }

    /// Seed an object without touching the counters.
    pub fn insert(&self, key: &str, data: impl Into<Vec<u8>>) {
        let data = data.into();
        let object = StoredObject {
            content_tag: content_tag(&data),
            data,
        };
        self.lock().insert(key.to_string(), object);
    }

    /// Current content of `key`.
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get(key).map(|o| o.data.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// All keys in lexical order.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn counters(&self) -> &StoreCounters {
        &self.counters
    }

    fn check_bucket(&self) -> Result<()> {
        if !self.bucket_exists() {
            bail!("NoSuchBucket: the specified bucket does not exist");
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredObject>> {
        // A poisoned map is still structurally valid
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list(&self, prefix: &str, marker: Option<&str>, limit: usize) -> Result<ListPage> {
        self.counters.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_bucket()?;

        let limit = match self.max_page_size {
            Some(max) => limit.min(max),
            None => limit,
        }
        .max(1);

        let objects = self.lock();
        let start = match marker {
            Some(marker) => Bound::Excluded(marker.to_string()),
            None => Bound::Unbounded,
        };

        let mut page = ListPage::default();
        for (key, object) in objects.range((start, Bound::Unbounded)) {
            if !key.starts_with(prefix) {
                continue;
            }
            if page.entries.len() == limit {
                page.truncated = true;
                break;
            }
            page.entries
                .push(ListEntry::new(key.clone(), Some(object.content_tag.clone())));
        }

        Ok(page)
    }

    async fn get(&self, request_key: &str, dest: &Path) -> Result<u64> {
        self.counters.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_bucket()?;
        let key = decode_request_key(request_key);
        let data = self
            .lock()
            .get(&key)
            .map(|o| o.data.clone())
            .ok_or_else(|| anyhow!("NoSuchKey: {}", key))?;
        tokio::fs::write(dest, &data)
            .await
            .with_context(|| format!("Failed to write {}", dest.display()))?;
        let bytes = data.len() as u64;
        self.counters.bytes_read.fetch_add(bytes, Ordering::SeqCst);
        Ok(bytes)
    }

    async fn put(&self, key: &str, src: &Path, _options: &PutOptions) -> Result<u64> {
        self.counters.put_calls.fetch_add(1, Ordering::SeqCst);
        self.check_bucket()?;
        let data = tokio::fs::read(src)
            .await
            .with_context(|| format!("Failed to read {}", src.display()))?;
        let bytes = data.len() as u64;
        self.counters.bytes_written.fetch_add(bytes, Ordering::SeqCst);
        self.insert(key, data);
        Ok(bytes)
    }

    async fn head(&self, key: &str) -> Result<ObjectHead> {
        self.check_bucket()?;
        match self.lock().get(key) {
            Some(object) => Ok(ObjectHead {
                content_tag: Some(object.content_tag.clone()),
                content_length: object.data.len() as u64,
            }),
            None => bail!("NoSuchKey: {}", key),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.counters.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.check_bucket()?;
        match self.lock().remove(key) {
            Some(_) => Ok(()),
            None => bail!("NoSuchKey: {}", key),
        }
    }

    async fn ensure_bucket(&self) -> Result<()> {
        if self.bucket_missing.swap(false, Ordering::SeqCst) {
            self.counters.create_bucket_calls.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn display_path(&self, key: &str) -> String {
        format!("mem://{}", key)
    }
}
