// Shared fixtures for sync tests

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bucketsync::fs::{ListPage, MemoryStore, ObjectHead, PutOptions, RemoteStore};
use bucketsync::sync::{Concurrency, JobContext, Scheduler, ScopeRules};

/// Memory store with knobs for slow, flaky and panicking deletes.
#[derive(Default)]
pub struct InstrumentedStore {
    pub inner: MemoryStore,
    pub delete_delay: Duration,
    /// Deletes that fail before one succeeds.
    pub failing_deletes: AtomicUsize,
    /// Deleting this key panics.
    pub panic_on: Option<String>,
    pub fail_listing: bool,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl InstrumentedStore {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delete_delay: delay,
            ..Self::default()
        }
    }

    pub fn flaky(failures: usize) -> Self {
        Self {
            failing_deletes: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    pub fn panicking(key: &str) -> Self {
        Self {
            panic_on: Some(key.to_string()),
            ..Self::default()
        }
    }

    pub fn failing_listing() -> Self {
        Self {
            fail_listing: true,
            ..Self::default()
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for InstrumentedStore {
    async fn list(&self, prefix: &str, marker: Option<&str>, limit: usize) -> Result<ListPage> {
        if self.fail_listing {
            bail!("AccessDenied");
        }
        self.inner.list(prefix, marker, limit).await
    }

    async fn get(&self, request_key: &str, dest: &Path) -> Result<u64> {
        self.inner.get(request_key, dest).await
    }

    async fn put(&self, key: &str, src: &Path, options: &PutOptions) -> Result<u64> {
        self.inner.put(key, src, options).await
    }

    async fn head(&self, key: &str) -> Result<ObjectHead> {
        self.inner.head(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.panic_on.as_deref() == Some(key) {
            panic!("store exploded on {}", key);
        }

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if !self.delete_delay.is_zero() {
            tokio::time::sleep(self.delete_delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let failing = self
            .failing_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            bail!("connection reset");
        }
        self.inner.delete(key).await
    }

    async fn ensure_bucket(&self) -> Result<()> {
        Ok(())
    }

    fn display_path(&self, key: &str) -> String {
        format!("instrumented://{}", key)
    }
}

pub fn scheduler(store: Arc<dyn RemoteStore>, concurrency: Concurrency, attempts: u32) -> Scheduler {
    let ctx = Arc::new(JobContext::new(store, ScopeRules::all()));
    Scheduler::new(ctx, concurrency, attempts)
}

pub fn write_file(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}
