//! Sync orchestration.
//!
//! One run enumerates the source, submits a job per in-scope item, drains
//! every completion and, in full-sync mode, removes destination items that
//! were not part of the run. Reconciliation only starts once the transfer
//! batch has fully drained.

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{SyncError, SyncResult};
use crate::fs::backend::DEFAULT_PAGE_LIMIT;
use crate::fs::{slash_path, ListPage, LocalFs, RemoteStore};
use crate::sync::job::{DeleteJob, DownloadJob, JobContext, JobKind, JobOutcome, SyncJob, UploadJob};
use crate::sync::pattern::ScopeRules;
use crate::sync::reconcile::{prune_local, Reconciler, SortedSuccessSet, SuccessSet};
use crate::sync::scheduler::{Completion, Concurrency, Scheduler};

/// Which way data flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local directory to remote store.
    Upload,
    /// Remote store to local directory.
    Download,
}

/// Sync configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub direction: Direction,
    /// Local directory being synced.
    pub local_root: PathBuf,
    /// Remote namespace being synced.
    pub key_prefix: String,
    /// Scope rules every synced item must match.
    pub rules: ScopeRules,
    /// Delete destination items that don't exist in the source.
    pub full_sync: bool,
    pub concurrency: Concurrency,
    /// Attempts per job, including the first.
    pub max_attempts: u32,
    /// Keys requested per listing page.
    pub page_size: usize,
}

impl SyncConfig {
    pub fn new(direction: Direction, local_root: impl Into<PathBuf>, key_prefix: &str) -> Self {
        Self {
            direction,
            local_root: local_root.into(),
            key_prefix: key_prefix.to_string(),
            rules: ScopeRules::all(),
            full_sync: false,
            concurrency: Concurrency::default(),
            max_attempts: 3,
            page_size: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// Sync statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Source items enumerated.
    pub files_scanned: usize,
    /// Items whose data was transferred.
    pub files_transferred: usize,
    /// Items already identical at the destination.
    pub files_skipped: usize,
    /// Items outside the scope rules.
    pub files_filtered: usize,
    /// Transfers that failed after all attempts.
    pub files_failed: usize,
    /// Destination items removed by full sync.
    pub files_deleted: usize,
    /// Removals that failed.
    pub deletes_failed: usize,
    /// Bytes transferred.
    pub bytes_transferred: u64,
}

/// A job that did not succeed.
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub kind: JobKind,
    pub source: String,
    pub error: String,
}

/// Result of a sync run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub direction: Direction,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub stats: SyncStats,
    pub failures: Vec<JobFailure>,
}

impl SyncReport {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            started_at: Utc::now(),
            duration: Duration::ZERO,
            stats: SyncStats::default(),
            failures: Vec::new(),
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.stats;
        write!(
            f,
            "{} transferred ({}), {} unchanged, {} ignored, {} failed, {} deleted in {:.1}s",
            s.files_transferred,
            humansize::format_size(s.bytes_transferred, humansize::DECIMAL),
            s.files_skipped,
            s.files_filtered,
            s.files_failed + s.deletes_failed,
            s.files_deleted,
            self.duration.as_secs_f64()
        )
    }
}

/// Drives one sync run between a local directory and a remote store.
pub struct Syncer {
    store: Arc<dyn RemoteStore>,
    config: SyncConfig,
}

impl Syncer {
    pub fn new(store: Arc<dyn RemoteStore>, config: SyncConfig) -> Self {
        Self { store, config }
    }

    /// Perform a sync run.
    ///
    /// Per-job failures are recorded in the report; only configuration and
    /// listing errors end the run early.
    pub async fn run(&self) -> SyncResult<SyncReport> {
        let start = Instant::now();
        let mut report = SyncReport::new(self.config.direction);

        if self.config.full_sync {
            tracing::info!("doing a full sync");
        }
        if !self.config.rules.is_empty() {
            tracing::info!(rules = ?self.config.rules, "limiting sync to matching paths");
        }

        match self.config.direction {
            Direction::Upload => self.upload(&mut report).await?,
            Direction::Download => self.download(&mut report).await?,
        }

        report.duration = start.elapsed();
        Ok(report)
    }

    fn scheduler(&self) -> Scheduler {
        let ctx = Arc::new(JobContext::new(self.store.clone(), self.config.rules.clone()));
        Scheduler::new(ctx, self.config.concurrency, self.config.max_attempts)
    }

    async fn upload(&self, report: &mut SyncReport) -> SyncResult<()> {
        self.store
            .ensure_bucket()
            .await
            .map_err(|e| SyncError::Configuration(format!("{:#}", e)))?;

        let root = &self.config.local_root;
        if !root.is_dir() {
            return Err(SyncError::Listing(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        let mut scheduler = self.scheduler();

        for entry in LocalFs::walk(root) {
            let entry = entry.map_err(|e| {
                SyncError::Listing(format!("Error uploading directory {}: {:#}", root.display(), e))
            })?;
            if entry.is_dir {
                continue;
            }
            report.stats.files_scanned += 1;
            if !self.config.rules.matches(&slash_path(&entry.path)) {
                report.stats.files_filtered += 1;
                continue;
            }
            let job = UploadJob::new(entry.path, root.clone(), &self.config.key_prefix);
            scheduler.submit(SyncJob::Upload(job)).await;
        }

        let transferred = self.drain_transfers(&mut scheduler, report).await;
        if !self.config.full_sync {
            return Ok(());
        }

        let transferred = transferred.seal();
        tracing::info!(kept = transferred.len(), "doing cleanup for full sync");
        self.delete_remote_orphans(&mut scheduler, &transferred, report)
            .await?;
        tracing::info!("full sync cleanup done");
        Ok(())
    }

    async fn download(&self, report: &mut SyncReport) -> SyncResult<()> {
        let root = &self.config.local_root;
        let mut scheduler = self.scheduler();
        let mut marker: Option<String> = None;

        loop {
            let page = self.list_page(marker.as_deref()).await?;
            let next = page.next_marker().map(str::to_string);

            for entry in page.entries {
                report.stats.files_scanned += 1;
                if !self.config.rules.matches(&entry.key) {
                    tracing::debug!(key = %entry.key, "ignoring key");
                    report.stats.files_filtered += 1;
                    continue;
                }
                let job = DownloadJob::new(&entry.key, entry.content_tag, root.clone());
                scheduler.submit(SyncJob::Download(job)).await;
            }

            match next {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        let transferred = self.drain_transfers(&mut scheduler, report).await;
        if !self.config.full_sync {
            return Ok(());
        }

        let transferred = transferred.seal();
        tracing::info!(dir = %root.display(), kept = transferred.len(), "doing cleanup for full sync");
        let (root, prefix, rules) = (
            root.clone(),
            self.config.key_prefix.clone(),
            self.config.rules.clone(),
        );
        let pruned = tokio::task::spawn_blocking(move || {
            prune_local(&root, &prefix, &rules, &transferred)
        })
        .await
        .map_err(|e| SyncError::Fault(e.to_string()))?;

        report.stats.files_deleted += pruned.removed.len();
        report.stats.deletes_failed += pruned.failed.len();
        for path in pruned.failed {
            report.failures.push(JobFailure {
                kind: JobKind::Delete,
                source: path.to_string_lossy().into_owned(),
                error: "could not remove local file".to_string(),
            });
        }
        tracing::info!("full sync cleanup done");
        Ok(())
    }

    /// Delete every in-scope remote key that was not uploaded this run.
    async fn delete_remote_orphans(
        &self,
        scheduler: &mut Scheduler,
        transferred: &SortedSuccessSet,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let reconciler = Reconciler::new(self.config.rules.clone(), transferred);
        let mut marker: Option<String> = None;

        loop {
            let page = self.list_page(marker.as_deref()).await?;
            let orphans = reconciler.orphan_keys(page.entries.iter().map(|e| e.key.as_str()));
            for key in orphans {
                scheduler.submit(SyncJob::Delete(DeleteJob::new(&key))).await;
            }

            match page.next_marker() {
                Some(next) => marker = Some(next.to_string()),
                None => break,
            }
        }

        while let Some(completion) = scheduler.drain().await {
            self.record(&completion, report);
        }
        Ok(())
    }

    /// Drain the transfer batch, collecting successful destinations.
    async fn drain_transfers(&self, scheduler: &mut Scheduler, report: &mut SyncReport) -> SuccessSet {
        let mut transferred = SuccessSet::new();
        while let Some(completion) = scheduler.drain().await {
            self.record(&completion, report);
            if completion.is_success() {
                if let Some(destination) = completion.job.destination() {
                    transferred.insert(destination);
                }
            }
        }
        transferred
    }

    async fn list_page(&self, marker: Option<&str>) -> SyncResult<ListPage> {
        let prefix = &self.config.key_prefix;
        self.store
            .list(prefix, marker, self.config.page_size.max(1))
            .await
            .map_err(|e| {
                SyncError::Listing(format!(
                    "Could not list {}: {:#}",
                    self.store.display_path(prefix),
                    e
                ))
            })
    }

    /// Report one completion and update the run statistics.
    fn record(&self, completion: &Completion, report: &mut SyncReport) {
        let job = &completion.job;
        let kind = job.kind();
        let source = job.source();
        let stats = &mut report.stats;

        match &completion.result {
            Ok(JobOutcome::Transferred { bytes }) => {
                stats.files_transferred += 1;
                stats.bytes_transferred += bytes;
                match kind {
                    JobKind::Upload => tracing::info!(bytes, file = %source, "uploaded file"),
                    _ => tracing::info!(bytes, key = %source, "downloaded file"),
                }
            }
            Ok(JobOutcome::Skipped) => {
                stats.files_skipped += 1;
                tracing::info!(%kind, path = %source, "already in sync");
            }
            Ok(JobOutcome::FilteredOut) => {
                stats.files_filtered += 1;
                tracing::debug!(%kind, path = %source, "outside sync scope");
            }
            Ok(JobOutcome::Deleted) => {
                stats.files_deleted += 1;
                tracing::info!(key = %source, "deleted key");
            }
            Err(err) => {
                if kind == JobKind::Delete {
                    stats.deletes_failed += 1;
                } else {
                    stats.files_failed += 1;
                }
                tracing::error!(
                    %kind,
                    path = %source,
                    attempts = completion.attempts,
                    error = %err,
                    "job failed"
                );
                report.failures.push(JobFailure {
                    kind,
                    source,
                    error: err.to_string(),
                });
            }
        }
    }
}
