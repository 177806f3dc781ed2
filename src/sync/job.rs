//! Units of work executed by the scheduler.
//!
//! Each variant carries only the fields it needs. Executing a job moves it
//! through its state machine and records the realized destination on the
//! job itself, so the completion can be fed back into the run's success set.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{SyncError, SyncResult};
use crate::fs::{slash_path, LocalFs, PutOptions, RemoteStore};
use crate::sync::digest;
use crate::sync::pattern::ScopeRules;

/// Shared, read-only state every job executes against.
pub struct JobContext {
    pub store: Arc<dyn RemoteStore>,
    pub rules: ScopeRules,
    pub put_options: PutOptions,
}

impl JobContext {
    pub fn new(store: Arc<dyn RemoteStore>, rules: ScopeRules) -> Self {
        Self {
            store,
            rules,
            put_options: PutOptions::default(),
        }
    }
}

/// How a successful job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Data was moved.
    Transferred { bytes: u64 },
    /// Content tags already matched.
    Skipped,
    /// The item is outside the active scope rules.
    FilteredOut,
    /// The remote object was removed.
    Deleted,
}

impl JobOutcome {
    pub fn bytes(&self) -> u64 {
        match self {
            JobOutcome::Transferred { bytes } => *bytes,
            _ => 0,
        }
    }
}

/// Upload one local file.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub local_file: PathBuf,
    pub local_root: PathBuf,
    pub key_prefix: String,
    /// Digest of the local content, set once hashed.
    pub content_tag: Option<String>,
    /// Key the file was written to.
    pub result_key: Option<String>,
}

impl UploadJob {
    pub fn new(local_file: PathBuf, local_root: PathBuf, key_prefix: &str) -> Self {
        Self {
            local_file,
            local_root,
            key_prefix: key_prefix.to_string(),
            content_tag: None,
            result_key: None,
        }
    }

    async fn execute(&mut self, ctx: &JobContext) -> SyncResult<JobOutcome> {
        let file_name = self.local_file.to_string_lossy().into_owned();
        let rel = LocalFs::relative_key(&self.local_root, &self.local_file)
            .map_err(|e| SyncError::transfer(&file_name, e))?;
        let key = join_key(&self.key_prefix, &rel);
        self.result_key = Some(key.clone());

        let tag = digest::local_content_tag(&self.local_file)
            .await
            .map_err(|e| SyncError::transfer(&file_name, format!("Failed to read file: {:#}", e)))?;
        self.content_tag = Some(tag.clone());

        if already_uploaded(ctx.store.as_ref(), &key, &tag).await {
            tracing::debug!(file = %file_name, "file already uploaded");
            return Ok(JobOutcome::Skipped);
        }

        let bytes = ctx
            .store
            .put(&key, &self.local_file, &ctx.put_options)
            .await
            .map_err(|e| SyncError::transfer(ctx.store.display_path(&key), e))?;

        Ok(JobOutcome::Transferred { bytes })
    }
}

/// Download one remote object.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub key: String,
    /// Content tag reported by the listing.
    pub content_tag: Option<String>,
    pub local_root: PathBuf,
    /// File the object was written to.
    pub result_file: Option<PathBuf>,
}

impl DownloadJob {
    pub fn new(key: &str, content_tag: Option<String>, local_root: PathBuf) -> Self {
        Self {
            key: key.to_string(),
            content_tag,
            local_root,
            result_file: None,
        }
    }

    async fn execute(&mut self, ctx: &JobContext) -> SyncResult<JobOutcome> {
        // Trailing-slash keys are directory placeholders
        if self.key.ends_with('/') || !ctx.rules.matches(&self.key) {
            return Ok(JobOutcome::FilteredOut);
        }

        let target = LocalFs::prepare_download_path(&self.local_root, &self.key).await?;
        self.result_file = Some(target.clone());

        let remote_tag = match &self.content_tag {
            Some(tag) => Some(tag.clone()),
            None => ctx
                .store
                .head(&self.key)
                .await
                .ok()
                .and_then(|head| head.content_tag),
        };
        if let Some(tag) = remote_tag {
            if digest::same(&target, &tag).await {
                tracing::debug!(key = %self.key, "file already downloaded");
                return Ok(JobOutcome::Skipped);
            }
        }

        let bytes = ctx
            .store
            .get(&request_key(&self.key), &target)
            .await
            .map_err(|e| SyncError::transfer(ctx.store.display_path(&self.key), e))?;

        Ok(JobOutcome::Transferred { bytes })
    }
}

/// Delete one remote object.
#[derive(Debug, Clone)]
pub struct DeleteJob {
    pub key: String,
}

impl DeleteJob {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
        }
    }

    async fn execute(&mut self, ctx: &JobContext) -> SyncResult<JobOutcome> {
        ctx.store
            .delete(&self.key)
            .await
            .map_err(|e| SyncError::transfer(ctx.store.display_path(&self.key), e))?;
        Ok(JobOutcome::Deleted)
    }
}

/// Job kind without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Upload,
    Download,
    Delete,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Upload => write!(f, "upload"),
            JobKind::Download => write!(f, "download"),
            JobKind::Delete => write!(f, "delete"),
        }
    }
}

/// Any job the scheduler can run.
#[derive(Debug, Clone)]
pub enum SyncJob {
    Upload(UploadJob),
    Download(DownloadJob),
    Delete(DeleteJob),
}

impl SyncJob {
    /// Run one attempt.
    pub async fn execute(&mut self, ctx: &JobContext) -> SyncResult<JobOutcome> {
        match self {
            SyncJob::Upload(job) => job.execute(ctx).await,
            SyncJob::Download(job) => job.execute(ctx).await,
            SyncJob::Delete(job) => job.execute(ctx).await,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            SyncJob::Upload(_) => JobKind::Upload,
            SyncJob::Download(_) => JobKind::Download,
            SyncJob::Delete(_) => JobKind::Delete,
        }
    }

    /// The item this job reads from, for reporting.
    pub fn source(&self) -> String {
        match self {
            SyncJob::Upload(job) => job.local_file.to_string_lossy().into_owned(),
            SyncJob::Download(job) => job.key.clone(),
            SyncJob::Delete(job) => job.key.clone(),
        }
    }

    /// Where the job put its result, once known.
    ///
    /// Keys for uploads, slash-separated local paths for downloads. These are
    /// the entries of the run's success set.
    pub fn destination(&self) -> Option<String> {
        match self {
            SyncJob::Upload(job) => job.result_key.clone(),
            SyncJob::Download(job) => job.result_file.as_deref().map(slash_path),
            SyncJob::Delete(job) => Some(job.key.clone()),
        }
    }
}

/// Join a key prefix and a relative path with exactly one `/`.
pub fn join_key(prefix: &str, rel: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let rel = rel.trim_start_matches('/');
    match (prefix.is_empty(), rel.is_empty()) {
        (true, _) => rel.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{}/{}", prefix, rel),
    }
}

/// Key as sent in a retrieval request: spaces become `+`.
pub fn request_key(key: &str) -> String {
    key.replace(' ', "+")
}

/// Whether `key` already holds content with tag `tag`.
async fn already_uploaded(store: &dyn RemoteStore, key: &str, tag: &str) -> bool {
    match store.head(key).await {
        Ok(head) => head.content_tag.as_deref() == Some(tag),
        Err(_) => false,
    }
}
