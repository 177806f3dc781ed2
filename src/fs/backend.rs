use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// Number of keys requested per listing page.
pub const DEFAULT_PAGE_LIMIT: usize = 1000;

/// A single object returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub key: String,
    /// Content tag (ETag) as reported by the store, quotes included.
    pub content_tag: Option<String>,
}

impl ListEntry {
    pub fn new(key: impl Into<String>, content_tag: Option<String>) -> Self {
        Self {
            key: key.into(),
            content_tag,
        }
    }
}

/// One page of a lexically sorted listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<ListEntry>,
    /// More keys remain after the last entry of this page.
    pub truncated: bool,
}

impl ListPage {
    /// Continuation marker for the next request.
    pub fn next_marker(&self) -> Option<&str> {
        if self.truncated {
            self.entries.last().map(|e| e.key.as_str())
        } else {
            None
        }
    }
}

/// Metadata returned by a head request.
#[derive(Debug, Clone, Default)]
pub struct ObjectHead {
    pub content_tag: Option<String>,
    pub content_length: u64,
}

/// Options for a put request.
///
/// Uploaded objects are private: no canned ACL is sent, so S3 applies
/// the owner-only default.
#[derive(Debug, Clone)]
pub struct PutOptions {
    pub content_type: String,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            content_type: "application/octet-stream".to_string(),
        }
    }
}

/// Object store operations consumed by the sync engine.
///
/// Keys passed to [`RemoteStore::get`] are request keys: spaces have been
/// replaced by `+` and implementations decode them form-style.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List keys under `prefix` strictly after `marker`, at most `limit` per page.
    async fn list(&self, prefix: &str, marker: Option<&str>, limit: usize) -> Result<ListPage>;

    /// Stream an object into `dest`, truncating it first. Returns the bytes written.
    async fn get(&self, request_key: &str, dest: &Path) -> Result<u64>;

    /// Stream the content of `src` into `key`. Returns the bytes sent.
    async fn put(&self, key: &str, src: &Path, options: &PutOptions) -> Result<u64>;

    /// Fetch object metadata.
    async fn head(&self, key: &str) -> Result<ObjectHead>;

    /// Remove an object. Missing keys are reported as errors.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Make sure the bucket is reachable, creating it when it does not exist.
    async fn ensure_bucket(&self) -> Result<()>;

    /// Human readable location, e.g. `s3://bucket/key`.
    fn display_path(&self, key: &str) -> String;
}

/// Decode a request key back into the stored key (`+` means space).
pub fn decode_request_key(request_key: &str) -> String {
    request_key.replace('+', " ")
}
