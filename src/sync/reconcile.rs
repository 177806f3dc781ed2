//! Full-sync reconciliation.
//!
//! After the transfer batch has drained, everything in scope on the
//! destination that was not part of this run's success set is removed.
//! The success set is collected by a single writer and then sealed into a
//! sorted, read-only form that answers membership by binary search.

use std::path::{Path, PathBuf};

use crate::fs::{slash_path, LocalFs};
use crate::sync::pattern::{ScopeRule, ScopeRules};

/// Paths or keys successfully transferred during the current run.
#[derive(Debug, Default)]
pub struct SuccessSet {
    entries: Vec<String>,
}

impl SuccessSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: String) {
        self.entries.push(entry);
    }

    /// Sort once and freeze.
    pub fn seal(mut self) -> SortedSuccessSet {
        self.entries.sort_unstable();
        self.entries.dedup();
        SortedSuccessSet {
            entries: self.entries,
        }
    }
}

/// Sorted, immutable success set.
#[derive(Debug, Clone)]
pub struct SortedSuccessSet {
    entries: Vec<String>,
}

impl SortedSuccessSet {
    /// Exact byte-wise membership.
    pub fn contains(&self, entry: &str) -> bool {
        self.entries
            .binary_search_by(|item| item.as_str().cmp(entry))
            .is_ok()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decides which destination items a full sync removes.
pub struct Reconciler<'a> {
    rules: ScopeRules,
    transferred: &'a SortedSuccessSet,
}

impl<'a> Reconciler<'a> {
    pub fn new(rules: ScopeRules, transferred: &'a SortedSuccessSet) -> Self {
        Self { rules, transferred }
    }

    /// In scope and not transferred this run.
    pub fn is_orphan(&self, item: &str) -> bool {
        self.rules.matches(item) && !self.transferred.contains(item)
    }

    /// Remote keys from one listing page that should be deleted.
    pub fn orphan_keys<'k, I>(&self, keys: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'k str>,
    {
        keys.into_iter()
            .filter(|key| self.is_orphan(key))
            .map(str::to_string)
            .collect()
    }
}

/// Result of pruning a local tree.
#[derive(Debug, Default, Clone)]
pub struct PruneReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

/// Local subtree that mirrors `key_prefix` under `local_root`.
pub fn local_scope_prefix(local_root: &Path, key_prefix: &str) -> String {
    let mut scope = local_root.to_path_buf();
    for part in key_prefix.split('/').filter(|p| !p.is_empty()) {
        scope.push(part);
    }
    slash_path(&scope)
}

/// Remove local files under the mirrored key prefix that were not downloaded.
///
/// Deletion is direct and best effort: failures are logged and the walk
/// continues. Walk errors are logged the same way.
pub fn prune_local(
    local_root: &Path,
    key_prefix: &str,
    rules: &ScopeRules,
    transferred: &SortedSuccessSet,
) -> PruneReport {
    let scoped = rules.with(ScopeRule::prefix(&local_scope_prefix(local_root, key_prefix)));
    let reconciler = Reconciler::new(scoped, transferred);
    let mut report = PruneReport::default();

    for entry in LocalFs::walk(local_root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "error walking local directory");
                continue;
            }
        };
        if entry.is_dir {
            continue;
        }
        if !reconciler.is_orphan(&slash_path(&entry.path)) {
            continue;
        }

        tracing::info!(file = %entry.path.display(), "removing unmatched local file");
        match LocalFs::remove_file(&entry.path) {
            Ok(()) => report.removed.push(entry.path),
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "could not remove local file");
                report.failed.push(entry.path);
            }
        }
    }

    report
}
