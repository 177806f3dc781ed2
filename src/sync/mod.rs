//! Sync engine.
//!
//! One-way, convergent synchronization between a local directory and a
//! remote object store: scope filtering, change detection, bounded
//! concurrent transfer jobs and full-sync reconciliation.

pub mod digest;
pub mod engine;
pub mod job;
pub mod pattern;
pub mod reconcile;
pub mod scheduler;

pub use digest::{content_tag, same};
pub use engine::{Direction, JobFailure, SyncConfig, SyncReport, SyncStats, Syncer};
pub use job::{DeleteJob, DownloadJob, JobContext, JobKind, JobOutcome, SyncJob, UploadJob};
pub use pattern::{RemoteTarget, ScopeRule, ScopeRules, WildcardExpr};
pub use reconcile::{prune_local, PruneReport, Reconciler, SortedSuccessSet, SuccessSet};
pub use scheduler::{Completion, Concurrency, Scheduler};
