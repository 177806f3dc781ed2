//! Bounded-concurrency job scheduler.
//!
//! `submit` spawns each job as its own task and returns once the task is
//! running. With a bound of `n`, submission first waits for one of `n`
//! semaphore permits, which throttles whatever loop feeds the scheduler.
//! `drain` hands back completions in the order they finish.
//!
//! Every submission yields exactly one completion: the permit lives inside
//! the task and the completion is sent after the job's retry loop, even
//! when the job panics.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};

use crate::error::SyncError;
use crate::sync::job::{JobContext, JobOutcome, SyncJob};

/// Default number of jobs allowed to run at once.
pub const DEFAULT_CONCURRENCY: usize = 20;

/// Concurrency limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    /// At most `n` jobs run at once.
    Bounded(usize),
    /// No limit.
    Unbounded,
}

impl Concurrency {
    /// Interpret a user supplied limit; zero or negative means unbounded.
    pub fn from_limit(limit: i64) -> Self {
        if limit <= 0 {
            Concurrency::Unbounded
        } else {
            Concurrency::Bounded(limit as usize)
        }
    }
}

impl Default for Concurrency {
    fn default() -> Self {
        Concurrency::Bounded(DEFAULT_CONCURRENCY)
    }
}

/// A finished job.
#[derive(Debug)]
pub struct Completion {
    /// The job, with its realized destination filled in.
    pub job: SyncJob,
    /// Attempts made, at least one.
    pub attempts: u32,
    pub result: Result<JobOutcome, SyncError>,
}

impl Completion {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Outcome of a successful job.
    pub fn outcome(&self) -> Option<JobOutcome> {
        self.result.as_ref().ok().copied()
    }
}

pub struct Scheduler {
    ctx: Arc<JobContext>,
    permits: Option<Arc<Semaphore>>,
    max_attempts: u32,
    done_tx: mpsc::UnboundedSender<Completion>,
    done_rx: mpsc::UnboundedReceiver<Completion>,
    in_flight: usize,
}

impl Scheduler {
    /// Create a scheduler running jobs against `ctx`.
    ///
    /// `max_attempts` is clamped to at least one.
    pub fn new(ctx: Arc<JobContext>, concurrency: Concurrency, max_attempts: u32) -> Self {
        let permits = match concurrency {
            Concurrency::Bounded(n) => {
                Some(Arc::new(Semaphore::new(n.clamp(1, Semaphore::MAX_PERMITS))))
            }
            Concurrency::Unbounded => None,
        };
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        Self {
            ctx,
            permits,
            max_attempts: max_attempts.max(1),
            done_tx,
            done_rx,
            in_flight: 0,
        }
    }

    /// Start `job`, waiting for a free slot when the bound is reached.
    pub async fn submit(&mut self, job: SyncJob) {
        let permit = match &self.permits {
            // The semaphore is never closed, so acquisition only fails on misuse
            Some(semaphore) => semaphore.clone().acquire_owned().await.ok(),
            None => None,
        };

        let ctx = self.ctx.clone();
        let done_tx = self.done_tx.clone();
        let max_attempts = self.max_attempts;
        self.in_flight += 1;

        tokio::spawn(async move {
            let completion = run_with_retries(job, &ctx, max_attempts, permit).await;
            // The receiver lives as long as the scheduler; a closed channel
            // means nobody is waiting for the result anymore.
            let _ = done_tx.send(completion);
        });
    }

    /// Wait for the next job to finish.
    ///
    /// Returns `None` once every submitted job has been drained.
    pub async fn drain(&mut self) -> Option<Completion> {
        if self.in_flight == 0 {
            return None;
        }
        let completion = self.done_rx.recv().await?;
        self.in_flight -= 1;
        Some(completion)
    }

    /// Drain every outstanding job.
    pub async fn drain_all(&mut self) -> Vec<Completion> {
        let mut completions = Vec::with_capacity(self.in_flight);
        while let Some(completion) = self.drain().await {
            completions.push(completion);
        }
        completions
    }

    /// Jobs submitted but not yet drained.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Execute `job` until it succeeds, fails permanently or runs out of attempts.
///
/// The permit is dropped when this returns, on every path.
async fn run_with_retries(
    mut job: SyncJob,
    ctx: &JobContext,
    max_attempts: u32,
    _permit: Option<OwnedSemaphorePermit>,
) -> Completion {
    let mut attempts = 0;
    let result = loop {
        attempts += 1;
        let attempt = AssertUnwindSafe(job.execute(ctx)).catch_unwind().await;
        match attempt {
            Ok(Ok(outcome)) => break Ok(outcome),
            Ok(Err(err)) => {
                if !err.is_retryable() || attempts >= max_attempts {
                    break Err(err);
                }
                tracing::warn!(
                    kind = %job.kind(),
                    source = %job.source(),
                    attempt = attempts,
                    error = %err,
                    "job failed, retrying"
                );
            }
            Err(panic) => break Err(SyncError::Fault(panic_message(panic.as_ref()))),
        }
    };

    Completion {
        job,
        attempts,
        result,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "job panicked".to_string()
    }
}
