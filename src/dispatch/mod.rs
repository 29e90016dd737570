//! Per-job dispatch workers.
//!
//! One worker task drains one job: it repeatedly selects the oldest
//! `queued` recipient, sends through the [`OutboundProvider`] under the
//! retry policies, and finalizes the job once nothing is left to drain.
//! Workers hold no durable state of their own — everything lives in the
//! [`JobStore`], which is what makes resume-after-crash possible.
//!
//! Single-flight per job is enforced twice: an in-memory [`ActiveJobs`]
//! registry makes a second launch in this process a no-op, and a durable
//! worker lease on the job row covers racing launches across restarts.

pub mod retry;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;
use crate::provider::{OutboundProvider, ProviderError};
use crate::store::{Job, JobCompletion, JobStatus, JobStore, Recipient, StoreError};

use self::retry::{run_classified, Backoff, RetryClass, RetryPolicy};

/// Consecutive tries for a single storage operation before the worker
/// gives up and exits (leaving durable state for the resume scan).
const STORAGE_RETRIES: u32 = 3;

// ── Errors ──────────────────────────────────────────────────────

/// Errors that stop a dispatch worker.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A storage operation kept failing past its retry budget.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why one send attempt failed — drives the retry classification.
#[derive(Debug, Error)]
enum AttemptError {
    /// The carrier rejected or could not be reached.
    #[error(transparent)]
    Provider(ProviderError),

    /// The store rejected the pre-send transition. Treated as transient:
    /// losing track of a recipient is worse than waiting out a hiccup.
    #[error(transparent)]
    Store(StoreError),
}

fn classify(err: &AttemptError) -> RetryClass {
    match err {
        AttemptError::Store(_) => RetryClass::Transient,
        AttemptError::Provider(e) if e.is_transient() => RetryClass::Transient,
        AttemptError::Provider(_) => RetryClass::Terminal,
    }
}

// ── Single-flight registry ──────────────────────────────────────

/// In-memory membership set of jobs with a live worker.
///
/// Clones share the same set. Registration hands out a guard that
/// removes the entry on drop, so membership is released on every exit
/// path including panics unwinding the worker task.
#[derive(Debug, Clone, Default)]
pub struct ActiveJobs {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl ActiveJobs {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. Returns `None` if a worker is already active for
    /// it, making a second launch a no-op.
    pub fn register(&self, job_id: &str) -> Option<ActiveJobGuard> {
        let mut set = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(job_id.to_owned()) {
            return None;
        }
        Some(ActiveJobGuard {
            inner: Arc::clone(&self.inner),
            job_id: job_id.to_owned(),
        })
    }

    /// Whether a worker is currently registered for the job.
    pub fn contains(&self, job_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(job_id)
    }
}

/// Membership token for one running worker. Dropping it releases the job.
#[derive(Debug)]
pub struct ActiveJobGuard {
    inner: Arc<Mutex<HashSet<String>>>,
    job_id: String,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

// ── Worker ──────────────────────────────────────────────────────

/// Everything a dispatch worker needs, shared across all workers of one
/// process.
pub struct WorkerContext {
    /// Durable job/recipient state.
    pub store: JobStore,
    /// Outbound carrier.
    pub provider: Arc<dyn OutboundProvider>,
    /// Worker tuning.
    pub dispatch: DispatchConfig,
    /// Delivery-status callback URL passed to the carrier, if any.
    pub callback_url: Option<String>,
    /// Process-unique token identifying this worker's durable leases.
    pub instance: String,
    /// In-memory single-flight registry.
    pub active: ActiveJobs,
}

impl WorkerContext {
    fn transient_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self
                .dispatch
                .max_attempts
                .saturating_add(self.dispatch.transient_extra_attempts),
            backoff: Backoff::Exponential {
                base: Duration::from_millis(self.dispatch.backoff_base_ms),
                cap: Duration::from_millis(self.dispatch.backoff_cap_ms),
            },
        }
    }

    fn terminal_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.dispatch.max_attempts,
            backoff: Backoff::Linear {
                step: Duration::from_millis(self.dispatch.terminal_backoff_step_ms),
            },
        }
    }
}

/// Run the dispatch worker for one job until the job is finalized or a
/// storage fault stops it.
///
/// Safe to call repeatedly for the same job: a second concurrent launch
/// is a no-op (membership set), as is a launch racing another process
/// (durable lease).
pub async fn run_worker(ctx: Arc<WorkerContext>, job_id: String) {
    let Some(_membership) = ctx.active.register(&job_id) else {
        debug!(%job_id, "worker already active, launch is a no-op");
        return;
    };

    let stale = chrono_duration(ctx.dispatch.lease_stale());
    match ctx.store.claim_job(&job_id, &ctx.instance, stale).await {
        Ok(true) => {}
        Ok(false) => {
            info!(%job_id, "job is leased by another worker, standing down");
            return;
        }
        Err(e) => {
            warn!(%job_id, error = %e, "could not claim job lease");
            return;
        }
    }

    if let Err(e) = drain_job(&ctx, &job_id).await {
        error!(%job_id, error = %e, "dispatch worker stopped early; resume will pick the job up");
    }

    if let Err(e) = ctx.store.release_job(&job_id, &ctx.instance).await {
        warn!(%job_id, error = %e, "failed to release job lease");
    }
}

/// Drain all queued recipients of a job, then finalize it.
async fn drain_job(ctx: &WorkerContext, job_id: &str) -> Result<(), DispatchError> {
    let job = with_storage_retry(ctx, || ctx.store.load_job(job_id)).await?;
    if job.status == JobStatus::Completed {
        debug!(job_id, "job already finalized");
        return Ok(());
    }
    info!(
        job_id,
        recipients = job.total_recipients,
        segments = job.total_segments,
        "dispatch worker draining job"
    );

    loop {
        let next = with_storage_retry(ctx, || ctx.store.next_queued_recipient(job_id)).await?;
        let Some(recipient) = next else { break };
        dispatch_recipient(ctx, &recipient).await?;
        tokio::time::sleep(ctx.dispatch.throttle()).await;
    }

    // This worker sends serially, so anything still in `sending` here is
    // a crashed attempt the resume sweep left alone (inside its grace
    // period). Finalizing now would price the job without it.
    let in_flight = with_storage_retry(ctx, || {
        ctx.store
            .list_recipients_by_job(job_id, Some(crate::store::RecipientStatus::Sending))
    })
    .await?;
    if !in_flight.is_empty() {
        warn!(
            job_id,
            in_flight = in_flight.len(),
            "recipients still marked sending; deferring finalization to a later resume"
        );
        return Ok(());
    }

    finalize_job(ctx, &job).await
}

/// Drive one recipient to a terminal state.
async fn dispatch_recipient(ctx: &WorkerContext, recipient: &Recipient) -> Result<(), DispatchError> {
    let transient = ctx.transient_policy();
    let terminal = ctx.terminal_policy();
    let attempts_made = u32::try_from(recipient.attempts.max(0)).unwrap_or(u32::MAX);

    let outcome = run_classified(&transient, &terminal, classify, attempts_made, |attempt| {
        let store = ctx.store.clone();
        let provider = Arc::clone(&ctx.provider);
        let recipient_id = recipient.id.clone();
        let to = recipient.address.clone();
        let body = recipient.body.clone();
        let callback = ctx.callback_url.clone();
        async move {
            // The sending transition must land before the carrier call:
            // a crash mid-call then shows an in-flight recipient instead
            // of one silently re-queued for a double send.
            store
                .mark_sending(&recipient_id, i64::from(attempt))
                .await
                .map_err(AttemptError::Store)?;
            provider
                .send(&to, &body, callback.as_deref())
                .await
                .map_err(AttemptError::Provider)
        }
    })
    .await;

    match outcome {
        Ok(message_id) => {
            with_storage_retry(ctx, || ctx.store.mark_sent(&recipient.id, &message_id)).await?;
            Ok(())
        }
        Err(AttemptError::Provider(e)) => {
            let message = e.to_string();
            warn!(
                recipient_id = %recipient.id,
                address = %recipient.address,
                error = %message,
                "recipient failed after exhausting retries"
            );
            with_storage_retry(ctx, || ctx.store.mark_failed(&recipient.id, &message)).await?;
            Ok(())
        }
        Err(AttemptError::Store(e)) => Err(DispatchError::Store(e)),
    }
}

/// Compute totals, refund the unused reservation, and mark the job
/// completed. Runs when no queued recipients remain; at most one caller
/// ever transitions the job.
async fn finalize_job(ctx: &WorkerContext, job: &Job) -> Result<(), DispatchError> {
    let (sent_segments, failed_segments) =
        with_storage_retry(ctx, || ctx.store.segment_totals(&job.id)).await?;
    let actual_mills = sent_segments.saturating_mul(job.price_per_segment);
    let refund_mills = job.reserved_mills.saturating_sub(actual_mills).max(0);

    let completion = JobCompletion {
        sent_segments,
        failed_segments,
        actual_mills,
        refund_mills,
        completed_at: Utc::now(),
    };
    let finalized =
        with_storage_retry(ctx, || ctx.store.complete_job(&job.id, &completion)).await?;

    if finalized {
        info!(
            job_id = %job.id,
            sent_segments,
            failed_segments,
            actual_mills,
            refund_mills,
            "job completed"
        );
    } else {
        debug!(job_id = %job.id, "job was already finalized");
    }
    Ok(())
}

/// Retry a storage operation a bounded number of times before giving up.
///
/// Storage trouble is treated as transient; if it persists the error is
/// returned and the worker exits, leaving durable state for resume.
async fn with_storage_retry<T, F, Fut>(ctx: &WorkerContext, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let mut tries = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tries = tries.saturating_add(1);
                if tries >= STORAGE_RETRIES {
                    return Err(e);
                }
                warn!(error = %e, tries, "storage operation failed, retrying");
                tokio::time::sleep(ctx.dispatch.storage_retry_delay()).await;
            }
        }
    }
}

/// Convert a std duration into a chrono one, saturating instead of
/// failing on out-of-range values.
pub fn chrono_duration(d: Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or_else(|_| ChronoDuration::MAX)
}
