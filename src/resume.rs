//! Startup resumption of unfinished jobs.
//!
//! All dispatch state lives in the store, so resuming after a crash is a
//! scan, not a replay: re-queue recipients stranded in `sending` past
//! the grace period, then relaunch a worker for every job that never
//! finalized. Worker launch is idempotent (membership set + durable
//! lease), so running the scan twice is safe.

use tracing::info;

use crate::dispatch::chrono_duration;
use crate::engine::{Engine, EngineError};

/// What the startup scan found and did.
#[derive(Debug, Clone, Default)]
pub struct ResumeReport {
    /// Recipients moved from `sending` back to `queued`.
    pub requeued_sending: u64,
    /// Jobs a worker was relaunched for.
    pub jobs_relaunched: usize,
}

impl ResumeReport {
    /// Whether the scan found nothing to do.
    pub fn is_clean(&self) -> bool {
        self.requeued_sending == 0 && self.jobs_relaunched == 0
    }
}

/// Run the startup scan and relaunch workers for unfinished jobs.
///
/// A recipient found in `sending` is evidence of a crash mid-attempt;
/// once its lease is older than the configured grace period it goes back
/// to `queued`, accepting a possible duplicate send as the tolerated
/// failure mode. Jobs still `queued` — whether they have recipients left
/// or only a missed finalization — each get a worker.
///
/// # Errors
///
/// Returns [`EngineError`] on storage failure during the scan.
pub async fn resume_unfinished(engine: &Engine) -> Result<ResumeReport, EngineError> {
    let grace = chrono_duration(engine.config().dispatch.resume_requeue_grace());
    let requeued_sending = engine.store().requeue_stale_sending(grace).await?;
    if requeued_sending > 0 {
        info!(
            requeued = requeued_sending,
            "re-queued recipients stranded in sending"
        );
    }

    let jobs = engine.store().unfinished_jobs().await?;
    for job_id in &jobs {
        engine.spawn_worker(job_id.clone());
    }

    let report = ResumeReport {
        requeued_sending,
        jobs_relaunched: jobs.len(),
    };
    if report.is_clean() {
        info!("resume scan clean: no unfinished jobs");
    } else {
        info!(jobs = report.jobs_relaunched, "resume scan relaunched workers");
    }
    Ok(report)
}
