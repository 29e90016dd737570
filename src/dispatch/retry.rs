//! Retry policies and the classified attempt runner.
//!
//! A [`RetryPolicy`] is just an attempt budget plus a backoff schedule;
//! [`run_classified`] drives an operation under two of them, picking the
//! policy per failure by a caller-supplied classifier. Policies are plain
//! data so the schedule is testable without running a worker.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Exponent ceiling for exponential backoff, well past any real cap.
const MAX_EXPONENT: u32 = 16;

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `step × attempt`.
    Linear {
        /// Increment added per attempt.
        step: Duration,
    },
    /// `base × 2^attempt`, bounded by `cap`.
    Exponential {
        /// Delay multiplied per attempt.
        base: Duration,
        /// Ceiling on any single wait.
        cap: Duration,
    },
}

/// An attempt budget with a backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed (including the first).
    pub max_attempts: u32,
    /// Wait schedule between attempts.
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempts_made`.
    pub fn allows(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay to wait after attempt number `attempt` fails.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Linear { step } => step.saturating_mul(attempt),
            Backoff::Exponential { base, cap } => {
                let factor = 2u32.saturating_pow(attempt.min(MAX_EXPONENT));
                base.saturating_mul(factor).min(cap)
            }
        }
    }
}

/// Which policy a failure falls under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Expected to succeed after a wait (rate limit, server fault).
    Transient,
    /// Not expected to improve; retried only within the baseline budget.
    Terminal,
}

/// Run `op` until it succeeds or its failure class runs out of budget.
///
/// `op` receives the absolute attempt number, continuing from
/// `attempts_made` (non-zero when resuming a recipient that already has
/// attempts on record). Each failure is classified and charged against
/// the matching policy; the attempt counter itself is shared, so mixed
/// failure classes cannot stretch the combined budget.
pub async fn run_classified<T, E, F, Fut>(
    transient: &RetryPolicy,
    terminal: &RetryPolicy,
    classify: impl Fn(&E) -> RetryClass,
    attempts_made: u32,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = attempts_made;
    loop {
        attempt = attempt.saturating_add(1);
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let policy = match classify(&err) {
                    RetryClass::Transient => transient,
                    RetryClass::Terminal => terminal,
                };
                if !policy.allows(attempt) {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                warn!(attempt, delay_ms = delay.as_millis(), error = %err, "attempt failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
