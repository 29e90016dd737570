//! Durable job and recipient records.
//!
//! Jobs and their recipients are the engine's only durable dispatch state:
//! a worker holds nothing but a cursor, which is what makes resumption
//! after a crash possible. Every mutation is a read-modify-write
//! transaction taken under the process-wide [`WriteGate`], so updates are
//! serialized and none are lost.
//!
//! Status enums persist as snake_case strings with `as_str`/`parse`
//! pairs; unknown stored values surface as [`StoreError::InvalidEnum`]
//! rather than being silently coerced.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::trace;
use uuid::Uuid;

use crate::db::{now_str, parse_ts, ts_str, WriteGate};
use crate::estimate::AcceptedRow;

// ── Errors ──────────────────────────────────────────────────────

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The requested job does not exist.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// The requested recipient does not exist.
    #[error("recipient not found: {0}")]
    RecipientNotFound(String),

    /// A stored enum column held an unrecognized value.
    #[error("invalid stored {field}: {value}")]
    InvalidEnum {
        /// Column the value came from.
        field: &'static str,
        /// The offending value.
        value: String,
    },
}

fn parse_opt_ts(s: Option<&str>) -> Option<DateTime<Utc>> {
    s.map(parse_ts)
}

// ── Statuses ────────────────────────────────────────────────────

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted for dispatch; its worker has not finalized it yet.
    Queued,
    /// Finalized: totals computed, unused reservation refunded. Terminal.
    Completed,
}

impl JobStatus {
    /// Returns the SQLite-stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Completed => "completed",
        }
    }

    /// Parse a string into a job status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidEnum`] if the string is unrecognized.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "queued" => Ok(Self::Queued),
            "completed" => Ok(Self::Completed),
            other => Err(StoreError::InvalidEnum {
                field: "job status",
                value: other.to_owned(),
            }),
        }
    }
}

/// Lifecycle status of a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    /// Waiting to be picked up by the drain loop.
    Queued,
    /// An attempt is in flight. The single-flight guard: the drain loop
    /// never selects a recipient at or past this state.
    Sending,
    /// Accepted by the carrier; a message id is recorded.
    Sent,
    /// All attempts exhausted, or the carrier reported a delivery failure.
    Failed,
    /// The carrier confirmed delivery.
    Delivered,
}

impl RecipientStatus {
    /// Returns the SQLite-stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Delivered => "delivered",
        }
    }

    /// Parse a string into a recipient status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidEnum`] if the string is unrecognized.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "queued" => Ok(Self::Queued),
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "delivered" => Ok(Self::Delivered),
            other => Err(StoreError::InvalidEnum {
                field: "recipient status",
                value: other.to_owned(),
            }),
        }
    }
}

// ── Records ─────────────────────────────────────────────────────

/// Totals recorded exactly once, at job finalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCompletion {
    /// Segments across recipients that reached `sent` or `delivered`.
    pub sent_segments: i64,
    /// Segments across recipients that ended `failed`.
    pub failed_segments: i64,
    /// `sent_segments × price_per_segment`, in mills.
    pub actual_mills: i64,
    /// Reservation returned to the ledger, in mills.
    pub refund_mills: i64,
    /// When the job was finalized.
    pub completed_at: DateTime<Utc>,
}

/// One dispatch job.
///
/// Mutated exactly twice — at creation and at finalization. Intermediate
/// progress is visible only through its recipients, keeping the job row
/// free of worker contention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier.
    pub id: String,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Number of accepted recipients.
    pub total_recipients: i64,
    /// Priced segments across all recipients.
    pub total_segments: i64,
    /// Mills debited from the ledger at acceptance.
    pub reserved_mills: i64,
    /// Per-segment price captured at creation time.
    pub price_per_segment: i64,
    /// Present iff the job is completed.
    pub completion: Option<JobCompletion>,
    /// When the job was accepted.
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Build a fresh queued job from batch totals.
    pub fn new(
        total_recipients: i64,
        total_segments: i64,
        reserved_mills: i64,
        price_per_segment: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Queued,
            total_recipients,
            total_segments,
            reserved_mills,
            price_per_segment,
            completion: None,
            created_at: Utc::now(),
        }
    }
}

/// One recipient of a job: the permanent audit record of a send attempt
/// sequence. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    /// Unique identifier.
    pub id: String,
    /// Owning job.
    pub job_id: String,
    /// FIFO position within the job.
    pub position: i64,
    /// Canonical destination address.
    pub address: String,
    /// Resolved message body.
    pub body: String,
    /// Priced segment count.
    pub segments: i64,
    /// Current lifecycle status.
    pub status: RecipientStatus,
    /// Attempts made so far.
    pub attempts: i64,
    /// When the last attempt started. Doubles as the `sending` lease
    /// timestamp consulted by the resume sweep.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When the carrier last accepted a send.
    pub last_sent_at: Option<DateTime<Utc>>,
    /// Carrier message identifier, once sent.
    pub provider_message_id: Option<String>,
    /// Last raw status string reported by the carrier.
    pub provider_status: Option<String>,
    /// Last error message, if any attempt failed.
    pub last_error: Option<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last mutated.
    pub updated_at: DateTime<Utc>,
}

/// Row type returned by SQLite queries for recipients.
type RecipientRow = (
    String,         // id
    String,         // job_id
    i64,            // position
    String,         // address
    String,         // body
    i64,            // segments
    String,         // status
    i64,            // attempts
    Option<String>, // last_attempt_at
    Option<String>, // last_sent_at
    Option<String>, // provider_message_id
    Option<String>, // provider_status
    Option<String>, // last_error
    String,         // created_at
    String,         // updated_at
);

const RECIPIENT_COLUMNS: &str = "id, job_id, position, address, body, segments, status, \
     attempts, last_attempt_at, last_sent_at, provider_message_id, provider_status, \
     last_error, created_at, updated_at";

fn recipient_from_row(row: RecipientRow) -> Result<Recipient, StoreError> {
    Ok(Recipient {
        id: row.0,
        job_id: row.1,
        position: row.2,
        address: row.3,
        body: row.4,
        segments: row.5,
        status: RecipientStatus::parse(&row.6)?,
        attempts: row.7,
        last_attempt_at: parse_opt_ts(row.8.as_deref()),
        last_sent_at: parse_opt_ts(row.9.as_deref()),
        provider_message_id: row.10,
        provider_status: row.11,
        last_error: row.12,
        created_at: parse_ts(&row.13),
        updated_at: parse_ts(&row.14),
    })
}

/// Row type returned by SQLite queries for jobs.
type JobRow = (
    String,         // id
    String,         // status
    i64,            // total_recipients
    i64,            // total_segments
    i64,            // reserved_mills
    i64,            // price_per_segment
    Option<i64>,    // sent_segments
    Option<i64>,    // failed_segments
    Option<i64>,    // actual_mills
    Option<i64>,    // refund_mills
    Option<String>, // completed_at
    String,         // created_at
);

const JOB_COLUMNS: &str = "id, status, total_recipients, total_segments, reserved_mills, \
     price_per_segment, sent_segments, failed_segments, actual_mills, refund_mills, \
     completed_at, created_at";

fn job_from_row(row: JobRow) -> Result<Job, StoreError> {
    let status = JobStatus::parse(&row.1)?;
    let completion = match status {
        JobStatus::Queued => None,
        JobStatus::Completed => Some(JobCompletion {
            sent_segments: row.6.unwrap_or(0),
            failed_segments: row.7.unwrap_or(0),
            actual_mills: row.8.unwrap_or(0),
            refund_mills: row.9.unwrap_or(0),
            completed_at: row.10.as_deref().map(parse_ts).unwrap_or_else(Utc::now),
        }),
    };
    Ok(Job {
        id: row.0,
        status,
        total_recipients: row.2,
        total_segments: row.3,
        reserved_mills: row.4,
        price_per_segment: row.5,
        completion,
        created_at: parse_ts(&row.11),
    })
}

// ── Store ───────────────────────────────────────────────────────

/// Handle over the jobs and recipients tables.
#[derive(Debug, Clone)]
pub struct JobStore {
    pool: SqlitePool,
    gate: WriteGate,
}

impl JobStore {
    /// Build a store over an open pool, sharing the process write gate.
    pub fn new(pool: SqlitePool, gate: WriteGate) -> Self {
        Self { pool, gate }
    }

    /// Insert a job and all of its recipients in one transaction.
    ///
    /// Recipients enter in `queued` status, positioned in input order —
    /// the order the drain loop will attempt them in.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure; nothing is
    /// inserted in that case.
    pub async fn create_job(&self, job: &Job, rows: &[AcceptedRow]) -> Result<(), StoreError> {
        let _guard = self.gate.acquire().await;
        let mut tx = self.pool.begin().await?;
        let now = now_str();

        sqlx::query(
            "INSERT INTO jobs (id, status, total_recipients, total_segments, reserved_mills, \
             price_per_segment, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&job.id)
        .bind(job.status.as_str())
        .bind(job.total_recipients)
        .bind(job.total_segments)
        .bind(job.reserved_mills)
        .bind(job.price_per_segment)
        .bind(ts_str(job.created_at))
        .execute(&mut *tx)
        .await?;

        for (idx, row) in rows.iter().enumerate() {
            let position = i64::try_from(idx).unwrap_or(i64::MAX);
            sqlx::query(
                "INSERT INTO recipients (id, job_id, position, address, body, segments, \
                 status, attempts, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&job.id)
            .bind(position)
            .bind(&row.address)
            .bind(&row.body)
            .bind(row.segments)
            .bind(RecipientStatus::Queued.as_str())
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        trace!(job_id = %job.id, recipients = rows.len(), "job created");
        Ok(())
    }

    /// Load a job by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`] if no job matches.
    pub async fn load_job(&self, job_id: &str) -> Result<Job, StoreError> {
        let row: JobRow =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| StoreError::JobNotFound(job_id.to_owned()))?;
        job_from_row(row)
    }

    /// Load a job together with all of its recipients, FIFO order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`] if no job matches.
    pub async fn job_snapshot(&self, job_id: &str) -> Result<(Job, Vec<Recipient>), StoreError> {
        let job = self.load_job(job_id).await?;
        let recipients = self.list_recipients_by_job(job_id, None).await?;
        Ok((job, recipients))
    }

    /// List a job's recipients in FIFO order, optionally filtered by
    /// status. Drives both the drain loop and the resumption scan.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn list_recipients_by_job(
        &self,
        job_id: &str,
        status: Option<RecipientStatus>,
    ) -> Result<Vec<Recipient>, StoreError> {
        let rows: Vec<RecipientRow> = match status {
            Some(status) => {
                sqlx::query_as(&format!(
                    "SELECT {RECIPIENT_COLUMNS} FROM recipients \
                     WHERE job_id = ?1 AND status = ?2 ORDER BY position"
                ))
                .bind(job_id)
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {RECIPIENT_COLUMNS} FROM recipients \
                     WHERE job_id = ?1 ORDER BY position"
                ))
                .bind(job_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(recipient_from_row).collect()
    }

    /// The oldest `queued` recipient of a job, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn next_queued_recipient(
        &self,
        job_id: &str,
    ) -> Result<Option<Recipient>, StoreError> {
        let row: Option<RecipientRow> = sqlx::query_as(&format!(
            "SELECT {RECIPIENT_COLUMNS} FROM recipients \
             WHERE job_id = ?1 AND status = ?2 ORDER BY position LIMIT 1"
        ))
        .bind(job_id)
        .bind(RecipientStatus::Queued.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(recipient_from_row).transpose()
    }

    /// Transition a recipient to `sending` and record the attempt.
    ///
    /// This is the single-flight guard and must run *before* the carrier
    /// call: a crash mid-call leaves the recipient visibly in flight
    /// instead of silently re-queued for a double send.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RecipientNotFound`] if no recipient matches.
    pub async fn mark_sending(&self, recipient_id: &str, attempts: i64) -> Result<(), StoreError> {
        let _guard = self.gate.acquire().await;
        let now = now_str();
        let updated = sqlx::query(
            "UPDATE recipients SET status = ?1, attempts = ?2, last_attempt_at = ?3, \
             updated_at = ?3 WHERE id = ?4",
        )
        .bind(RecipientStatus::Sending.as_str())
        .bind(attempts)
        .bind(&now)
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::RecipientNotFound(recipient_id.to_owned()));
        }
        Ok(())
    }

    /// Record a successful carrier accept: message id, `sent` status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RecipientNotFound`] if no recipient matches.
    pub async fn mark_sent(
        &self,
        recipient_id: &str,
        provider_message_id: &str,
    ) -> Result<(), StoreError> {
        let _guard = self.gate.acquire().await;
        let now = now_str();
        let updated = sqlx::query(
            "UPDATE recipients SET status = ?1, provider_message_id = ?2, last_sent_at = ?3, \
             last_error = NULL, updated_at = ?3 WHERE id = ?4",
        )
        .bind(RecipientStatus::Sent.as_str())
        .bind(provider_message_id)
        .bind(&now)
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::RecipientNotFound(recipient_id.to_owned()));
        }
        trace!(recipient_id, provider_message_id, "recipient sent");
        Ok(())
    }

    /// Terminal failure: all attempts exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RecipientNotFound`] if no recipient matches.
    pub async fn mark_failed(&self, recipient_id: &str, error: &str) -> Result<(), StoreError> {
        let _guard = self.gate.acquire().await;
        let updated = sqlx::query(
            "UPDATE recipients SET status = ?1, last_error = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(RecipientStatus::Failed.as_str())
        .bind(error)
        .bind(now_str())
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::RecipientNotFound(recipient_id.to_owned()));
        }
        Ok(())
    }

    /// Patch a recipient from a delivery receipt: always records the raw
    /// carrier status, optionally moves the lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RecipientNotFound`] if no recipient matches.
    pub async fn apply_delivery(
        &self,
        recipient_id: &str,
        status: Option<RecipientStatus>,
        provider_status: &str,
    ) -> Result<(), StoreError> {
        let _guard = self.gate.acquire().await;
        let now = now_str();
        let updated = match status {
            Some(status) => {
                sqlx::query(
                    "UPDATE recipients SET status = ?1, provider_status = ?2, updated_at = ?3 \
                     WHERE id = ?4",
                )
                .bind(status.as_str())
                .bind(provider_status)
                .bind(&now)
                .bind(recipient_id)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE recipients SET provider_status = ?1, updated_at = ?2 WHERE id = ?3",
                )
                .bind(provider_status)
                .bind(&now)
                .bind(recipient_id)
                .execute(&self.pool)
                .await?
            }
        };
        if updated.rows_affected() == 0 {
            return Err(StoreError::RecipientNotFound(recipient_id.to_owned()));
        }
        Ok(())
    }

    /// Find a recipient by carrier message id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn find_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Recipient>, StoreError> {
        let row: Option<RecipientRow> = sqlx::query_as(&format!(
            "SELECT {RECIPIENT_COLUMNS} FROM recipients WHERE provider_message_id = ?1 LIMIT 1"
        ))
        .bind(provider_message_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(recipient_from_row).transpose()
    }

    /// First recipient at `address` still in `queued`, `sending`, or
    /// `sent`, by store iteration order. The delivery-receipt fallback
    /// when no message id matches.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn find_active_by_address(
        &self,
        address: &str,
    ) -> Result<Option<Recipient>, StoreError> {
        let row: Option<RecipientRow> = sqlx::query_as(&format!(
            "SELECT {RECIPIENT_COLUMNS} FROM recipients \
             WHERE address = ?1 AND status IN ('queued', 'sending', 'sent') \
             ORDER BY rowid LIMIT 1"
        ))
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        row.map(recipient_from_row).transpose()
    }

    /// Sum a job's segments into (sent-or-delivered, failed) totals.
    ///
    /// Derived from the rows rather than carried in worker memory, so a
    /// resumed worker finalizes correctly without replaying history.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn segment_totals(&self, job_id: &str) -> Result<(i64, i64), StoreError> {
        let row: (i64, i64) = sqlx::query_as(
            "SELECT \
             COALESCE(SUM(CASE WHEN status IN ('sent', 'delivered') THEN segments END), 0), \
             COALESCE(SUM(CASE WHEN status = 'failed' THEN segments END), 0) \
             FROM recipients WHERE job_id = ?1",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Finalize a job and credit its refund back to the ledger, in one
    /// transaction. Returns `false` if the job was already completed —
    /// finalization (and therefore the refund) runs at most once.
    ///
    /// The job update and the ledger credit commit together: there is no
    /// window where a job is completed but its unused reservation is
    /// still debited.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure; nothing is
    /// applied in that case.
    pub async fn complete_job(
        &self,
        job_id: &str,
        completion: &JobCompletion,
    ) -> Result<bool, StoreError> {
        let _guard = self.gate.acquire().await;
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE jobs SET status = ?1, sent_segments = ?2, failed_segments = ?3, \
             actual_mills = ?4, refund_mills = ?5, completed_at = ?6, \
             worker_lease = NULL, lease_at = NULL \
             WHERE id = ?7 AND status = ?8",
        )
        .bind(JobStatus::Completed.as_str())
        .bind(completion.sent_segments)
        .bind(completion.failed_segments)
        .bind(completion.actual_mills)
        .bind(completion.refund_mills)
        .bind(ts_str(completion.completed_at))
        .bind(job_id)
        .bind(JobStatus::Queued.as_str())
        .execute(&mut *tx)
        .await?;

        let finalized = updated.rows_affected() > 0;
        if finalized && completion.refund_mills > 0 {
            sqlx::query(
                "UPDATE ledger SET balance_mills = balance_mills + ?1, updated_at = ?2 \
                 WHERE id = 1",
            )
            .bind(completion.refund_mills)
            .bind(now_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(finalized)
    }

    /// Ids of every job not yet finalized, oldest first.
    ///
    /// Any job still `queued` is unfinished: it either has recipients
    /// left to drain or crashed before finalization — both need a worker.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn unfinished_jobs(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM jobs WHERE status = ?1 ORDER BY created_at")
                .bind(JobStatus::Queued.as_str())
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Re-queue `sending` recipients whose lease timestamp is older than
    /// `grace`. Returns how many were re-queued.
    ///
    /// Run by the resume sweep at startup. Accepts a possible duplicate
    /// send as the tolerated failure mode for an attempt that was in
    /// flight when the process died.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn requeue_stale_sending(&self, grace: ChronoDuration) -> Result<u64, StoreError> {
        let _guard = self.gate.acquire().await;
        // A grace too large to subtract means "never requeue": the MIN
        // cutoff compares below every stored timestamp.
        let cutoff = Utc::now()
            .checked_sub_signed(grace)
            .map_or_else(|| ts_str(DateTime::<Utc>::MIN_UTC), ts_str);
        let updated = sqlx::query(
            "UPDATE recipients SET status = ?1, updated_at = ?2 \
             WHERE status = ?3 AND (last_attempt_at IS NULL OR last_attempt_at <= ?4)",
        )
        .bind(RecipientStatus::Queued.as_str())
        .bind(now_str())
        .bind(RecipientStatus::Sending.as_str())
        .bind(&cutoff)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected())
    }

    /// Claim a job's durable worker lease. Returns `true` on success.
    ///
    /// The lease is claimable when absent, already held by `token`, or
    /// older than `stale_after`. Backs the in-memory single-flight set
    /// across restarts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`] if no job matches.
    pub async fn claim_job(
        &self,
        job_id: &str,
        token: &str,
        stale_after: ChronoDuration,
    ) -> Result<bool, StoreError> {
        let _guard = self.gate.acquire().await;
        let mut tx = self.pool.begin().await?;
        let row: Option<(Option<String>, Option<String>)> =
            sqlx::query_as("SELECT worker_lease, lease_at FROM jobs WHERE id = ?1")
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await?;
        let (lease, lease_at) = row.ok_or_else(|| StoreError::JobNotFound(job_id.to_owned()))?;

        let claimable = match (lease.as_deref(), lease_at.as_deref()) {
            (None, _) => true,
            (Some(holder), _) if holder == token => true,
            (Some(_), Some(at)) => {
                let age = Utc::now().signed_duration_since(parse_ts(at));
                age > stale_after
            }
            (Some(_), None) => true,
        };
        if !claimable {
            return Ok(false);
        }

        sqlx::query("UPDATE jobs SET worker_lease = ?1, lease_at = ?2 WHERE id = ?3")
            .bind(token)
            .bind(now_str())
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        trace!(job_id, token, "worker lease claimed");
        Ok(true)
    }

    /// Release a job's worker lease if `token` still holds it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn release_job(&self, job_id: &str, token: &str) -> Result<(), StoreError> {
        let _guard = self.gate.acquire().await;
        sqlx::query(
            "UPDATE jobs SET worker_lease = NULL, lease_at = NULL \
             WHERE id = ?1 AND worker_lease = ?2",
        )
        .bind(job_id)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
