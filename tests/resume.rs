//! Tests for `src/resume.rs` — startup recovery of unfinished jobs.

#[path = "support/mod.rs"]
mod support;

use std::sync::Arc;

use courier::estimate::AcceptedRow;
use courier::resume::resume_unfinished;
use courier::store::{Job, JobStatus, RecipientStatus};

use support::{test_engine, wait_for_completion, MockCarrier};

fn accepted(address: &str, segments: i64) -> AcceptedRow {
    AcceptedRow {
        address: address.to_owned(),
        body: "hello".to_owned(),
        segments,
    }
}

#[tokio::test]
async fn a_clean_database_resumes_nothing() {
    let engine = test_engine(Arc::new(MockCarrier::new()), 10_000).await;
    let report = resume_unfinished(&engine).await.expect("resume");
    assert!(report.is_clean());
}

#[tokio::test]
async fn a_recipient_stranded_in_sending_is_driven_to_terminal() {
    let carrier = Arc::new(MockCarrier::new());
    let engine = test_engine(Arc::clone(&carrier), 10_000).await;

    // Simulate the pre-crash state: funds reserved, job persisted, one
    // recipient marked sending, no worker running.
    engine.ledger().reserve(50).await.expect("reserve");
    let job = Job::new(1, 1, 50, 50);
    engine
        .store()
        .create_job(&job, &[accepted("+919876500001", 1)])
        .await
        .expect("create");
    let recipient = engine
        .store()
        .next_queued_recipient(&job.id)
        .await
        .expect("query")
        .expect("queued");
    engine
        .store()
        .mark_sending(&recipient.id, 1)
        .await
        .expect("mark sending");

    let report = resume_unfinished(&engine).await.expect("resume");
    assert_eq!(report.requeued_sending, 1);
    assert_eq!(report.jobs_relaunched, 1);

    let completed = wait_for_completion(&engine, &job.id).await;
    assert_eq!(completed.status, JobStatus::Completed);

    let recipients = engine
        .store()
        .list_recipients_by_job(&job.id, None)
        .await
        .expect("list");
    assert_eq!(recipients[0].status, RecipientStatus::Sent);
    // Attempt 1 died with the crash; the resumed attempt is number 2.
    assert_eq!(recipients[0].attempts, 2);

    assert_eq!(engine.ledger().read().await.expect("read"), 9_950);
}

#[tokio::test]
async fn a_crash_after_the_last_recipient_still_finalizes_and_refunds() {
    let carrier = Arc::new(MockCarrier::new());
    let engine = test_engine(Arc::clone(&carrier), 10_000).await;

    // Pre-crash state: both recipients already terminal, but the process
    // died before finalization — the reservation is still held.
    engine.ledger().reserve(100).await.expect("reserve");
    let job = Job::new(2, 2, 100, 50);
    engine
        .store()
        .create_job(
            &job,
            &[accepted("+919876500001", 1), accepted("+919876500002", 1)],
        )
        .await
        .expect("create");
    let recipients = engine
        .store()
        .list_recipients_by_job(&job.id, None)
        .await
        .expect("list");
    engine
        .store()
        .mark_sent(&recipients[0].id, "SM-OLD")
        .await
        .expect("mark sent");
    engine
        .store()
        .mark_failed(&recipients[1].id, "boom")
        .await
        .expect("mark failed");

    // Two scans back to back: relaunch is idempotent and finalization
    // (with its refund) happens exactly once.
    resume_unfinished(&engine).await.expect("first resume");
    resume_unfinished(&engine).await.expect("second resume");

    let completed = wait_for_completion(&engine, &job.id).await;
    let completion = completed.completion.expect("totals");
    assert_eq!(completion.sent_segments, 1);
    assert_eq!(completion.failed_segments, 1);
    assert_eq!(completion.actual_mills, 50);
    assert_eq!(completion.refund_mills, 50);

    // 10_000 − 100 reserved + 50 refunded.
    assert_eq!(engine.ledger().read().await.expect("read"), 9_950);
    // No sends happened during recovery — both recipients were terminal.
    assert_eq!(carrier.call_count(), 0);
}

#[tokio::test]
async fn completed_jobs_are_not_relaunched() {
    let carrier = Arc::new(MockCarrier::new());
    let engine = test_engine(Arc::clone(&carrier), 10_000).await;

    let accepted_batch = engine
        .submit(&[support::row(&[("phone", "+919876500001")])], "hello")
        .await
        .expect("submit");
    wait_for_completion(&engine, &accepted_batch.job_id).await;

    let report = resume_unfinished(&engine).await.expect("resume");
    assert!(report.is_clean());
}
