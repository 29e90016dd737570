//! Tests for `src/store.rs` — durable jobs and recipients.

#[path = "support/mod.rs"]
mod support;

use chrono::Duration as ChronoDuration;

use courier::db::WriteGate;
use courier::estimate::AcceptedRow;
use courier::ledger::Ledger;
use courier::store::{Job, JobCompletion, JobStatus, JobStore, RecipientStatus, StoreError};

use support::memory_pool;

fn accepted(address: &str, segments: i64) -> AcceptedRow {
    AcceptedRow {
        address: address.to_owned(),
        body: "hello".to_owned(),
        segments,
    }
}

async fn store_with_job(rows: &[AcceptedRow]) -> (JobStore, Job) {
    let pool = memory_pool().await;
    let store = JobStore::new(pool, WriteGate::new());
    let total_segments = rows.iter().map(|r| r.segments).sum();
    let job = Job::new(
        i64::try_from(rows.len()).expect("row count fits"),
        total_segments,
        total_segments.saturating_mul(50),
        50,
    );
    store.create_job(&job, rows).await.expect("job should insert");
    (store, job)
}

#[tokio::test]
async fn create_job_inserts_recipients_queued_in_fifo_order() {
    let rows = vec![
        accepted("+919876500001", 1),
        accepted("+919876500002", 2),
        accepted("+919876500003", 1),
    ];
    let (store, job) = store_with_job(&rows).await;

    let recipients = store
        .list_recipients_by_job(&job.id, None)
        .await
        .expect("list should succeed");
    assert_eq!(recipients.len(), 3);
    let addresses: Vec<_> = recipients.iter().map(|r| r.address.as_str()).collect();
    assert_eq!(
        addresses,
        vec!["+919876500001", "+919876500002", "+919876500003"]
    );
    assert!(recipients
        .iter()
        .all(|r| r.status == RecipientStatus::Queued && r.attempts == 0));

    let loaded = store.load_job(&job.id).await.expect("job should load");
    assert_eq!(loaded.status, JobStatus::Queued);
    assert!(loaded.completion.is_none());
    assert_eq!(loaded.total_segments, 4);
}

#[tokio::test]
async fn next_queued_recipient_returns_the_oldest() {
    let rows = vec![accepted("+919876500001", 1), accepted("+919876500002", 1)];
    let (store, job) = store_with_job(&rows).await;

    let first = store
        .next_queued_recipient(&job.id)
        .await
        .expect("query should succeed")
        .expect("a recipient should be queued");
    assert_eq!(first.address, "+919876500001");

    store
        .mark_sending(&first.id, 1)
        .await
        .expect("mark should succeed");
    let second = store
        .next_queued_recipient(&job.id)
        .await
        .expect("query should succeed")
        .expect("a recipient should be queued");
    assert_eq!(second.address, "+919876500002");
}

#[tokio::test]
async fn sending_then_sent_round_trips_all_fields() {
    let (store, job) = store_with_job(&[accepted("+919876500001", 1)]).await;
    let recipient = store
        .next_queued_recipient(&job.id)
        .await
        .expect("query")
        .expect("queued recipient");

    store
        .mark_sending(&recipient.id, 1)
        .await
        .expect("mark sending");
    let in_flight = &store
        .list_recipients_by_job(&job.id, Some(RecipientStatus::Sending))
        .await
        .expect("list")[0];
    assert_eq!(in_flight.attempts, 1);
    assert!(in_flight.last_attempt_at.is_some());

    store
        .mark_sent(&recipient.id, "SM00000001")
        .await
        .expect("mark sent");
    let sent = &store
        .list_recipients_by_job(&job.id, Some(RecipientStatus::Sent))
        .await
        .expect("list")[0];
    assert_eq!(sent.provider_message_id.as_deref(), Some("SM00000001"));
    assert!(sent.last_sent_at.is_some());
    assert!(sent.last_error.is_none());
}

#[tokio::test]
async fn mark_failed_records_the_last_error() {
    let (store, job) = store_with_job(&[accepted("+919876500001", 1)]).await;
    let recipient = store
        .next_queued_recipient(&job.id)
        .await
        .expect("query")
        .expect("queued recipient");

    store
        .mark_failed(&recipient.id, "carrier returned status 400: bad number")
        .await
        .expect("mark failed");
    let failed = &store
        .list_recipients_by_job(&job.id, Some(RecipientStatus::Failed))
        .await
        .expect("list")[0];
    assert_eq!(
        failed.last_error.as_deref(),
        Some("carrier returned status 400: bad number")
    );
}

#[tokio::test]
async fn unknown_recipient_updates_are_reported() {
    let (store, _job) = store_with_job(&[accepted("+919876500001", 1)]).await;
    let err = store
        .mark_sent("no-such-id", "SM0")
        .await
        .expect_err("update should fail");
    assert!(matches!(err, StoreError::RecipientNotFound(_)));
}

#[tokio::test]
async fn address_lookup_skips_terminal_recipients() {
    let rows = vec![accepted("+919876500001", 1), accepted("+919876500001", 1)];
    let (store, job) = store_with_job(&rows).await;
    let recipients = store
        .list_recipients_by_job(&job.id, None)
        .await
        .expect("list");

    store
        .mark_failed(&recipients[0].id, "boom")
        .await
        .expect("mark failed");

    let found = store
        .find_active_by_address("+919876500001")
        .await
        .expect("lookup")
        .expect("second recipient is still active");
    assert_eq!(found.id, recipients[1].id);
}

#[tokio::test]
async fn segment_totals_split_sent_and_failed() {
    let rows = vec![
        accepted("+919876500001", 2),
        accepted("+919876500002", 3),
        accepted("+919876500003", 1),
    ];
    let (store, job) = store_with_job(&rows).await;
    let recipients = store
        .list_recipients_by_job(&job.id, None)
        .await
        .expect("list");

    store
        .mark_sent(&recipients[0].id, "SM1")
        .await
        .expect("sent");
    store
        .apply_delivery(&recipients[1].id, Some(RecipientStatus::Delivered), "delivered")
        .await
        .expect("delivered");
    store
        .mark_failed(&recipients[2].id, "boom")
        .await
        .expect("failed");

    let (sent, failed) = store.segment_totals(&job.id).await.expect("totals");
    assert_eq!(sent, 5); // sent + delivered both count as dispatched
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn complete_job_refunds_exactly_once() {
    let pool = memory_pool().await;
    let gate = WriteGate::new();
    let ledger = Ledger::open(pool.clone(), gate.clone(), 1_000)
        .await
        .expect("ledger");
    let store = JobStore::new(pool, gate);

    ledger.reserve(100).await.expect("reserve");
    let job = Job::new(1, 2, 100, 50);
    store
        .create_job(&job, &[accepted("+919876500001", 2)])
        .await
        .expect("create");

    let completion = JobCompletion {
        sent_segments: 1,
        failed_segments: 1,
        actual_mills: 50,
        refund_mills: 50,
        completed_at: chrono::Utc::now(),
    };
    assert!(store
        .complete_job(&job.id, &completion)
        .await
        .expect("first completion"));
    // A second finalization must not double-refund.
    assert!(!store
        .complete_job(&job.id, &completion)
        .await
        .expect("second completion"));

    assert_eq!(ledger.read().await.expect("read"), 950);

    let loaded = store.load_job(&job.id).await.expect("load");
    assert_eq!(loaded.status, JobStatus::Completed);
    let recorded = loaded.completion.expect("completion should be present");
    assert_eq!(recorded.sent_segments, 1);
    assert_eq!(recorded.refund_mills, 50);
}

#[tokio::test]
async fn unfinished_jobs_lists_only_queued_jobs() {
    let pool = memory_pool().await;
    let store = JobStore::new(pool, WriteGate::new());

    let open_job = Job::new(1, 1, 50, 50);
    store
        .create_job(&open_job, &[accepted("+919876500001", 1)])
        .await
        .expect("create");
    let done_job = Job::new(1, 1, 50, 50);
    store
        .create_job(&done_job, &[accepted("+919876500002", 1)])
        .await
        .expect("create");
    let completion = JobCompletion {
        sent_segments: 1,
        failed_segments: 0,
        actual_mills: 50,
        refund_mills: 0,
        completed_at: chrono::Utc::now(),
    };
    store
        .complete_job(&done_job.id, &completion)
        .await
        .expect("complete");

    let unfinished = store.unfinished_jobs().await.expect("scan");
    assert_eq!(unfinished, vec![open_job.id]);
}

#[tokio::test]
async fn stale_sending_recipients_requeue() {
    let (store, job) = store_with_job(&[accepted("+919876500001", 1)]).await;
    let recipient = store
        .next_queued_recipient(&job.id)
        .await
        .expect("query")
        .expect("queued");
    store
        .mark_sending(&recipient.id, 1)
        .await
        .expect("mark sending");

    // Zero grace: anything in `sending` is stale.
    let requeued = store
        .requeue_stale_sending(ChronoDuration::zero())
        .await
        .expect("sweep");
    assert_eq!(requeued, 1);

    let back = store
        .next_queued_recipient(&job.id)
        .await
        .expect("query")
        .expect("recipient should be queued again");
    assert_eq!(back.id, recipient.id);
    assert_eq!(back.attempts, 1); // the attempt already made stays counted
}

#[tokio::test]
async fn fresh_sending_leases_survive_the_sweep() {
    let (store, job) = store_with_job(&[accepted("+919876500001", 1)]).await;
    let recipient = store
        .next_queued_recipient(&job.id)
        .await
        .expect("query")
        .expect("queued");
    store
        .mark_sending(&recipient.id, 1)
        .await
        .expect("mark sending");

    let requeued = store
        .requeue_stale_sending(ChronoDuration::hours(1))
        .await
        .expect("sweep");
    assert_eq!(requeued, 0);
}

#[tokio::test]
async fn job_lease_blocks_rival_claims_until_stale() {
    let (store, job) = store_with_job(&[accepted("+919876500001", 1)]).await;
    let stale = ChronoDuration::seconds(300);

    assert!(store
        .claim_job(&job.id, "worker-a", stale)
        .await
        .expect("claim"));
    // Same holder may re-claim; a rival may not.
    assert!(store
        .claim_job(&job.id, "worker-a", stale)
        .await
        .expect("re-claim"));
    assert!(!store
        .claim_job(&job.id, "worker-b", stale)
        .await
        .expect("rival claim"));

    // Once the lease is stale, the rival takes over.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    assert!(store
        .claim_job(&job.id, "worker-b", ChronoDuration::zero())
        .await
        .expect("stale claim"));
}

#[tokio::test]
async fn released_leases_are_claimable_again() {
    let (store, job) = store_with_job(&[accepted("+919876500001", 1)]).await;
    let stale = ChronoDuration::seconds(300);

    assert!(store
        .claim_job(&job.id, "worker-a", stale)
        .await
        .expect("claim"));
    store
        .release_job(&job.id, "worker-a")
        .await
        .expect("release");
    assert!(store
        .claim_job(&job.id, "worker-b", stale)
        .await
        .expect("claim after release"));
}
