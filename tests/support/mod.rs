//! Shared test fixtures: in-memory database, scripted carrier, fast
//! engine configuration.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use courier::address::DigitResolver;
use courier::config::CourierConfig;
use courier::engine::Engine;
use courier::estimate::Row;
use courier::provider::{OutboundProvider, ProviderError};
use courier::store::{Job, JobStatus};

/// Open an in-memory SQLite database with the schema applied.
///
/// One connection only: each `:memory:` connection is its own database.
pub async fn memory_pool() -> SqlitePool {
    let opts = SqliteConnectOptions::new()
        .filename(":memory:")
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .expect("pool should connect");
    courier::db::migrate(&pool).await.expect("schema should apply");
    pool
}

/// A scripted outbound carrier.
///
/// Outcomes are popped from a FIFO script; once the script is empty,
/// every send succeeds with a generated message sid. All calls are
/// recorded for assertions.
pub struct MockCarrier {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockCarrier {
    /// A carrier that accepts everything.
    pub fn new() -> Self {
        Self::with_script(Vec::new())
    }

    /// A carrier that plays back the given outcomes first.
    pub fn with_script(script: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(VecDeque::from(script)),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A carrier error with the given HTTP status.
    pub fn status_error(status: u16) -> ProviderError {
        ProviderError::HttpStatus {
            status,
            body: "scripted failure".to_owned(),
        }
    }

    /// The `(to, body)` pairs sent so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Number of send calls made.
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

#[async_trait]
impl OutboundProvider for MockCarrier {
    async fn send(
        &self,
        to: &str,
        body: &str,
        _callback_url: Option<&str>,
    ) -> Result<String, ProviderError> {
        let mut calls = self.calls.lock().expect("calls lock");
        calls.push((to.to_owned(), body.to_owned()));
        let serial = calls.len();
        drop(calls);

        match self.script.lock().expect("script lock").pop_front() {
            Some(outcome) => outcome,
            None => Ok(format!("SM{serial:08}")),
        }
    }
}

/// Config tuned so retries and throttles finish within a test run.
pub fn fast_config(opening_mills: i64) -> CourierConfig {
    let mut config = CourierConfig::default();
    config.pricing.opening_balance_mills = opening_mills;
    config.dispatch.throttle_ms = 0;
    config.dispatch.backoff_base_ms = 0;
    config.dispatch.backoff_cap_ms = 0;
    config.dispatch.terminal_backoff_step_ms = 0;
    config.dispatch.storage_retry_delay_ms = 1;
    config
}

/// Assemble an engine over a fresh in-memory database.
pub async fn test_engine(provider: Arc<MockCarrier>, opening_mills: i64) -> Engine {
    test_engine_with_config(provider, fast_config(opening_mills)).await
}

/// Assemble an engine with explicit configuration.
pub async fn test_engine_with_config(provider: Arc<MockCarrier>, config: CourierConfig) -> Engine {
    let pool = memory_pool().await;
    let resolver = Arc::new(DigitResolver::new("IN").expect("region should resolve"));
    Engine::with_parts(Arc::new(config), pool, provider, resolver)
        .await
        .expect("engine should assemble")
}

/// Build one recipient row from column/value pairs.
pub fn row(pairs: &[(&str, &str)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect::<BTreeMap<_, _>>()
}

/// Poll until the job completes, panicking after a few seconds.
pub async fn wait_for_completion(engine: &Engine, job_id: &str) -> Job {
    for _ in 0..500u32 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let job = engine
            .store()
            .load_job(job_id)
            .await
            .expect("job should load");
        if job.status == JobStatus::Completed {
            return job;
        }
    }
    panic!("job {job_id} did not complete in time");
}
