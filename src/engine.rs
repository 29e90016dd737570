//! Composition root: batch acceptance and worker launch.
//!
//! The [`Engine`] owns the wiring — config, store, ledger, carrier,
//! resolver — and implements the acceptance flow: estimate, reserve,
//! persist, launch. Everything downstream of acceptance happens in the
//! per-job dispatch worker.

use std::sync::Arc;

use sqlx::SqlitePool;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::address::{AddressResolver, DigitResolver};
use crate::config::CourierConfig;
use crate::db::WriteGate;
use crate::dispatch::{run_worker, ActiveJobs, WorkerContext};
use crate::estimate::{estimate_batch, Estimate, Row};
use crate::ledger::{Ledger, LedgerError};
use crate::provider::http::HttpProvider;
use crate::provider::OutboundProvider;
use crate::store::{Job, JobStore, StoreError};

/// Errors from batch acceptance and engine plumbing.
#[derive(Debug, Error)]
pub enum EngineError {
    /// After validation and dedup, nothing in the batch is sendable.
    #[error("batch contains no sendable recipients")]
    EmptyBatch,

    /// Ledger failure, including an insufficient balance.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The address resolver could not be constructed.
    #[error("address resolver: {0}")]
    Resolver(String),
}

/// A batch accepted for dispatch.
#[derive(Debug, Clone)]
pub struct BatchAccepted {
    /// The created job's identity.
    pub job_id: String,
    /// The estimate the reservation was priced from.
    pub estimate: Estimate,
}

/// The assembled dispatch engine.
pub struct Engine {
    config: Arc<CourierConfig>,
    store: JobStore,
    ledger: Ledger,
    provider: Arc<dyn OutboundProvider>,
    resolver: Arc<dyn AddressResolver>,
    active: ActiveJobs,
    instance: String,
}

impl Engine {
    /// Assemble an engine over an open pool with the default HTTP
    /// carrier and digit resolver.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the ledger cannot be opened or the
    /// allowed region has no known dialing code.
    pub async fn open(config: Arc<CourierConfig>, pool: SqlitePool) -> Result<Self, EngineError> {
        let provider: Arc<dyn OutboundProvider> =
            Arc::new(HttpProvider::new(config.provider.clone()));
        let resolver: Arc<dyn AddressResolver> = Arc::new(
            DigitResolver::new(&config.pricing.allowed_region).map_err(EngineError::Resolver)?,
        );
        Self::with_parts(config, pool, provider, resolver).await
    }

    /// Assemble an engine with explicit carrier and resolver
    /// implementations (tests swap in scripted fakes here).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Ledger`] if the ledger cannot be opened.
    pub async fn with_parts(
        config: Arc<CourierConfig>,
        pool: SqlitePool,
        provider: Arc<dyn OutboundProvider>,
        resolver: Arc<dyn AddressResolver>,
    ) -> Result<Self, EngineError> {
        let gate = WriteGate::new();
        let ledger = Ledger::open(
            pool.clone(),
            gate.clone(),
            config.pricing.opening_balance_mills,
        )
        .await?;
        let store = JobStore::new(pool, gate);
        Ok(Self {
            config,
            store,
            ledger,
            provider,
            resolver,
            active: ActiveJobs::new(),
            instance: Uuid::new_v4().to_string(),
        })
    }

    /// The engine's configuration.
    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    /// The durable job/recipient store.
    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// The metered balance.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Cost a batch without side effects.
    pub fn estimate(&self, rows: &[Row], template: &str) -> Estimate {
        estimate_batch(rows, template, self.resolver.as_ref(), &self.config.pricing)
    }

    /// Accept a batch: estimate, reserve funds, persist the job and its
    /// recipients, and launch the dispatch worker.
    ///
    /// All-or-nothing: an insufficient balance rejects the whole batch
    /// with no job created, and a storage failure after reservation
    /// rolls the reservation back before returning.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EmptyBatch`] when nothing is sendable,
    /// [`EngineError::Ledger`] with
    /// [`LedgerError::InsufficientFunds`](crate::ledger::LedgerError::InsufficientFunds)
    /// when the reservation exceeds the balance, [`EngineError::Store`]
    /// on persistence failure.
    pub async fn submit(&self, rows: &[Row], template: &str) -> Result<BatchAccepted, EngineError> {
        let estimate = self.estimate(rows, template);
        if estimate.accepted.is_empty() {
            return Err(EngineError::EmptyBatch);
        }

        self.ledger.reserve(estimate.total_mills).await?;

        let job = Job::new(
            i64::try_from(estimate.accepted.len()).unwrap_or(i64::MAX),
            estimate.total_segments,
            estimate.total_mills,
            estimate.price_per_segment_mills,
        );
        if let Err(e) = self.store.create_job(&job, &estimate.accepted).await {
            // The reservation must not outlive a batch that was never
            // persisted.
            if let Err(refund_err) = self.ledger.refund(estimate.total_mills).await {
                error!(
                    job_id = %job.id,
                    amount = estimate.total_mills,
                    error = %refund_err,
                    "failed to roll back reservation after create failure"
                );
            }
            return Err(e.into());
        }

        self.spawn_worker(job.id.clone());
        Ok(BatchAccepted {
            job_id: job.id,
            estimate,
        })
    }

    /// Launch the dispatch worker for a job on its own task.
    ///
    /// Idempotent: a second launch for an already-active job is a no-op
    /// inside the worker itself.
    pub fn spawn_worker(&self, job_id: String) -> tokio::task::JoinHandle<()> {
        let ctx = Arc::new(WorkerContext {
            store: self.store.clone(),
            provider: Arc::clone(&self.provider),
            dispatch: self.config.dispatch.clone(),
            callback_url: self.config.provider.status_callback_url(),
            instance: self.instance.clone(),
            active: self.active.clone(),
        });
        tokio::spawn(run_worker(ctx, job_id))
    }
}
