//! Courier — a bulk message dispatch engine.
//!
//! Prices a batch of recipients against a metered balance, reserves the
//! funds, dispatches each message through an outbound carrier with
//! retry and backoff, reconciles delivery receipts as they arrive, and
//! resumes unfinished jobs after a restart. Money is never lost or
//! double-spent: a reservation is either consumed by sent segments or
//! refunded at finalization.
//!
//! See `DESIGN.md` for full architecture documentation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod config;
pub mod db;
pub mod estimate;
pub mod ledger;
pub mod logging;
pub mod provider;
pub mod store;

pub mod dispatch;
pub mod engine;
pub mod reconcile;
pub mod resume;
