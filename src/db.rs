//! SQLite pool construction, schema migration, and the write gate.
//!
//! All Ledger and Store mutations in this crate serialize through one
//! [`WriteGate`] held by the process: each mutation takes the gate, runs a
//! single SQLite transaction, and releases it. Correctness (no lost
//! read-modify-write updates, no double reservation) is bought at the cost
//! of write throughput, which is acceptable because dispatch is
//! rate-limited by the carrier anyway.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

/// Embedded schema, applied idempotently at pool open.
pub const SCHEMA: &str = include_str!("../migrations/001_schema.sql");

/// Connection pool size. Reads are concurrent; writes serialize through
/// the gate regardless.
const MAX_CONNECTIONS: u32 = 4;

/// Open (creating if missing) the courier database at `path` and apply
/// the schema.
///
/// WAL journaling keeps concurrent readers from blocking the writer.
///
/// # Errors
///
/// Returns any underlying `sqlx` connection or migration error.
pub async fn open(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(opts)
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Apply the embedded schema to an already-open pool.
///
/// Idempotent; used directly by tests running against in-memory databases.
///
/// # Errors
///
/// Returns any underlying `sqlx` error.
pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

/// Serialize a timestamp the way this database stores them: RFC 3339,
/// microsecond precision, `Z` suffix. The fixed width keeps stored
/// timestamps lexicographically ordered.
pub fn ts_str(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time in the stored form.
pub fn now_str() -> String {
    ts_str(Utc::now())
}

/// Parse a stored RFC 3339 timestamp, falling back to now on corruption.
pub fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Process-wide mutual exclusion for Ledger and Store mutations.
///
/// Clones share the same underlying lock.
#[derive(Debug, Clone, Default)]
pub struct WriteGate {
    inner: Arc<tokio::sync::Mutex<()>>,
}

impl WriteGate {
    /// Create a fresh gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the gate, waiting for any in-flight mutation to finish.
    ///
    /// Hold the returned guard for the duration of the transaction.
    pub async fn acquire(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inner.lock().await
    }
}
