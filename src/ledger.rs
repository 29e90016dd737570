//! Metered balance ledger.
//!
//! One non-negative counter in mills (1/1000 of the display currency
//! unit), persisted as a single SQLite row. Reservation is all-or-nothing
//! for a whole batch: either the full amount is debited or the balance is
//! left untouched. Every debit is eventually paired with consumption
//! (segments actually sent) or a refund of the unused remainder.
//!
//! All mutations take the process-wide [`WriteGate`] and run inside one
//! SQLite transaction, serializing them against every other Ledger and
//! Store mutation.

use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info};

use crate::db::{now_str, WriteGate};

/// Errors from ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// SQLite failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A reservation exceeded the available balance.
    #[error("insufficient funds: need {needed} mills, available {available}")]
    InsufficientFunds {
        /// Mills the reservation asked for.
        needed: i64,
        /// Mills actually available.
        available: i64,
    },

    /// A reserve or refund was called with a negative amount.
    #[error("amount must not be negative: {0}")]
    NegativeAmount(i64),

    /// A top-up was called with zero.
    #[error("top-up amount must be non-zero")]
    ZeroAmount,

    /// A corrective debit would drive the balance below zero.
    #[error("adjustment of {amount} mills would overdraw the balance ({balance} available)")]
    WouldOverdraw {
        /// Signed adjustment requested.
        amount: i64,
        /// Current balance.
        balance: i64,
    },
}

/// The metered balance.
#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
    gate: WriteGate,
}

impl Ledger {
    /// Open the ledger, seeding the balance row with `opening_balance`
    /// mills if the ledger has never been used.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] on SQLite failure.
    pub async fn open(
        pool: SqlitePool,
        gate: WriteGate,
        opening_balance: i64,
    ) -> Result<Self, LedgerError> {
        let ledger = Self { pool, gate };
        let _guard = ledger.gate.acquire().await;
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO ledger (id, balance_mills, updated_at) VALUES (1, ?1, ?2)",
        )
        .bind(opening_balance)
        .bind(now_str())
        .execute(&ledger.pool)
        .await?;
        if inserted.rows_affected() > 0 {
            info!(balance = opening_balance, "ledger seeded with opening balance");
        }
        drop(_guard);
        Ok(ledger)
    }

    /// Current balance in mills.
    ///
    /// A plain pool read: never blocks writers beyond one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] on SQLite failure.
    pub async fn read(&self) -> Result<i64, LedgerError> {
        let row: (i64,) = sqlx::query_as("SELECT balance_mills FROM ledger WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Debit `amount` mills for a batch reservation.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InsufficientFunds`] (balance untouched) if
    /// `amount` exceeds the balance, [`LedgerError::NegativeAmount`] for
    /// a negative amount.
    pub async fn reserve(&self, amount: i64) -> Result<(), LedgerError> {
        if amount < 0 {
            return Err(LedgerError::NegativeAmount(amount));
        }
        let _guard = self.gate.acquire().await;
        let mut tx = self.pool.begin().await?;
        let (balance,): (i64,) = sqlx::query_as("SELECT balance_mills FROM ledger WHERE id = 1")
            .fetch_one(&mut *tx)
            .await?;
        if amount > balance {
            return Err(LedgerError::InsufficientFunds {
                needed: amount,
                available: balance,
            });
        }
        let next = balance.saturating_sub(amount);
        sqlx::query("UPDATE ledger SET balance_mills = ?1, updated_at = ?2 WHERE id = 1")
            .bind(next)
            .bind(now_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(amount, balance = next, "funds reserved");
        Ok(())
    }

    /// Credit `amount` mills back, typically the unused part of a
    /// reservation. Always succeeds for a non-negative amount.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NegativeAmount`] for a negative amount,
    /// [`LedgerError::Database`] on SQLite failure.
    pub async fn refund(&self, amount: i64) -> Result<(), LedgerError> {
        if amount < 0 {
            return Err(LedgerError::NegativeAmount(amount));
        }
        if amount == 0 {
            return Ok(());
        }
        let _guard = self.gate.acquire().await;
        let mut tx = self.pool.begin().await?;
        let (balance,): (i64,) = sqlx::query_as("SELECT balance_mills FROM ledger WHERE id = 1")
            .fetch_one(&mut *tx)
            .await?;
        let next = balance.saturating_add(amount);
        sqlx::query("UPDATE ledger SET balance_mills = ?1, updated_at = ?2 WHERE id = 1")
            .bind(next)
            .bind(now_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(amount, balance = next, "funds refunded");
        Ok(())
    }

    /// Apply a privileged signed adjustment (positive credit, negative
    /// corrective debit). Returns the new balance.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::ZeroAmount`] for zero,
    /// [`LedgerError::WouldOverdraw`] if a debit exceeds the balance.
    pub async fn top_up(&self, amount: i64) -> Result<i64, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let _guard = self.gate.acquire().await;
        let mut tx = self.pool.begin().await?;
        let (balance,): (i64,) = sqlx::query_as("SELECT balance_mills FROM ledger WHERE id = 1")
            .fetch_one(&mut *tx)
            .await?;
        let next = balance
            .checked_add(amount)
            .filter(|n| *n >= 0)
            .ok_or(LedgerError::WouldOverdraw { amount, balance })?;
        sqlx::query("UPDATE ledger SET balance_mills = ?1, updated_at = ?2 WHERE id = 1")
            .bind(next)
            .bind(now_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(amount, balance = next, "balance adjusted");
        Ok(next)
    }
}
