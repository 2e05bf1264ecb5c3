//! Units of work retried on serialization conflicts.
//!
//! Every state-changing sequence runs through [`with_retry`]: the closure is
//! executed inside an IMMEDIATE transaction and, when it fails with a
//! transient conflict (a stale compare-and-swap or SQLite lock contention),
//! the transaction is rolled back and the whole closure runs again from
//! scratch. The closure must therefore re-read whatever it depends on and
//! must not perform side effects outside the database.

use std::time::Duration;

use rand::Rng;
use rusqlite::{Transaction, TransactionBehavior};
use vodforge_common::{Error, Result};

use crate::pool::{get_conn, DbPool};
use crate::queries::db_error;

/// How often and how patiently a unit of work is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `n * backoff` plus jitter.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff.saturating_mul(attempt);
        let jitter_ms = self.backoff.as_millis() as u64 / 2;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        base + jitter
    }
}

/// Run `work` inside a transaction, retrying transient conflicts.
///
/// Non-transient errors are returned immediately. When every attempt
/// conflicts, the result is [`Error::PersistenceConflict`]. The backoff
/// between attempts yields to the runtime instead of parking the worker
/// thread.
pub async fn with_retry<T, F>(pool: &DbPool, policy: &RetryPolicy, mut work: F) -> Result<T>
where
    F: FnMut(&Transaction<'_>) -> Result<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match run_once(pool, &mut work) {
            Ok(value) => return Ok(value),
            Err(e) => {
                let delay = after_failure(policy, attempt, max_attempts, e)?;
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Returns the delay before the next attempt, or the error to surface.
fn after_failure(policy: &RetryPolicy, attempt: u32, max_attempts: u32, error: Error) -> Result<Duration> {
    if !error.is_transient() {
        return Err(error);
    }
    tracing::debug!(attempt, max_attempts, error = %error, "Transaction conflicted");
    if attempt < max_attempts {
        return Ok(policy.delay(attempt));
    }

    tracing::warn!(
        attempts = max_attempts,
        error = %error,
        "Giving up on transaction after repeated conflicts"
    );
    Err(Error::PersistenceConflict {
        attempts: max_attempts,
        message: error.to_string(),
    })
}

fn run_once<T, F>(pool: &DbPool, work: &mut F) -> Result<T>
where
    F: FnMut(&Transaction<'_>) -> Result<T>,
{
    let mut conn = get_conn(pool)?;
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(db_error)?;

    // Dropping `tx` on error rolls back.
    let value = work(&tx)?;
    tx.commit().map_err(db_error)?;
    Ok(value)
}
