//! User storage quotas.

use async_trait::async_trait;
use vodforge_common::{Error, Result, UserId};
use vodforge_db::pool::{get_conn, DbPool};
use vodforge_db::queries::renditions;

/// Answers whether a user may store more bytes.
#[async_trait]
pub trait QuotaChecker: Send + Sync {
    async fn has_headroom(&self, user_id: UserId, additional_bytes: u64) -> Result<bool>;
}

/// Whether the caller checked quota before starting an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaStatus {
    Verified,
    Unchecked,
}

/// Ask `checker`, turning "no headroom" into [`Error::QuotaExceeded`].
pub async fn verify_headroom(
    checker: &dyn QuotaChecker,
    user_id: UserId,
    additional_bytes: u64,
) -> Result<QuotaStatus> {
    if checker.has_headroom(user_id, additional_bytes).await? {
        Ok(QuotaStatus::Verified)
    } else {
        tracing::info!(user_id = %user_id, additional_bytes, "Quota exceeded");
        Err(Error::QuotaExceeded { additional_bytes })
    }
}

/// Fixed answer, independent of usage.
#[derive(Debug, Clone, Copy)]
pub struct StaticQuota {
    allow: bool,
}

impl StaticQuota {
    pub fn unlimited() -> Self {
        Self { allow: true }
    }

    pub fn exhausted() -> Self {
        Self { allow: false }
    }
}

#[async_trait]
impl QuotaChecker for StaticQuota {
    async fn has_headroom(&self, _user_id: UserId, _additional_bytes: u64) -> Result<bool> {
        Ok(self.allow)
    }
}

/// Same byte limit for every user, measured over their stored renditions.
#[derive(Clone)]
pub struct StoredQuota {
    pool: DbPool,
    limit_bytes: u64,
}

impl StoredQuota {
    pub fn new(pool: DbPool, limit_bytes: u64) -> Self {
        Self { pool, limit_bytes }
    }
}

#[async_trait]
impl QuotaChecker for StoredQuota {
    async fn has_headroom(&self, user_id: UserId, additional_bytes: u64) -> Result<bool> {
        let used = {
            let conn = get_conn(&self.pool)?;
            renditions::total_size_for_owner(&conn, user_id)?
        };
        Ok(used.saturating_add(additional_bytes) <= self.limit_bytes)
    }
}
