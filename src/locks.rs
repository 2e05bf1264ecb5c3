//! Per-asset file locks.
//!
//! Every stage that reads or writes an asset's media files holds that asset's
//! [`AssetLock`] for the duration of the access. Waiters are queued by the
//! underlying tokio mutex (FIFO), so a waiting job never busy-loops.
//!
//! Nested work that already holds the lock passes it down instead of
//! acquiring again; see [`FileLockManager::acquire_unless_held`].

use std::collections::HashMap;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use vodforge_common::{AssetId, Error, Result};

type Registry = Arc<Mutex<HashMap<AssetId, Arc<AsyncMutex<()>>>>>;

/// Hands out one lock per asset at a time.
///
/// Cheap to clone; clones share the same lock table. Entries are removed as
/// soon as nobody holds or waits for them.
#[derive(Clone, Default)]
pub struct FileLockManager {
    registry: Registry,
}

impl FileLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, asset_id: AssetId) -> Arc<AsyncMutex<()>> {
        self.registry
            .lock()
            .entry(asset_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait until no one else holds `asset_id`, then take it.
    ///
    /// Cancelling the wait gives up the place in the queue.
    pub async fn acquire(&self, asset_id: AssetId) -> AssetLock {
        let guard = Waiting {
            asset_id,
            registry: self.registry.clone(),
            pending: Some(self.slot(asset_id).lock_owned().boxed()),
        }
        .await;
        tracing::debug!(asset_id = %asset_id, "Acquired asset lock");

        AssetLock {
            asset_id,
            guard: Some(guard),
            registry: self.registry.clone(),
        }
    }

    /// Take the lock without waiting. `None` if someone else has it.
    pub fn try_acquire(&self, asset_id: AssetId) -> Option<AssetLock> {
        let slot = self.slot(asset_id);
        match slot.try_lock_owned() {
            Ok(guard) => Some(AssetLock {
                asset_id,
                guard: Some(guard),
                registry: self.registry.clone(),
            }),
            Err(_) => {
                release_slot(&self.registry, asset_id);
                None
            }
        }
    }

    /// Reuse `held` when it already covers `asset_id`, otherwise acquire.
    pub async fn acquire_unless_held<'a>(
        &self,
        asset_id: AssetId,
        held: Option<&'a AssetLock>,
    ) -> LockScope<'a> {
        match held {
            Some(lock) if lock.asset_id() == asset_id => LockScope::Borrowed(lock),
            _ => LockScope::Owned(self.acquire(asset_id).await),
        }
    }

    /// Whether the lock for `asset_id` is currently taken.
    pub fn is_locked(&self, asset_id: AssetId) -> bool {
        self.registry
            .lock()
            .get(&asset_id)
            .is_some_and(|slot| slot.try_lock().is_err())
    }

    /// Number of assets with a holder or waiter.
    pub fn active(&self) -> usize {
        self.registry.lock().len()
    }
}

fn release_slot(registry: &Registry, asset_id: AssetId) {
    let mut table = registry.lock();
    // Only the table's own reference left: no holder, no waiter.
    if table
        .get(&asset_id)
        .is_some_and(|slot| Arc::strong_count(slot) == 1)
    {
        table.remove(&asset_id);
    }
}

/// An `acquire` still queued on the slot. The pending future owns the
/// waiter's reference to the slot, so it is dropped before the slot is
/// offered back to the registry.
struct Waiting {
    asset_id: AssetId,
    registry: Registry,
    pending: Option<BoxFuture<'static, OwnedMutexGuard<()>>>,
}

impl Future for Waiting {
    type Output = OwnedMutexGuard<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(pending) = self.pending.as_mut() else {
            return Poll::Pending;
        };
        let guard = ready!(pending.as_mut().poll(cx));
        self.pending = None;
        Poll::Ready(guard)
    }
}

impl Drop for Waiting {
    fn drop(&mut self) {
        if self.pending.take().is_some() {
            release_slot(&self.registry, self.asset_id);
            tracing::debug!(asset_id = %self.asset_id, "Gave up waiting for asset lock");
        }
    }
}

/// Proof of exclusive access to one asset's files. Released on drop.
pub struct AssetLock {
    asset_id: AssetId,
    guard: Option<OwnedMutexGuard<()>>,
    registry: Registry,
}

impl AssetLock {
    pub fn asset_id(&self) -> AssetId {
        self.asset_id
    }

    /// Fails unless this lock is the one for `asset_id`.
    pub fn covers(&self, asset_id: AssetId) -> Result<()> {
        if self.asset_id != asset_id {
            return Err(Error::internal(format!(
                "lock for {} used for asset {}",
                self.asset_id, asset_id
            )));
        }
        Ok(())
    }
}

impl Drop for AssetLock {
    fn drop(&mut self) {
        // The guard holds a reference to the slot; drop it before checking.
        self.guard.take();
        release_slot(&self.registry, self.asset_id);
        tracing::debug!(asset_id = %self.asset_id, "Released asset lock");
    }
}

impl std::fmt::Debug for AssetLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetLock")
            .field("asset_id", &self.asset_id)
            .finish()
    }
}

/// A lock that is either owned by this scope or borrowed from a caller.
#[derive(Debug)]
pub enum LockScope<'a> {
    Owned(AssetLock),
    Borrowed(&'a AssetLock),
}

impl Deref for LockScope<'_> {
    type Target = AssetLock;

    fn deref(&self) -> &AssetLock {
        match self {
            Self::Owned(lock) => lock,
            Self::Borrowed(lock) => lock,
        }
    }
}
