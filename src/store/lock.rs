use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{OrderStore, StoreError};

// ============================================================================
// Named distributed lock
// ============================================================================
//
// A lease row in the store. The holder releases it explicitly; if the holder
// dies, the lease expires after its TTL. Dropping an unreleased guard inside a
// runtime schedules the release in the background.
//
// ============================================================================

pub struct LockGuard {
    store: Arc<dyn OrderStore>,
    name: String,
    holder: String,
    released: bool,
}

impl LockGuard {
    /// Returns `None` when another holder owns an unexpired lease.
    pub async fn acquire(
        store: Arc<dyn OrderStore>,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<LockGuard>, StoreError> {
        let holder = Uuid::new_v4().to_string();
        if !store.try_acquire_lock(name, &holder, ttl).await? {
            tracing::debug!(lock = name, "Lock held elsewhere");
            return Ok(None);
        }
        tracing::debug!(lock = name, holder = %holder, "Lock acquired");
        Ok(Some(LockGuard {
            store,
            name: name.to_string(),
            holder,
            released: false,
        }))
    }

    pub async fn release(mut self) -> Result<(), StoreError> {
        self.released = true;
        let released = self.store.release_lock(&self.name, &self.holder).await?;
        if !released {
            tracing::warn!(lock = %self.name, holder = %self.holder, "Lock lease expired before release");
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = self.store.clone();
        let name = std::mem::take(&mut self.name);
        let holder = std::mem::take(&mut self.holder);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.release_lock(&name, &holder).await {
                        tracing::error!(lock = %name, error = %e, "Background lock release failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(lock = %name, "Lock guard dropped outside a runtime; lease will expire");
            }
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum LockOutcome<T> {
    Acquired(T),
    Skipped,
}

/// Runs `work` while holding `name`, releasing the lock on every exit path.
pub async fn with_lock<F, Fut, T>(
    store: Arc<dyn OrderStore>,
    name: &str,
    ttl: Duration,
    work: F,
) -> Result<LockOutcome<T>, StoreError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let Some(guard) = LockGuard::acquire(store, name, ttl).await? else {
        return Ok(LockOutcome::Skipped);
    };

    let result = AssertUnwindSafe(work()).catch_unwind().await;

    if let Err(e) = guard.release().await {
        tracing::error!(lock = name, error = %e, "Failed to release lock; lease will expire");
    }

    match result {
        Ok(value) => Ok(LockOutcome::Acquired(value)),
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
