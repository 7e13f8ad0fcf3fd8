//! Single-flight coordination of token refreshes.
//!
//! Many requests can fail with 401 at once. The first one to notice starts
//! a refresh; everyone else awaits the same shared future. The slot is
//! cleared by the refresh itself once its result has been applied, before
//! any waiter resumes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};

use super::{AuthError, CredentialPair};

pub type RefreshOutcome = Result<CredentialPair, AuthError>;

pub type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct PendingRefresh {
    id: u64,
    future: SharedRefresh,
}

#[derive(Default)]
pub struct RefreshCoordinator {
    pending: Mutex<Option<PendingRefresh>>,
    next_id: AtomicU64,
    started: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<PendingRefresh>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Join the in-flight refresh, or build one with `start` and publish it.
    ///
    /// `start` receives the id the refresh must pass to `finish`. It runs
    /// with the slot locked, so it must not block or await.
    pub fn join_or_start<F>(&self, start: F) -> SharedRefresh
    where
        F: FnOnce(u64) -> BoxFuture<'static, RefreshOutcome>,
    {
        let mut slot = self.slot();
        if let Some(ref pending) = *slot {
            return pending.future.clone();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.started.fetch_add(1, Ordering::Relaxed);
        let future = start(id).shared();
        *slot = Some(PendingRefresh {
            id,
            future: future.clone(),
        });
        future
    }

    /// Clear the slot if it still holds refresh `id`
    pub fn finish(&self, id: u64) {
        let mut slot = self.slot();
        if slot.as_ref().map(|p| p.id) == Some(id) {
            *slot = None;
        }
    }

    pub fn is_pending(&self) -> bool {
        self.slot().is_some()
    }

    /// Number of refreshes started over the coordinator's lifetime
    pub fn refreshes_started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_joiners_share_one_refresh() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let (tx, rx) = tokio::sync::oneshot::channel::<RefreshOutcome>();

        let first = coordinator.join_or_start(|_| {
            async move { rx.await.unwrap_or(Err(AuthError::NoRefreshToken)) }.boxed()
        });
        let second = coordinator.join_or_start(|_| panic!("second refresh started"));
        assert!(coordinator.is_pending());
        assert_eq!(coordinator.refreshes_started(), 1);

        tx.send(Ok(CredentialPair::new("a2", "r1"))).unwrap();
        let (a, b) = futures::join!(first, second);
        assert_eq!(a.unwrap().access_token, "a2");
        assert_eq!(b.unwrap().access_token, "a2");
    }

    #[tokio::test]
    async fn test_finish_clears_only_matching_refresh() {
        let coordinator = RefreshCoordinator::new();
        let mut first_id = None;
        let _ = coordinator.join_or_start(|id| {
            first_id = Some(id);
            async { Err(AuthError::NoRefreshToken) }.boxed()
        });
        let first_id = first_id.unwrap();

        coordinator.finish(first_id + 1);
        assert!(coordinator.is_pending());

        coordinator.finish(first_id);
        assert!(!coordinator.is_pending());

        let mut second_id = None;
        let _ = coordinator.join_or_start(|id| {
            second_id = Some(id);
            async { Err(AuthError::NoRefreshToken) }.boxed()
        });
        assert_ne!(second_id, Some(first_id));
        assert_eq!(coordinator.refreshes_started(), 2);

        // a stale finish from the first refresh must not clear the second
        coordinator.finish(first_id);
        assert!(coordinator.is_pending());
    }
}
