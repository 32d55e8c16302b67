//! A cancellation signal shared by every long-running task of a pipeline.
//!
//! [`Tripwire::new`] returns a [`Trigger`] and its first [`Tripwire`]. Tripwires
//! are cheap to clone and every clone resolves once the trigger is cancelled or
//! dropped. A resolved tripwire stays resolved, so it can be polled again
//! inside `select!` loops without being fused.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use tracing::debug;

struct Shared {
    name: String,

    cancelled: AtomicBool,

    next_id: AtomicU64,
    wakers: Mutex<HashMap<u64, Waker>>,
}

impl Shared {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn wakers(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Waker>> {
        // a poisoned map only holds wakers, which are still valid
        self.wakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn trip(&self) {
        self.cancelled.store(true, Ordering::SeqCst);

        let wakers = self.wakers().drain().map(|(_, waker)| waker).collect::<Vec<_>>();
        for waker in wakers {
            waker.wake();
        }
    }
}

/// The owning half, cancelling it resolves every associated [`Tripwire`].
pub struct Trigger {
    shared: Arc<Shared>,
}

impl Trigger {
    /// Cancel all associated tripwires, make them immediately resolved.
    pub fn cancel(self) {
        debug!(message = "cancel trigger", name = %self.shared.name);

        // Drop does the actual work
    }
}

impl Drop for Trigger {
    fn drop(&mut self) {
        self.shared.trip();
    }
}

/// A future which resolves once the [`Trigger`] is cancelled or dropped.
pub struct Tripwire {
    shared: Arc<Shared>,
    id: u64,
}

impl Clone for Tripwire {
    fn clone(&self) -> Self {
        let shared = Arc::clone(&self.shared);
        let id = shared.next_id();

        Self { shared, id }
    }
}

impl Drop for Tripwire {
    fn drop(&mut self) {
        self.shared.wakers().remove(&self.id);
    }
}

impl Future for Tripwire {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.shared.cancelled.load(Ordering::SeqCst) {
            return Poll::Ready(());
        }

        self.shared.wakers().insert(self.id, cx.waker().clone());

        // the trigger might fire between the first check and the registration
        if self.shared.cancelled.load(Ordering::SeqCst) {
            self.shared.wakers().remove(&self.id);
            return Poll::Ready(());
        }

        Poll::Pending
    }
}

impl Tripwire {
    pub fn new(name: impl Into<String>) -> (Trigger, Tripwire) {
        let shared = Arc::new(Shared {
            name: name.into(),
            cancelled: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            wakers: Mutex::new(HashMap::new()),
        });

        (
            Trigger {
                shared: Arc::clone(&shared),
            },
            Tripwire {
                id: shared.next_id(),
                shared,
            },
        )
    }

    /// Returns true once the trigger has been cancelled or dropped.
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    macro_rules! assert_pending {
        ($var:expr) => {
            assert!(futures::poll!(&mut $var).is_pending());
        };
    }

    macro_rules! assert_ready {
        ($var:expr) => {
            assert!(futures::poll!(&mut $var).is_ready());
        };
    }

    #[tokio::test]
    async fn drop_trigger() {
        let (trigger, mut tripwire) = Tripwire::new("test");
        assert_pending!(tripwire);
        drop(trigger);
        assert_ready!(tripwire);
        assert_ready!(tripwire);
        assert!(tripwire.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_resolves_every_clone() {
        let (trigger, mut first) = Tripwire::new("test");
        let mut second = first.clone();

        assert_pending!(first);
        assert_pending!(second);

        trigger.cancel();

        assert!(first.shared.wakers().is_empty());
        assert_ready!(first);
        assert_ready!(second);
    }

    #[tokio::test]
    async fn clone_after_cancel() {
        let (trigger, tripwire) = Tripwire::new("test");
        trigger.cancel();

        let mut cloned = tripwire.clone();
        assert_ready!(cloned);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn wakes_spawned_waiter() {
        let (trigger, tripwire) = Tripwire::new("test");

        let waiter = tokio::spawn(async move {
            tokio::time::timeout(Duration::from_secs(2), tripwire)
                .await
                .is_ok()
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();

        assert!(waiter.await.unwrap());
    }
}
