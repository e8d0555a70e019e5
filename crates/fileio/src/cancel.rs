// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{Level, event};

use crate::ERR_POISONED_LOCK;

type CancelAction = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct TokenInner {
    canceled: AtomicBool,
    next_id: AtomicU64,
    actions: Mutex<HashMap<u64, CancelAction>>,
}

/// A cancellation token that pending I/O operations subscribe to.
///
/// Cloning the token yields another handle to the same shared state. When
/// [`cancel`][Self::cancel] fires, every registered action runs exactly once;
/// for a pending file operation the action is the backend-appropriate
/// cancellation request (`CancelIoEx`, `IORING_OP_ASYNC_CANCEL`, or a
/// dispatch channel stop). The operation itself still completes through the
/// normal completion path, carrying [`Status::Canceled`][1].
///
/// Registering on an already-fired token runs the action immediately.
///
/// # Thread safety
///
/// This type is thread-safe.
///
/// [1]: crate::Status::Canceled
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    /// Creates a new, unfired token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the token has fired.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    /// Fires the token, running all registered actions.
    ///
    /// Subsequent calls are no-ops; subsequent registrations run their
    /// action immediately.
    pub fn cancel(&self) {
        if self.inner.canceled.swap(true, Ordering::AcqRel) {
            return;
        }

        let actions: Vec<CancelAction> = {
            let mut map = self.inner.actions.lock().expect(ERR_POISONED_LOCK);
            map.drain().map(|(_, action)| action).collect()
        };

        event!(
            Level::TRACE,
            message = "cancel token fired",
            actions = actions.len()
        );

        for action in actions {
            action();
        }
    }

    /// Registers an action to run when the token fires.
    ///
    /// The returned subscription removes the action on drop; completion
    /// paths drop it so a finished operation can no longer be "canceled".
    pub(crate) fn subscribe(&self, action: CancelAction) -> CancelSubscription {
        if self.is_canceled() {
            action();
            return CancelSubscription { token: None, id: 0 };
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut map = self.inner.actions.lock().expect(ERR_POISONED_LOCK);
            map.insert(id, action);
        }

        // The token may have fired between the check above and the insert.
        // Re-check and drain our own entry so the action is not lost.
        if self.is_canceled() {
            let action = {
                let mut map = self.inner.actions.lock().expect(ERR_POISONED_LOCK);
                map.remove(&id)
            };
            if let Some(action) = action {
                action();
            }
            return CancelSubscription { token: None, id: 0 };
        }

        CancelSubscription {
            token: Some(Arc::clone(&self.inner)),
            id,
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("canceled", &self.is_canceled())
            .finish_non_exhaustive()
    }
}

/// Removes the registered action when dropped.
#[derive(Debug)]
pub(crate) struct CancelSubscription {
    token: Option<Arc<TokenInner>>,
    id: u64,
}

impl Drop for CancelSubscription {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            let mut map = token.actions.lock().expect(ERR_POISONED_LOCK);
            drop(map.remove(&self.id));
        }
    }
}

impl std::fmt::Debug for TokenInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenInner")
            .field("canceled", &self.canceled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counting_action(counter: &Arc<AtomicUsize>) -> CancelAction {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn fires_registered_action_once() {
        let token = CancelToken::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let _sub = token.subscribe(counting_action(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        token.cancel();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Second fire is a no-op.
        token.cancel();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_subscription_fires_immediately() {
        let token = CancelToken::new();
        token.cancel();

        let counter = Arc::new(AtomicUsize::new(0));
        let _sub = token.subscribe(counting_action(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_subscription_does_not_fire() {
        let token = CancelToken::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let sub = token.subscribe(counting_action(&counter));
        drop(sub);

        token.cancel();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();

        clone.cancel();
        assert!(token.is_canceled());
    }
}
