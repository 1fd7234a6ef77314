//! `StateStore`: the single merge point for every component's output.
//!
//! ## Serialization
//!
//! The canonical snapshot sits behind a `parking_lot::Mutex<Arc<AppState>>`.
//! Every update runs copy-and-swap under that lock and publishes the new
//! `Arc` on a `watch` channel *before* releasing it, so concurrent updates are
//! totally ordered and observers only ever see whole snapshots, in the order
//! they were produced. Updates that leave the snapshot unchanged are not
//! published.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

use crate::state::{AppState, StateUpdate};

pub struct StateStore {
    current: Mutex<Arc<AppState>>,
    tx: watch::Sender<Arc<AppState>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::with_state(AppState::default())
    }

    pub fn with_state(initial: AppState) -> Self {
        let initial = Arc::new(initial);
        let (tx, _) = watch::channel(Arc::clone(&initial));
        Self {
            current: Mutex::new(initial),
            tx,
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<AppState> {
        Arc::clone(&self.current.lock())
    }

    /// Subscribe to published snapshots. The receiver starts at the current one.
    pub fn subscribe(&self) -> watch::Receiver<Arc<AppState>> {
        self.tx.subscribe()
    }

    /// Apply one field-scoped update. Returns `true` if a new snapshot was published.
    pub fn apply(&self, update: StateUpdate) -> bool {
        self.apply_with(|_| Some(update))
    }

    /// Run `f` while holding the serialization lock without updating.
    ///
    /// Side effects that must not interleave with an update (an epoch
    /// switch, say) go here.
    pub fn with_lock<R>(&self, f: impl FnOnce(&AppState) -> R) -> R {
        let current = self.current.lock();
        f(&current)
    }

    /// Decide and apply an update while holding the serialization lock.
    ///
    /// `f` sees the snapshot the update will be applied to and may decline by
    /// returning `None`. Guards such as epoch checks belong inside `f` so they
    /// are evaluated atomically with the write.
    pub fn apply_with<F>(&self, f: F) -> bool
    where
        F: FnOnce(&AppState) -> Option<StateUpdate>,
    {
        let mut current = self.current.lock();
        let Some(update) = f(&current) else {
            return false;
        };
        trace!(?update, "applying state update");
        let next = current.apply(update);
        if next == **current {
            return false;
        }
        *current = Arc::new(next);
        self.tx.send_replace(Arc::clone(&current));
        true
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}
