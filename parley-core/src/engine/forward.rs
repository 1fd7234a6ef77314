//! Tasks that mirror collaborator observables into the state store.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::state::StateUpdate;
use crate::store::StateStore;

/// Apply `to_update(value)` for the current value and every later one.
/// Unchanged values are absorbed by the store.
pub(crate) fn forward<T, F>(
    mut rx: watch::Receiver<T>,
    store: Arc<StateStore>,
    to_update: F,
) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(T) -> StateUpdate + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let value = rx.borrow_and_update().clone();
            store.apply(to_update(value));
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}
