//! Session lifecycle: connect, remember, reset.
//!
//! ```text
//! Disconnected ──connect──► Connecting ──► Connected(id)   (id persisted)
//!      ▲                        │                │
//!      └────── close / failure ─┴────────────────┘
//! ```
//!
//! The transport drives every transition; this controller issues `connect`,
//! mirrors the transport's session state into the snapshot, and keeps the
//! reconnection identifier in the durable store. There is no automatic retry:
//! after a drop the caller decides (explicit reset, or restart).

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::state::StateUpdate;
use crate::storage::KeyValueStore;
use crate::store::StateStore;
use crate::transport::Transport;

pub struct SessionController {
    transport: Arc<dyn Transport>,
    storage: Arc<dyn KeyValueStore>,
    session_key: String,
}

impl SessionController {
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: Arc<dyn KeyValueStore>,
        session_key: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            storage,
            session_key: session_key.into(),
        }
    }

    /// Remembered reconnection identifier, if any.
    pub fn stored_session_id(&self) -> Option<String> {
        match self.storage.get(&self.session_key) {
            Ok(id) => id,
            Err(e) => {
                warn!(key = %self.session_key, "failed to read session id: {e}");
                None
            }
        }
    }

    /// Connect, resuming the remembered session when there is one.
    pub fn connect(&self) {
        self.connect_with(self.stored_session_id());
    }

    pub fn connect_with(&self, reconnect_id: Option<String>) {
        info!(?reconnect_id, "connecting to service");
        self.transport.connect(reconnect_id);
    }

    /// Forget the remembered session, clear the event log and start a fresh
    /// session.
    pub fn reset(&self, store: &StateStore) {
        let previous = self.stored_session_id();
        if let Err(e) = self.storage.erase(&self.session_key) {
            warn!(key = %self.session_key, "failed to erase session id: {e}");
        }
        info!(key = %self.session_key, ?previous, "session id erased");
        store.apply(StateUpdate::ClearEvents);
        self.connect_with(None);
    }

    /// Mirror the transport's session state into `store` until the transport
    /// goes away or the task is aborted.
    pub fn spawn_observer(self: &Arc<Self>, store: Arc<StateStore>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = this.transport.session_state();
            loop {
                let state = rx.borrow_and_update().clone();
                info!(?state, "session state");
                if let Some(id) = state.session_id() {
                    this.remember(id);
                }
                store.apply(StateUpdate::Session(state));
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    fn remember(&self, session_id: &str) {
        let previous = self.stored_session_id();
        if previous.as_deref() == Some(session_id) {
            return;
        }
        match self.storage.set(&self.session_key, session_id) {
            Ok(()) => info!(
                key = %self.session_key,
                ?previous,
                current = session_id,
                "session id changed"
            ),
            Err(e) => warn!(key = %self.session_key, "failed to persist session id: {e}"),
        }
    }
}
