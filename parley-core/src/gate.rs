//! Request gate: when may a request be posted, and posting it.
//!
//! `can_post` is `Connected && Idle`, recomputed from the latest session and
//! phase values whenever either changes and published only when the boolean
//! flips. The gate is cooperative: callers consult `can_post` before posting,
//! `post` itself never blocks or queues.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::state::{SessionState, StateUpdate};
use crate::store::StateStore;
use crate::transport::{ConversationPhase, RequestContext, Transport};

pub fn can_post(session: &SessionState, phase: &ConversationPhase) -> bool {
    session.is_connected() && phase.is_idle()
}

pub struct RequestGate {
    transport: Arc<dyn Transport>,
    store: Arc<StateStore>,
    context: RequestContext,
}

impl RequestGate {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<StateStore>,
        context: RequestContext,
    ) -> Self {
        Self {
            transport,
            store,
            context,
        }
    }

    /// Track session and phase and publish `can_post` changes.
    pub fn spawn_can_post(&self) -> JoinHandle<()> {
        let mut session_rx = self.transport.session_state();
        let mut phase_rx = self.transport.conversation_phase();
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let mut last = None;
            loop {
                let value = can_post(
                    &session_rx.borrow_and_update(),
                    &phase_rx.borrow_and_update(),
                );
                if last != Some(value) {
                    last = Some(value);
                    info!(can_post = value, "can post");
                    store.apply(StateUpdate::CanPost(value));
                }
                tokio::select! {
                    changed = session_rx.changed() => if changed.is_err() { break },
                    changed = phase_rx.changed() => if changed.is_err() { break },
                }
            }
        })
    }

    /// Send `text` with the ambient request context attached.
    ///
    /// Fire-and-forget: a failure is recorded as an error event and forces
    /// `can_post` back on so the client can retry. The handle is only for
    /// callers that want to await completion.
    pub fn post(&self, text: &str) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let store = Arc::clone(&self.store);
        let context = self.context.clone();
        let text = text.to_owned();
        tokio::spawn(async move {
            match transport.post_request(&text, &context).await {
                Ok(()) => info!(text = %text, "request sent"),
                Err(e) => {
                    warn!(text = %text, "request failed: {e}");
                    store.apply(StateUpdate::Failure(e.to_string()));
                }
            }
        })
    }
}
