//! `LoopbackTransport`: in-process stand-in for the conversational service.
//!
//! With `auto_connect` / `auto_respond` enabled it behaves like a tiny echo
//! service so the whole engine can run end-to-end without a network:
//!
//! ```text
//! connect(id?)   → Connecting → Connected(id or "loopback-N")
//! post(text)     → history += Input → AwaitingResponse
//!                → Responding (reply streamed word by word)
//!                → frame emitted, history += Output → Idle
//! ```
//!
//! With both disabled nothing happens on its own; tests drive every
//! observable through the `set_*` / `push_*` / `emit_*` methods instead.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use super::{
    ConversationPhase, History, HistoryEntry, RequestContext, ResponseStream, SessionError,
    Transport,
};
use crate::error::{ParleyError, Result};
use crate::state::{SessionFrame, SessionState};

const EVENT_BROADCAST_CAP: usize = 64;

#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Complete `connect` on its own after `step_delay`.
    pub auto_connect: bool,
    /// Answer posted requests on their own.
    pub auto_respond: bool,
    /// Pause between simulated steps (connect completion, each reply chunk).
    pub step_delay: Duration,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            auto_connect: true,
            auto_respond: true,
            step_delay: Duration::from_millis(40),
        }
    }
}

impl LoopbackConfig {
    /// Nothing happens unless a test drives it.
    pub fn manual() -> Self {
        Self {
            auto_connect: false,
            auto_respond: false,
            step_delay: Duration::ZERO,
        }
    }
}

pub struct LoopbackTransport {
    inner: Arc<Inner>,
}

struct Inner {
    config: LoopbackConfig,
    session: watch::Sender<SessionState>,
    phase: watch::Sender<ConversationPhase>,
    history: watch::Sender<History>,
    frames: broadcast::Sender<SessionFrame>,
    errors: broadcast::Sender<SessionError>,
    next_id: AtomicU64,
    sessions_opened: AtomicU64,
    closed: AtomicBool,
    connect_calls: Mutex<Vec<Option<String>>>,
    posted: Mutex<Vec<(String, RequestContext)>>,
    fail_next_post: Mutex<Option<String>>,
}

impl LoopbackTransport {
    pub fn new(config: LoopbackConfig) -> Self {
        let (session, _) = watch::channel(SessionState::Disconnected);
        let (phase, _) = watch::channel(ConversationPhase::Idle);
        let (history, _) = watch::channel(Arc::new(Vec::new()));
        let (frames, _) = broadcast::channel(EVENT_BROADCAST_CAP);
        let (errors, _) = broadcast::channel(EVENT_BROADCAST_CAP);
        Self {
            inner: Arc::new(Inner {
                config,
                session,
                phase,
                history,
                frames,
                errors,
                next_id: AtomicU64::new(1),
                sessions_opened: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                connect_calls: Mutex::new(Vec::new()),
                posted: Mutex::new(Vec::new()),
                fail_next_post: Mutex::new(None),
            }),
        }
    }

    pub fn manual() -> Self {
        Self::new(LoopbackConfig::manual())
    }

    // ── Drive methods ────────────────────────────────────────────────────

    pub fn set_session_state(&self, state: SessionState) {
        self.inner.session.send_replace(state);
    }

    pub fn set_phase(&self, phase: ConversationPhase) {
        self.inner.phase.send_replace(phase);
    }

    /// Append an input entry to history and return its id.
    pub fn push_input(&self, text: &str) -> u64 {
        self.inner.push_history(|id| HistoryEntry::Input {
            id,
            text: text.to_owned(),
        })
    }

    /// Append an output entry to history and return its id.
    pub fn push_output(&self, text: &str) -> u64 {
        self.inner.push_history(|id| HistoryEntry::Output {
            id,
            text: text.to_owned(),
        })
    }

    /// Re-publish the current history unchanged.
    pub fn republish_history(&self) {
        self.inner.history.send_modify(|_| {});
    }

    pub fn emit_frame(&self, frame: SessionFrame) {
        let _ = self.inner.frames.send(frame);
    }

    pub fn emit_error(&self, message: &str) {
        let _ = self.inner.errors.send(SessionError::new(message));
    }

    /// Make the next `post_request` fail with `message`.
    pub fn fail_next_post(&self, message: &str) {
        *self.inner.fail_next_post.lock() = Some(message.to_owned());
    }

    // ── Inspection ───────────────────────────────────────────────────────

    /// Every `connect` call so far, with the reconnect id it carried.
    pub fn connect_calls(&self) -> Vec<Option<String>> {
        self.inner.connect_calls.lock().clone()
    }

    pub fn posted(&self) -> Vec<(String, RequestContext)> {
        self.inner.posted.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new(LoopbackConfig::default())
    }
}

impl Inner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn push_history(&self, make: impl FnOnce(u64) -> HistoryEntry) -> u64 {
        let entry = make(self.next_id());
        let id = entry.id();
        self.history.send_modify(|history| {
            let mut next = history.as_ref().clone();
            next.push(entry);
            *history = Arc::new(next);
        });
        id
    }

    async fn respond(self: Arc<Self>, text: String) {
        let delay = self.config.step_delay;
        self.push_history(|id| HistoryEntry::Input {
            id,
            text: text.clone(),
        });
        self.phase.send_replace(ConversationPhase::AwaitingResponse);
        tokio::time::sleep(delay).await;

        let exchange_id = self.next_id();
        let (writer, stream) = ResponseStream::channel(exchange_id);
        self.phase.send_replace(ConversationPhase::Responding(stream));
        tokio::time::sleep(delay).await;

        let reply = format!("You said: {text}");
        for (i, word) in reply.split_whitespace().enumerate() {
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            let chunk = if i == 0 {
                word.to_owned()
            } else {
                format!(" {word}")
            };
            writer.push_chunk(&chunk);
            tokio::time::sleep(delay).await;
        }

        let _ = self.frames.send(SessionFrame {
            exchange_id: Some(exchange_id),
            payload: json!({ "type": "conversation", "text": writer.buffered() }),
        });
        let buffered = writer.buffered();
        self.push_history(|id| HistoryEntry::Output { id, text: buffered });
        self.phase.send_replace(ConversationPhase::Idle);
        debug!(exchange_id, "loopback exchange complete");
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn connect(&self, reconnect_id: Option<String>) {
        info!(?reconnect_id, "loopback connect");
        self.inner.closed.store(false, Ordering::SeqCst);
        self.inner.connect_calls.lock().push(reconnect_id.clone());
        self.inner.session.send_replace(SessionState::Connecting);

        if !self.inner.config.auto_connect {
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.config.step_delay).await;
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }
            let session_id = reconnect_id.unwrap_or_else(|| {
                let n = inner.sessions_opened.fetch_add(1, Ordering::SeqCst) + 1;
                format!("loopback-{n}")
            });
            inner.session.send_replace(SessionState::connected(session_id));
        });
    }

    async fn post_request(&self, text: &str, context: &RequestContext) -> Result<()> {
        if self.is_closed() {
            return Err(ParleyError::Transport("session closed".into()));
        }
        if let Some(message) = self.inner.fail_next_post.lock().take() {
            return Err(ParleyError::Transport(message));
        }
        if self.inner.config.auto_respond && !self.inner.session.borrow().is_connected() {
            return Err(ParleyError::Transport("not connected".into()));
        }
        self.inner
            .posted
            .lock()
            .push((text.to_owned(), context.clone()));

        if self.inner.config.auto_respond {
            tokio::spawn(Arc::clone(&self.inner).respond(text.to_owned()));
        }
        Ok(())
    }

    fn session_state(&self) -> watch::Receiver<SessionState> {
        self.inner.session.subscribe()
    }

    fn conversation_phase(&self) -> watch::Receiver<ConversationPhase> {
        self.inner.phase.subscribe()
    }

    fn history(&self) -> watch::Receiver<History> {
        self.inner.history.subscribe()
    }

    fn frames(&self) -> broadcast::Receiver<SessionFrame> {
        self.inner.frames.subscribe()
    }

    fn errors(&self) -> broadcast::Receiver<SessionError> {
        self.inner.errors.subscribe()
    }

    fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("loopback transport closed");
        self.inner.session.send_replace(SessionState::Disconnected);
        self.inner.phase.send_replace(ConversationPhase::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_connect_only_reaches_connecting() {
        let transport = LoopbackTransport::manual();
        transport.connect(Some("abc".into()));
        assert_eq!(*transport.session_state().borrow(), SessionState::Connecting);
        assert_eq!(transport.connect_calls(), vec![Some("abc".to_string())]);
    }

    #[tokio::test]
    async fn auto_connect_resumes_reconnect_id() {
        let transport = LoopbackTransport::new(LoopbackConfig {
            step_delay: Duration::from_millis(1),
            ..LoopbackConfig::default()
        });
        let mut rx = transport.session_state();
        transport.connect(Some("abc123".into()));
        let state = tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|s| s.is_connected()),
        )
        .await
        .expect("connect timed out")
        .expect("sender alive")
        .clone();
        assert_eq!(state, SessionState::connected("abc123"));
    }

    #[tokio::test]
    async fn auto_respond_walks_phases_back_to_idle() {
        let transport = LoopbackTransport::new(LoopbackConfig {
            step_delay: Duration::from_millis(1),
            ..LoopbackConfig::default()
        });
        transport.set_session_state(SessionState::connected("s"));
        let mut history = transport.history();
        transport
            .post_request("hello there", &RequestContext::default())
            .await
            .expect("post");

        let entries = tokio::time::timeout(
            Duration::from_secs(2),
            history.wait_for(|h| h.len() == 2),
        )
        .await
        .expect("exchange timed out")
        .expect("sender alive")
        .clone();
        assert!(matches!(&entries[0], HistoryEntry::Input { text, .. } if text == "hello there"));
        assert!(
            matches!(&entries[1], HistoryEntry::Output { text, .. } if text == "You said: hello there")
        );
    }

    #[tokio::test]
    async fn injected_failure_fails_once() {
        let transport = LoopbackTransport::manual();
        transport.fail_next_post("boom");
        let ctx = RequestContext::default();
        let err = transport.post_request("a", &ctx).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        transport.post_request("b", &ctx).await.expect("second post");
        assert_eq!(transport.posted().len(), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_posts() {
        let transport = LoopbackTransport::manual();
        transport.set_session_state(SessionState::connected("s"));
        transport.close();
        transport.close();
        assert!(transport.is_closed());
        assert_eq!(*transport.session_state().borrow(), SessionState::Disconnected);
        assert!(transport
            .post_request("x", &RequestContext::default())
            .await
            .is_err());
    }
}
