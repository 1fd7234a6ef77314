//! Conversation orchestration: status line, request log, frames and errors.
//!
//! ## Phase switching
//!
//! The status line always follows the *current* phase only:
//!
//! | Phase | Source | Status |
//! |-------|--------|--------|
//! | `Idle` | interaction history | `"[Idle] <last output>"` |
//! | `AwaitingResponse` | none | `"[Processing]"` |
//! | `Responding` | the exchange's buffered text | `"[Responding] <text>"` |
//!
//! On every phase change the previous subscription task is aborted and the
//! shared [`EpochCounter`] is advanced inside the store's serialization lock.
//! Subscriptions check their epoch inside the same lock before every write, so
//! a chunk that was already in flight when the phase changed is dropped rather
//! than applied.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::epoch::{Epoch, EpochCounter};
use crate::player::{AudioOutput, Priority};
use crate::state::{AppEvent, SessionFrame, StateUpdate};
use crate::store::StateStore;
use crate::transport::{ConversationPhase, History, HistoryEntry, SessionError, Transport};

pub struct ConversationOrchestrator {
    transport: Arc<dyn Transport>,
    player: Arc<dyn AudioOutput>,
    epochs: Arc<EpochCounter>,
}

/// Aborts the wrapped task when dropped, so aborting a parent task also tears
/// down the subscription it owns.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl ConversationOrchestrator {
    pub fn new(transport: Arc<dyn Transport>, player: Arc<dyn AudioOutput>) -> Self {
        Self {
            transport,
            player,
            epochs: Arc::new(EpochCounter::new()),
        }
    }

    /// Start every observer. Broadcast sources are subscribed before this
    /// returns. The returned handles are the caller's to abort.
    pub fn spawn(&self, store: Arc<StateStore>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(follow_phase(
                Arc::clone(&self.transport),
                Arc::clone(&self.player),
                Arc::clone(&self.epochs),
                Arc::clone(&store),
            )),
            tokio::spawn(log_requests(
                self.transport.history(),
                Arc::clone(&store),
            )),
            tokio::spawn(log_frames(self.transport.frames(), Arc::clone(&store))),
            tokio::spawn(log_errors(self.transport.errors(), store)),
        ]
    }

    /// Retire the live subscription without starting a new one.
    pub fn retire(&self) {
        self.epochs.advance();
    }
}

// ── Status line ──────────────────────────────────────────────────────────

pub fn idle_status(history: &[HistoryEntry]) -> String {
    let last_output = match history.last() {
        Some(HistoryEntry::Output { text, .. }) => text.as_str(),
        _ => "",
    };
    format!("[Idle] {last_output}")
}

pub const PROCESSING_STATUS: &str = "[Processing]";

pub fn responding_status(buffered: &str) -> String {
    format!("[Responding] {buffered}")
}

/// The live source backing the status line for one phase.
enum PhaseSource {
    History(watch::Receiver<History>),
    Fixed,
    Response(broadcast::Receiver<String>, watch::Receiver<String>),
}

async fn follow_phase(
    transport: Arc<dyn Transport>,
    player: Arc<dyn AudioOutput>,
    epochs: Arc<EpochCounter>,
    store: Arc<StateStore>,
) {
    let mut phase_rx = transport.conversation_phase();
    let mut live: Option<AbortOnDrop> = None;
    let mut current: Option<ConversationPhase> = None;
    loop {
        let phase = phase_rx.borrow_and_update().clone();
        if current.as_ref() == Some(&phase) {
            if phase_rx.changed().await.is_err() {
                break;
            }
            continue;
        }
        current = Some(phase.clone());

        // Cancel first, then switch epoch and status atomically.
        drop(live.take());
        let (source, status) = match &phase {
            ConversationPhase::Idle => {
                let mut history = transport.history();
                let status = idle_status(&history.borrow_and_update());
                (PhaseSource::History(history), status)
            }
            ConversationPhase::AwaitingResponse => {
                (PhaseSource::Fixed, PROCESSING_STATUS.to_owned())
            }
            ConversationPhase::Responding(stream) => {
                let mut text = stream.buffered_text();
                let status = responding_status(&text.borrow_and_update());
                (PhaseSource::Response(stream.subscribe_chunks(), text), status)
            }
        };
        let mut epoch = epochs.current();
        store.apply_with(|_| {
            epoch = epochs.advance();
            Some(StateUpdate::ConversationStatus(status))
        });
        info!(phase = phase.label(), epoch = epoch.value(), "conversation phase");

        live = match source {
            PhaseSource::Fixed => None,
            PhaseSource::History(history) => Some(AbortOnDrop(tokio::spawn(show_last_output(
                history,
                epoch,
                Arc::clone(&epochs),
                Arc::clone(&store),
            )))),
            PhaseSource::Response(chunks, text) => {
                Some(AbortOnDrop(tokio::spawn(show_response(
                    chunks,
                    text,
                    epoch,
                    Arc::clone(&epochs),
                    Arc::clone(&store),
                    Arc::clone(&player),
                ))))
            }
        };

        if phase_rx.changed().await.is_err() {
            debug!("conversation phase source closed");
            break;
        }
    }
}

/// Write `status` only if `epoch` is still the live one.
fn show(store: &StateStore, epochs: &EpochCounter, epoch: Epoch, status: String) -> bool {
    store.apply_with(|_| {
        if epochs.is_current(epoch) {
            Some(StateUpdate::ConversationStatus(status))
        } else {
            debug!(epoch = epoch.value(), "dropping status from retired phase");
            None
        }
    })
}

/// Play `chunk` only if `epoch` is still the live one.
fn speak(
    store: &StateStore,
    epochs: &EpochCounter,
    epoch: Epoch,
    player: &dyn AudioOutput,
    chunk: &str,
) -> bool {
    store.with_lock(|_| {
        if !epochs.is_current(epoch) {
            debug!(epoch = epoch.value(), "dropping chunk from retired phase");
            return false;
        }
        player.play(chunk, Priority::Regular);
        true
    })
}

async fn show_last_output(
    mut history: watch::Receiver<History>,
    epoch: Epoch,
    epochs: Arc<EpochCounter>,
    store: Arc<StateStore>,
) {
    while history.changed().await.is_ok() {
        let status = idle_status(&history.borrow_and_update());
        show(&store, &epochs, epoch, status);
    }
}

async fn show_response(
    mut chunks: broadcast::Receiver<String>,
    mut text: watch::Receiver<String>,
    epoch: Epoch,
    epochs: Arc<EpochCounter>,
    store: Arc<StateStore>,
    player: Arc<dyn AudioOutput>,
) {
    let mut text_open = true;
    let mut chunks_open = true;
    while text_open || chunks_open {
        tokio::select! {
            changed = text.changed(), if text_open => {
                if changed.is_err() {
                    text_open = false;
                    continue;
                }
                let status = responding_status(&text.borrow_and_update());
                show(&store, &epochs, epoch, status);
            }
            chunk = chunks.recv(), if chunks_open => match chunk {
                Ok(chunk) => {
                    speak(&store, &epochs, epoch, player.as_ref(), &chunk);
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "response chunks lagged"),
                Err(RecvError::Closed) => chunks_open = false,
            },
        }
    }
}

// ── Event log ────────────────────────────────────────────────────────────

/// Append a `Request` event for each new input at the tail of history.
async fn log_requests(mut history: watch::Receiver<History>, store: Arc<StateStore>) {
    let mut last_tail: Option<u64> = None;
    loop {
        let tail = history.borrow_and_update().last().cloned();
        if let Some(entry) = tail {
            if last_tail != Some(entry.id()) {
                last_tail = Some(entry.id());
                if let HistoryEntry::Input { text, .. } = entry {
                    info!(text = %text, "request observed");
                    store.apply(StateUpdate::AppendEvent(AppEvent::request(text)));
                }
            }
        }
        if history.changed().await.is_err() {
            break;
        }
    }
}

async fn log_frames(mut frames: broadcast::Receiver<SessionFrame>, store: Arc<StateStore>) {
    loop {
        match frames.recv().await {
            Ok(frame) => {
                debug!(exchange_id = ?frame.exchange_id, "session frame");
                store.apply(StateUpdate::AppendEvent(AppEvent::frame(frame)));
            }
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "session frames lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn log_errors(mut errors: broadcast::Receiver<SessionError>, store: Arc<StateStore>) {
    loop {
        match errors.recv().await {
            Ok(error) => {
                warn!(message = %error.message, "session error");
                store.apply(StateUpdate::Failure(format!("error: {}", error.message)));
            }
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "session errors lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::LoggingPlayer;

    #[test]
    fn idle_status_shows_last_output_only() {
        assert_eq!(idle_status(&[]), "[Idle] ");
        let history = vec![
            HistoryEntry::Input {
                id: 1,
                text: "hi".into(),
            },
            HistoryEntry::Output {
                id: 2,
                text: "hello".into(),
            },
        ];
        assert_eq!(idle_status(&history), "[Idle] hello");
        assert_eq!(idle_status(&history[..1]), "[Idle] ");
    }

    #[test]
    fn stale_epoch_write_is_dropped() {
        let store = StateStore::new();
        let epochs = EpochCounter::new();
        let responding = epochs.advance();
        assert!(show(&store, &epochs, responding, responding_status("a")));

        let _idle = epochs.advance();
        assert!(!show(&store, &epochs, responding, responding_status("ab")));
        assert_eq!(store.snapshot().conversation_status, "[Responding] a");
    }

    #[test]
    fn stale_epoch_chunk_is_not_spoken() {
        let store = StateStore::new();
        let epochs = EpochCounter::new();
        let player = LoggingPlayer::new();
        let responding = epochs.advance();
        assert!(speak(&store, &epochs, responding, &player, "Turn"));

        store.apply_with(|_| {
            epochs.advance();
            Some(StateUpdate::ConversationStatus(idle_status(&[])))
        });
        assert!(!speak(&store, &epochs, responding, &player, " left"));
        assert_eq!(player.played(), vec![("Turn".to_string(), Priority::Regular)]);
    }
}
