//! Voice-to-request bridge.
//!
//! Watches the published voice-input state. The first time a new
//! `Result(text)` shows up (compared with the previous observed value, not
//! with history) the text is posted and voice input is reset to `Idle`, so a
//! finalized utterance is submitted exactly once.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::gate::RequestGate;
use crate::state::VoiceInputState;
use crate::store::StateStore;
use crate::voice::VoiceInput;

pub fn spawn_bridge(
    store: Arc<StateStore>,
    gate: Arc<RequestGate>,
    voice: Arc<VoiceInput>,
) -> JoinHandle<()> {
    let mut rx = store.subscribe();
    tokio::spawn(async move {
        let mut previous: Option<VoiceInputState> = None;
        loop {
            let current = rx.borrow_and_update().voice_input_state.clone();
            if previous.as_ref() != Some(&current) {
                if let VoiceInputState::Result { text } = &current {
                    info!(text = %text, "voice result → request");
                    gate.post(text);
                    if let Err(e) = voice.stop_listening() {
                        warn!("failed to reset voice input: {e}");
                    }
                }
                previous = Some(current);
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}
