//! Voice-input finite state machine.
//!
//! ```text
//! Idle | Error ──start──► Listening(None) ──partial──► Listening(Some)
//!                             │
//!                             ├─final([t, ..])──► Result(t)
//!                             ├─final([])───────► Error("no_results")
//!                             ├─error(no_match)─► Idle
//!                             └─error(other)────► Error(reason)
//! any ──stop──► Idle
//! ```
//!
//! Errors racing a delivered result are discarded: `Result` is sticky until
//! the attempt is explicitly stopped. `client` errors are recognizer noise and
//! are always discarded. Partial and final results arriving outside of
//! `Listening` belong to an attempt that was already stopped and are dropped.
//!
//! `start` is accepted from `Error` as well as `Idle`: an error already ended
//! the previous attempt, so retrying does not require an explicit `stop`
//! first. Starting from `Listening` or `Result` is rejected with
//! [`ParleyError::CaptureBusy`].
//!
//! The machine is pure; the owning component performs the capture-engine side
//! effects the [`Outcome`] asks for.

use serde::{Deserialize, Serialize};

use crate::error::{ParleyError, Result};
use crate::state::VoiceInputState;

/// Raw callbacks from the platform speech-capture engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Partial(String),
    Final(Vec<String>),
    Error(CaptureErrorCode),
}

/// Speech-capture engine failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureErrorCode {
    NetworkTimeout,
    Network,
    Audio,
    Server,
    Client,
    SpeechTimeout,
    NoMatch,
    RecognizerBusy,
    InsufficientPermissions,
    TooManyRequests,
    ServerDisconnected,
    LanguageNotSupported,
    LanguageUnavailable,
    CannotCheckSupport,
    Unknown,
}

impl CaptureErrorCode {
    pub fn reason(self) -> &'static str {
        match self {
            Self::NetworkTimeout => "error_network_timeout",
            Self::Network => "error_network",
            Self::Audio => "error_audio",
            Self::Server => "error_server",
            Self::Client => "error_client",
            Self::SpeechTimeout => "error_speech_timeout",
            Self::NoMatch => "error_no_match",
            Self::RecognizerBusy => "error_recognizer_busy",
            Self::InsufficientPermissions => "error_insufficient_permissions",
            Self::TooManyRequests => "error_too_many_requests",
            Self::ServerDisconnected => "error_server_disconnected",
            Self::LanguageNotSupported => "error_language_not_supported",
            Self::LanguageUnavailable => "error_language_unavailable",
            Self::CannotCheckSupport => "error_cannot_check_support",
            Self::Unknown => "error_unknown",
        }
    }

    /// Parse a code name as written in logs or host commands
    /// (`"no_match"`, `"network"`, ...). Unrecognised names map to `Unknown`.
    pub fn from_name(name: &str) -> Self {
        let name = name.trim().to_ascii_lowercase();
        let name = name.strip_prefix("error_").unwrap_or(&name);
        serde_json::from_value(serde_json::Value::String(name.to_owned()))
            .unwrap_or(Self::Unknown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    ClientNoise,
    ResultIsSticky,
    NotListening,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// State changed. When `stop_capture` is set the engine must be stopped.
    Applied { stop_capture: bool },
    Discarded(DiscardReason),
}

#[derive(Debug, Default)]
pub struct VoiceMachine {
    state: VoiceInputState,
}

impl VoiceMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &VoiceInputState {
        &self.state
    }

    /// Begin a capture attempt. Allowed from `Idle`, and from `Error` since an
    /// error already ended the previous attempt.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            VoiceInputState::Idle | VoiceInputState::Error { .. } => {
                self.state = VoiceInputState::Listening { text: None };
                Ok(())
            }
            _ => Err(ParleyError::CaptureBusy {
                state: self.state.clone(),
            }),
        }
    }

    pub fn stop(&mut self) {
        self.state = VoiceInputState::Idle;
    }

    pub fn on_event(&mut self, event: CaptureEvent) -> Outcome {
        match event {
            CaptureEvent::Partial(text) => {
                if !self.state.is_listening() {
                    return Outcome::Discarded(DiscardReason::NotListening);
                }
                self.state = VoiceInputState::Listening { text: Some(text) };
                Outcome::Applied {
                    stop_capture: false,
                }
            }
            CaptureEvent::Final(results) => {
                if !self.state.is_listening() {
                    return Outcome::Discarded(DiscardReason::NotListening);
                }
                self.state = match results.into_iter().next() {
                    Some(text) => VoiceInputState::Result { text },
                    None => VoiceInputState::Error {
                        reason: VoiceInputState::ERROR_REASON_NO_RESULTS.to_owned(),
                    },
                };
                Outcome::Applied { stop_capture: true }
            }
            CaptureEvent::Error(code) => {
                if code == CaptureErrorCode::Client {
                    return Outcome::Discarded(DiscardReason::ClientNoise);
                }
                if matches!(self.state, VoiceInputState::Result { .. }) {
                    return Outcome::Discarded(DiscardReason::ResultIsSticky);
                }
                self.state = if code == CaptureErrorCode::NoMatch {
                    VoiceInputState::Idle
                } else {
                    VoiceInputState::Error {
                        reason: code.reason().to_owned(),
                    }
                };
                Outcome::Applied {
                    stop_capture: false,
                }
            }
        }
    }
}
