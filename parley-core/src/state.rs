//! Published application state.
//!
//! `AppState` is an immutable snapshot: every change produces a new value via
//! [`AppState::apply`], and the aggregator swaps it in wholesale. Each
//! component owns a narrow set of fields and only ever submits the
//! [`StateUpdate`] variants that touch those fields.
//!
//! All types serialize with camelCase field names so the snapshot can be handed
//! straight to a display surface as JSON.

use std::fmt;

use chrono::Local;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Connection phase of the remote conversational session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}

impl SessionState {
    pub fn connected(session_id: impl Into<String>) -> Self {
        Self::Connected {
            session_id: session_id.into(),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Connected { session_id } => Some(session_id),
            _ => None,
        }
    }
}

/// Opaque payload frame streamed by the session transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFrame {
    /// Exchange the frame belongs to, when the transport knows it.
    pub exchange_id: Option<u64>,
    pub payload: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Reachability
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkStatus {
    Reachable,
    #[default]
    NotReachable,
}

impl From<bool> for NetworkStatus {
    fn from(reachable: bool) -> Self {
        if reachable {
            Self::Reachable
        } else {
            Self::NotReachable
        }
    }
}

// ---------------------------------------------------------------------------
// Voice input
// ---------------------------------------------------------------------------

/// State of the voice-input capture attempt. Exactly one is active at a time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum VoiceInputState {
    #[default]
    Idle,
    Listening {
        text: Option<String>,
    },
    Result {
        text: String,
    },
    Error {
        reason: String,
    },
}

impl VoiceInputState {
    /// Reason reported when the engine finishes with an empty result list.
    pub const ERROR_REASON_NO_RESULTS: &'static str = "no_results";

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_listening(&self) -> bool {
        matches!(self, Self::Listening { .. })
    }
}

impl fmt::Display for VoiceInputState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::Listening { text } => write!(f, "Listening(text={text:?})"),
            Self::Result { text } => write!(f, "Result(text={text})"),
            Self::Error { reason } => write!(f, "Error(reason={reason})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

/// One entry of the event log. Timestamps are fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppEvent {
    /// Milliseconds since the Unix epoch.
    pub time_millis: i64,
    /// Local wall-clock time, `HH:MM:SS`.
    pub display_time: String,
    #[serde(flatten)]
    pub kind: AppEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AppEventKind {
    Request { text: String },
    Frame { frame: SessionFrame },
    Error { message: String },
}

impl AppEvent {
    fn now(kind: AppEventKind) -> Self {
        let now = Local::now();
        Self {
            time_millis: now.timestamp_millis(),
            display_time: now.format("%H:%M:%S").to_string(),
            kind,
        }
    }

    pub fn request(text: impl Into<String>) -> Self {
        Self::now(AppEventKind::Request { text: text.into() })
    }

    pub fn frame(frame: SessionFrame) -> Self {
        Self::now(AppEventKind::Frame { frame })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::now(AppEventKind::Error {
            message: message.into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    pub permissions_granted: bool,
    pub player_muted: bool,
    /// `Some` iff `session_state` is `Connected`.
    pub session_id: Option<String>,
    /// Append-only; cleared only by an explicit session reset.
    pub event_log: Vec<AppEvent>,
    pub can_post: bool,
    pub session_state: SessionState,
    pub conversation_status: String,
    pub network_status: NetworkStatus,
    pub voice_input_state: VoiceInputState,
}

/// A field-scoped change to [`AppState`].
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    PermissionsGranted(bool),
    PlayerMuted(bool),
    /// Sets `session_state` and keeps `session_id` in step with it.
    Session(SessionState),
    ConversationStatus(String),
    NetworkStatus(NetworkStatus),
    VoiceInput(VoiceInputState),
    CanPost(bool),
    AppendEvent(AppEvent),
    /// Appends an error event and forces `can_post` so the client may retry.
    Failure(String),
    ClearEvents,
}

impl AppState {
    /// Produce the successor snapshot. `self` is left untouched.
    pub fn apply(&self, update: StateUpdate) -> AppState {
        let mut next = self.clone();
        match update {
            StateUpdate::PermissionsGranted(granted) => next.permissions_granted = granted,
            StateUpdate::PlayerMuted(muted) => next.player_muted = muted,
            StateUpdate::Session(session) => {
                next.session_id = session.session_id().map(str::to_owned);
                next.session_state = session;
            }
            StateUpdate::ConversationStatus(status) => next.conversation_status = status,
            StateUpdate::NetworkStatus(status) => next.network_status = status,
            StateUpdate::VoiceInput(voice) => next.voice_input_state = voice,
            StateUpdate::CanPost(can_post) => next.can_post = can_post,
            StateUpdate::AppendEvent(event) => next.event_log.push(event),
            StateUpdate::Failure(message) => {
                next.event_log.push(AppEvent::error(message));
                next.can_post = true;
            }
            StateUpdate::ClearEvents => next.event_log.clear(),
        }
        next
    }
}
