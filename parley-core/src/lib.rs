//! # parley-core
//!
//! Client-side state engine for a voice-driven conversational assistant.
//!
//! ## Architecture
//!
//! ```text
//! Recognizer callbacks → CaptureSink → crossbeam queue → pump thread
//!                                                           │
//!                                                     VoiceMachine
//!                                                           │
//!   Transport (session, phase, history, frames, errors)     │
//!        │                                                  ▼
//!        ├─► SessionController ──┐                    VoiceInputState
//!        ├─► ConversationOrchestrator ─┤                    │
//!        └─► RequestGate ──────────────┼──► StateStore ◄────┘
//!                  ▲                   │   (Arc<AppState>, watch)
//!                  └──── bridge ◄──────┘
//! ```
//!
//! Every observable change becomes a [`StateUpdate`] applied under one lock;
//! consumers read immutable [`AppState`] snapshots.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod bridge;
pub mod conversation;
pub mod engine;
pub mod epoch;
pub mod error;
pub mod gate;
pub mod player;
pub mod reachability;
pub mod session;
pub mod state;
pub mod storage;
pub mod store;
pub mod transport;
pub mod voice;

// Convenience re-exports for downstream crates
pub use engine::{Collaborators, EngineConfig, ParleyEngine};
pub use error::{ParleyError, Result};
pub use player::{AudioOutput, LoggingPlayer, Priority};
pub use reachability::{reachability, Reachability, ReachabilitySignal};
pub use state::{
    AppEvent, AppEventKind, AppState, NetworkStatus, SessionFrame, SessionState, StateUpdate,
    VoiceInputState,
};
pub use storage::{KeyValueStore, MemoryStore};
pub use store::StateStore;
pub use transport::loopback::{LoopbackConfig, LoopbackTransport};
pub use transport::{ConversationPhase, Place, RequestContext, Transport};
pub use voice::scripted::ScriptedCapture;
pub use voice::{CaptureEngine, CaptureErrorCode, CaptureSink, Language};
