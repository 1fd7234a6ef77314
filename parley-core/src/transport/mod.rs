//! Session transport abstraction.
//!
//! The `Transport` trait decouples the engine from whatever actually talks to
//! the conversational service (websocket client, SDK binding, the in-process
//! [`loopback::LoopbackTransport`], test doubles).
//!
//! `connect` and `close` are fire-and-forget: the transport reports progress
//! through its observables, never through return values. `post_request` is the
//! only call whose failure the engine awaits.

pub mod loopback;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::error::Result;
use crate::state::{SessionFrame, SessionState};

/// Broadcast capacity for response chunk streams.
const CHUNK_BROADCAST_CAP: usize = 256;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start connecting, optionally resuming a remembered session.
    fn connect(&self, reconnect_id: Option<String>);

    /// Submit one request. Resolves once the service accepted or rejected it;
    /// the response itself arrives through `conversation_phase`.
    async fn post_request(&self, text: &str, context: &RequestContext) -> Result<()>;

    fn session_state(&self) -> watch::Receiver<SessionState>;

    fn conversation_phase(&self) -> watch::Receiver<ConversationPhase>;

    /// Interaction history, oldest first.
    fn history(&self) -> watch::Receiver<History>;

    fn frames(&self) -> broadcast::Receiver<SessionFrame>;

    fn errors(&self) -> broadcast::Receiver<SessionError>;

    /// Release the local session resources. Must be idempotent.
    fn close(&self);
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Ambient context attached to every outgoing request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub place: Option<Place>,
    pub profile_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Place {
    pub lat: f64,
    pub lon: f64,
    pub place_name: String,
}

/// Session-level error reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    pub message: String,
}

impl SessionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HistoryEntry {
    Input { id: u64, text: String },
    Output { id: u64, text: String },
}

impl HistoryEntry {
    pub fn id(&self) -> u64 {
        match self {
            Self::Input { id, .. } | Self::Output { id, .. } => *id,
        }
    }
}

pub type History = Arc<Vec<HistoryEntry>>;

// ---------------------------------------------------------------------------
// Conversation phase
// ---------------------------------------------------------------------------

/// Progress of the current request/response exchange.
#[derive(Debug, Clone, Default)]
pub enum ConversationPhase {
    #[default]
    Idle,
    AwaitingResponse,
    Responding(ResponseStream),
}

impl ConversationPhase {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingResponse => "awaiting",
            Self::Responding(_) => "responding",
        }
    }
}

impl PartialEq for ConversationPhase {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Idle, Self::Idle) | (Self::AwaitingResponse, Self::AwaitingResponse) => true,
            (Self::Responding(a), Self::Responding(b)) => a.exchange_id == b.exchange_id,
            _ => false,
        }
    }
}

/// Reader side of one streamed response.
///
/// `buffered_text` holds everything received so far; `subscribe_chunks`
/// yields each chunk as it arrives.
#[derive(Debug, Clone)]
pub struct ResponseStream {
    exchange_id: u64,
    text: watch::Receiver<String>,
    chunks: broadcast::Sender<String>,
}

/// Writer side of one streamed response, held by the transport.
#[derive(Debug)]
pub struct ResponseWriter {
    text: watch::Sender<String>,
    chunks: broadcast::Sender<String>,
}

impl ResponseStream {
    pub fn channel(exchange_id: u64) -> (ResponseWriter, ResponseStream) {
        let (text_tx, text_rx) = watch::channel(String::new());
        let (chunks, _) = broadcast::channel(CHUNK_BROADCAST_CAP);
        let stream = ResponseStream {
            exchange_id,
            text: text_rx,
            chunks: chunks.clone(),
        };
        (
            ResponseWriter {
                text: text_tx,
                chunks,
            },
            stream,
        )
    }

    pub fn buffered_text(&self) -> watch::Receiver<String> {
        self.text.clone()
    }

    pub fn subscribe_chunks(&self) -> broadcast::Receiver<String> {
        self.chunks.subscribe()
    }
}

impl ResponseWriter {
    /// Append `chunk` to the buffered text and broadcast it.
    pub fn push_chunk(&self, chunk: &str) {
        self.text.send_modify(|text| text.push_str(chunk));
        let _ = self.chunks.send(chunk.to_owned());
    }

    pub fn buffered(&self) -> String {
        self.text.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_writer_buffers_and_broadcasts() {
        let (writer, stream) = ResponseStream::channel(4);
        let mut chunks = stream.subscribe_chunks();
        writer.push_chunk("Turn ");
        writer.push_chunk("right");
        assert_eq!(*stream.buffered_text().borrow(), "Turn right");
        assert_eq!(chunks.try_recv().unwrap(), "Turn ");
        assert_eq!(chunks.try_recv().unwrap(), "right");
        assert_eq!(writer.buffered(), "Turn right");
    }

    #[test]
    fn responding_phases_compare_by_exchange() {
        let (_w1, a) = ResponseStream::channel(1);
        let (_w2, b) = ResponseStream::channel(2);
        assert_eq!(
            ConversationPhase::Responding(a.clone()),
            ConversationPhase::Responding(a)
        );
        assert_ne!(
            ConversationPhase::Responding(b),
            ConversationPhase::AwaitingResponse
        );
        assert!(ConversationPhase::default().is_idle());
    }
}
