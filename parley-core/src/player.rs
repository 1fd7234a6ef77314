//! Audio-output collaborator (text-to-speech playback).

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Queued behind whatever is already playing.
    Regular,
    /// Interrupts regular playback.
    Priority,
}

pub trait AudioOutput: Send + Sync + 'static {
    fn play(&self, text: &str, priority: Priority);

    /// Drop everything queued or playing.
    fn clear(&self);

    fn set_muted(&self, muted: bool);
}

/// Player that speaks nothing; it logs and remembers what it was asked to play.
#[derive(Debug, Default)]
pub struct LoggingPlayer {
    inner: Mutex<LoggingPlayerState>,
}

#[derive(Debug, Default)]
struct LoggingPlayerState {
    muted: bool,
    played: Vec<(String, Priority)>,
    clears: usize,
}

impl LoggingPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn played(&self) -> Vec<(String, Priority)> {
        self.inner.lock().played.clone()
    }

    pub fn clear_count(&self) -> usize {
        self.inner.lock().clears
    }

    pub fn is_muted(&self) -> bool {
        self.inner.lock().muted
    }
}

impl AudioOutput for LoggingPlayer {
    fn play(&self, text: &str, priority: Priority) {
        let mut inner = self.inner.lock();
        debug!(muted = inner.muted, ?priority, text, "play");
        inner.played.push((text.to_owned(), priority));
    }

    fn clear(&self) {
        debug!("player cleared");
        self.inner.lock().clears += 1;
    }

    fn set_muted(&self, muted: bool) {
        self.inner.lock().muted = muted;
    }
}
