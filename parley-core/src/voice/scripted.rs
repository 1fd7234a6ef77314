//! `ScriptedCapture`: capture engine with no recognizer behind it.
//!
//! It only records what it was asked to do. Recognition results are injected
//! by whoever holds the [`CaptureSink`](super::CaptureSink), which lets hosts
//! and tests play the part of the platform recognizer.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{CaptureEngine, ListenOptions};
use crate::error::{ParleyError, Result};

#[derive(Debug, Clone, Default)]
pub struct ScriptedCapture {
    log: Arc<Mutex<CaptureLog>>,
}

#[derive(Debug, Default)]
struct CaptureLog {
    starts: Vec<ListenOptions>,
    stops: usize,
    listening: bool,
    destroyed: bool,
    fail_next_start: Option<String>,
}

impl ScriptedCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `start_listening` fail with `message`.
    pub fn fail_next_start(&self, message: &str) {
        self.log.lock().fail_next_start = Some(message.to_owned());
    }

    /// Listen options of every successful start, oldest first.
    pub fn starts(&self) -> Vec<ListenOptions> {
        self.log.lock().starts.clone()
    }

    pub fn stop_count(&self) -> usize {
        self.log.lock().stops
    }

    pub fn is_listening(&self) -> bool {
        self.log.lock().listening
    }

    pub fn is_destroyed(&self) -> bool {
        self.log.lock().destroyed
    }
}

impl CaptureEngine for ScriptedCapture {
    fn start_listening(&mut self, options: &ListenOptions) -> Result<()> {
        let mut log = self.log.lock();
        if let Some(message) = log.fail_next_start.take() {
            return Err(ParleyError::Other(anyhow::anyhow!(message)));
        }
        debug!(?options, "ScriptedCapture::start_listening");
        log.starts.push(options.clone());
        log.listening = true;
        Ok(())
    }

    fn stop_listening(&mut self) {
        let mut log = self.log.lock();
        debug!(was_listening = log.listening, "ScriptedCapture::stop_listening");
        log.stops += 1;
        log.listening = false;
    }

    fn destroy(&mut self) {
        let mut log = self.log.lock();
        log.listening = false;
        log.destroyed = true;
    }
}
