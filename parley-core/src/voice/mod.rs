//! Voice input: capture-engine abstraction and the component that owns it.
//!
//! ## Threading
//!
//! Platform recognizers call back on their own threads. Callbacks are pushed
//! through a bounded `crossbeam_channel` by a [`CaptureSink`] and drained by a
//! dedicated pump thread, which is the only place capture events touch the
//! [`VoiceMachine`]. Commands (`start_listening` / `stop_listening`) take the
//! same machine lock, so callbacks and commands are applied in one total order
//! and the published [`VoiceInputState`] follows that order.

pub mod language;
pub mod machine;
pub mod scripted;

pub use language::{Language, ListenOptions};
pub use machine::{CaptureErrorCode, CaptureEvent, DiscardReason, Outcome, VoiceMachine};

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ParleyError, Result};
use crate::reachability::Reachability;
use crate::state::VoiceInputState;

/// Contract for platform speech-capture engines.
///
/// `&mut self` reflects that recognizers are stateful; all calls are
/// serialised through the owning [`VoiceInput`].
pub trait CaptureEngine: Send + 'static {
    fn start_listening(&mut self, options: &ListenOptions) -> Result<()>;

    fn stop_listening(&mut self);

    /// Release the recognizer. Called once on detach.
    fn destroy(&mut self) {}
}

/// Cloneable callback entry point handed to the platform recognizer.
#[derive(Debug, Clone)]
pub struct CaptureSink {
    tx: Sender<CaptureEvent>,
}

impl CaptureSink {
    pub fn on_partial(&self, text: impl Into<String>) {
        self.push(CaptureEvent::Partial(text.into()));
    }

    pub fn on_final(&self, results: Vec<String>) {
        self.push(CaptureEvent::Final(results));
    }

    pub fn on_error(&self, code: CaptureErrorCode) {
        self.push(CaptureEvent::Error(code));
    }

    pub fn push(&self, event: CaptureEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(?event, "capture queue full, dropping callback");
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("capture queue closed, dropping callback");
            }
        }
    }
}

struct Shared {
    machine: Mutex<VoiceMachine>,
    engine: Mutex<Option<Box<dyn CaptureEngine>>>,
    state_tx: watch::Sender<VoiceInputState>,
    options: Mutex<ListenOptions>,
    languages_tx: watch::Sender<Vec<Language>>,
}

impl Shared {
    fn publish(&self, machine: &VoiceMachine) {
        self.state_tx.send_if_modified(|current| {
            if current == machine.state() {
                return false;
            }
            *current = machine.state().clone();
            true
        });
    }

    fn handle_event(&self, event: CaptureEvent) {
        let mut machine = self.machine.lock();
        let described = format!("{event:?}");
        match machine.on_event(event) {
            Outcome::Applied { stop_capture } => {
                if stop_capture {
                    if let Some(engine) = self.engine.lock().as_mut() {
                        engine.stop_listening();
                    }
                }
                info!(event = %described, state = %machine.state(), "capture event applied");
                self.publish(&machine);
            }
            Outcome::Discarded(reason) => {
                debug!(event = %described, ?reason, state = %machine.state(), "capture event discarded");
            }
        }
    }
}

/// Language context the component follows while attached.
pub struct VoiceContext {
    pub reachability: Reachability,
    pub preferred_language: watch::Receiver<Language>,
    pub supported_languages: Vec<Language>,
    pub device_language: Language,
}

pub struct VoiceInput {
    shared: Arc<Shared>,
    tx: Sender<CaptureEvent>,
    rx: Receiver<CaptureEvent>,
    /// Dropping the sender wakes the pump and ends it.
    shutdown: Mutex<Option<Sender<()>>>,
    pump: Mutex<Option<thread::JoinHandle<()>>>,
}

impl VoiceInput {
    pub fn new(queue_capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(queue_capacity.max(1));
        let (state_tx, _) = watch::channel(VoiceInputState::Idle);
        let (languages_tx, _) = watch::channel(Vec::new());
        Self {
            shared: Arc::new(Shared {
                machine: Mutex::new(VoiceMachine::new()),
                engine: Mutex::new(None),
                state_tx,
                options: Mutex::new(ListenOptions::default()),
                languages_tx,
            }),
            tx,
            rx,
            shutdown: Mutex::new(None),
            pump: Mutex::new(None),
        }
    }

    /// Callback entry point for the platform recognizer.
    pub fn sink(&self) -> CaptureSink {
        CaptureSink {
            tx: self.tx.clone(),
        }
    }

    pub fn state(&self) -> VoiceInputState {
        self.shared.machine.lock().state().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<VoiceInputState> {
        self.shared.state_tx.subscribe()
    }

    pub fn subscribe_languages(&self) -> watch::Receiver<Vec<Language>> {
        self.shared.languages_tx.subscribe()
    }

    /// Options the next `start_listening` will hand to the engine.
    pub fn listen_options(&self) -> ListenOptions {
        self.shared.options.lock().clone()
    }

    /// Install the capture engine, start the callback pump and begin tracking
    /// language options. Must be called from within a Tokio runtime.
    ///
    /// Returns the handle of the language-tracking task; aborting it is part of
    /// the caller's subscription teardown.
    pub fn attach(
        &self,
        engine: Box<dyn CaptureEngine>,
        context: VoiceContext,
    ) -> Result<JoinHandle<()>> {
        {
            let mut slot = self.shared.engine.lock();
            if slot.is_some() {
                return Err(ParleyError::AlreadyAttached);
            }
            *slot = Some(engine);
        }

        let shared = Arc::clone(&self.shared);
        let rx = self.rx.clone();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(0);
        let pump = match thread::Builder::new()
            .name("parley-capture".into())
            .spawn(move || run_pump(shared, rx, shutdown_rx))
        {
            Ok(pump) => pump,
            Err(e) => {
                self.shared.engine.lock().take();
                return Err(e.into());
            }
        };
        *self.shutdown.lock() = Some(shutdown_tx);
        *self.pump.lock() = Some(pump);
        info!("voice input attached");

        let preferred = context.preferred_language.borrow().clone();
        refresh_languages(
            &self.shared,
            &context,
            context.reachability.is_reachable(),
            &preferred,
        );

        Ok(tokio::spawn(track_languages(
            Arc::clone(&self.shared),
            context,
        )))
    }

    /// Begin a capture attempt with the current listen options.
    pub fn start_listening(&self) -> Result<()> {
        let mut machine = self.shared.machine.lock();
        let mut slot = self.shared.engine.lock();
        let engine = slot.as_mut().ok_or(ParleyError::CaptureUnavailable)?;
        machine.start()?;
        let options = self.listen_options();
        if let Err(e) = engine.start_listening(&options) {
            warn!("capture engine failed to start: {e}");
            machine.stop();
            self.shared.publish(&machine);
            return Err(e);
        }
        info!(language = ?options.language.as_ref().map(Language::tag), "listening");
        self.shared.publish(&machine);
        Ok(())
    }

    /// Force `Idle` and stop the capture engine, from any state.
    pub fn stop_listening(&self) -> Result<()> {
        let mut machine = self.shared.machine.lock();
        let mut slot = self.shared.engine.lock();
        let engine = slot.as_mut().ok_or(ParleyError::CaptureUnavailable)?;
        engine.stop_listening();
        machine.stop();
        info!("stopped listening");
        self.shared.publish(&machine);
        Ok(())
    }

    /// Stop the pump, stop capture if an attempt is active, and release the
    /// engine. Safe to call repeatedly.
    pub fn detach(&self) {
        drop(self.shutdown.lock().take());
        if let Some(pump) = self.pump.lock().take() {
            if pump.join().is_err() {
                warn!("capture pump panicked");
            }
        }

        let mut machine = self.shared.machine.lock();
        if let Some(mut engine) = self.shared.engine.lock().take() {
            if machine.state().is_listening() {
                engine.stop_listening();
            }
            engine.destroy();
            info!("voice input detached");
        }
        machine.stop();
        self.shared.publish(&machine);
        // Callbacks queued for the released engine must not reach the next one.
        while self.rx.try_recv().is_ok() {}
    }
}

fn run_pump(shared: Arc<Shared>, rx: Receiver<CaptureEvent>, shutdown: Receiver<()>) {
    debug!("capture pump started");
    loop {
        crossbeam_channel::select! {
            recv(rx) -> event => match event {
                Ok(event) => shared.handle_event(event),
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }
    debug!("capture pump stopped");
}

fn refresh_languages(shared: &Shared, context: &VoiceContext, reachable: bool, preferred: &Language) {
    let options = language::listen_options(reachable, preferred);
    let available = language::available_languages(
        reachable,
        &context.supported_languages,
        &context.device_language,
    );
    debug!(
        reachable,
        preferred = %preferred,
        hint = ?options.language.as_ref().map(Language::tag),
        available = available.len(),
        "listen options updated"
    );
    *shared.options.lock() = options;
    shared.languages_tx.send_if_modified(|current| {
        if *current == available {
            return false;
        }
        *current = available;
        true
    });
}

async fn track_languages(shared: Arc<Shared>, context: VoiceContext) {
    let mut reach_rx = context.reachability.subscribe();
    let mut language_rx = context.preferred_language.clone();
    loop {
        let reachable = *reach_rx.borrow_and_update();
        let preferred = language_rx.borrow_and_update().clone();
        refresh_languages(&shared, &context, reachable, &preferred);

        tokio::select! {
            changed = reach_rx.changed() => if changed.is_err() { break },
            changed = language_rx.changed() => if changed.is_err() { break },
        }
    }
}
