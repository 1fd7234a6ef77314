//! `ParleyEngine`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! ParleyEngine::new()
//!     └─► attach(capture)   → observers spawned, voice input attached, connect()
//!         └─► commands      → start/stop listening, reset, mute, post, …
//!             └─► detach()  → observers aborted, voice released,
//!                             transport closed, player cleared
//! ```
//!
//! Commands issued before `attach` (or after `detach`) return
//! [`ParleyError::NotAttached`] rather than panicking. `detach` is idempotent.
//!
//! ## Threading
//!
//! Every observer is a Tokio task whose handle the engine keeps; `detach`
//! aborts them all before any collaborator is torn down, so no observer can
//! write into the snapshot after detach returns. Capture callbacks run on the
//! `parley-capture` pump thread owned by [`VoiceInput`].

mod forward;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    bridge::spawn_bridge,
    conversation::ConversationOrchestrator,
    error::{ParleyError, Result},
    gate::RequestGate,
    player::{AudioOutput, Priority},
    reachability::Reachability,
    session::SessionController,
    state::{AppState, NetworkStatus, StateUpdate},
    storage::KeyValueStore,
    store::StateStore,
    transport::{RequestContext, Transport},
    voice::{CaptureEngine, CaptureSink, Language, ListenOptions, VoiceContext, VoiceInput},
};

use forward::forward;

/// Configuration for `ParleyEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Durable-store key holding the reconnection identifier.
    /// Default: `"sessionId"`.
    pub session_key: String,
    /// Language hint used while the network is reachable. Default: en-US.
    pub preferred_language: Language,
    /// The device's own language; the only one offered offline.
    pub device_language: Language,
    /// Languages the online recognizer accepts.
    pub supported_languages: Vec<Language>,
    /// Ambient context attached to every posted request.
    pub request_context: RequestContext,
    /// Capacity of the capture callback queue. Default: 64.
    pub capture_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_key: "sessionId".into(),
            preferred_language: Language::new("en-US"),
            device_language: Language::new("en-US"),
            supported_languages: ["en-US", "de-DE", "es-ES", "fr-FR", "ja-JP"]
                .into_iter()
                .map(Language::new)
                .collect(),
            request_context: RequestContext::default(),
            capture_queue_capacity: 64,
        }
    }
}

/// External collaborators the engine drives.
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub storage: Arc<dyn KeyValueStore>,
    pub player: Arc<dyn AudioOutput>,
    pub reachability: Reachability,
}

/// The top-level engine handle.
///
/// `ParleyEngine` is `Send + Sync`; all fields use interior mutability. Wrap
/// in `Arc<ParleyEngine>` to share it between a host's command loop and its
/// rendering task.
pub struct ParleyEngine {
    config: EngineConfig,
    store: Arc<StateStore>,
    transport: Arc<dyn Transport>,
    player: Arc<dyn AudioOutput>,
    reachability: Reachability,
    session: Arc<SessionController>,
    conversation: ConversationOrchestrator,
    gate: Arc<RequestGate>,
    voice: Arc<VoiceInput>,
    preferred_language: watch::Sender<Language>,
    /// `true` between a successful `attach` and the next `detach`.
    attached: AtomicBool,
    /// Handles of every observer spawned by `attach`.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ParleyEngine {
    /// Create a detached engine. Nothing runs until `attach`.
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            transport,
            storage,
            player,
            reachability,
        } = collaborators;

        let store = Arc::new(StateStore::new());
        let session = Arc::new(SessionController::new(
            Arc::clone(&transport),
            storage,
            config.session_key.clone(),
        ));
        let conversation =
            ConversationOrchestrator::new(Arc::clone(&transport), Arc::clone(&player));
        let gate = Arc::new(RequestGate::new(
            Arc::clone(&transport),
            Arc::clone(&store),
            config.request_context.clone(),
        ));
        let voice = Arc::new(VoiceInput::new(config.capture_queue_capacity));
        let (preferred_language, _) = watch::channel(config.preferred_language.clone());

        Self {
            config,
            store,
            transport,
            player,
            reachability,
            session,
            conversation,
            gate,
            voice,
            preferred_language,
            attached: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Start observing every collaborator and connect to the service,
    /// resuming the remembered session when there is one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn attach(&self, capture: Box<dyn CaptureEngine>) -> Result<()> {
        if self
            .attached
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ParleyError::AlreadyAttached);
        }

        let voice_context = VoiceContext {
            reachability: self.reachability.clone(),
            preferred_language: self.preferred_language.subscribe(),
            supported_languages: self.config.supported_languages.clone(),
            device_language: self.config.device_language.clone(),
        };
        let languages_task = match self.voice.attach(capture, voice_context) {
            Ok(task) => task,
            Err(e) => {
                self.attached.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        self.store.apply(StateUpdate::NetworkStatus(
            self.reachability.network_status(),
        ));

        let mut tasks = self.tasks.lock();
        tasks.push(languages_task);
        tasks.push(self.session.spawn_observer(Arc::clone(&self.store)));
        tasks.extend(self.conversation.spawn(Arc::clone(&self.store)));
        tasks.push(self.gate.spawn_can_post());
        tasks.push(forward(
            self.reachability.subscribe(),
            Arc::clone(&self.store),
            |reachable| StateUpdate::NetworkStatus(NetworkStatus::from(reachable)),
        ));
        tasks.push(forward(
            self.voice.subscribe(),
            Arc::clone(&self.store),
            StateUpdate::VoiceInput,
        ));
        tasks.push(spawn_bridge(
            Arc::clone(&self.store),
            Arc::clone(&self.gate),
            Arc::clone(&self.voice),
        ));
        info!(tasks = tasks.len(), "engine attached");
        drop(tasks);

        self.session.connect();
        Ok(())
    }

    /// Tear everything down: observers first, then voice input, the transport
    /// and the player. Safe to call repeatedly or without a prior `attach`.
    pub fn detach(&self) {
        let was_attached = self.attached.swap(false, Ordering::SeqCst);

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        self.conversation.retire();

        self.voice.detach();
        self.transport.close();
        self.player.clear();

        if was_attached {
            info!(aborted = tasks.len(), "engine detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    // ── Commands ─────────────────────────────────────────────────────────

    /// Silence any spoken response and begin a capture attempt.
    pub fn start_listening(&self) -> Result<()> {
        self.ensure_attached()?;
        self.player.clear();
        self.voice.start_listening()
    }

    pub fn stop_listening(&self) -> Result<()> {
        self.ensure_attached()?;
        self.voice.stop_listening()
    }

    /// Forget the remembered session, clear the event log and reconnect
    /// without a reconnection identifier.
    pub fn clear_session(&self) -> Result<()> {
        self.ensure_attached()?;
        self.session.reset(&self.store);
        Ok(())
    }

    /// Post `text` directly, bypassing voice input.
    ///
    /// The gate is cooperative: callers should check `can_post` first.
    pub fn post(&self, text: &str) -> Result<JoinHandle<()>> {
        self.ensure_attached()?;
        Ok(self.gate.post(text))
    }

    pub fn set_muted(&self, muted: bool) {
        self.player.set_muted(muted);
        self.store.apply(StateUpdate::PlayerMuted(muted));
        info!(muted, "player muted");
    }

    pub fn set_permissions_granted(&self, granted: bool) {
        self.store.apply(StateUpdate::PermissionsGranted(granted));
        info!(granted, "permissions");
    }

    /// Change the language hint for subsequent capture attempts.
    pub fn set_preferred_language(&self, language: Language) {
        let changed = self.preferred_language.send_if_modified(|current| {
            if current.tag() == language.tag() {
                return false;
            }
            *current = language.clone();
            true
        });
        if changed {
            info!(language = %language, "preferred language changed");
        }
    }

    /// Speak `text` ahead of regular playback.
    pub fn play_priority(&self, text: &str) -> Result<()> {
        self.ensure_attached()?;
        self.player.play(text, Priority::Priority);
        Ok(())
    }

    // ── Observation ──────────────────────────────────────────────────────

    pub fn snapshot(&self) -> Arc<AppState> {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<AppState>> {
        self.store.subscribe()
    }

    /// Callback entry point for the platform recognizer.
    pub fn capture_sink(&self) -> CaptureSink {
        self.voice.sink()
    }

    /// Options the next capture attempt will use.
    pub fn listen_options(&self) -> ListenOptions {
        self.voice.listen_options()
    }

    /// Languages the user can currently pick from.
    pub fn available_languages(&self) -> Vec<Language> {
        self.voice.subscribe_languages().borrow().clone()
    }

    pub fn subscribe_languages(&self) -> watch::Receiver<Vec<Language>> {
        self.voice.subscribe_languages()
    }

    pub fn stored_session_id(&self) -> Option<String> {
        self.session.stored_session_id()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn ensure_attached(&self) -> Result<()> {
        if self.is_attached() {
            Ok(())
        } else {
            Err(ParleyError::NotAttached)
        }
    }
}

impl Drop for ParleyEngine {
    fn drop(&mut self) {
        if self.is_attached() {
            warn!("engine dropped while attached; detaching");
            self.detach();
        }
    }
}
