use std::sync::Arc;
use std::time::Duration;

use parley_core::storage::KeyValueStore;
use parley_core::transport::ResponseStream;
use parley_core::{
    reachability, AppEventKind, AppState, Collaborators, ConversationPhase, EngineConfig, Language,
    LoggingPlayer, LoopbackConfig, LoopbackTransport, MemoryStore, NetworkStatus, ParleyEngine,
    ParleyError, Priority, ReachabilitySignal, ScriptedCapture, SessionFrame, SessionState,
    VoiceInputState,
};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(3);

struct Harness {
    engine: ParleyEngine,
    transport: Arc<LoopbackTransport>,
    storage: Arc<MemoryStore>,
    player: Arc<LoggingPlayer>,
    capture: ScriptedCapture,
    signal: ReachabilitySignal,
}

impl Harness {
    fn new(transport: LoopbackTransport) -> Self {
        Self::with_storage(transport, MemoryStore::new())
    }

    fn with_storage(transport: LoopbackTransport, storage: MemoryStore) -> Self {
        let transport = Arc::new(transport);
        let storage = Arc::new(storage);
        let player = Arc::new(LoggingPlayer::new());
        let (signal, reach) = reachability(true);
        let engine = ParleyEngine::new(
            EngineConfig::default(),
            Collaborators {
                transport: transport.clone(),
                storage: storage.clone(),
                player: player.clone(),
                reachability: reach,
            },
        );
        Self {
            engine,
            transport,
            storage,
            player,
            capture: ScriptedCapture::new(),
            signal,
        }
    }

    fn attach(&self) {
        self.engine
            .attach(Box::new(self.capture.clone()))
            .expect("attach");
    }

    async fn wait_for(&self, what: &str, pred: impl Fn(&AppState) -> bool) -> Arc<AppState> {
        let mut rx = self.engine.subscribe();
        let state = match tokio::time::timeout(WAIT, rx.wait_for(|s| pred(s.as_ref()))).await {
            Ok(Ok(state)) => Arc::clone(&state),
            Ok(Err(_)) => panic!("state store dropped while waiting for {what}"),
            Err(_) => panic!(
                "timed out waiting for {what}; last state: {:?}",
                self.engine.snapshot()
            ),
        };
        state
    }

    async fn connect(&self, session_id: &str) {
        self.transport
            .set_session_state(SessionState::connected(session_id));
        self.wait_for("connected", |s| s.session_id.as_deref() == Some(session_id))
            .await;
    }
}

fn requests(state: &AppState) -> Vec<String> {
    state
        .event_log
        .iter()
        .filter_map(|e| match &e.kind {
            AppEventKind::Request { text } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

fn last_error(state: &AppState) -> Option<String> {
    state.event_log.iter().rev().find_map(|e| match &e.kind {
        AppEventKind::Error { message } => Some(message.clone()),
        _ => None,
    })
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn session_is_remembered_and_reset_starts_fresh() {
    let h = Harness::new(LoopbackTransport::manual());
    h.attach();
    assert_eq!(h.transport.connect_calls(), vec![None]);
    h.wait_for("connecting", |s| s.session_state == SessionState::Connecting)
        .await;

    h.connect("abc123").await;
    assert_eq!(
        h.storage.get("sessionId").expect("read").as_deref(),
        Some("abc123")
    );

    h.transport.emit_frame(SessionFrame {
        exchange_id: None,
        payload: json!({ "type": "greeting" }),
    });
    h.wait_for("frame logged", |s| !s.event_log.is_empty()).await;

    h.engine.clear_session().expect("reset");
    assert_eq!(h.storage.get("sessionId").expect("read"), None);
    assert_eq!(h.transport.connect_calls(), vec![None, None]);
    let state = h
        .wait_for("reconnecting", |s| {
            s.session_state == SessionState::Connecting && s.event_log.is_empty()
        })
        .await;
    assert_eq!(state.session_id, None);
}

#[tokio::test]
async fn attach_resumes_remembered_session() {
    let storage = MemoryStore::new();
    storage.set("sessionId", "old-1").expect("seed");
    let h = Harness::with_storage(LoopbackTransport::manual(), storage);
    h.attach();
    assert_eq!(h.transport.connect_calls(), vec![Some("old-1".to_string())]);
    assert_eq!(h.engine.stored_session_id().as_deref(), Some("old-1"));
}

#[tokio::test]
async fn status_follows_only_the_current_phase() {
    let h = Harness::new(LoopbackTransport::manual());
    h.attach();
    h.connect("s").await;

    h.transport.set_phase(ConversationPhase::AwaitingResponse);
    h.wait_for("processing", |s| s.conversation_status == "[Processing]")
        .await;

    let (writer, stream) = ResponseStream::channel(7);
    h.transport.set_phase(ConversationPhase::Responding(stream));
    h.wait_for("responding", |s| s.conversation_status == "[Responding] ")
        .await;
    writer.push_chunk("Hel");
    h.wait_for("first chunk", |s| s.conversation_status == "[Responding] Hel")
        .await;

    h.transport.push_output("Hello");
    h.transport.set_phase(ConversationPhase::Idle);
    h.wait_for("idle", |s| s.conversation_status == "[Idle] Hello")
        .await;

    writer.push_chunk("lo");
    settle().await;
    assert_eq!(h.engine.snapshot().conversation_status, "[Idle] Hello");
    assert_eq!(
        h.player.played(),
        vec![("Hel".to_string(), Priority::Regular)]
    );
}

#[tokio::test]
async fn idle_status_tracks_history_updates() {
    let h = Harness::new(LoopbackTransport::manual());
    h.attach();
    h.wait_for("idle", |s| s.conversation_status == "[Idle] ").await;
    h.transport.push_output("first");
    h.wait_for("first", |s| s.conversation_status == "[Idle] first")
        .await;
    h.transport.push_input("again");
    h.wait_for("input tail", |s| s.conversation_status == "[Idle] ")
        .await;
}

#[tokio::test]
async fn each_new_input_is_logged_once() {
    let h = Harness::new(LoopbackTransport::manual());
    h.attach();

    h.transport.push_input("hi");
    h.wait_for("first request", |s| requests(s).len() == 1).await;

    h.transport.republish_history();
    settle().await;
    assert_eq!(requests(&h.engine.snapshot()), vec!["hi"]);

    h.transport.push_output("hey");
    h.transport.push_input("hi");
    let state = h.wait_for("second request", |s| requests(s).len() == 2).await;
    assert_eq!(requests(&state), vec!["hi", "hi"]);
}

#[tokio::test]
async fn can_post_requires_connected_and_idle() {
    let h = Harness::new(LoopbackTransport::manual());
    h.attach();
    assert!(!h.engine.snapshot().can_post);

    h.connect("s").await;
    h.wait_for("can post", |s| s.can_post).await;

    h.transport.set_phase(ConversationPhase::AwaitingResponse);
    h.wait_for("cannot post", |s| !s.can_post).await;

    h.transport.set_phase(ConversationPhase::Idle);
    h.wait_for("can post again", |s| s.can_post).await;

    h.transport.set_session_state(SessionState::Disconnected);
    h.wait_for("disconnected", |s| !s.can_post).await;
}

#[tokio::test]
async fn failed_post_is_logged_and_reenables_posting() {
    let h = Harness::new(LoopbackTransport::manual());
    h.attach();
    h.connect("s").await;
    h.transport.set_phase(ConversationPhase::AwaitingResponse);
    h.wait_for("cannot post", |s| !s.can_post).await;

    h.transport.fail_next_post("boom");
    h.engine.post("hello").expect("attached").await.expect("post task");

    let state = h.engine.snapshot();
    assert!(state.can_post);
    assert!(last_error(&state).is_some_and(|m| m.contains("boom")));
}

#[tokio::test]
async fn session_error_is_logged_and_reenables_posting() {
    let h = Harness::new(LoopbackTransport::manual());
    h.attach();
    h.connect("s").await;
    h.transport.set_phase(ConversationPhase::AwaitingResponse);
    h.wait_for("cannot post", |s| !s.can_post).await;

    h.transport.emit_error("server exploded");
    let state = h.wait_for("error logged", |s| s.can_post).await;
    assert_eq!(last_error(&state).as_deref(), Some("error: server exploded"));
}

#[tokio::test]
async fn voice_result_is_posted_once_and_input_resets() {
    let h = Harness::new(LoopbackTransport::manual());
    h.attach();
    h.connect("s").await;

    h.engine.start_listening().expect("start");
    h.wait_for("listening", |s| s.voice_input_state.is_listening())
        .await;
    let sink = h.engine.capture_sink();
    sink.on_partial("what");
    sink.on_final(vec!["what time is it".into(), "what time is in".into()]);

    h.wait_for("reset to idle", |s| {
        s.voice_input_state == VoiceInputState::Idle
    })
    .await;
    settle().await;
    let posted: Vec<String> = h.transport.posted().into_iter().map(|(t, _)| t).collect();
    assert_eq!(posted, vec!["what time is it"]);
    assert!(!h.capture.is_listening());
}

#[tokio::test]
async fn start_listening_silences_playback_and_rejects_overlap() {
    let h = Harness::new(LoopbackTransport::manual());
    h.attach();
    h.engine.start_listening().expect("start");
    assert_eq!(h.player.clear_count(), 1);
    assert!(matches!(
        h.engine.start_listening(),
        Err(ParleyError::CaptureBusy { .. })
    ));
}

#[tokio::test]
async fn no_match_returns_to_idle_and_client_errors_are_ignored() {
    let h = Harness::new(LoopbackTransport::manual());
    h.attach();
    h.engine.start_listening().expect("start");
    let sink = h.engine.capture_sink();

    sink.on_error(parley_core::CaptureErrorCode::Client);
    settle().await;
    assert!(h.engine.snapshot().voice_input_state.is_listening());

    sink.on_error(parley_core::CaptureErrorCode::NoMatch);
    h.wait_for("idle", |s| s.voice_input_state == VoiceInputState::Idle)
        .await;
}

#[tokio::test]
async fn network_and_player_flags_are_mirrored() {
    let h = Harness::new(LoopbackTransport::manual());
    h.attach();
    assert_eq!(h.engine.snapshot().network_status, NetworkStatus::Reachable);

    h.signal.set_reachable(false);
    h.wait_for("offline", |s| s.network_status == NetworkStatus::NotReachable)
        .await;
    let mut languages = h.engine.subscribe_languages();
    tokio::time::timeout(WAIT, languages.wait_for(|l| l.len() == 1))
        .await
        .expect("languages timed out")
        .expect("languages sender alive");
    assert_eq!(h.engine.available_languages().len(), 1);

    h.engine.set_muted(true);
    h.engine.set_permissions_granted(true);
    let state = h.engine.snapshot();
    assert!(state.player_muted && state.permissions_granted);
    assert!(h.player.is_muted());
}

#[tokio::test]
async fn commands_before_attach_are_rejected() {
    let h = Harness::new(LoopbackTransport::manual());
    assert!(matches!(
        h.engine.start_listening(),
        Err(ParleyError::NotAttached)
    ));
    assert!(matches!(
        h.engine.clear_session(),
        Err(ParleyError::NotAttached)
    ));
    assert!(h.engine.post("x").is_err());
    h.engine.detach();
    assert!(h.transport.connect_calls().is_empty());
}

#[tokio::test]
async fn detach_tears_down_in_order_and_is_idempotent() {
    let h = Harness::new(LoopbackTransport::manual());
    h.attach();
    h.connect("s").await;
    assert!(matches!(
        h.engine.attach(Box::new(ScriptedCapture::new())),
        Err(ParleyError::AlreadyAttached)
    ));
    h.engine.start_listening().expect("start");
    let clears = h.player.clear_count();

    h.engine.detach();
    assert!(!h.engine.is_attached());
    assert!(h.capture.is_destroyed());
    assert!(h.transport.is_closed());
    assert_eq!(h.player.clear_count(), clears + 1);

    let before = h.engine.snapshot();
    h.transport.emit_error("late");
    h.transport.set_session_state(SessionState::connected("late"));
    settle().await;
    assert_eq!(h.engine.snapshot(), before);

    h.engine.detach();
    assert!(matches!(
        h.engine.start_listening(),
        Err(ParleyError::NotAttached)
    ));
}

#[tokio::test]
async fn loopback_exchange_end_to_end() {
    let h = Harness::new(LoopbackTransport::new(LoopbackConfig {
        step_delay: Duration::from_millis(2),
        ..LoopbackConfig::default()
    }));
    h.attach();
    h.wait_for("connected", |s| s.session_id.as_deref() == Some("loopback-1"))
        .await;
    h.wait_for("can post", |s| s.can_post).await;

    h.engine.start_listening().expect("start");
    h.engine
        .capture_sink()
        .on_final(vec!["hello there".into()]);

    let state = h
        .wait_for("reply", |s| {
            s.conversation_status == "[Idle] You said: hello there"
        })
        .await;
    assert_eq!(requests(&state), vec!["hello there"]);
    assert!(state
        .event_log
        .iter()
        .any(|e| matches!(e.kind, AppEventKind::Frame { .. })));
    let spoken: String = h.player.played().into_iter().map(|(t, _)| t).collect();
    assert_eq!(spoken, "You said: hello there");
    h.wait_for("can post after reply", |s| s.can_post).await;
}

#[tokio::test]
async fn preferred_language_applies_to_next_capture() {
    let h = Harness::new(LoopbackTransport::manual());
    h.attach();
    assert_eq!(
        h.engine.listen_options().language.as_ref().map(Language::tag),
        Some("en-US")
    );

    h.engine.set_preferred_language(Language::new("de_DE"));
    tokio::time::timeout(WAIT, async {
        while h.engine.listen_options().language.as_ref().map(Language::tag) != Some("de-DE") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("listen options timed out");

    h.engine.start_listening().expect("start");
    let starts = h.capture.starts();
    assert_eq!(starts.len(), 1);
    assert_eq!(
        starts[0].language.as_ref().map(Language::tag),
        Some("de-DE")
    );
    assert!(starts[0].partial_results);
}

#[tokio::test]
async fn play_priority_interrupts_with_priority() {
    let h = Harness::new(LoopbackTransport::manual());
    assert!(matches!(
        h.engine.play_priority("turn left"),
        Err(ParleyError::NotAttached)
    ));

    h.attach();
    h.engine.play_priority("turn left").expect("attached");
    assert_eq!(
        h.player.played(),
        vec![("turn left".to_string(), Priority::Priority)]
    );
}
