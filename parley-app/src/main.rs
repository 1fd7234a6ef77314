//! Parley headless host entry point.
//!
//! Wires the engine to the in-process reference collaborators (loopback
//! service, scripted capture, logging player, JSON-file store) and drives it
//! from stdin. Every published snapshot is printed to stdout as one line of
//! JSON; logs go to stderr.

mod commands;
mod settings;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use commands::{Command, HELP};
use parley_core::{
    reachability, CaptureSink, Collaborators, Language, LoggingPlayer, LoopbackTransport,
    ParleyEngine, ReachabilitySignal, ScriptedCapture,
};
use settings::{default_settings_path, load_settings, save_settings, AppSettings};
use storage::JsonFileStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct Host {
    engine: Arc<ParleyEngine>,
    sink: CaptureSink,
    network: ReachabilitySignal,
    settings: AppSettings,
    settings_path: PathBuf,
}

impl Host {
    fn execute(&mut self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Listen => self.engine.start_listening()?,
            Command::Stop => self.engine.stop_listening()?,
            Command::Partial(text) => self.sink.on_partial(text),
            Command::Say(text) => self.sink.on_final(vec![text]),
            Command::NoMatch => self
                .sink
                .on_error(parley_core::CaptureErrorCode::NoMatch),
            Command::CaptureError(code) => self.sink.on_error(code),
            Command::Post(text) => {
                if !self.engine.snapshot().can_post {
                    warn!("posting while a request is in flight or disconnected");
                }
                self.engine.post(&text)?;
            }
            Command::Reset => self.engine.clear_session()?,
            Command::Mute(muted) => {
                self.engine.set_muted(muted);
                self.settings.start_muted = muted;
                self.save_settings();
            }
            Command::Permissions(granted) => self.engine.set_permissions_granted(granted),
            Command::Online => self.network.set_reachable(true),
            Command::Offline => self.network.set_reachable(false),
            Command::Lang(tag) => {
                let language = Language::new(&tag);
                self.engine.set_preferred_language(language.clone());
                self.settings.language = language.tag().to_owned();
                self.save_settings();
                let available: Vec<String> = self
                    .engine
                    .available_languages()
                    .iter()
                    .map(|l| l.tag().to_owned())
                    .collect();
                println!("available languages: {}", available.join(", "));
            }
            Command::Announce(text) => self.engine.play_priority(&text)?,
            Command::State => {
                let snapshot = self.engine.snapshot();
                println!("{}", serde_json::to_string_pretty(snapshot.as_ref())?);
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
        }
        Ok(())
    }

    fn save_settings(&self) {
        if let Err(e) = save_settings(&self.settings_path, &self.settings) {
            warn!(path = %self.settings_path.display(), "failed to save settings: {e}");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("parley=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings_path = std::env::var_os("PARLEY_SETTINGS")
        .map(PathBuf::from)
        .unwrap_or_else(default_settings_path);
    let settings = load_settings(&settings_path);
    let store_path = settings.resolved_store_path(&settings_path);
    info!(
        settings = %settings_path.display(),
        store = %store_path.display(),
        language = %settings.language,
        "starting parley"
    );

    let storage = JsonFileStore::open(&store_path)
        .with_context(|| format!("opening store at {}", store_path.display()))?;
    let (network, reach) = reachability(true);
    let engine = Arc::new(ParleyEngine::new(
        settings.engine_config(),
        Collaborators {
            transport: Arc::new(LoopbackTransport::default()),
            storage: Arc::new(storage),
            player: Arc::new(LoggingPlayer::new()),
            reachability: reach,
        },
    ));
    engine.attach(Box::new(ScriptedCapture::new()))?;
    engine.set_muted(settings.start_muted);

    let printer = tokio::spawn(print_snapshots(Arc::clone(&engine)));
    let mut host = Host {
        sink: engine.capture_sink(),
        engine: Arc::clone(&engine),
        network,
        settings,
        settings_path,
    };

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(Command::Quit) => break,
            Ok(command) => {
                if let Err(e) = host.execute(command) {
                    warn!("command failed: {e}");
                }
            }
            Err(e) => eprintln!("{e}"),
        }
    }

    printer.abort();
    engine.detach();
    info!("parley stopped");
    Ok(())
}

async fn print_snapshots(engine: Arc<ParleyEngine>) {
    let mut rx = engine.subscribe();
    while rx.changed().await.is_ok() {
        let snapshot = Arc::clone(&rx.borrow_and_update());
        match serde_json::to_string(snapshot.as_ref()) {
            Ok(json) => println!("{json}"),
            Err(e) => warn!("failed to serialize snapshot: {e}"),
        }
    }
}
