//! Packline — headless voice-guided packing session runner.
//!
//! Loads a run's pending pick tasks from the SQLite route store, starts a
//! [`PackSession`] over them, and bridges session events to the terminal.
//! Voice input runs through the microphone listener; `--no-voice` (or the
//! settings file) degrades to keyboard controls only.

mod host;
mod settings;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use packline_core::listen::stub::{ScriptedListener, StubRecognizer};
use packline_core::speech::stub::StubAnnouncer;
use packline_core::{
    AnnouncerHandle, AudioResources, ListenerHandle, MicListener, MicListenerConfig, NullResources,
    PackSession, RecognizerHandle, SessionConfig, SessionPhase,
};

use settings::{default_settings_path, load_settings, save_settings};
use storage::RouteStore;

/// Voice-guided packing session runner for vending routes.
#[derive(Parser, Debug)]
#[command(name = "packline")]
#[command(version, about, long_about = None)]
struct Args {
    /// Run to pack.
    #[arg(default_value = "run-1")]
    run: String,

    /// SQLite database path (defaults to the platform data directory).
    #[arg(long)]
    db: Option<PathBuf>,

    /// Settings file path.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Seed the built-in demo route before starting.
    #[arg(long)]
    seed_demo: bool,

    /// Disable voice input for this invocation.
    #[arg(long)]
    no_voice: bool,

    /// Input device name override.
    #[arg(long)]
    device: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let settings_path = args.settings.unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    if !settings_path.exists() {
        save_settings(&settings_path, &settings)?;
    }
    // CLI overrides apply to this invocation only; they are not saved back.
    if let Some(device) = args.device {
        settings.preferred_input_device = Some(device);
    }
    if args.no_voice {
        settings.listen_enabled = false;
    }

    let store = RouteStore::new(args.db.unwrap_or_else(RouteStore::default_db_path))?;
    if args.seed_demo {
        store.seed_demo_run(&args.run)?;
    }

    let tasks = store.pending_pick_tasks(&args.run)?;
    let hint = store.location_order_hint(&args.run)?;
    info!(run = %args.run, pending = tasks.len(), "route loaded");

    let session_config = SessionConfig {
        completion_phrase: settings.completion_phrase.clone(),
        listen_enabled: settings.listen_enabled,
    };
    let announcer = AnnouncerHandle::new(StubAnnouncer::new());
    let completion = Arc::new(store.clone());

    let session = if settings.listen_enabled {
        let listener = MicListener::new(
            MicListenerConfig {
                preferred_device: settings.preferred_input_device.clone(),
                silence_rms: settings.silence_rms,
                ..Default::default()
            },
            RecognizerHandle::new(StubRecognizer::new()),
        );
        Arc::new(PackSession::new(
            session_config,
            announcer,
            ListenerHandle::new(listener),
            completion,
            AudioResources::default(),
        ))
    } else {
        Arc::new(PackSession::new(
            session_config,
            announcer,
            ListenerHandle::new(ScriptedListener::silent()),
            completion,
            NullResources,
        ))
    };

    session.start(&tasks, &hint)?;

    if session.phase() == SessionPhase::Complete && session.snapshot().total_steps == 0 {
        println!("Nothing to pack — run {} has no pending tasks.", args.run);
        return Ok(());
    }

    host::run_console(Arc::clone(&session)).await?;
    session.stop()?;

    let diag = session.diagnostics_snapshot();
    info!(
        announcements = diag.announcements_dispatched,
        commands = diag.commands_recognized,
        completion_writes = diag.completion_writes,
        "session finished"
    );
    Ok(())
}
