//! Cadence Audio Player (cadence-ap) - headless demonstration
//!
//! Runs the playback engine against the simulated platform: loads one track,
//! simulates the user gesture that unlocks audio, plays to the end (or until
//! Ctrl+C) and prints the final player snapshot as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cadence_ap::build_info::BuildInfo;
use cadence_ap::platform::InteractionKind;
use cadence_ap::relay::{JsonLinesSink, OutboundRelay};
use cadence_ap::sim::{SimMedia, SimPlatform};
use cadence_ap::{Engine, MemoryPresetStore, PresetCatalog, TomlConfig, Track};
use cadence_common::events::topics;
use clap::Parser;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for cadence-ap
#[derive(Parser, Debug)]
#[command(name = "cadence-ap")]
#[command(about = "Adaptive playback engine demo on the simulated platform")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Source URI of the track to play
    #[arg(short, long, default_value = "https://media.example/cadence/demo.mp3")]
    uri: String,

    /// Simulated track length in seconds
    #[arg(short, long, default_value = "5.0")]
    duration: f64,

    /// Delay before the simulated user gesture, in milliseconds
    #[arg(long, default_value = "250")]
    gesture_delay_ms: u64,

    /// Theme preset to select before playback
    #[arg(short, long)]
    theme: Option<String>,

    /// Print outbound events as JSON lines on stdout
    #[arg(long)]
    json_events: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if args.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter_directive().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let build = BuildInfo::current();
    info!("Starting Cadence Audio Player (cadence-ap) {}", build);
    if build.is_dirty() {
        warn!("Built from a tree with uncommitted changes");
    }

    let sim = SimPlatform::new();
    sim.element.set_media(SimMedia {
        duration: Some(args.duration),
        ..SimMedia::default()
    });

    let engine = Engine::new(
        sim.ports(),
        config.engine.clone(),
        PresetCatalog::with_overrides(config.presets.clone()),
        Arc::new(MemoryPresetStore::default()),
    );
    let manager = engine.init().context("Failed to initialize engine")?;

    let relay = (args.json_events || config.logging.json_events).then(|| {
        OutboundRelay::attach(
            engine.bus(),
            Arc::new(JsonLinesSink::stdout()),
            config.engine.pending_capacity,
        )
    });

    if let Some(theme) = &args.theme {
        manager
            .select_theme(theme)
            .with_context(|| format!("Cannot select theme '{}'", theme))?;
    }

    let ended = Arc::new(Notify::new());
    let ended_signal = Arc::clone(&ended);
    engine
        .bus()
        .subscribe(topics::PLAYBACK_ENDED, move |_| ended_signal.notify_one());

    // Audio stays locked until the user interacts
    let gesture = sim.interactions.clone();
    let gesture_delay = Duration::from_millis(args.gesture_delay_ms);
    tokio::spawn(async move {
        tokio::time::sleep(gesture_delay).await;
        info!("Simulating user gesture");
        gesture.fire(InteractionKind::PointerDown);
    });

    let track = Track::new("demo", args.uri.clone());
    let outcome = manager
        .load_and_play(track, true)
        .await
        .context("Playback failed")?;
    info!("Playback: {:?}", outcome);

    tokio::select! {
        _ = ended.notified() => info!("Track finished"),
        _ = shutdown_signal() => warn!("Interrupted before the end of the track"),
    }

    let snapshot = manager.snapshot();
    println!(
        "{}",
        serde_json::to_string_pretty(&snapshot).context("Failed to serialize snapshot")?
    );

    if let Some(relay) = &relay {
        relay.detach();
    }
    engine.destroy().await.context("Failed to destroy engine")?;
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
