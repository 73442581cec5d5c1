//! Config file resolution and its effect on a running engine
//!
//! Tests touching `CADENCE_CONFIG` run serially since the process
//! environment is shared.

mod helpers;

use cadence_ap::sim::{SimMedia, SimPlatform};
use cadence_ap::{Engine, MemoryPresetStore, PresetCatalog, TomlConfig};
use cadence_common::events::topics;
use cadence_common::EngineEvent;
use helpers::{advance, track, EventRecorder, RECORDED_TOPICS};
use serial_test::serial;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

const ENV_VAR: &str = "CADENCE_CONFIG";

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_env_var_selects_config_file() {
    let file = write_config(
        r#"
[logging]
level = "debug"

[engine]
error_watchdog_ms = 500
dsp_enabled = false
"#,
    );
    std::env::set_var(ENV_VAR, file.path());
    let config = TomlConfig::load(None);
    std::env::remove_var(ENV_VAR);

    let config = config.unwrap();
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.engine.error_watchdog(), Duration::from_millis(500));
    assert!(!config.engine.dsp_enabled);
    // Untouched keys keep their defaults
    assert_eq!(config.engine.max_retries, 3);
    assert_eq!(config.engine.heartbeat(), Duration::from_millis(16));
}

#[test]
#[serial]
fn test_cli_path_beats_env_var() {
    let env_file = write_config("[engine]\nmax_retries = 9\n");
    let cli_file = write_config("[engine]\nmax_retries = 1\n");
    std::env::set_var(ENV_VAR, env_file.path());
    let config = TomlConfig::load(Some(cli_file.path()));
    std::env::remove_var(ENV_VAR);

    assert_eq!(config.unwrap().engine.max_retries, 1);
}

#[test]
#[serial]
fn test_missing_env_file_is_an_error() {
    std::env::set_var(ENV_VAR, "/nonexistent/cadence/config.toml");
    let result = TomlConfig::load(None);
    std::env::remove_var(ENV_VAR);

    assert!(result.is_err());
}

#[test]
fn test_malformed_file_is_an_error() {
    let file = write_config("[engine\nheartbeat_ms = ");
    assert!(TomlConfig::load(Some(file.path())).is_err());
}

/// A shortened watchdog interval and a config-defined preset both take
/// effect on an engine built from the loaded file.
#[tokio::test(start_paused = true)]
#[serial]
async fn test_loaded_settings_drive_engine() {
    let file = write_config(
        r#"
[engine]
error_watchdog_ms = 500

[[presets]]
key = "club"
label = "Club"
chain = [{ kind = "gain", gain = 0.8 }, { kind = "equalizer", gains = [6.0, 3.0, 0.0, 1.0, 2.0] }]
"#,
    );
    let config = TomlConfig::load(Some(file.path())).unwrap();

    let sim = SimPlatform::activated();
    sim.element.set_media(SimMedia {
        duration: Some(3.0),
        fires_ended: false,
        ..SimMedia::default()
    });
    let engine = Engine::new(
        sim.ports(),
        config.engine.clone(),
        PresetCatalog::with_overrides(config.presets.clone()),
        Arc::new(MemoryPresetStore::default()),
    );
    let recorder = EventRecorder::attach(engine.bus(), RECORDED_TOPICS);
    let manager = engine.init().unwrap();

    manager.select_theme("club").unwrap();
    manager.load_and_play(track("a"), true).await.unwrap();
    assert_eq!(manager.effects().len(), 2);
    assert_eq!(manager.snapshot().theme_key.as_deref(), Some("club"));

    // End at 3s, seen by the 500ms watchdog well before a 2s one would
    advance(Duration::from_millis(3_600)).await;
    assert_eq!(
        recorder.of_topic(topics::PLAYBACK_ENDED),
        vec![EngineEvent::PlaybackEnded { synthesized: true }]
    );

    engine.destroy().await.unwrap();
}
