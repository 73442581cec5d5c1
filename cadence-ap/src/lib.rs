//! # Cadence Audio Playback Library (cadence-ap)
//!
//! Adaptive real-time playback engine core: turns a track into synchronized
//! output through a gesture-gated audio resource, a rebuildable processing
//! graph and an adaptive quality controller fed by live telemetry, with
//! watchdogs, bounded retries and buffer health checks keeping playback
//! moving under bad conditions.
//!
//! **Architecture:** every host capability sits behind a port in
//! [`platform`]; [`sim`] implements all of them in memory on tokio time.
//! [`engine::Engine`] is the composition root.

pub mod buffer_health;
pub mod build_info;
pub mod clock;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod graph;
pub mod lifecycle;
pub mod manager;
pub mod mode;
pub mod nodes;
pub mod performance;
pub mod platform;
pub mod presets;
pub mod recovery;
pub mod relay;
pub mod restore;
pub mod routing;
pub mod sim;
pub mod state;
pub mod transport;
pub mod unlock;
pub mod warmup;

pub use config::{EngineSettings, TomlConfig};
pub use driver::{Driver, PlayOutcome};
pub use engine::Engine;
pub use error::{Error, Result};
pub use manager::{NavigationIntent, PlaybackManager};
pub use presets::{EffectPreset, EffectSpec, MemoryPresetStore, PresetCatalog, PresetStore};
pub use state::{PlaybackStatus, PlayerSnapshot, PlayerState, Track, TrackMetadata};
