//! Error types for cadence-ap
//!
//! One variant per policy violation and failure class. Transient conditions
//! (load timeout, resume timeout) never surface here; they resolve in a
//! degraded state instead.

use crate::platform::{ContextState, PlatformError, ReadyState, ResourceId};
use cadence_common::ResourceLifecycleState;
use thiserror::Error;

/// Main error type for the playback engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors from the shared crate (config resolution, TOML, I/O)
    #[error(transparent)]
    Common(#[from] cadence_common::Error),

    /// Lifecycle transition not in the legal table
    #[error("Invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition {
        from: ResourceLifecycleState,
        to: ResourceLifecycleState,
    },

    /// Routing attempted against a resource that is not running
    #[error("Audio resource is not running (state: {0})")]
    ResourceNotRunning(ContextState),

    /// Routing attempted before the transport reached decode readiness
    #[error("Transport not decode-ready (state: {0:?})")]
    TransportNotReady(ReadyState),

    /// Routing binding already exists for another resource instance
    #[error("Transport already bound to resource {bound}, cannot attach to {requested}")]
    ForeignResource {
        bound: ResourceId,
        requested: ResourceId,
    },

    /// Routing operation before a source was attached
    #[error("No transport source attached")]
    NotAttached,

    /// Graph attachment requested while in Transport mode
    #[error("DSP attachment is forbidden in transport mode")]
    DspForbidden,

    /// Graph operation before `init`
    #[error("Processing graph not initialized")]
    GraphNotInitialized,

    /// Unknown node key passed to the graph
    #[error("Node not found: {0}")]
    NodeNotFound(u64),

    /// Platform failure while building nodes or routing
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Play failed after the retry budget was exhausted
    #[error("Playback failed after {attempts} attempts: {reason}")]
    PlaybackFailed { attempts: u32, reason: String },

    /// Operation needs a loaded track
    #[error("No track loaded")]
    NoTrack,

    /// Preset or theme key not in the catalog
    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    /// Operation on a destroyed engine
    #[error("Engine destroyed")]
    Destroyed,
}

/// Convenience Result type using the cadence-ap Error
pub type Result<T> = std::result::Result<T, Error>;
