//! Platform ports
//!
//! Traits through which the engine core talks to its host: the real-time audio
//! resource and its nodes, the media transport primitive, user-interaction
//! signals and foreground visibility. Implementations are injected at
//! construction; nothing in the core reaches for a global.
//!
//! An in-memory implementation of every port lives in [`crate::sim`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Identity of one audio resource instance
pub type ResourceId = Uuid;

/// Identity of one platform node
pub type NodeId = u64;

/// Identity of a registered interaction listener
pub type ListenerId = u64;

/// Errors reported by platform implementations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlatformError {
    /// Blocked by the platform's permission/autoplay policy
    #[error("Not allowed: {0}")]
    NotAllowed(String),

    /// Operation is not available on this platform
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// `disconnect` on a node with no outgoing connections
    #[error("Node is not connected")]
    NotConnected,

    /// `set_param` with a name the node does not expose
    #[error("Unknown parameter '{0}'")]
    UnknownParam(String),

    /// The resource was closed
    #[error("Resource closed")]
    Closed,

    /// Any other platform failure
    #[error("Platform failure: {0}")]
    Failed(String),
}

// ========================================
// Audio resource and nodes
// ========================================

/// Run state of a platform audio resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

impl std::fmt::Display for ContextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextState::Suspended => write!(f, "suspended"),
            ContextState::Running => write!(f, "running"),
            ContextState::Closed => write!(f, "closed"),
        }
    }
}

/// Filter shapes a platform can instantiate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    LowShelf,
    Peaking,
    HighShelf,
    LowPass,
    HighPass,
}

/// Built-in processors a resource can create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorKind {
    /// Parameter: `gain`
    Gain,
    /// Parameters: `frequency`, `q`, `gain`
    Filter(FilterKind),
    /// Parameter: `decay` (impulse length in seconds)
    Convolver,
    /// Parameters: `threshold`, `ratio`
    Compressor,
}

/// One platform processing node
///
/// `connect` adds an outgoing edge; `disconnect` removes every outgoing edge
/// and fails with [`PlatformError::NotConnected`] when there were none.
pub trait AudioNode: Send + Sync {
    fn id(&self) -> NodeId;
    fn label(&self) -> &str;
    fn connect(&self, destination: &NodeHandle) -> Result<(), PlatformError>;
    fn disconnect(&self) -> Result<(), PlatformError>;
    fn set_param(&self, name: &str, value: f32) -> Result<(), PlatformError>;
}

/// Shared handle to a platform node
pub type NodeHandle = Arc<dyn AudioNode>;

/// The platform's real-time audio processing context
#[async_trait]
pub trait AudioResource: Send + Sync {
    fn id(&self) -> ResourceId;
    fn state(&self) -> ContextState;

    /// Start or restart processing; may be refused outside a user gesture
    async fn resume(&self) -> Result<(), PlatformError>;
    async fn suspend(&self) -> Result<(), PlatformError>;
    async fn close(&self);

    /// Final output node
    fn destination(&self) -> NodeHandle;
    fn create_processor(&self, kind: ProcessorKind, label: &str) -> Result<NodeHandle, PlatformError>;

    /// Bind a media element's output into this resource
    fn create_media_source(&self, element: &dyn MediaElement) -> Result<NodeHandle, PlatformError>;
}

/// Shared handle to an audio resource
pub type ResourceHandle = Arc<dyn AudioResource>;

/// Creates audio resources
pub trait ResourceFactory: Send + Sync {
    fn create(&self) -> Result<ResourceHandle, PlatformError>;
}

// ========================================
// Media transport primitive
// ========================================

/// How much media data the primitive can furnish
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReadyState {
    HaveNothing = 0,
    HaveMetadata = 1,
    HaveCurrentData = 2,
    HaveFutureData = 3,
    HaveEnoughData = 4,
}

impl ReadyState {
    /// Minimum state at which a transport counts as decode-ready for
    /// warmup, routing and restore
    pub const DECODE_READY: ReadyState = ReadyState::HaveCurrentData;

    /// State at which a load is considered able to furnish forthcoming samples
    pub const CAN_PLAY: ReadyState = ReadyState::HaveFutureData;

    pub fn is_decode_ready(self) -> bool {
        self >= Self::DECODE_READY
    }
}

/// Half-open buffered interval in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, position: f64) -> bool {
        position >= self.start && position <= self.end
    }
}

/// Cross-origin negotiation used for a load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Output stays opaque; cannot be routed into a processing graph
    Opaque,
    /// Output may be routed into a processing graph
    CrossOrigin,
}

/// Parameters of one load
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub uri: String,
    pub access: AccessMode,
}

/// Lifecycle signals emitted by the primitive
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSignal {
    LoadedMetadata,
    CanPlay,
    CanPlayThrough,
    Playing,
    Pause,
    Waiting,
    Ended,
    DurationChange(f64),
    Progress,
    Error(String),
}

/// Receiver of primitive signals
pub type SignalListener = Arc<dyn Fn(MediaSignal) + Send + Sync>;

/// One media playback primitive (load/play/pause/seek/rate/loop)
#[async_trait]
pub trait MediaElement: Send + Sync {
    /// Begin loading; readiness is reported through signals
    fn load(&self, request: &LoadRequest);

    /// Start playback; rejected when blocked by policy or on failure
    async fn play(&self) -> Result<(), PlatformError>;
    fn pause(&self);
    fn seek(&self, seconds: f64);
    fn set_volume(&self, volume: f64);
    fn set_loop(&self, looping: bool);
    fn set_rate(&self, rate: f64);
    fn set_preserve_pitch(&self, preserve: bool);

    fn current_time(&self) -> f64;
    /// `None` while unknown; `Some(f64::INFINITY)` for live streams
    fn duration(&self) -> Option<f64>;
    fn ready_state(&self) -> ReadyState;
    fn buffered(&self) -> Vec<TimeRange>;
    fn is_paused(&self) -> bool;
    fn has_ended(&self) -> bool;

    /// Install (or clear) the single signal receiver
    fn set_signal_listener(&self, listener: Option<SignalListener>);
}

// ========================================
// User interaction and visibility
// ========================================

/// Interaction signals that qualify as a user gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionKind {
    PointerDown,
    PointerUp,
    MouseDown,
    Click,
    TouchStart,
    TouchEnd,
    KeyDown,
}

impl InteractionKind {
    pub const ALL: [InteractionKind; 7] = [
        InteractionKind::PointerDown,
        InteractionKind::PointerUp,
        InteractionKind::MouseDown,
        InteractionKind::Click,
        InteractionKind::TouchStart,
        InteractionKind::TouchEnd,
        InteractionKind::KeyDown,
    ];
}

/// Callback for an interaction signal
pub type InteractionListener = Arc<dyn Fn(InteractionKind) + Send + Sync>;

/// Source of user-gesture signals
pub trait InteractionSource: Send + Sync {
    fn add_listener(&self, kind: InteractionKind, listener: InteractionListener) -> ListenerId;
    fn remove_listener(&self, id: ListenerId);
}

/// Reports whether the host is foreground-visible
pub trait VisibilityProbe: Send + Sync {
    fn is_visible(&self) -> bool;
}

/// Probe for hosts without a background state
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysVisible;

impl VisibilityProbe for AlwaysVisible {
    fn is_visible(&self) -> bool {
        true
    }
}

/// Bundle of every port an engine needs
#[derive(Clone)]
pub struct Platform {
    pub resources: Arc<dyn ResourceFactory>,
    pub element: Arc<dyn MediaElement>,
    pub interactions: Arc<dyn InteractionSource>,
    pub visibility: Arc<dyn VisibilityProbe>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_state_ordering() {
        assert!(ReadyState::HaveEnoughData > ReadyState::HaveFutureData);
        assert!(ReadyState::HaveCurrentData.is_decode_ready());
        assert!(!ReadyState::HaveMetadata.is_decode_ready());
        assert!(ReadyState::CAN_PLAY > ReadyState::DECODE_READY);
    }

    #[test]
    fn test_time_range_contains_is_inclusive() {
        let range = TimeRange::new(0.0, 5.0);
        assert!(range.contains(0.0));
        assert!(range.contains(5.0));
        assert!(!range.contains(5.1));
    }
}
