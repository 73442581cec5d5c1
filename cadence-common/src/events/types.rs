//! Engine state type definitions
//!
//! Supporting enums carried by engine events: adaptive quality tier and
//! audio resource lifecycle.

use serde::{Deserialize, Serialize};

/// Adaptive quality tier of a playback driver
///
/// Tiers only ever move downward automatically:
/// - `Audiophile`: full processing graph
/// - `Light`: processing graph with heavy nodes bypassed
/// - `Transport`: no processing graph attachment at all
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriverMode {
    #[default]
    Audiophile,
    Light,
    Transport,
}

impl DriverMode {
    /// Whether a processing graph may be attached in this mode
    pub fn allows_dsp(self) -> bool {
        !matches!(self, DriverMode::Transport)
    }

    /// Whether heavy nodes should be bypassed in this mode
    pub fn is_reduced(self) -> bool {
        matches!(self, DriverMode::Light)
    }
}

impl std::fmt::Display for DriverMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverMode::Audiophile => write!(f, "audiophile"),
            DriverMode::Light => write!(f, "light"),
            DriverMode::Transport => write!(f, "transport"),
        }
    }
}

/// Lifecycle of the audio resource owner
///
/// Legal transitions:
/// - `Uninitialized | Destroyed -> Initializing`
/// - `Initializing -> Running`
/// - `Running <-> Suspended`
/// - `Running | Suspended -> Destroyed`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResourceLifecycleState {
    #[default]
    Uninitialized,
    Initializing,
    Running,
    Suspended,
    Destroyed,
}

impl ResourceLifecycleState {
    /// Check whether `self -> to` is a legal transition
    pub fn can_transition_to(self, to: ResourceLifecycleState) -> bool {
        use ResourceLifecycleState::*;
        matches!(
            (self, to),
            (Uninitialized, Initializing)
                | (Destroyed, Initializing)
                | (Initializing, Running)
                | (Running, Suspended)
                | (Suspended, Running)
                | (Running, Destroyed)
                | (Suspended, Destroyed)
        )
    }
}

impl std::fmt::Display for ResourceLifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceLifecycleState::Uninitialized => write!(f, "uninitialized"),
            ResourceLifecycleState::Initializing => write!(f, "initializing"),
            ResourceLifecycleState::Running => write!(f, "running"),
            ResourceLifecycleState::Suspended => write!(f, "suspended"),
            ResourceLifecycleState::Destroyed => write!(f, "destroyed"),
        }
    }
}
