//! # Cadence Common Library
//!
//! Shared code for the Cadence playback engine crates:
//! - Event types (`EngineEvent` enum) and the synchronous `EventBus`
//! - Adaptive quality and lifecycle enums shared by events and components
//! - Pending outbound event buffer
//! - Configuration file resolution
//! - Timestamp utilities

pub mod config;
pub mod error;
pub mod events;
pub mod pending;
pub mod time;

pub use error::{Error, Result};
pub use events::{DriverMode, EngineEvent, EventBus, ResourceLifecycleState, Subscription};
pub use pending::PendingEventBuffer;
