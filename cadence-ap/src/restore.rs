//! Restore controller
//!
//! Silent position restoration after a cold start. A seek is only issued
//! once the transport is decode-ready; an early `apply` is dropped, not
//! queued, and must be re-invoked on the next readiness signal.

use crate::transport::Transport;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Saved and current positions closer than this need no seek
pub const RESTORE_TOLERANCE_SECS: f64 = 0.5;

/// What an `apply` call did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RestoreOutcome {
    /// Nothing to restore, or restoration already completed
    Idle,
    /// Transport not decode-ready; call again on the next readiness signal
    NotReady,
    /// Already within tolerance of the saved position
    InPlace,
    /// Seeked to the saved position
    Seeked(f64),
}

#[derive(Debug, Default)]
struct RestoreState {
    saved: Option<f64>,
    completed: bool,
}

#[derive(Debug, Default)]
pub struct RestoreController {
    state: Mutex<RestoreState>,
}

impl RestoreController {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RestoreState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Arm restoration of `saved_position`
    pub fn begin_restore(&self, saved_position: f64) {
        if !saved_position.is_finite() || saved_position < 0.0 {
            debug!("Ignoring restore to {}", saved_position);
            return;
        }
        let mut state = self.state();
        state.saved = Some(saved_position);
        state.completed = false;
        info!("Restoring position {:.2}s once ready", saved_position);
    }

    pub fn apply(&self, transport: &Transport) -> RestoreOutcome {
        let saved = {
            let state = self.state();
            match state.saved {
                Some(saved) if !state.completed => saved,
                _ => return RestoreOutcome::Idle,
            }
        };
        if !transport.ready_state().is_decode_ready() {
            debug!("Restore dropped: transport not decode-ready");
            return RestoreOutcome::NotReady;
        }
        let current = transport.current_time();
        if (current - saved).abs() <= RESTORE_TOLERANCE_SECS {
            return RestoreOutcome::InPlace;
        }
        transport.seek(saved);
        info!("Restored position {:.2}s (was {:.2}s)", saved, current);
        RestoreOutcome::Seeked(saved)
    }

    /// Mark restoration finished; returns false when already complete
    pub fn complete(&self) -> bool {
        let mut state = self.state();
        if state.completed {
            return false;
        }
        state.completed = true;
        true
    }

    /// Armed and not yet completed
    pub fn is_pending(&self) -> bool {
        let state = self.state();
        state.saved.is_some() && !state.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{AccessMode, MediaElement, ReadyState};
    use crate::sim::SimMediaElement;
    use cadence_common::EventBus;
    use std::sync::Arc;
    use std::time::Duration;

    async fn loaded() -> (Transport, Arc<SimMediaElement>) {
        let element = Arc::new(SimMediaElement::default());
        let transport = Transport::new(element.clone(), EventBus::new(), Duration::from_secs(10));
        transport.load("sim://a", AccessMode::Opaque).await;
        (transport, element)
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_only_when_decode_ready() {
        let (transport, element) = loaded().await;
        element.set_ready_state(ReadyState::HaveMetadata);
        let restore = RestoreController::new();
        restore.begin_restore(42.0);

        assert_eq!(restore.apply(&transport), RestoreOutcome::NotReady);
        assert_eq!(element.current_time(), 0.0);

        element.set_ready_state(ReadyState::HaveEnoughData);
        assert_eq!(restore.apply(&transport), RestoreOutcome::Seeked(42.0));
        assert_eq!(element.current_time(), 42.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_delta_skips_seek() {
        let (transport, element) = loaded().await;
        element.set_position(10.3);
        let restore = RestoreController::new();
        restore.begin_restore(10.0);
        assert_eq!(restore.apply(&transport), RestoreOutcome::InPlace);
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_is_idempotent() {
        let (transport, _element) = loaded().await;
        let restore = RestoreController::new();
        assert_eq!(restore.apply(&transport), RestoreOutcome::Idle);

        restore.begin_restore(30.0);
        assert!(restore.is_pending());
        assert!(restore.complete());
        assert!(!restore.complete());
        assert!(!restore.is_pending());
        assert_eq!(restore.apply(&transport), RestoreOutcome::Idle);
    }
}
