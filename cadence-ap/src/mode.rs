//! Mode controller
//!
//! Three-tier adaptive quality state machine fed by the performance score.
//! Downgrades one tier per evaluation; never upgrades on its own. Returning
//! to `Audiophile` takes an explicit [`ModeController::reset`].

use cadence_common::{DriverMode, EngineEvent, EventBus};
use std::sync::Mutex;
use tracing::{info, warn};

/// Below this score `Audiophile` drops to `Light`
pub const LIGHT_BELOW: i32 = 60;

/// Below this score `Light` drops to `Transport`
pub const TRANSPORT_BELOW: i32 = 40;

#[derive(Debug)]
pub struct ModeController {
    mode: Mutex<DriverMode>,
    bus: EventBus,
}

impl ModeController {
    pub fn new(bus: EventBus) -> Self {
        Self {
            mode: Mutex::new(DriverMode::Audiophile),
            bus,
        }
    }

    pub fn mode(&self) -> DriverMode {
        *self.mode.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Apply one score; returns the resulting mode
    pub fn evaluate(&self, score: i32) -> DriverMode {
        let next = match self.mode() {
            DriverMode::Audiophile if score < LIGHT_BELOW => DriverMode::Light,
            DriverMode::Light if score < TRANSPORT_BELOW => DriverMode::Transport,
            current => current,
        };
        self.set_mode(next);
        next
    }

    /// Switch mode; publishes `mode.changed` only on a real transition
    pub fn set_mode(&self, mode: DriverMode) -> bool {
        let previous = {
            let mut current = self.mode.lock().unwrap_or_else(|p| p.into_inner());
            if *current == mode {
                return false;
            }
            std::mem::replace(&mut *current, mode)
        };
        if mode == DriverMode::Audiophile {
            info!("Mode {} -> {}", previous, mode);
        } else {
            warn!("Mode degraded {} -> {}", previous, mode);
        }
        self.bus.publish(EngineEvent::ModeChanged { mode });
        true
    }

    /// Manual return to full quality
    pub fn reset(&self) -> bool {
        self.set_mode(DriverMode::Audiophile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_common::events::topics;
    use std::sync::Arc;

    fn record_modes(bus: &EventBus) -> Arc<Mutex<Vec<DriverMode>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(topics::MODE_CHANGED, move |e| {
            if let EngineEvent::ModeChanged { mode } = e {
                sink.lock().unwrap().push(*mode);
            }
        });
        seen
    }

    #[test]
    fn test_score_trace_never_upgrades() {
        let controller = ModeController::new(EventBus::new());
        let trace: Vec<DriverMode> = [100, 100, 55, 100, 100, 35]
            .iter()
            .map(|score| controller.evaluate(*score))
            .collect();
        assert_eq!(
            trace,
            vec![
                DriverMode::Audiophile,
                DriverMode::Audiophile,
                DriverMode::Light,
                DriverMode::Light,
                DriverMode::Light,
                DriverMode::Transport,
            ]
        );
    }

    #[test]
    fn test_one_tier_per_evaluation() {
        let controller = ModeController::new(EventBus::new());
        assert_eq!(controller.evaluate(10), DriverMode::Light);
        assert_eq!(controller.evaluate(10), DriverMode::Transport);
        assert_eq!(controller.evaluate(100), DriverMode::Transport);
    }

    #[test]
    fn test_set_mode_idempotent_and_published() {
        let bus = EventBus::new();
        let seen = record_modes(&bus);
        let controller = ModeController::new(bus);

        assert!(!controller.set_mode(DriverMode::Audiophile));
        assert!(controller.set_mode(DriverMode::Light));
        assert!(!controller.set_mode(DriverMode::Light));
        controller.evaluate(50);
        controller.evaluate(20);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![DriverMode::Light, DriverMode::Transport]
        );
    }

    #[test]
    fn test_reset_is_manual_only() {
        let bus = EventBus::new();
        let seen = record_modes(&bus);
        let controller = ModeController::new(bus);
        controller.evaluate(30);
        assert_eq!(controller.mode(), DriverMode::Light);

        assert!(controller.reset());
        assert!(!controller.reset());
        assert_eq!(controller.mode(), DriverMode::Audiophile);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![DriverMode::Light, DriverMode::Audiophile]
        );
    }
}
