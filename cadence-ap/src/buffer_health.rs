//! Buffer health monitor
//!
//! Streaming-health score from the transport's buffered ranges:
//! `min(max(range_end - position, 0) / 20s, 1)` for the range containing the
//! position, 0 when no range contains it, 1.0 when the duration is unknown or
//! infinite (live stream, assumed healthy until it stalls).

use crate::platform::TimeRange;
use crate::transport::Transport;
use cadence_common::{EngineEvent, EventBus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Lookahead that counts as fully healthy
pub const HEALTHY_LOOKAHEAD_SECS: f64 = 20.0;

/// Seconds buffered ahead of `position` in the range containing it
///
/// Where ranges touch at `position`, the one reaching furthest wins.
pub fn buffered_ahead(ranges: &[TimeRange], position: f64) -> f64 {
    ranges
        .iter()
        .filter(|range| range.contains(position))
        .map(|range| (range.end - position).max(0.0))
        .fold(0.0, f64::max)
}

/// Health score in [0, 1]
pub fn compute_health(ranges: &[TimeRange], position: f64, duration: Option<f64>) -> f64 {
    match duration {
        Some(d) if d.is_finite() => {
            (buffered_ahead(ranges, position) / HEALTHY_LOOKAHEAD_SECS).min(1.0)
        }
        _ => 1.0,
    }
}

/// Reads buffer health from the transport and publishes lookahead periodically
pub struct BufferHealthMonitor {
    transport: Transport,
    bus: EventBus,
    poll_interval: Duration,
    run_generation: Arc<AtomicU64>,
}

impl BufferHealthMonitor {
    pub fn new(transport: Transport, bus: EventBus, poll_interval: Duration) -> Self {
        Self {
            transport,
            bus,
            poll_interval,
            run_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn get_health(&self) -> f64 {
        compute_health(
            &self.transport.buffered(),
            self.transport.current_time(),
            self.transport.duration(),
        )
    }

    /// Seconds buffered ahead of the current position
    pub fn seconds_ahead(&self) -> f64 {
        buffered_ahead(&self.transport.buffered(), self.transport.current_time())
    }

    /// Publish `buffered.updated` every poll interval while playing
    ///
    /// Restarting replaces the previous poll task.
    pub fn start_polling(&self) {
        let generation = self.run_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let run_generation = Arc::clone(&self.run_generation);
        let transport = self.transport.clone();
        let bus = self.bus.clone();
        let poll_interval = self.poll_interval;
        debug!("Buffer poll {} started ({:?})", generation, poll_interval);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if run_generation.load(Ordering::SeqCst) != generation {
                    break;
                }
                if !transport.is_playing() {
                    continue;
                }
                let seconds = buffered_ahead(&transport.buffered(), transport.current_time());
                trace!("Buffered ahead: {:.2}s", seconds);
                bus.publish(EngineEvent::BufferedUpdated { seconds });
            }
            trace!("Buffer poll {} finished", generation);
        });
    }

    pub fn stop_polling(&self) {
        self.run_generation.fetch_add(1, Ordering::SeqCst);
    }
}
