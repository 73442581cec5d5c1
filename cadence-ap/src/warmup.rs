//! Warmup gate
//!
//! Holds the play sequence until the transport has enough lookahead to avoid
//! an immediate stall. Always resolves; a timeout logs and proceeds.

use crate::buffer_health::buffered_ahead;
use crate::transport::Transport;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Positions this close to the end need no further buffering
pub const NEAR_END_SECS: f64 = 0.5;

/// How a warmup wait settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupOutcome {
    /// Decode-ready with enough lookahead
    Ready,
    /// Within the final half second of the track
    NearEnd,
    /// Gave up waiting; playback proceeds anyway
    TimedOut,
    /// A newer load replaced the one being warmed up
    Superseded,
}

/// Buffering gate in front of `Transport::play`
#[derive(Debug, Clone)]
pub struct WarmupGate {
    min_threshold_seconds: f64,
    poll_interval: Duration,
}

impl WarmupGate {
    pub fn new(min_threshold_seconds: f64, poll_interval: Duration) -> Self {
        Self {
            min_threshold_seconds: min_threshold_seconds.max(0.0),
            poll_interval,
        }
    }

    /// Evaluate readiness once
    pub fn check(&self, transport: &Transport) -> Option<WarmupOutcome> {
        let position = transport.current_time();
        if let Some(duration) = transport.duration().filter(|d| d.is_finite()) {
            if duration - position <= NEAR_END_SECS {
                return Some(WarmupOutcome::NearEnd);
            }
        }
        if transport.ready_state().is_decode_ready()
            && buffered_ahead(&transport.buffered(), position) >= self.min_threshold_seconds
        {
            return Some(WarmupOutcome::Ready);
        }
        None
    }

    /// Poll until ready, superseded or `timeout` elapses
    pub async fn wait_ready(&self, transport: &Transport, timeout: Duration) -> WarmupOutcome {
        let generation = transport.generation();
        let deadline = Instant::now() + timeout;

        loop {
            if !transport.is_current(generation) {
                return WarmupOutcome::Superseded;
            }
            if let Some(outcome) = self.check(transport) {
                debug!("Warmup settled: {:?}", outcome);
                return outcome;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "Warmup not reached {:.1}s lookahead within {:?}, proceeding",
                    self.min_threshold_seconds, timeout
                );
                return WarmupOutcome::TimedOut;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{AccessMode, ReadyState, TimeRange};
    use crate::sim::{BufferProfile, SimMedia, SimMediaElement};
    use cadence_common::EventBus;
    use std::sync::Arc;

    async fn loaded(media: SimMedia) -> (Transport, Arc<SimMediaElement>) {
        let element = Arc::new(SimMediaElement::new(media));
        let transport = Transport::new(element.clone(), EventBus::new(), Duration::from_secs(10));
        transport.load("sim://a", AccessMode::Opaque).await;
        (transport, element)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_with_enough_lookahead() {
        let (transport, _element) = loaded(SimMedia::default()).await;
        let gate = WarmupGate::new(2.0, Duration::from_millis(100));
        assert_eq!(
            gate.wait_ready(&transport, Duration::from_secs(3)).await,
            WarmupOutcome::Ready
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_lookahead() {
        let (transport, _element) = loaded(SimMedia {
            buffer: BufferProfile::Ahead(0.5),
            ..SimMedia::default()
        })
        .await;
        let gate = WarmupGate::new(2.0, Duration::from_millis(100));
        let started = Instant::now();
        assert_eq!(
            gate.wait_ready(&transport, Duration::from_secs(3)).await,
            WarmupOutcome::TimedOut
        );
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_below_decode_threshold() {
        let (transport, element) = loaded(SimMedia::default()).await;
        element.set_ready_state(ReadyState::HaveMetadata);
        let gate = WarmupGate::new(0.0, Duration::from_millis(100));
        assert_eq!(gate.check(&transport), None);

        element.set_ready_state(ReadyState::HaveCurrentData);
        assert_eq!(gate.check(&transport), Some(WarmupOutcome::Ready));
    }

    #[tokio::test(start_paused = true)]
    async fn test_near_end_needs_no_buffer() {
        let (transport, element) = loaded(SimMedia {
            duration: Some(30.0),
            buffer: BufferProfile::Ranges(vec![TimeRange::new(0.0, 1.0)]),
            ..SimMedia::default()
        })
        .await;
        element.set_position(29.7);
        let gate = WarmupGate::new(5.0, Duration::from_millis(100));
        assert_eq!(gate.check(&transport), Some(WarmupOutcome::NearEnd));
    }

    #[tokio::test(start_paused = true)]
    async fn test_becomes_ready_while_polling() {
        let element = Arc::new(SimMediaElement::new(SimMedia {
            load_latency: Duration::from_millis(700),
            ..SimMedia::default()
        }));
        let transport = Transport::new(element, EventBus::new(), Duration::from_secs(10));
        let loader = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.load("sim://a", AccessMode::Opaque).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let gate = WarmupGate::new(1.0, Duration::from_millis(100));
        let started = Instant::now();
        assert_eq!(
            gate.wait_ready(&transport, Duration::from_secs(3)).await,
            WarmupOutcome::Ready
        );
        assert!(started.elapsed() <= Duration::from_millis(800));
        loader.await.unwrap();
    }
}
