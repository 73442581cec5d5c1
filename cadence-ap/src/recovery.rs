//! Error recovery controller
//!
//! Bounded backoff retry policy plus the end-of-track watchdog.
//!
//! Errors further apart than the error window are treated as unrelated and
//! reset the retry counter. Attempt `n` waits `n * retry_step` before it is
//! approved; after `max_retries` attempts recovery is refused.
//!
//! The watchdog polls the transport and synthesizes `playback.ended` when
//! playback is nominally active but the position reached the end without a
//! terminal signal.

use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Distance from the end at which a nominally playing track counts as finished
pub const END_TOLERANCE_SECS: f64 = 0.5;

/// Retry policy constants
#[derive(Debug, Clone, Copy)]
pub struct RecoveryPolicy {
    pub max_retries: u32,
    pub retry_step: Duration,
    pub error_window: Duration,
    pub watchdog_interval: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_step: Duration::from_millis(1000),
            error_window: Duration::from_secs(30),
            watchdog_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Default)]
struct RecoveryState {
    retry_count: u32,
    last_error_at: Option<Instant>,
    last_error: Option<String>,
}

/// Watchdog condition: nominally playing, finite duration, at the end
pub fn stuck_at_end(playing: bool, position: f64, duration: Option<f64>) -> bool {
    match duration {
        Some(d) if playing && d.is_finite() => position >= d - END_TOLERANCE_SECS,
        _ => false,
    }
}

pub struct ErrorRecoveryController {
    policy: RecoveryPolicy,
    state: Mutex<RecoveryState>,
    watchdog_generation: Arc<AtomicU64>,
    monitoring: Arc<AtomicBool>,
}

impl ErrorRecoveryController {
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(RecoveryState::default()),
            watchdog_generation: Arc::new(AtomicU64::new(0)),
            monitoring: Arc::new(AtomicBool::new(false)),
        }
    }

    fn state(&self) -> MutexGuard<'_, RecoveryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Record a failure; an error after a quiet window starts a fresh burst
    pub fn report_error(&self, error: &str) {
        let now = Instant::now();
        let mut state = self.state();
        if let Some(previous) = state.last_error_at {
            if now.duration_since(previous) > self.policy.error_window {
                debug!("Previous error older than {:?}, resetting retries", self.policy.error_window);
                state.retry_count = 0;
            }
        }
        state.last_error_at = Some(now);
        state.last_error = Some(error.to_string());
        warn!("Playback error reported: {}", error);
    }

    /// Wait out the backoff for the next attempt; false once exhausted
    pub async fn attempt_recovery(&self) -> bool {
        let attempt = {
            let mut state = self.state();
            if state.retry_count >= self.policy.max_retries {
                warn!(
                    "Recovery refused after {} attempts",
                    self.policy.max_retries
                );
                return false;
            }
            state.retry_count += 1;
            state.retry_count
        };
        let delay = self.policy.retry_step * attempt;
        info!("Recovery attempt {} in {:?}", attempt, delay);
        tokio::time::sleep(delay).await;
        true
    }

    pub fn retry_count(&self) -> u32 {
        self.state().retry_count
    }

    pub fn last_error(&self) -> Option<String> {
        self.state().last_error.clone()
    }

    /// Poll `transport` every watchdog interval until the end is synthesized
    ///
    /// Replaces any previous watchdog.
    pub fn start_monitoring(&self, transport: Transport) {
        let generation = self.watchdog_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let watchdog_generation = Arc::clone(&self.watchdog_generation);
        let monitoring = Arc::clone(&self.monitoring);
        let interval = self.policy.watchdog_interval;
        monitoring.store(true, Ordering::SeqCst);
        debug!("Watchdog {} started ({:?})", generation, interval);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if watchdog_generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                if transport.end_published() {
                    break;
                }
                // A looping track wraps instead of ending
                if transport.is_looping() {
                    continue;
                }
                if stuck_at_end(
                    transport.is_playing(),
                    transport.current_time(),
                    transport.duration(),
                ) {
                    warn!("Watchdog: track reached its end without a terminal signal");
                    transport.synthesize_end();
                    break;
                }
            }
            if watchdog_generation.load(Ordering::SeqCst) == generation {
                monitoring.store(false, Ordering::SeqCst);
            }
            debug!("Watchdog {} finished", generation);
        });
    }

    pub fn stop_monitoring(&self) {
        self.watchdog_generation.fetch_add(1, Ordering::SeqCst);
        self.monitoring.store(false, Ordering::SeqCst);
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ErrorRecoveryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorRecoveryController")
            .field("retry_count", &self.retry_count())
            .field("monitoring", &self.is_monitoring())
            .finish()
    }
}
