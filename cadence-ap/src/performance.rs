//! Performance monitor
//!
//! Folds scheduler-tick irregularities into a 0-100 health score.
//!
//! - score starts at 100
//! - each frame drop costs [`FRAME_DROP_PENALTY`]
//! - each jitter report above [`JITTER_THRESHOLD_MS`] costs [`JITTER_PENALTY`]
//! - each clean evaluation window recovers [`RECOVERY_STEP`]
//!
//! Penalties only count while the host is foreground-visible, so background
//! throttling does not degrade quality.

use crate::platform::VisibilityProbe;
use cadence_common::{EngineEvent, EventBus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, trace};

pub const MAX_SCORE: i32 = 100;
pub const HEALTHY_ABOVE: i32 = 60;
pub const FRAME_DROP_PENALTY: i32 = 5;
pub const JITTER_PENALTY: i32 = 3;
pub const JITTER_THRESHOLD_MS: f64 = 8.0;
pub const RECOVERY_STEP: i32 = 2;

/// A tick longer than this multiple of the expected cadence is a frame drop
pub const FRAME_DROP_FACTOR: f64 = 2.0;

const HISTORY_CAPACITY: usize = 64;

/// Kind of telemetry observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryKind {
    FrameDrop,
    Jitter { variance_ms: f64 },
}

/// One penalized observation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySample {
    pub timestamp: DateTime<Utc>,
    pub score_delta: i32,
    #[serde(flatten)]
    pub kind: TelemetryKind,
}

#[derive(Debug)]
struct PerfState {
    score: i32,
    running: bool,
    window_penalties: u32,
    window_intervals: Vec<f64>,
    history: VecDeque<TelemetrySample>,
}

impl PerfState {
    fn penalize(&mut self, delta: i32, kind: TelemetryKind) {
        self.score = (self.score - delta).clamp(0, MAX_SCORE);
        self.window_penalties += 1;
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(TelemetrySample {
            timestamp: Utc::now(),
            score_delta: -delta,
            kind,
        });
    }
}

/// Rolling scheduler-health score
pub struct PerformanceMonitor {
    state: Arc<Mutex<PerfState>>,
    bus: EventBus,
    visibility: Arc<dyn VisibilityProbe>,
    expected_tick: Duration,
    window: Duration,
    run_generation: Arc<AtomicU64>,
}

fn lock(state: &Mutex<PerfState>) -> MutexGuard<'_, PerfState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PerformanceMonitor {
    pub fn new(
        bus: EventBus,
        visibility: Arc<dyn VisibilityProbe>,
        expected_tick: Duration,
        window: Duration,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(PerfState {
                score: MAX_SCORE,
                running: false,
                window_penalties: 0,
                window_intervals: Vec::new(),
                history: VecDeque::with_capacity(HISTORY_CAPACITY),
            })),
            bus,
            visibility,
            expected_tick,
            window,
            run_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the evaluation window task; no-op when running
    pub fn start(&self) {
        {
            let mut state = lock(&self.state);
            if state.running {
                return;
            }
            state.running = true;
            state.window_penalties = 0;
            state.window_intervals.clear();
        }
        let generation = self.run_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let run_generation = Arc::clone(&self.run_generation);
        let evaluator = self.evaluator();
        let window = self.window;
        debug!("Performance monitor started ({:?} windows)", window);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(window);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if run_generation.load(Ordering::SeqCst) != generation {
                    break;
                }
                evaluator.evaluate_window();
            }
        });
    }

    pub fn stop(&self) {
        self.run_generation.fetch_add(1, Ordering::SeqCst);
        lock(&self.state).running = false;
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    pub fn report_frame_drop(&self) {
        if !self.visibility.is_visible() {
            trace!("Frame drop ignored while hidden");
            return;
        }
        let score = {
            let mut state = lock(&self.state);
            state.penalize(FRAME_DROP_PENALTY, TelemetryKind::FrameDrop);
            state.score
        };
        debug!("Frame drop, score now {}", score);
    }

    pub fn report_jitter(&self, variance_ms: f64) {
        if !self.visibility.is_visible() || !(variance_ms > JITTER_THRESHOLD_MS) {
            return;
        }
        let score = {
            let mut state = lock(&self.state);
            state.penalize(JITTER_PENALTY, TelemetryKind::Jitter { variance_ms });
            state.score
        };
        debug!("Jitter {:.1}ms, score now {}", variance_ms, score);
    }

    /// Classify one heartbeat interval
    ///
    /// Intervals beyond twice the expected cadence count as frame drops; the
    /// rest feed the window's jitter estimate.
    pub fn observe_tick(&self, interval: Duration) {
        let expected = self.expected_tick.as_secs_f64();
        let observed = interval.as_secs_f64();
        if expected > 0.0 && observed > expected * FRAME_DROP_FACTOR {
            self.report_frame_drop();
        } else {
            lock(&self.state).window_intervals.push(observed * 1000.0);
        }
    }

    /// Close the current window: jitter check, recovery, publication
    pub fn evaluate_window(&self) -> i32 {
        self.evaluator().evaluate_window()
    }

    pub fn get_score(&self) -> i32 {
        lock(&self.state).score
    }

    pub fn is_healthy(&self) -> bool {
        self.get_score() > HEALTHY_ABOVE
    }

    /// Recent penalized observations, oldest first
    pub fn history(&self) -> Vec<TelemetrySample> {
        lock(&self.state).history.iter().cloned().collect()
    }

    fn evaluator(&self) -> WindowEvaluator {
        WindowEvaluator {
            state: Arc::clone(&self.state),
            bus: self.bus.clone(),
            visibility: Arc::clone(&self.visibility),
        }
    }
}

/// Window evaluation shared by the monitor and its background task
struct WindowEvaluator {
    state: Arc<Mutex<PerfState>>,
    bus: EventBus,
    visibility: Arc<dyn VisibilityProbe>,
}

impl WindowEvaluator {
    fn evaluate_window(&self) -> i32 {
        let score = {
            let mut state = lock(&self.state);
            let intervals = std::mem::take(&mut state.window_intervals);
            if intervals.len() >= 2 && self.visibility.is_visible() {
                let jitter = std_dev(&intervals);
                if jitter > JITTER_THRESHOLD_MS {
                    state.penalize(JITTER_PENALTY, TelemetryKind::Jitter { variance_ms: jitter });
                }
            }
            if state.window_penalties == 0 && state.score < MAX_SCORE {
                state.score = (state.score + RECOVERY_STEP).min(MAX_SCORE);
                trace!("Clean window, score recovered to {}", state.score);
            }
            state.window_penalties = 0;
            state.score
        };
        if score <= HEALTHY_ABOVE {
            info!("Performance score {}", score);
        }
        self.bus.publish(EngineEvent::PerformanceUpdated { score });
        score
    }
}

impl std::fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("score", &self.get_score())
            .field("running", &self.is_running())
            .finish()
    }
}

fn std_dev(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}
