//! Playback clock
//!
//! Monotonic media-position tracker with pause/resume, rate scaling and drift
//! correction against an external time reference.
//!
//! `current_time() = (running ? elapsed * rate : 0) + base_time + external_offset + drift_correction`
//!
//! Instants come from `tokio::time`, so a paused test runtime drives the clock
//! deterministically.

use std::collections::VecDeque;
use tokio::time::Instant;
use tracing::{trace, warn};

/// Number of drift observations kept for the median
pub const DRIFT_WINDOW: usize = 10;

/// Fraction of the way `drift_correction` moves toward the median per call
pub const DRIFT_GAIN: f64 = 0.1;

/// Playback clock owned by one lifecycle manager
#[derive(Debug, Clone)]
pub struct Clock {
    base_time: f64,
    started_at: Instant,
    running: bool,
    rate: f64,
    external_offset: f64,
    drift_correction: f64,
    drift_samples: VecDeque<f64>,
}

impl Clock {
    /// Stopped clock at position zero, rate 1.0
    pub fn new() -> Self {
        Self {
            base_time: 0.0,
            started_at: Instant::now(),
            running: false,
            rate: 1.0,
            external_offset: 0.0,
            drift_correction: 0.0,
            drift_samples: VecDeque::with_capacity(DRIFT_WINDOW),
        }
    }

    /// Start advancing; no-op when already running
    pub fn resume(&mut self) {
        if self.running {
            return;
        }
        self.started_at = Instant::now();
        self.running = true;
    }

    /// Freeze at the current value; no-op when already stopped
    pub fn suspend(&mut self) {
        if !self.running {
            return;
        }
        self.base_time += self.elapsed_media();
        self.running = false;
    }

    /// Jump the local media position to `t` seconds
    pub fn set_time(&mut self, t: f64) {
        self.base_time = t;
        self.started_at = Instant::now();
    }

    /// Change the playback rate
    ///
    /// Elapsed media time at the old rate is folded into `base_time` first.
    /// Negative and non-finite rates are ignored.
    pub fn set_rate(&mut self, rate: f64) {
        if !rate.is_finite() || rate < 0.0 {
            warn!("Ignoring invalid clock rate {}", rate);
            return;
        }
        if self.running {
            self.base_time += self.elapsed_media();
            self.started_at = Instant::now();
        }
        self.rate = rate;
    }

    /// Fixed offset added to every reading
    pub fn set_offset(&mut self, offset: f64) {
        self.external_offset = offset;
    }

    /// Nudge `drift_correction` toward the external reference
    ///
    /// The observed offset of the uncorrected clock against `external_t`
    /// enters a ring of the last [`DRIFT_WINDOW`] observations. The correction
    /// moves [`DRIFT_GAIN`] of the way toward the ring's median. Returns the
    /// new correction.
    pub fn correct_drift(&mut self, external_t: f64) -> f64 {
        if !external_t.is_finite() {
            return self.drift_correction;
        }
        let observed = external_t - (self.current_time() - self.drift_correction);
        if self.drift_samples.len() == DRIFT_WINDOW {
            self.drift_samples.pop_front();
        }
        self.drift_samples.push_back(observed);

        let target = median(&self.drift_samples);
        self.drift_correction += DRIFT_GAIN * (target - self.drift_correction);
        trace!(
            "Drift observed {:.4}s, median {:.4}s, correction {:.4}s",
            observed,
            target,
            self.drift_correction
        );
        self.drift_correction
    }

    /// Current position in seconds
    pub fn current_time(&self) -> f64 {
        let elapsed = if self.running {
            self.elapsed_media()
        } else {
            0.0
        };
        elapsed + self.base_time + self.external_offset + self.drift_correction
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn drift_correction(&self) -> f64 {
        self.drift_correction
    }

    fn elapsed_media(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64() * self.rate
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

fn median(samples: &VecDeque<f64>) -> f64 {
    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::advance;

    const EPS: f64 = 1e-9;

    #[tokio::test(start_paused = true)]
    async fn test_stopped_clock_does_not_advance() {
        let clock = Clock::new();
        advance(Duration::from_secs(3)).await;
        assert_eq!(clock.current_time(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_advances_with_rate() {
        let mut clock = Clock::new();
        clock.resume();
        advance(Duration::from_secs(2)).await;
        assert!((clock.current_time() - 2.0).abs() < EPS);

        clock.set_rate(2.0);
        advance(Duration::from_secs(1)).await;
        assert!((clock.current_time() - 4.0).abs() < EPS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_freezes_exactly() {
        let mut clock = Clock::new();
        clock.resume();
        advance(Duration::from_millis(1500)).await;
        clock.suspend();
        let frozen = clock.current_time();

        advance(Duration::from_secs(10)).await;
        assert_eq!(clock.current_time(), frozen);

        clock.resume();
        advance(Duration::from_millis(500)).await;
        assert!((clock.current_time() - (frozen + 0.5)).abs() < EPS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monotonic_across_resume_suspend_sequences() {
        let mut clock = Clock::new();
        let mut last = clock.current_time();
        for step in 0..20u64 {
            match step % 3 {
                0 => clock.resume(),
                1 => clock.suspend(),
                _ => clock.set_time(clock.current_time()),
            }
            advance(Duration::from_millis(37 * (step + 1))).await;
            let now = clock.current_time();
            assert!(now >= last - EPS, "clock went backwards at step {}", step);
            last = now;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_rate_snapshots_old_rate() {
        let mut clock = Clock::new();
        clock.set_rate(0.5);
        clock.resume();
        advance(Duration::from_secs(4)).await;
        clock.set_rate(1.0);
        assert!((clock.current_time() - 2.0).abs() < EPS);
    }

    #[test]
    fn test_invalid_rate_ignored() {
        let mut clock = Clock::new();
        clock.set_rate(-1.0);
        clock.set_rate(f64::NAN);
        assert_eq!(clock.rate(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offset_applies() {
        let mut clock = Clock::new();
        clock.set_time(10.0);
        clock.set_offset(0.25);
        assert!((clock.current_time() - 10.25).abs() < EPS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drift_converges_geometrically() {
        let mut clock = Clock::new();
        let offset = 0.2;

        let mut residual = offset;
        for call in 1..=10 {
            let external = clock.current_time() - clock.drift_correction() + offset;
            clock.correct_drift(external);
            let next = (offset - clock.drift_correction()).abs();
            assert!(next < residual, "no progress on call {}", call);
            assert!((next - residual * (1.0 - DRIFT_GAIN)).abs() < 1e-9);
            residual = next;
        }
        // 0.9^10 of the initial gap remains after ten calls
        assert!((residual - offset * 0.9f64.powi(10)).abs() < 1e-9);

        for _ in 11..=44 {
            let external = clock.current_time() - clock.drift_correction() + offset;
            clock.correct_drift(external);
        }
        assert!((offset - clock.drift_correction()).abs() < offset * 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drift_median_ignores_single_spike() {
        let mut clock = Clock::new();
        for _ in 0..9 {
            clock.correct_drift(0.1);
        }
        let before = clock.drift_correction();
        clock.correct_drift(50.0);
        // median of nine 0.1 samples and one spike is still 0.1
        let expected = before + DRIFT_GAIN * (0.1 - before);
        assert!((clock.drift_correction() - expected).abs() < EPS);
    }

    #[test]
    fn test_median_even_and_odd() {
        let odd: VecDeque<f64> = vec![3.0, 1.0, 2.0].into();
        let even: VecDeque<f64> = vec![4.0, 1.0, 2.0, 3.0].into();
        assert_eq!(median(&odd), 2.0);
        assert_eq!(median(&even), 2.5);
    }
}
