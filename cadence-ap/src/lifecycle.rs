//! Lifecycle manager
//!
//! Owns the resource lifecycle state machine, the player state container,
//! the media clock and the heartbeat.
//!
//! ```text
//! Uninitialized | Destroyed -> Initializing -> Running <-> Suspended
//!                                   Running | Suspended -> Destroyed
//! ```
//!
//! The heartbeat runs at a fixed cadence while `Running`. On each tick with
//! active playback it reads the transport position once, publishes
//! `time.updated`, corrects the clock's drift against that position, feeds
//! the tick interval to the performance monitor and reconciles the duration.

use crate::clock::Clock;
use crate::config::EngineSettings;
use crate::error::{Error, Result};
use crate::manager::PlaybackManager;
use crate::platform::ResourceHandle;
use crate::state::PlayerState;
use cadence_common::{EngineEvent, EventBus, ResourceLifecycleState};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use ResourceLifecycleState::{Destroyed, Initializing, Running, Suspended};

/// Duration difference that counts as a real change
pub const DURATION_DRIFT_SECS: f64 = 0.5;

#[derive(Default)]
struct LifecycleInner {
    state: ResourceLifecycleState,
    player: Option<Arc<PlayerState>>,
    clock: Option<Clock>,
    resource: Option<ResourceHandle>,
    playback: Option<Arc<PlaybackManager>>,
}

pub struct LifecycleManager {
    bus: EventBus,
    heartbeat: Duration,
    resume_timeout: Duration,
    inner: Mutex<LifecycleInner>,
    heartbeat_generation: AtomicU64,
    heartbeat_running: AtomicBool,
    weak_self: Weak<LifecycleManager>,
}

impl LifecycleManager {
    pub fn new(bus: EventBus, settings: &EngineSettings) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            bus,
            heartbeat: settings.heartbeat(),
            resume_timeout: settings.resume_timeout(),
            inner: Mutex::new(LifecycleInner::default()),
            heartbeat_generation: AtomicU64::new(0),
            heartbeat_running: AtomicBool::new(false),
            weak_self: weak_self.clone(),
        })
    }

    fn inner(&self) -> MutexGuard<'_, LifecycleInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Move to `to` if legal; returns the previous state
    fn transition(&self, to: ResourceLifecycleState) -> Result<ResourceLifecycleState> {
        let from = {
            let mut inner = self.inner();
            let from = inner.state;
            if !from.can_transition_to(to) {
                warn!("Rejected lifecycle transition {} -> {}", from, to);
                return Err(Error::InvalidTransition { from, to });
            }
            inner.state = to;
            from
        };
        info!("Lifecycle: {} -> {}", from, to);
        self.bus.publish(EngineEvent::LifecycleChanged { from, to });
        Ok(from)
    }

    pub fn state(&self) -> ResourceLifecycleState {
        self.inner().state
    }

    // ========================================
    // Transitions
    // ========================================

    /// Build the owned parts from scratch and start the heartbeat
    pub fn init(&self) -> Result<Arc<PlayerState>> {
        self.transition(Initializing)?;

        let player = Arc::new(PlayerState::new());
        {
            let mut inner = self.inner();
            inner.player = Some(Arc::clone(&player));
            inner.clock = Some(Clock::new());
            inner.resource = None;
            inner.playback = None;
        }

        self.transition(Running)?;
        self.start_heartbeat();
        Ok(player)
    }

    /// Adopt `resource`; a replacement gets a fresh clock
    ///
    /// Returns false when `resource` is already the current one.
    pub fn inject_context(&self, resource: ResourceHandle) -> Result<bool> {
        let id = resource.id();
        {
            let mut inner = self.inner();
            match inner.state {
                Running | Suspended | Initializing => {}
                Destroyed => return Err(Error::Destroyed),
                from => {
                    return Err(Error::InvalidTransition {
                        from,
                        to: Running,
                    })
                }
            }
            if inner.resource.as_ref().map(|r| r.id()) == Some(id) {
                trace!("Resource {} already injected", id);
                return Ok(false);
            }
            inner.resource = Some(resource);
            inner.clock = Some(Clock::new());
        }
        info!("Audio resource {} injected", id);
        self.bus.publish(EngineEvent::ContextReady { resource_id: id });
        Ok(true)
    }

    /// Suspend the resource and freeze the clock
    pub async fn suspend(&self) -> Result<()> {
        self.transition(Suspended)?;
        let resource = {
            let mut inner = self.inner();
            if let Some(clock) = inner.clock.as_mut() {
                clock.suspend();
            }
            inner.resource.clone()
        };
        if let Some(resource) = resource {
            if let Err(e) = resource.suspend().await {
                warn!("Resource {} did not suspend: {}", resource.id(), e);
            }
        }
        Ok(())
    }

    /// Resume the resource (bounded) and the clock
    pub async fn resume(&self) -> Result<()> {
        self.transition(Running)?;
        let resource = self.inner().resource.clone();
        if let Some(resource) = resource {
            match tokio::time::timeout(self.resume_timeout, resource.resume()).await {
                Ok(Ok(())) => debug!("Resource {} resumed", resource.id()),
                Ok(Err(e)) => warn!("Resource {} did not resume: {}", resource.id(), e),
                Err(_) => warn!(
                    "Resource {} resume timed out after {:?}",
                    resource.id(),
                    self.resume_timeout
                ),
            }
        }
        if let Some(clock) = self.inner().clock.as_mut() {
            clock.resume();
        }
        Ok(())
    }

    /// Stop everything owned, dispose the bound playback and clear the bus
    pub async fn destroy(&self) -> Result<()> {
        let from = {
            let mut inner = self.inner();
            let from = inner.state;
            if !from.can_transition_to(Destroyed) {
                warn!("Rejected lifecycle transition {} -> {}", from, Destroyed);
                return Err(Error::InvalidTransition {
                    from,
                    to: Destroyed,
                });
            }
            inner.state = Destroyed;
            from
        };

        self.stop_heartbeat();
        let playback = {
            let mut inner = self.inner();
            inner.clock = None;
            inner.resource = None;
            inner.playback.take()
        };
        if let Some(playback) = playback {
            playback.dispose().await;
        }

        info!("Lifecycle: {} -> {}", from, Destroyed);
        self.bus.publish(EngineEvent::LifecycleChanged {
            from,
            to: Destroyed,
        });
        self.bus.clear();
        Ok(())
    }

    /// Playback manager disposed on `destroy` and polled by the heartbeat
    pub fn bind_playback(&self, playback: Arc<PlaybackManager>) {
        self.inner().playback = Some(playback);
    }

    pub fn player(&self) -> Option<Arc<PlayerState>> {
        self.inner().player.clone()
    }

    /// Clock reading, None before `init` and after `destroy`
    pub fn clock_time(&self) -> Option<f64> {
        self.inner().clock.as_ref().map(|c| c.current_time())
    }

    pub fn drift_correction(&self) -> Option<f64> {
        self.inner().clock.as_ref().map(|c| c.drift_correction())
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat_running.load(Ordering::SeqCst)
    }

    // ========================================
    // Heartbeat
    // ========================================

    fn start_heartbeat(&self) {
        let generation = self.heartbeat_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.heartbeat_running.store(true, Ordering::SeqCst);
        let weak = self.weak_self.clone();
        let period = self.heartbeat;
        debug!("Heartbeat {} started ({:?})", generation, period);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            let mut last_tick = Instant::now();
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    return;
                };
                if manager.heartbeat_generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                // Measured before the state check so a resumed heartbeat
                // does not report the suspension as one long tick
                let now = Instant::now();
                let interval = now.duration_since(last_tick);
                last_tick = now;
                manager.tick(interval);
            }
        });
    }

    fn stop_heartbeat(&self) {
        self.heartbeat_generation.fetch_add(1, Ordering::SeqCst);
        self.heartbeat_running.store(false, Ordering::SeqCst);
    }

    fn tick(&self, interval: Duration) {
        let (playback, player) = {
            let inner = self.inner();
            if inner.state != Running {
                return;
            }
            match (&inner.playback, &inner.player) {
                (Some(playback), Some(player)) => (Arc::clone(playback), Arc::clone(player)),
                _ => return,
            }
        };
        let driver = playback.driver();
        let transport = driver.transport();

        if !transport.is_playing() {
            if let Some(clock) = self.inner().clock.as_mut() {
                clock.suspend();
            }
            return;
        }

        let position = transport.current_time();
        let duration = transport.duration();
        self.bus.publish(EngineEvent::TimeUpdated {
            current_time: position,
            duration,
        });

        if let Some(clock) = self.inner().clock.as_mut() {
            if !clock.is_running() {
                clock.set_time(position);
                clock.resume();
            }
            clock.correct_drift(position);
        }

        driver.performance().observe_tick(interval);

        if let Some(duration) = duration.filter(|d| d.is_finite()) {
            let known = player.snapshot().duration;
            let drifted = known.map_or(true, |k| (k - duration).abs() > DURATION_DRIFT_SECS);
            if drifted {
                debug!("Duration reconciled: {:?} -> {:.2}s", known, duration);
                player.set_duration(duration);
                self.bus
                    .publish(EngineEvent::DurationChanged { seconds: duration });
            }
        }
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("state", &self.state())
            .field("heartbeat_running", &self.is_heartbeat_running())
            .finish()
    }
}
