//! Playback driver
//!
//! Composes the transport with the resource gates, monitors and controllers
//! and sequences `play()`:
//!
//! 1. unlock the audio resource (none available: degrade to transport-only)
//! 2. wait for warmup (timeout proceeds degraded)
//! 3. check routing health, resuming a suspended resource (bounded)
//! 4. complete any pending position restore
//! 5. start the transport, with one recovery-approved retry
//! 6. start the end-of-track watchdog, performance window and buffer poll
//!
//! Every suspension point re-checks the transport's load generation; a play
//! overtaken by a newer load returns [`PlayOutcome::Superseded`] without
//! side effects.

use crate::buffer_health::BufferHealthMonitor;
use crate::config::EngineSettings;
use crate::error::{Error, Result};
use crate::mode::ModeController;
use crate::performance::PerformanceMonitor;
use crate::platform::{
    AccessMode, ContextState, NodeHandle, Platform, ReadyState, ResourceHandle, ResourceId,
};
use crate::recovery::ErrorRecoveryController;
use crate::restore::{RestoreController, RestoreOutcome};
use crate::routing::RoutingManager;
use crate::state::Track;
use crate::transport::{LoadOutcome, Transport};
use crate::unlock::{ResourceSlot, UnlockGate};
use crate::warmup::{WarmupGate, WarmupOutcome};
use cadence_common::events::topics;
use cadence_common::{DriverMode, EngineEvent, EventBus, Subscription};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, error, info, warn};

/// How a `play()` call settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Started,
    /// Loaded without autoplay
    Loaded,
    /// A newer load began while this call was suspended
    Superseded,
}

/// Point-in-time driver internals for observers
#[derive(Debug, Clone, Serialize)]
pub struct DriverDiagnostics {
    pub mode: DriverMode,
    pub load_generation: u64,
    pub track_id: Option<String>,
    pub ready_state: ReadyState,
    pub position: f64,
    pub duration: Option<f64>,
    pub playing: bool,
    pub buffer_health: f64,
    pub performance_score: i32,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub resource_id: Option<ResourceId>,
    pub resource_state: Option<ContextState>,
    pub routed: bool,
    pub routing_healthy: bool,
    pub watchdog_active: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Driver {
    bus: EventBus,
    settings: EngineSettings,
    transport: Transport,
    unlock: UnlockGate,
    warmup: WarmupGate,
    routing: RoutingManager,
    buffer: BufferHealthMonitor,
    performance: PerformanceMonitor,
    mode: ModeController,
    recovery: ErrorRecoveryController,
    restore: RestoreController,
    track: Mutex<Option<Track>>,
    subscriptions: Mutex<Vec<Subscription>>,
    disposed: AtomicBool,
}

impl Driver {
    pub fn new(platform: &Platform, bus: EventBus, settings: &EngineSettings) -> Arc<Self> {
        let transport = Transport::new(
            Arc::clone(&platform.element),
            bus.clone(),
            settings.load_timeout(),
        );
        let driver = Arc::new(Self {
            unlock: UnlockGate::new(
                Arc::clone(&platform.resources),
                Arc::clone(&platform.interactions),
                settings.resume_timeout(),
            ),
            warmup: WarmupGate::new(settings.warmup_min_buffer_secs, settings.warmup_poll()),
            routing: RoutingManager::new(),
            buffer: BufferHealthMonitor::new(transport.clone(), bus.clone(), settings.buffer_poll()),
            performance: PerformanceMonitor::new(
                bus.clone(),
                Arc::clone(&platform.visibility),
                settings.heartbeat(),
                settings.performance_window(),
            ),
            mode: ModeController::new(bus.clone()),
            recovery: ErrorRecoveryController::new(settings.recovery_policy()),
            restore: RestoreController::new(),
            track: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
            settings: settings.clone(),
            transport,
            bus,
        });
        driver.subscribe();
        driver
    }

    fn subscribe(self: &Arc<Self>) {
        let mut subscriptions = Vec::new();

        let weak: Weak<Self> = Arc::downgrade(self);
        subscriptions.push(self.bus.subscribe(topics::PERFORMANCE_UPDATED, move |event| {
            if let (Some(driver), EngineEvent::PerformanceUpdated { score }) =
                (weak.upgrade(), event)
            {
                driver.mode.evaluate(*score);
            }
        }));

        let weak: Weak<Self> = Arc::downgrade(self);
        subscriptions.push(self.bus.subscribe(topics::TRANSPORT_READY, move |_| {
            if let Some(driver) = weak.upgrade() {
                match driver.restore.apply(&driver.transport) {
                    RestoreOutcome::Seeked(_) | RestoreOutcome::InPlace => {
                        driver.restore.complete();
                    }
                    RestoreOutcome::NotReady | RestoreOutcome::Idle => {}
                }
            }
        }));

        let weak: Weak<Self> = Arc::downgrade(self);
        subscriptions.push(self.bus.subscribe(topics::PLAYBACK_ENDED, move |_| {
            if let Some(driver) = weak.upgrade() {
                driver.buffer.stop_polling();
            }
        }));

        *lock(&self.subscriptions) = subscriptions;
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::Destroyed);
        }
        Ok(())
    }

    // ========================================
    // Loading and playback
    // ========================================

    /// Load `track`; `with_dsp` requests a graph-capable (cross-origin) load
    pub async fn load(&self, track: &Track, with_dsp: bool) -> Result<LoadOutcome> {
        self.ensure_alive()?;
        self.recovery.stop_monitoring();
        self.buffer.stop_polling();
        *lock(&self.track) = Some(track.clone());

        // A bound source keeps receiving this element's output, so it must
        // stay cross-origin even when DSP is no longer wanted.
        let access = if self.routing.is_bound() || (with_dsp && self.mode.mode().allows_dsp()) {
            AccessMode::CrossOrigin
        } else {
            AccessMode::Opaque
        };
        info!("Loading track {} ({:?})", track.id, access);

        let outcome = self.transport.load(&track.source_uri, access).await;
        match outcome {
            LoadOutcome::Superseded => debug!("Load of {} superseded", track.id),
            LoadOutcome::Ready | LoadOutcome::TimedOut => {
                self.bus.publish(EngineEvent::TrackLoaded {
                    track_id: track.id.clone(),
                    ready: outcome == LoadOutcome::Ready,
                });
            }
        }
        Ok(outcome)
    }

    /// Start playback of the loaded track
    pub async fn play(&self) -> Result<PlayOutcome> {
        self.ensure_alive()?;
        if lock(&self.track).is_none() {
            return Err(Error::NoTrack);
        }
        let generation = self.transport.generation();

        // Step 1: audio resource
        let resource = self.unlock.unlock().await;
        if !self.transport.is_current(generation) {
            return Ok(PlayOutcome::Superseded);
        }
        if resource.is_none() {
            warn!("No audio resource, continuing in transport-only mode");
            self.mode.set_mode(DriverMode::Transport);
        }

        // Step 2: warmup
        let warmup = self
            .warmup
            .wait_ready(&self.transport, self.settings.warmup_timeout())
            .await;
        if warmup == WarmupOutcome::Superseded || !self.transport.is_current(generation) {
            return Ok(PlayOutcome::Superseded);
        }

        // Step 3: routing health
        if let Some(bound) = self.routing.bound_resource() {
            if bound.state() == ContextState::Suspended {
                match tokio::time::timeout(self.settings.resume_timeout(), bound.resume()).await {
                    Ok(Ok(())) => debug!("Routed resource {} resumed", bound.id()),
                    Ok(Err(e)) => warn!("Routed resource {} did not resume: {}", bound.id(), e),
                    Err(_) => warn!(
                        "Routed resource {} resume timed out after {:?}",
                        bound.id(),
                        self.settings.resume_timeout()
                    ),
                }
                if !self.transport.is_current(generation) {
                    return Ok(PlayOutcome::Superseded);
                }
            }
        }

        // Step 4: restore
        if self.restore.is_pending() {
            self.restore.apply(&self.transport);
        }
        self.restore.complete();

        // Step 5: transport
        if let Err(e) = self.transport.play().await {
            self.recovery.report_error(&e.to_string());
            if !self.recovery.attempt_recovery().await {
                return Err(self.fail_play(e.to_string()));
            }
            if !self.transport.is_current(generation) {
                return Ok(PlayOutcome::Superseded);
            }
            info!("Retrying play after recovery backoff");
            if let Err(e) = self.transport.play().await {
                self.recovery.report_error(&e.to_string());
                return Err(self.fail_play(e.to_string()));
            }
        }
        if !self.transport.is_current(generation) {
            return Ok(PlayOutcome::Superseded);
        }

        // Step 6: background monitoring
        self.recovery.start_monitoring(self.transport.clone());
        self.performance.start();
        self.buffer.start_polling();
        Ok(PlayOutcome::Started)
    }

    fn fail_play(&self, reason: String) -> Error {
        error!("Playback failed: {}", reason);
        self.bus.publish(EngineEvent::DriverError {
            context: "play".to_string(),
            error: reason.clone(),
        });
        Error::PlaybackFailed {
            attempts: self.recovery.retry_count(),
            reason,
        }
    }

    pub fn pause(&self) {
        self.transport.pause();
        self.recovery.stop_monitoring();
        self.buffer.stop_polling();
    }

    pub fn stop(&self) {
        self.transport.stop();
        self.recovery.stop_monitoring();
        self.buffer.stop_polling();
        self.performance.stop();
    }

    pub fn seek(&self, seconds: f64) {
        self.transport.seek(seconds);
    }

    pub fn set_volume(&self, volume: f64) {
        self.transport.set_volume(volume);
    }

    pub fn set_loop(&self, looping: bool) {
        self.transport.set_loop(looping);
    }

    pub fn set_rate(&self, rate: f64) {
        self.transport.set_rate(rate);
    }

    pub fn set_preserve_pitch(&self, preserve: bool) {
        self.transport.set_preserve_pitch(preserve);
    }

    /// Arm a silent seek to `position` once the transport is decode-ready
    pub fn restore_position(&self, position: f64) {
        self.restore.begin_restore(position);
        if let RestoreOutcome::Seeked(_) | RestoreOutcome::InPlace =
            self.restore.apply(&self.transport)
        {
            self.restore.complete();
        }
    }

    // ========================================
    // Routing and quality
    // ========================================

    pub fn get_mode(&self) -> DriverMode {
        self.mode.mode()
    }

    pub fn mode(&self) -> &ModeController {
        &self.mode
    }

    /// Route the transport into `resource`; forbidden in transport-only mode
    pub fn attach_source(&self, resource: &ResourceHandle) -> Result<NodeHandle> {
        let mode = self.mode.mode();
        if !mode.allows_dsp() {
            warn!("Refusing graph attachment in {} mode", mode);
            return Err(Error::DspForbidden);
        }
        self.routing.attach(resource, &self.transport)
    }

    /// Resolved running resource, if any
    pub fn resource(&self) -> Option<ResourceHandle> {
        self.unlock.slot().current()
    }

    pub fn resource_slot(&self) -> &ResourceSlot {
        self.unlock.slot()
    }

    pub fn unlock_gate(&self) -> &UnlockGate {
        &self.unlock
    }

    pub fn routing(&self) -> &RoutingManager {
        &self.routing
    }

    pub fn performance(&self) -> &PerformanceMonitor {
        &self.performance
    }

    pub fn buffer_health(&self) -> &BufferHealthMonitor {
        &self.buffer
    }

    pub fn recovery(&self) -> &ErrorRecoveryController {
        &self.recovery
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn track(&self) -> Option<Track> {
        lock(&self.track).clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn diagnostics(&self) -> DriverDiagnostics {
        let resource = self.unlock.resource();
        DriverDiagnostics {
            mode: self.mode.mode(),
            load_generation: self.transport.generation(),
            track_id: lock(&self.track).as_ref().map(|t| t.id.clone()),
            ready_state: self.transport.ready_state(),
            position: self.transport.current_time(),
            duration: self.transport.duration(),
            playing: self.transport.is_playing(),
            buffer_health: self.buffer.get_health(),
            performance_score: self.performance.get_score(),
            retry_count: self.recovery.retry_count(),
            last_error: self.recovery.last_error(),
            resource_id: resource.as_ref().map(|r| r.id()),
            resource_state: resource.as_ref().map(|r| r.state()),
            routed: self.routing.is_bound(),
            routing_healthy: self.routing.is_healthy(),
            watchdog_active: self.recovery.is_monitoring(),
        }
    }

    /// Stop every task, drop the routing binding and close the resource
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        for subscription in lock(&self.subscriptions).drain(..) {
            subscription.unsubscribe();
        }
        self.recovery.stop_monitoring();
        self.buffer.stop_polling();
        self.performance.stop();
        self.routing.disconnect();
        self.routing.release();
        self.transport.dispose();
        self.unlock.close().await;
        info!("Driver disposed");
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("mode", &self.mode.mode())
            .field("generation", &self.transport.generation())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
