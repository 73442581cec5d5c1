//! Playback manager
//!
//! Public entry point for playback control. Owns the processing graph (it is
//! the only component that mutates it), mirrors driver events into the
//! shared [`PlayerState`], and performs late DSP injection whenever a new
//! resource, a ready transport or a started playback makes attachment
//! possible.
//!
//! Mode reactions:
//! - `Transport`: detach the graph, route the source straight to the destination
//! - `Light`: bypass heavy nodes
//! - `Audiophile`: full graph, re-injected if it was detached
//!
//! A second watchdog catches the position overrunning the duration while
//! nominally playing, which the driver's end-of-track watchdog cannot see
//! when the transport keeps counting past the end.

use crate::config::EngineSettings;
use crate::driver::{Driver, DriverDiagnostics, PlayOutcome};
use crate::error::{Error, Result};
use crate::graph::{NodeKey, NodeParams, ProcessingGraph};
use crate::platform::{ContextState, ResourceHandle};
use crate::presets::{EffectSpec, PresetCatalog, PresetStore, DEFAULT_THEME};
use crate::recovery::END_TOLERANCE_SECS;
use crate::state::{PlaybackStatus, PlayerSnapshot, PlayerState, Track};
use crate::transport::LoadOutcome;
use cadence_common::events::topics;
use cadence_common::{DriverMode, EngineEvent, EventBus, Subscription};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};

/// Inbound navigation request, mapped 1:1 onto playback calls
#[derive(Debug, Clone, PartialEq)]
pub enum NavigationIntent {
    Next(Track),
    Previous(Track),
    Seek(f64),
    Volume(f64),
    Loop(bool),
}

/// Identity of an effect in the manager's chain, stable across graph rebuilds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EffectId(pub u64);

impl std::fmt::Display for EffectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "effect#{}", self.0)
    }
}

struct ChainEntry {
    id: EffectId,
    spec: EffectSpec,
    /// Node in the current graph; None until the graph exists
    key: Option<NodeKey>,
}

struct DspState {
    graph: ProcessingGraph,
    chain: Vec<ChainEntry>,
    params: Vec<NodeParams>,
    next_id: u64,
    attached: bool,
}

impl DspState {
    /// Recreate the graph on `resource` and materialize the chain into it
    fn rebuild_on(&mut self, resource: &ResourceHandle, reduced: bool) -> Result<()> {
        self.graph.dispose();
        self.graph = ProcessingGraph::new();
        self.graph.init(resource)?;
        self.graph.set_reduced(reduced);
        for entry in &mut self.chain {
            entry.key = match self.graph.push_node(entry.spec.build()) {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!("Effect {} not built: {}", entry.id, e);
                    None
                }
            };
        }
        self.graph.apply_preset(&self.params);
        Ok(())
    }

    /// Swap the chain for `specs`, materializing when the graph exists
    fn replace_chain(&mut self, specs: &[EffectSpec], params: &[NodeParams]) {
        for entry in self.chain.drain(..) {
            if let Some(key) = entry.key {
                let _ = self.graph.remove_node(key);
            }
        }
        for spec in specs {
            self.push(spec.clone());
        }
        self.params = params.to_vec();
        self.graph.apply_preset(&self.params);
    }

    fn push(&mut self, spec: EffectSpec) -> EffectId {
        self.next_id += 1;
        let id = EffectId(self.next_id);
        let key = if self.graph.is_initialized() {
            match self.graph.push_node(spec.build()) {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!("Effect {} not built: {}", id, e);
                    None
                }
            }
        } else {
            None
        };
        self.chain.push(ChainEntry { id, spec, key });
        id
    }
}

/// Manager diagnostics: driver internals plus the graph layout
#[derive(Debug, Clone, Serialize)]
pub struct ManagerDiagnostics {
    pub driver: DriverDiagnostics,
    pub chain: Vec<String>,
    pub effects: Vec<EffectId>,
    pub dsp_attached: bool,
    pub graph_reduced: bool,
    pub watchdog_active: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct PlaybackManager {
    driver: Arc<Driver>,
    bus: EventBus,
    state: Arc<PlayerState>,
    settings: EngineSettings,
    catalog: PresetCatalog,
    store: Arc<dyn PresetStore>,
    dsp: Mutex<DspState>,
    subscriptions: Mutex<Vec<Subscription>>,
    watchdog_generation: Arc<AtomicU64>,
    watchdog_active: Arc<AtomicBool>,
    disposed: AtomicBool,
}

impl PlaybackManager {
    pub fn new(
        driver: Arc<Driver>,
        state: Arc<PlayerState>,
        settings: &EngineSettings,
        catalog: PresetCatalog,
        store: Arc<dyn PresetStore>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            bus: driver.bus().clone(),
            driver,
            state,
            settings: settings.clone(),
            catalog,
            store,
            dsp: Mutex::new(DspState {
                graph: ProcessingGraph::new(),
                chain: Vec::new(),
                params: Vec::new(),
                next_id: 0,
                attached: false,
            }),
            subscriptions: Mutex::new(Vec::new()),
            watchdog_generation: Arc::new(AtomicU64::new(0)),
            watchdog_active: Arc::new(AtomicBool::new(false)),
            disposed: AtomicBool::new(false),
        });
        manager.restore_theme();
        manager.subscribe();
        manager
    }

    fn restore_theme(&self) {
        let saved = self.store.load_theme();
        let key = match saved.as_deref() {
            Some(key) if self.catalog.get(key).is_some() => key.to_string(),
            Some(key) => {
                warn!("Saved theme '{}' not in catalog, using '{}'", key, DEFAULT_THEME);
                DEFAULT_THEME.to_string()
            }
            None => DEFAULT_THEME.to_string(),
        };
        if let Some(preset) = self.catalog.get(&key) {
            lock(&self.dsp).replace_chain(&preset.chain, &preset.params);
            self.state.set_theme(&key);
            debug!("Theme '{}' restored", key);
        }
    }

    // ========================================
    // Event mirroring
    // ========================================

    fn subscribe(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let mirrored = [
            topics::PLAYBACK_STARTED,
            topics::PLAYBACK_PAUSED,
            topics::PLAYBACK_STOPPED,
            topics::PLAYBACK_ENDED,
            topics::TIME_UPDATED,
            topics::BUFFERED_UPDATED,
            topics::DURATION_CHANGED,
            topics::MODE_CHANGED,
            topics::DRIVER_ERROR,
            topics::CONTEXT_READY,
            topics::TRANSPORT_READY,
        ];
        let subscriptions = self.bus.subscribe_many(&mirrored, move |event| {
            if let Some(manager) = weak.upgrade() {
                manager.on_event(event);
            }
        });
        *lock(&self.subscriptions) = subscriptions;
    }

    fn on_event(&self, event: &EngineEvent) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        match event {
            EngineEvent::PlaybackStarted => {
                self.state.set_status(PlaybackStatus::Playing);
                self.inject_dsp();
            }
            EngineEvent::PlaybackPaused => self.state.set_status(PlaybackStatus::Paused),
            EngineEvent::PlaybackStopped => {
                self.state.set_status(PlaybackStatus::Stopped);
                self.state.set_position(0.0, None);
            }
            EngineEvent::PlaybackEnded { synthesized } => {
                self.stop_watchdog();
                if *synthesized {
                    self.state.increment_synthesized_ends();
                }
                self.state.set_status(PlaybackStatus::Ended);
            }
            EngineEvent::TimeUpdated {
                current_time,
                duration,
            } => self.state.set_position(*current_time, *duration),
            EngineEvent::BufferedUpdated { seconds } => self.state.set_buffered(*seconds),
            EngineEvent::DurationChanged { seconds } => self.state.set_duration(*seconds),
            EngineEvent::ModeChanged { mode } => {
                self.state.set_mode(*mode);
                self.on_mode_changed(*mode);
            }
            EngineEvent::DriverError { error, .. } => self.state.set_error(error.clone()),
            EngineEvent::ContextReady { .. } | EngineEvent::TransportReady => self.inject_dsp(),
            _ => {}
        }
    }

    fn on_mode_changed(&self, mode: DriverMode) {
        match mode {
            DriverMode::Transport => self.detach_dsp(),
            DriverMode::Light => lock(&self.dsp).graph.set_reduced(true),
            DriverMode::Audiophile => {
                lock(&self.dsp).graph.set_reduced(false);
                self.inject_dsp();
            }
        }
    }

    // ========================================
    // DSP attachment
    // ========================================

    /// Attach the processing graph between the transport and the destination
    ///
    /// Quietly does nothing until every precondition holds; it is re-run on
    /// the next readiness signal.
    fn inject_dsp(&self) {
        if !self.settings.dsp_enabled {
            return;
        }
        let mode = self.driver.get_mode();
        if !mode.allows_dsp() {
            return;
        }
        let Some(resource) = self.driver.resource() else {
            debug!("DSP injection deferred: no running resource");
            return;
        };
        if resource.state() != ContextState::Running {
            return;
        }
        if !self.driver.transport().ready_state().is_decode_ready() {
            debug!("DSP injection deferred: transport not decode-ready");
            return;
        }

        let routing = self.driver.routing();
        if let Some(bound) = routing.bound_resource_id() {
            if bound != resource.id() {
                info!("Releasing routing bound to replaced resource {}", bound);
                routing.disconnect();
                routing.release();
            }
        }

        let input = {
            let mut dsp = lock(&self.dsp);
            if dsp.graph.resource_id() != Some(resource.id()) {
                if let Err(e) = dsp.rebuild_on(&resource, mode.is_reduced()) {
                    warn!("Processing graph unavailable: {}", e);
                    return;
                }
            }
            dsp.graph.set_reduced(mode.is_reduced());
            match dsp.graph.get_input() {
                Ok(input) => input,
                Err(e) => {
                    warn!("Processing graph unavailable: {}", e);
                    return;
                }
            }
        };

        if let Err(e) = self.driver.attach_source(&resource) {
            warn!("DSP injection failed: {}", e);
            return;
        }
        if routing.connected_to() == Some(input.id()) {
            return;
        }
        if let Err(e) = routing.connect(&input) {
            warn!("DSP injection failed: {}", e);
            return;
        }

        let newly_attached = {
            let mut dsp = lock(&self.dsp);
            !std::mem::replace(&mut dsp.attached, true)
        };
        info!("Processing graph attached ({})", mode);
        if newly_attached {
            self.state.set_dsp_enabled(true);
            self.bus.publish(EngineEvent::DspStateChanged { enabled: true });
        }
    }

    /// Route the source straight to the destination
    fn detach_dsp(&self) {
        let routing = self.driver.routing();
        if let Some(resource) = routing.bound_resource() {
            if let Err(e) = routing.connect(&resource.destination()) {
                warn!("Bypass to destination failed: {}", e);
                routing.disconnect();
            }
        }
        let was_attached = std::mem::replace(&mut lock(&self.dsp).attached, false);
        if was_attached {
            info!("Processing graph detached");
            self.state.set_dsp_enabled(false);
            self.bus.publish(EngineEvent::DspStateChanged { enabled: false });
        }
    }

    // ========================================
    // Playback control
    // ========================================

    fn ensure_alive(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::Destroyed);
        }
        Ok(())
    }

    /// Load `track` and, with `autoplay`, start it
    pub async fn load_and_play(&self, track: Track, autoplay: bool) -> Result<PlayOutcome> {
        self.ensure_alive()?;
        self.stop_watchdog();
        info!("Load and play: {} (autoplay: {})", track.id, autoplay);
        self.state.set_track(Some(track.clone()));
        self.state.set_status(PlaybackStatus::Loading);

        match self.driver.load(&track, self.settings.dsp_enabled).await? {
            LoadOutcome::Superseded => return Ok(PlayOutcome::Superseded),
            LoadOutcome::TimedOut => warn!("Track {} not ready in time, continuing", track.id),
            LoadOutcome::Ready => {}
        }

        if !autoplay {
            self.state.set_status(PlaybackStatus::Paused);
            return Ok(PlayOutcome::Loaded);
        }
        self.play().await
    }

    /// Resume the resource (bounded) and start playback
    pub async fn play(&self) -> Result<PlayOutcome> {
        self.ensure_alive()?;
        if let Some(resource) = self.driver.unlock_gate().resource() {
            if resource.state() == ContextState::Suspended {
                let timeout = self.settings.resume_timeout();
                if tokio::time::timeout(timeout, resource.resume()).await.is_err() {
                    warn!("Resource resume timed out after {:?}", timeout);
                }
            }
        }

        let outcome = self.driver.play().await?;
        if outcome == PlayOutcome::Started {
            self.start_watchdog();
        }
        Ok(outcome)
    }

    pub fn pause(&self) {
        self.stop_watchdog();
        self.driver.pause();
    }

    pub fn stop(&self) {
        self.stop_watchdog();
        self.driver.stop();
    }

    pub fn seek(&self, seconds: f64) {
        let seconds = seconds.max(0.0);
        self.driver.seek(seconds);
        self.state.set_position(seconds, None);
    }

    pub fn set_volume(&self, volume: f64) {
        self.driver.set_volume(volume);
        self.state.set_volume(volume);
    }

    pub fn set_loop(&self, looping: bool) {
        self.driver.set_loop(looping);
        self.state.set_looping(looping);
    }

    pub fn set_rate(&self, rate: f64) {
        self.driver.set_rate(rate);
    }

    pub fn set_preserve_pitch(&self, preserve: bool) {
        self.driver.set_preserve_pitch(preserve);
    }

    /// Arm a silent seek to `position` for the loaded or next track
    pub fn restore_position(&self, position: f64) {
        self.driver.restore_position(position);
    }

    pub async fn dispatch(&self, intent: NavigationIntent) -> Result<()> {
        debug!("Dispatching {:?}", intent);
        match intent {
            NavigationIntent::Next(track) | NavigationIntent::Previous(track) => {
                self.load_and_play(track, true).await?;
            }
            NavigationIntent::Seek(seconds) => self.seek(seconds),
            NavigationIntent::Volume(volume) => self.set_volume(volume),
            NavigationIntent::Loop(looping) => self.set_loop(looping),
        }
        Ok(())
    }

    // ========================================
    // Effects and presets
    // ========================================

    /// Apply per-node parameter sets without changing the chain
    pub fn apply_preset(&self, params: &[NodeParams]) -> usize {
        let mut dsp = lock(&self.dsp);
        dsp.params = params.to_vec();
        dsp.graph.apply_preset(params)
    }

    /// Replace the chain with the theme's preset and persist the selection
    pub fn select_theme(&self, key: &str) -> Result<()> {
        let preset = self
            .catalog
            .get(key)
            .ok_or_else(|| Error::UnknownPreset(key.to_string()))?;
        lock(&self.dsp).replace_chain(&preset.chain, &preset.params);
        self.store.save_theme(key);
        self.state.set_theme(key);
        info!("Theme '{}' selected ({} effects)", key, preset.chain.len());
        Ok(())
    }

    pub fn push_effect(&self, spec: EffectSpec) -> EffectId {
        let id = lock(&self.dsp).push(spec);
        debug!("Effect {} added", id);
        id
    }

    pub fn remove_effect(&self, id: EffectId) -> Result<()> {
        let mut dsp = lock(&self.dsp);
        let index = dsp
            .chain
            .iter()
            .position(|e| e.id == id)
            .ok_or(Error::NodeNotFound(id.0))?;
        let entry = dsp.chain.remove(index);
        if let Some(key) = entry.key {
            dsp.graph.remove_node(key)?;
        }
        debug!("Effect {} removed", id);
        Ok(())
    }

    pub fn effects(&self) -> Vec<EffectId> {
        lock(&self.dsp).chain.iter().map(|e| e.id).collect()
    }

    /// Labels along the active graph chain (empty before attachment)
    pub fn chain_labels(&self) -> Vec<String> {
        lock(&self.dsp).graph.chain_labels()
    }

    pub fn is_dsp_attached(&self) -> bool {
        lock(&self.dsp).attached
    }

    // ========================================
    // Overrun watchdog
    // ========================================

    fn start_watchdog(&self) {
        let generation = self.watchdog_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let watchdog_generation = Arc::clone(&self.watchdog_generation);
        let active = Arc::clone(&self.watchdog_active);
        let transport = self.driver.transport().clone();
        let interval = self.settings.manager_watchdog();
        active.store(true, Ordering::SeqCst);

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
                let overran = match transport.duration() {
                    Some(d) if d.is_finite() => {
                        transport.is_playing()
                            && transport.current_time() > d + END_TOLERANCE_SECS
                    }
                    _ => false,
                };
                if overran {
                    warn!(
                        "Position {:.2}s overran the track, ending it",
                        transport.current_time()
                    );
                    transport.synthesize_end();
                    break;
                }
            }
            if watchdog_generation.load(Ordering::SeqCst) == generation {
                active.store(false, Ordering::SeqCst);
            }
        });
    }

    fn stop_watchdog(&self) {
        self.watchdog_generation.fetch_add(1, Ordering::SeqCst);
        self.watchdog_active.store(false, Ordering::SeqCst);
    }

    // ========================================
    // Observation
    // ========================================

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.state.snapshot()
    }

    pub fn state(&self) -> &Arc<PlayerState> {
        &self.state
    }

    pub fn driver(&self) -> &Arc<Driver> {
        &self.driver
    }

    pub fn diagnostics(&self) -> ManagerDiagnostics {
        let (chain, effects, dsp_attached, graph_reduced) = {
            let dsp = lock(&self.dsp);
            (
                dsp.graph.chain_labels(),
                dsp.chain.iter().map(|e| e.id).collect(),
                dsp.attached,
                dsp.graph.is_reduced(),
            )
        };
        ManagerDiagnostics {
            driver: self.driver.diagnostics(),
            chain,
            effects,
            dsp_attached,
            graph_reduced,
            watchdog_active: self.watchdog_active.load(Ordering::SeqCst),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Tear down the graph and the driver
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_watchdog();
        for subscription in lock(&self.subscriptions).drain(..) {
            subscription.unsubscribe();
        }
        {
            let mut dsp = lock(&self.dsp);
            dsp.graph.dispose();
            dsp.attached = false;
        }
        self.driver.dispose().await;
        info!("Playback manager disposed");
    }
}

impl std::fmt::Debug for PlaybackManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackManager")
            .field("driver", &self.driver)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
