//! Simulated platform backend
//!
//! In-memory implementation of every platform port, driven by tokio time so a
//! paused test runtime controls loading latency, playback progress and
//! end-of-track deterministically. The [`PatchBay`] records every node and
//! connection so graph topology can be asserted.
//!
//! Permission policy follows the sticky-activation model: a resource refuses
//! to resume until any interaction has fired on the [`SimInteraction`] source.

use crate::platform::{
    AccessMode, AudioNode, AudioResource, ContextState, InteractionKind, InteractionListener,
    InteractionSource, ListenerId, LoadRequest, MediaElement, MediaSignal, NodeHandle, NodeId,
    Platform, PlatformError, ProcessorKind, ReadyState, ResourceFactory, ResourceHandle,
    ResourceId, SignalListener, TimeRange, VisibilityProbe,
};
use async_trait::async_trait;
use cadence_common::time::secs_to_duration;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ========================================
// Platform bundle
// ========================================

/// Sticky user-activation flag shared by resources and the interaction source
#[derive(Debug, Default)]
pub struct UserActivation {
    granted: AtomicBool,
}

impl UserActivation {
    pub fn grant(&self) {
        self.granted.store(true, Ordering::SeqCst);
    }

    pub fn is_granted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }
}

/// Every simulated port, sharing one activation flag and patch bay
#[derive(Clone)]
pub struct SimPlatform {
    pub activation: Arc<UserActivation>,
    pub patch_bay: Arc<PatchBay>,
    pub factory: Arc<SimResourceFactory>,
    pub element: Arc<SimMediaElement>,
    pub interactions: Arc<SimInteraction>,
    pub visibility: Arc<SimVisibility>,
}

impl SimPlatform {
    /// Platform with no user activation yet
    pub fn new() -> Self {
        let activation = Arc::new(UserActivation::default());
        let patch_bay = Arc::new(PatchBay::default());
        Self {
            factory: Arc::new(SimResourceFactory::new(
                Arc::clone(&activation),
                Arc::clone(&patch_bay),
            )),
            element: Arc::new(SimMediaElement::new(SimMedia::default())),
            interactions: Arc::new(SimInteraction::new(Arc::clone(&activation))),
            visibility: Arc::new(SimVisibility::default()),
            activation,
            patch_bay,
        }
    }

    /// Platform whose user has already interacted
    pub fn activated() -> Self {
        let platform = Self::new();
        platform.activation.grant();
        platform
    }

    /// Port bundle for engine construction
    pub fn ports(&self) -> Platform {
        Platform {
            resources: self.factory.clone(),
            element: self.element.clone(),
            interactions: self.interactions.clone(),
            visibility: self.visibility.clone(),
        }
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

// ========================================
// Patch bay
// ========================================

#[derive(Debug, Default)]
struct PatchState {
    next_id: NodeId,
    labels: HashMap<NodeId, String>,
    edges: Vec<(NodeId, NodeId)>,
    params: HashMap<(NodeId, String), f32>,
}

/// Registry of simulated nodes and their connections
#[derive(Debug, Default)]
pub struct PatchBay {
    state: Mutex<PatchState>,
}

impl PatchBay {
    fn register(&self, label: &str) -> NodeId {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = state.next_id;
        state.labels.insert(id, label.to_string());
        id
    }

    fn connect(&self, from: NodeId, to: NodeId) {
        let mut state = lock(&self.state);
        if !state.edges.contains(&(from, to)) {
            state.edges.push((from, to));
        }
    }

    fn disconnect(&self, from: NodeId) -> usize {
        let mut state = lock(&self.state);
        let before = state.edges.len();
        state.edges.retain(|(src, _)| *src != from);
        before - state.edges.len()
    }

    fn set_param(&self, id: NodeId, name: &str, value: f32) {
        lock(&self.state).params.insert((id, name.to_string()), value);
    }

    /// Label of node `id`
    pub fn label(&self, id: NodeId) -> Option<String> {
        lock(&self.state).labels.get(&id).cloned()
    }

    /// Nodes `id` feeds
    pub fn outputs(&self, id: NodeId) -> Vec<NodeId> {
        lock(&self.state)
            .edges
            .iter()
            .filter(|(src, _)| *src == id)
            .map(|(_, dst)| *dst)
            .collect()
    }

    /// Nodes feeding `id`
    pub fn inputs(&self, id: NodeId) -> Vec<NodeId> {
        lock(&self.state)
            .edges
            .iter()
            .filter(|(_, dst)| *dst == id)
            .map(|(src, _)| *src)
            .collect()
    }

    /// Last value written to a node parameter
    pub fn param(&self, id: NodeId, name: &str) -> Option<f32> {
        lock(&self.state).params.get(&(id, name.to_string())).copied()
    }

    /// Total number of connections
    pub fn edge_count(&self) -> usize {
        lock(&self.state).edges.len()
    }

    /// Ids of every node registered under `label`
    pub fn find(&self, label: &str) -> Vec<NodeId> {
        let state = lock(&self.state);
        let mut ids: Vec<NodeId> = state
            .labels
            .iter()
            .filter(|(_, l)| l.as_str() == label)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Labels along the signal path starting at `start`
    ///
    /// Follows the first outgoing edge of each node until a node without
    /// outputs is reached. Stops if a node repeats.
    pub fn path_from(&self, start: NodeId) -> Vec<String> {
        let state = lock(&self.state);
        let mut path = Vec::new();
        let mut visited = Vec::new();
        let mut current = Some(start);
        while let Some(id) = current {
            if visited.contains(&id) {
                break;
            }
            visited.push(id);
            path.push(state.labels.get(&id).cloned().unwrap_or_default());
            current = state
                .edges
                .iter()
                .find(|(src, _)| *src == id)
                .map(|(_, dst)| *dst);
        }
        path
    }
}

// ========================================
// Nodes and resources
// ========================================

/// Simulated processing node
pub struct SimNode {
    id: NodeId,
    label: String,
    params: &'static [&'static str],
    bay: Arc<PatchBay>,
}

impl SimNode {
    fn create(bay: &Arc<PatchBay>, label: &str, params: &'static [&'static str]) -> NodeHandle {
        Arc::new(Self {
            id: bay.register(label),
            label: label.to_string(),
            params,
            bay: Arc::clone(bay),
        })
    }
}

impl AudioNode for SimNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn connect(&self, destination: &NodeHandle) -> Result<(), PlatformError> {
        self.bay.connect(self.id, destination.id());
        Ok(())
    }

    fn disconnect(&self) -> Result<(), PlatformError> {
        match self.bay.disconnect(self.id) {
            0 => Err(PlatformError::NotConnected),
            _ => Ok(()),
        }
    }

    fn set_param(&self, name: &str, value: f32) -> Result<(), PlatformError> {
        if !self.params.contains(&name) {
            return Err(PlatformError::UnknownParam(name.to_string()));
        }
        self.bay.set_param(self.id, name, value);
        Ok(())
    }
}

fn processor_params(kind: ProcessorKind) -> &'static [&'static str] {
    match kind {
        ProcessorKind::Gain => &["gain"],
        ProcessorKind::Filter(_) => &["frequency", "q", "gain"],
        ProcessorKind::Convolver => &["decay"],
        ProcessorKind::Compressor => &["threshold", "ratio"],
    }
}

/// Simulated audio resource
pub struct SimResource {
    id: ResourceId,
    state: Mutex<ContextState>,
    activation: Arc<UserActivation>,
    bay: Arc<PatchBay>,
    destination: NodeHandle,
    resume_calls: AtomicU32,
}

impl SimResource {
    fn new(activation: Arc<UserActivation>, bay: Arc<PatchBay>) -> Self {
        let initial = if activation.is_granted() {
            ContextState::Running
        } else {
            ContextState::Suspended
        };
        Self {
            id: Uuid::new_v4(),
            state: Mutex::new(initial),
            destination: SimNode::create(&bay, "destination", &[]),
            activation,
            bay,
            resume_calls: AtomicU32::new(0),
        }
    }

    /// Number of `resume` calls received
    pub fn resume_calls(&self) -> u32 {
        self.resume_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioResource for SimResource {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn state(&self) -> ContextState {
        *lock(&self.state)
    }

    async fn resume(&self) -> Result<(), PlatformError> {
        self.resume_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.state);
        match *state {
            ContextState::Closed => Err(PlatformError::Closed),
            ContextState::Running => Ok(()),
            ContextState::Suspended if self.activation.is_granted() => {
                *state = ContextState::Running;
                Ok(())
            }
            ContextState::Suspended => Err(PlatformError::NotAllowed(
                "resume requires a user gesture".to_string(),
            )),
        }
    }

    async fn suspend(&self) -> Result<(), PlatformError> {
        let mut state = lock(&self.state);
        if *state == ContextState::Closed {
            return Err(PlatformError::Closed);
        }
        *state = ContextState::Suspended;
        Ok(())
    }

    async fn close(&self) {
        *lock(&self.state) = ContextState::Closed;
    }

    fn destination(&self) -> NodeHandle {
        Arc::clone(&self.destination)
    }

    fn create_processor(&self, kind: ProcessorKind, label: &str) -> Result<NodeHandle, PlatformError> {
        if self.state() == ContextState::Closed {
            return Err(PlatformError::Closed);
        }
        Ok(SimNode::create(&self.bay, label, processor_params(kind)))
    }

    fn create_media_source(&self, _element: &dyn MediaElement) -> Result<NodeHandle, PlatformError> {
        if self.state() == ContextState::Closed {
            return Err(PlatformError::Closed);
        }
        Ok(SimNode::create(&self.bay, "media-source", &[]))
    }
}

/// Creates [`SimResource`]s; can be told to fail
pub struct SimResourceFactory {
    activation: Arc<UserActivation>,
    bay: Arc<PatchBay>,
    fail: AtomicBool,
    created: AtomicUsize,
    last: Mutex<Option<Arc<SimResource>>>,
}

impl SimResourceFactory {
    fn new(activation: Arc<UserActivation>, bay: Arc<PatchBay>) -> Self {
        Self {
            activation,
            bay,
            fail: AtomicBool::new(false),
            created: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    /// Make subsequent `create` calls fail
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Most recently created resource
    pub fn last(&self) -> Option<Arc<SimResource>> {
        lock(&self.last).clone()
    }
}

impl ResourceFactory for SimResourceFactory {
    fn create(&self) -> Result<ResourceHandle, PlatformError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PlatformError::NotSupported(
                "audio resources unavailable".to_string(),
            ));
        }
        let resource = Arc::new(SimResource::new(
            Arc::clone(&self.activation),
            Arc::clone(&self.bay),
        ));
        self.created.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last) = Some(Arc::clone(&resource));
        debug!("Created simulated resource {}", resource.id);
        Ok(resource)
    }
}

// ========================================
// Media element
// ========================================

/// How much of the media is buffered
#[derive(Debug, Clone, PartialEq)]
pub enum BufferProfile {
    /// Whole file buffered once metadata is known
    Full,
    /// A fixed number of seconds ahead of the position
    Ahead(f64),
    /// Fixed ranges, independent of the position
    Ranges(Vec<TimeRange>),
}

/// Behaviour of the media served on the next load
#[derive(Debug, Clone, PartialEq)]
pub struct SimMedia {
    /// `None` for unknown, `Some(INFINITY)` for a live stream
    pub duration: Option<f64>,
    pub load_latency: Duration,
    /// Source never reaches can-play
    pub stalls: bool,
    pub buffer: BufferProfile,
    /// Fire the terminal `Ended` signal when the end is reached
    pub fires_ended: bool,
    /// Let the reported position run past the duration
    pub overruns: bool,
}

impl Default for SimMedia {
    fn default() -> Self {
        Self {
            duration: Some(180.0),
            load_latency: Duration::from_millis(50),
            stalls: false,
            buffer: BufferProfile::Full,
            fires_ended: true,
            overruns: false,
        }
    }
}

struct ElementState {
    media: SimMedia,
    epoch: u64,
    play_epoch: u64,
    loads: Vec<LoadRequest>,
    ready: ReadyState,
    duration: Option<f64>,
    base_position: f64,
    playing_since: Option<Instant>,
    rate: f64,
    volume: f64,
    looping: bool,
    preserve_pitch: bool,
    ended: bool,
    play_calls: u32,
    reject_plays: u32,
}

impl ElementState {
    fn position(&self) -> f64 {
        let elapsed = self
            .playing_since
            .map(|since| since.elapsed().as_secs_f64() * self.rate)
            .unwrap_or(0.0);
        let position = self.base_position + elapsed;
        match self.duration {
            Some(d) if d.is_finite() && !self.media.overruns => position.min(d),
            _ => position,
        }
    }
}

struct ElementShared {
    state: Mutex<ElementState>,
    listener: Mutex<Option<SignalListener>>,
}

impl ElementShared {
    fn emit(&self, signal: MediaSignal) {
        let listener = lock(&self.listener).clone();
        trace!("Media signal {:?}", signal);
        if let Some(listener) = listener {
            listener(signal);
        }
    }
}

/// Simulated media playback primitive
pub struct SimMediaElement {
    shared: Arc<ElementShared>,
}

impl SimMediaElement {
    pub fn new(media: SimMedia) -> Self {
        Self {
            shared: Arc::new(ElementShared {
                state: Mutex::new(ElementState {
                    media,
                    epoch: 0,
                    play_epoch: 0,
                    loads: Vec::new(),
                    ready: ReadyState::HaveNothing,
                    duration: None,
                    base_position: 0.0,
                    playing_since: None,
                    rate: 1.0,
                    volume: 1.0,
                    looping: false,
                    preserve_pitch: true,
                    ended: false,
                    play_calls: 0,
                    reject_plays: 0,
                }),
                listener: Mutex::new(None),
            }),
        }
    }

    /// Media served by subsequent loads
    pub fn set_media(&self, media: SimMedia) {
        lock(&self.shared.state).media = media;
    }

    /// Reject the next `count` play calls as policy-blocked
    pub fn reject_next_plays(&self, count: u32) {
        lock(&self.shared.state).reject_plays = count;
    }

    /// Force the reported ready state
    pub fn set_ready_state(&self, ready: ReadyState) {
        lock(&self.shared.state).ready = ready;
    }

    /// Jump the position without a seek
    pub fn set_position(&self, seconds: f64) {
        let mut state = lock(&self.shared.state);
        state.base_position = seconds;
        if state.playing_since.is_some() {
            state.playing_since = Some(Instant::now());
        }
    }

    /// Deliver an arbitrary signal to the listener
    pub fn emit(&self, signal: MediaSignal) {
        self.shared.emit(signal);
    }

    /// Every load request received so far
    pub fn loads(&self) -> Vec<LoadRequest> {
        lock(&self.shared.state).loads.clone()
    }

    pub fn play_calls(&self) -> u32 {
        lock(&self.shared.state).play_calls
    }

    pub fn volume(&self) -> f64 {
        lock(&self.shared.state).volume
    }

    pub fn is_looping(&self) -> bool {
        lock(&self.shared.state).looping
    }

    pub fn rate(&self) -> f64 {
        lock(&self.shared.state).rate
    }

    pub fn preserves_pitch(&self) -> bool {
        lock(&self.shared.state).preserve_pitch
    }

    pub fn has_listener(&self) -> bool {
        lock(&self.shared.listener).is_some()
    }

    fn spawn_load(&self, epoch: u64, media: SimMedia) {
        let shared = Arc::clone(&self.shared);
        let task = async move {
            tokio::time::sleep(media.load_latency).await;
            {
                let mut state = lock(&shared.state);
                if state.epoch != epoch {
                    return;
                }
                state.ready = ReadyState::HaveMetadata;
                state.duration = media.duration;
            }
            if let Some(duration) = media.duration {
                shared.emit(MediaSignal::DurationChange(duration));
            }
            shared.emit(MediaSignal::LoadedMetadata);
            if media.stalls {
                return;
            }
            {
                let mut state = lock(&shared.state);
                if state.epoch != epoch {
                    return;
                }
                state.ready = ReadyState::HaveEnoughData;
            }
            shared.emit(MediaSignal::CanPlay);
            shared.emit(MediaSignal::CanPlayThrough);
        };
        tokio::spawn(task);
    }

    /// Arm the end-of-media timer for the current play run
    fn schedule_end(shared: &Arc<ElementShared>) {
        let (play_epoch, remaining) = {
            let state = lock(&shared.state);
            let Some(duration) = state.duration.filter(|d| d.is_finite()) else {
                return;
            };
            if state.playing_since.is_none() || state.rate <= 0.0 {
                return;
            }
            let remaining = ((duration - state.position()) / state.rate).max(0.0);
            (state.play_epoch, remaining)
        };

        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            tokio::time::sleep(secs_to_duration(remaining)).await;
            let fire = {
                let mut state = lock(&shared.state);
                if state.play_epoch != play_epoch {
                    return;
                }
                if state.looping {
                    state.base_position = 0.0;
                    state.playing_since = Some(Instant::now());
                    None
                } else if state.media.fires_ended {
                    state.base_position = state.duration.unwrap_or(0.0);
                    state.playing_since = None;
                    state.ended = true;
                    state.play_epoch += 1;
                    Some(MediaSignal::Ended)
                } else {
                    // Stuck at the end: nominally playing, no terminal signal
                    return;
                }
            };
            match fire {
                Some(signal) => shared.emit(signal),
                None => Self::schedule_end(&shared),
            }
        });
    }
}

impl Default for SimMediaElement {
    fn default() -> Self {
        Self::new(SimMedia::default())
    }
}

#[async_trait]
impl MediaElement for SimMediaElement {
    fn load(&self, request: &LoadRequest) {
        let (epoch, media) = {
            let mut state = lock(&self.shared.state);
            state.epoch += 1;
            state.play_epoch += 1;
            state.loads.push(request.clone());
            state.ready = ReadyState::HaveNothing;
            state.duration = None;
            state.base_position = 0.0;
            state.playing_since = None;
            state.ended = false;
            (state.epoch, state.media.clone())
        };
        debug!(
            "Simulated load #{} of {} ({})",
            epoch,
            request.uri,
            match request.access {
                AccessMode::Opaque => "opaque",
                AccessMode::CrossOrigin => "cross-origin",
            }
        );
        self.spawn_load(epoch, media);
    }

    async fn play(&self) -> Result<(), PlatformError> {
        {
            let mut state = lock(&self.shared.state);
            state.play_calls += 1;
            if state.reject_plays > 0 {
                state.reject_plays -= 1;
                return Err(PlatformError::NotAllowed(
                    "play() blocked by autoplay policy".to_string(),
                ));
            }
            if state.playing_since.is_some() {
                return Ok(());
            }
            if state.ended {
                state.base_position = 0.0;
                state.ended = false;
            }
            state.play_epoch += 1;
            state.playing_since = Some(Instant::now());
        }
        self.shared.emit(MediaSignal::Playing);
        Self::schedule_end(&self.shared);
        Ok(())
    }

    fn pause(&self) {
        {
            let mut state = lock(&self.shared.state);
            if state.playing_since.is_none() {
                return;
            }
            state.base_position = state.position();
            state.playing_since = None;
            state.play_epoch += 1;
        }
        self.shared.emit(MediaSignal::Pause);
    }

    fn seek(&self, seconds: f64) {
        let playing = {
            let mut state = lock(&self.shared.state);
            let target = match state.duration {
                Some(d) if d.is_finite() => seconds.clamp(0.0, d),
                _ => seconds.max(0.0),
            };
            state.base_position = target;
            state.ended = false;
            state.play_epoch += 1;
            if state.playing_since.is_some() {
                state.playing_since = Some(Instant::now());
                true
            } else {
                false
            }
        };
        if playing {
            Self::schedule_end(&self.shared);
        }
    }

    fn set_volume(&self, volume: f64) {
        lock(&self.shared.state).volume = volume;
    }

    fn set_loop(&self, looping: bool) {
        lock(&self.shared.state).looping = looping;
    }

    fn set_rate(&self, rate: f64) {
        let playing = {
            let mut state = lock(&self.shared.state);
            state.base_position = state.position();
            if state.playing_since.is_some() {
                state.playing_since = Some(Instant::now());
            }
            state.rate = rate;
            state.play_epoch += 1;
            state.playing_since.is_some()
        };
        if playing {
            Self::schedule_end(&self.shared);
        }
    }

    fn set_preserve_pitch(&self, preserve: bool) {
        lock(&self.shared.state).preserve_pitch = preserve;
    }

    fn current_time(&self) -> f64 {
        lock(&self.shared.state).position()
    }

    fn duration(&self) -> Option<f64> {
        lock(&self.shared.state).duration
    }

    fn ready_state(&self) -> ReadyState {
        lock(&self.shared.state).ready
    }

    fn buffered(&self) -> Vec<TimeRange> {
        let state = lock(&self.shared.state);
        if state.ready < ReadyState::HaveMetadata {
            return Vec::new();
        }
        let position = state.position();
        match &state.media.buffer {
            BufferProfile::Ranges(ranges) => ranges.clone(),
            BufferProfile::Full => match state.duration {
                Some(d) if d.is_finite() => vec![TimeRange::new(0.0, d)],
                _ => vec![TimeRange::new(0.0, position + 30.0)],
            },
            BufferProfile::Ahead(ahead) => {
                let end = match state.duration {
                    Some(d) if d.is_finite() => (position + ahead).min(d),
                    _ => position + ahead,
                };
                vec![TimeRange::new(0.0, end)]
            }
        }
    }

    fn is_paused(&self) -> bool {
        lock(&self.shared.state).playing_since.is_none()
    }

    fn has_ended(&self) -> bool {
        lock(&self.shared.state).ended
    }

    fn set_signal_listener(&self, listener: Option<SignalListener>) {
        *lock(&self.shared.listener) = listener;
    }
}

// ========================================
// Interaction and visibility
// ========================================

/// Interaction source fired by tests and the demo binary
pub struct SimInteraction {
    activation: Arc<UserActivation>,
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, InteractionKind, InteractionListener)>>,
}

impl SimInteraction {
    fn new(activation: Arc<UserActivation>) -> Self {
        Self {
            activation,
            next_id: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Simulate a user gesture of `kind`
    ///
    /// Grants sticky activation before listeners run. Returns the number of
    /// listeners invoked.
    pub fn fire(&self, kind: InteractionKind) -> usize {
        self.activation.grant();
        let matching: Vec<InteractionListener> = lock(&self.listeners)
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, l)| Arc::clone(l))
            .collect();
        for listener in &matching {
            listener(kind);
        }
        matching.len()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }
}

impl InteractionSource for SimInteraction {
    fn add_listener(&self, kind: InteractionKind, listener: InteractionListener) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.listeners).push((id, kind, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        lock(&self.listeners).retain(|(existing, _, _)| *existing != id);
    }
}

/// Toggleable foreground visibility
#[derive(Debug)]
pub struct SimVisibility {
    visible: AtomicBool,
}

impl SimVisibility {
    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }
}

impl Default for SimVisibility {
    fn default() -> Self {
        Self {
            visible: AtomicBool::new(true),
        }
    }
}

impl VisibilityProbe for SimVisibility {
    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> LoadRequest {
        LoadRequest {
            uri: uri.to_string(),
            access: AccessMode::Opaque,
        }
    }

    #[tokio::test]
    async fn test_resume_requires_activation() {
        let platform = SimPlatform::new();
        let resource = platform.factory.create().unwrap();
        assert_eq!(resource.state(), ContextState::Suspended);
        assert!(matches!(
            resource.resume().await,
            Err(PlatformError::NotAllowed(_))
        ));

        platform.interactions.fire(InteractionKind::Click);
        resource.resume().await.unwrap();
        assert_eq!(resource.state(), ContextState::Running);
    }

    #[test]
    fn test_patch_bay_path() {
        let platform = SimPlatform::activated();
        let resource = platform.factory.create().unwrap();
        let a = resource.create_processor(ProcessorKind::Gain, "a").unwrap();
        let b = resource.create_processor(ProcessorKind::Gain, "b").unwrap();
        a.connect(&b).unwrap();
        b.connect(&resource.destination()).unwrap();

        assert_eq!(
            platform.patch_bay.path_from(a.id()),
            vec!["a", "b", "destination"]
        );
        assert!(a.disconnect().is_ok());
        assert_eq!(a.disconnect(), Err(PlatformError::NotConnected));
    }

    #[test]
    fn test_unknown_param_rejected() {
        let platform = SimPlatform::activated();
        let resource = platform.factory.create().unwrap();
        let gain = resource.create_processor(ProcessorKind::Gain, "g").unwrap();
        assert!(gain.set_param("gain", 0.5).is_ok());
        assert_eq!(platform.patch_bay.param(gain.id(), "gain"), Some(0.5));
        assert!(matches!(
            gain.set_param("q", 1.0),
            Err(PlatformError::UnknownParam(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_becomes_ready_after_latency() {
        let element = SimMediaElement::default();
        element.load(&request("sim://a"));
        assert_eq!(element.ready_state(), ReadyState::HaveNothing);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(element.ready_state(), ReadyState::HaveEnoughData);
        assert_eq!(element.duration(), Some(180.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_advances_and_clamps() {
        let element = SimMediaElement::new(SimMedia {
            duration: Some(2.0),
            fires_ended: false,
            ..SimMedia::default()
        });
        element.load(&request("sim://short"));
        tokio::time::sleep(Duration::from_millis(60)).await;
        element.play().await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!((element.current_time() - 1.0).abs() < 1e-6);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(element.current_time(), 2.0);
        assert!(!element.is_paused());
        assert!(!element.has_ended());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_plays_counted() {
        let element = SimMediaElement::default();
        element.reject_next_plays(1);
        assert!(element.play().await.is_err());
        assert!(element.play().await.is_ok());
        assert_eq!(element.play_calls(), 2);
    }

    #[test]
    fn test_fire_counts_matching_listeners() {
        let platform = SimPlatform::new();
        platform
            .interactions
            .add_listener(InteractionKind::KeyDown, Arc::new(|_| {}));
        assert_eq!(platform.interactions.fire(InteractionKind::Click), 0);
        assert_eq!(platform.interactions.fire(InteractionKind::KeyDown), 1);
        assert!(platform.activation.is_granted());
    }
}
