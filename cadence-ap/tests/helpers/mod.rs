//! Shared fixtures for cadence-ap integration tests
//!
//! Builds a fully wired [`Engine`] on the simulated platform and records bus
//! traffic so tests can assert on what was published, and how often.

#![allow(dead_code)]

use cadence_ap::sim::{SimMedia, SimPlatform};
use cadence_ap::{
    Engine, EngineSettings, MemoryPresetStore, PlaybackManager, PresetCatalog, PresetStore, Track,
};
use cadence_common::events::topics;
use cadence_common::{EngineEvent, EventBus, Subscription};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Every topic except the heartbeat ones
pub const RECORDED_TOPICS: &[&str] = &[
    topics::PLAYBACK_STARTED,
    topics::PLAYBACK_PAUSED,
    topics::PLAYBACK_STOPPED,
    topics::PLAYBACK_ENDED,
    topics::DURATION_CHANGED,
    topics::MODE_CHANGED,
    topics::DSP_STATE_CHANGED,
    topics::DRIVER_ERROR,
    topics::CONTEXT_READY,
    topics::LIFECYCLE_CHANGED,
    topics::TRACK_LOADED,
    topics::TRANSPORT_READY,
    topics::TRANSPORT_STALLED,
];

/// Collects published events in order
pub struct EventRecorder {
    events: Arc<Mutex<Vec<EngineEvent>>>,
    subscriptions: Vec<Subscription>,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus, topics: &[&str]) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let subscriptions = bus.subscribe_many(topics, move |event| {
            sink.lock().unwrap().push(event.clone());
        });
        Self {
            events,
            subscriptions,
        }
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, topic: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.topic() == topic)
            .count()
    }

    pub fn of_topic(&self, topic: &str) -> Vec<EngineEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.topic() == topic)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn detach(&self) {
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
    }
}

/// Initialized engine plus handles into its simulated platform
pub struct TestEngine {
    pub sim: SimPlatform,
    pub engine: Engine,
    pub manager: Arc<PlaybackManager>,
    pub recorder: EventRecorder,
}

impl TestEngine {
    /// Engine on a platform where the user has already interacted
    pub fn activated() -> Self {
        Self::build(SimPlatform::activated(), EngineSettings::default())
    }

    /// Engine on a platform still waiting for the first user gesture
    pub fn locked() -> Self {
        Self::build(SimPlatform::new(), EngineSettings::default())
    }

    pub fn with_media(media: SimMedia) -> Self {
        let sim = SimPlatform::activated();
        sim.element.set_media(media);
        Self::build(sim, EngineSettings::default())
    }

    pub fn build(sim: SimPlatform, settings: EngineSettings) -> Self {
        let store: Arc<dyn PresetStore> = Arc::new(MemoryPresetStore::default());
        let engine = Engine::new(sim.ports(), settings, PresetCatalog::builtin(), store);
        let recorder = EventRecorder::attach(engine.bus(), RECORDED_TOPICS);
        let manager = engine.init().expect("engine init failed");
        Self {
            sim,
            engine,
            manager,
            recorder,
        }
    }
}

pub fn track(id: &str) -> Track {
    Track::new(id, format!("https://cdn.example/{}.mp3", id))
}

/// Let virtual time run forward; background tasks fire as they come due
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}
