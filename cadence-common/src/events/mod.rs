//! Event types for the Cadence event system
//!
//! Provides the shared event definitions and the synchronous `EventBus` used by
//! every engine component to announce state transitions without direct coupling.

mod types;

pub use types::{DriverMode, ResourceLifecycleState};

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{error, trace};
use uuid::Uuid;

/// Topic strings, one per `EngineEvent` variant
pub mod topics {
    pub const PLAYBACK_STARTED: &str = "playback.started";
    pub const PLAYBACK_PAUSED: &str = "playback.paused";
    pub const PLAYBACK_STOPPED: &str = "playback.stopped";
    pub const PLAYBACK_ENDED: &str = "playback.ended";
    pub const TIME_UPDATED: &str = "time.updated";
    pub const BUFFERED_UPDATED: &str = "buffered.updated";
    pub const DURATION_CHANGED: &str = "duration.changed";
    pub const MODE_CHANGED: &str = "mode.changed";
    pub const DSP_STATE_CHANGED: &str = "dsp.state_changed";
    pub const DRIVER_ERROR: &str = "driver.error";
    pub const CONTEXT_READY: &str = "context.ready";
    pub const LIFECYCLE_CHANGED: &str = "lifecycle.changed";
    pub const TRACK_LOADED: &str = "track.loaded";
    pub const TRANSPORT_READY: &str = "transport.ready";
    pub const TRANSPORT_STALLED: &str = "transport.stalled";
    pub const PERFORMANCE_UPDATED: &str = "performance.updated";

    /// Topics that leave the engine for external collaborators
    pub const OUTBOUND: &[&str] = &[
        PLAYBACK_STARTED,
        PLAYBACK_PAUSED,
        PLAYBACK_STOPPED,
        PLAYBACK_ENDED,
        TIME_UPDATED,
        BUFFERED_UPDATED,
        DURATION_CHANGED,
        MODE_CHANGED,
        DSP_STATE_CHANGED,
        DRIVER_ERROR,
    ];
}

/// Cadence engine events
///
/// Every variant maps to exactly one topic string (see [`EngineEvent::topic`]).
/// Bus dispatch matches on the variant instead of inspecting untyped payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Transport started producing audio
    PlaybackStarted,

    /// Transport paused
    PlaybackPaused,

    /// Transport stopped and rewound
    PlaybackStopped,

    /// Track reached its end
    PlaybackEnded {
        /// True when a watchdog synthesized the end because the transport
        /// never fired its terminal signal
        synthesized: bool,
    },

    /// Heartbeat position update
    TimeUpdated {
        /// Current position in seconds
        current_time: f64,
        /// Track duration in seconds (None while unknown)
        duration: Option<f64>,
    },

    /// Seconds buffered ahead of the current position
    BufferedUpdated { seconds: f64 },

    /// Track duration became known or changed
    DurationChanged { seconds: f64 },

    /// Adaptive quality tier changed
    ModeChanged { mode: DriverMode },

    /// Processing graph attached to or detached from the output
    DspStateChanged { enabled: bool },

    /// Failure surfaced by the driver
    DriverError {
        /// Operation that failed (e.g. "play", "load")
        context: String,
        /// Human-readable error
        error: String,
    },

    /// A new audio resource is available for attachment
    ContextReady { resource_id: Uuid },

    /// Lifecycle manager changed state
    LifecycleChanged {
        from: ResourceLifecycleState,
        to: ResourceLifecycleState,
    },

    /// A load request settled
    TrackLoaded {
        track_id: String,
        /// False when the load timed out before the transport was ready
        ready: bool,
    },

    /// Transport can furnish forthcoming samples
    TransportReady,

    /// Transport ran out of data while playing
    TransportStalled,

    /// Performance monitor finished an evaluation window
    PerformanceUpdated { score: i32 },
}

impl EngineEvent {
    /// Topic this event is published on
    pub fn topic(&self) -> &'static str {
        match self {
            EngineEvent::PlaybackStarted => topics::PLAYBACK_STARTED,
            EngineEvent::PlaybackPaused => topics::PLAYBACK_PAUSED,
            EngineEvent::PlaybackStopped => topics::PLAYBACK_STOPPED,
            EngineEvent::PlaybackEnded { .. } => topics::PLAYBACK_ENDED,
            EngineEvent::TimeUpdated { .. } => topics::TIME_UPDATED,
            EngineEvent::BufferedUpdated { .. } => topics::BUFFERED_UPDATED,
            EngineEvent::DurationChanged { .. } => topics::DURATION_CHANGED,
            EngineEvent::ModeChanged { .. } => topics::MODE_CHANGED,
            EngineEvent::DspStateChanged { .. } => topics::DSP_STATE_CHANGED,
            EngineEvent::DriverError { .. } => topics::DRIVER_ERROR,
            EngineEvent::ContextReady { .. } => topics::CONTEXT_READY,
            EngineEvent::LifecycleChanged { .. } => topics::LIFECYCLE_CHANGED,
            EngineEvent::TrackLoaded { .. } => topics::TRACK_LOADED,
            EngineEvent::TransportReady => topics::TRANSPORT_READY,
            EngineEvent::TransportStalled => topics::TRANSPORT_STALLED,
            EngineEvent::PerformanceUpdated { .. } => topics::PERFORMANCE_UPDATED,
        }
    }

    /// Whether this event is meant for collaborators outside the engine
    pub fn is_outbound(&self) -> bool {
        topics::OUTBOUND.contains(&self.topic())
    }
}

/// Subscriber callback
pub type Handler = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    topic: String,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Synchronous in-process publish/subscribe bus
///
/// `publish` invokes every current subscriber of the event's topic, in
/// subscription order, on the caller's execution context. There is no queue
/// and no thread hop. A panicking handler is contained and logged; the
/// remaining handlers still receive the event.
///
/// Handlers may publish or subscribe re-entrantly: the subscriber list is
/// snapshotted before dispatch, so a subscription added during a publish only
/// sees later events.
///
/// # Examples
///
/// ```
/// use cadence_common::events::{topics, EngineEvent, EventBus};
///
/// let bus = EventBus::new();
/// let sub = bus.subscribe(topics::PLAYBACK_STARTED, |event| {
///     assert_eq!(event, &EngineEvent::PlaybackStarted);
/// });
/// bus.publish(EngineEvent::PlaybackStarted);
/// sub.unsubscribe();
/// ```
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to events published on `topic` (exact match)
    ///
    /// Dropping the returned [`Subscription`] does not unsubscribe; call
    /// [`Subscription::unsubscribe`] explicitly.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let id = inner.next_id;
        inner.subscribers.push(Subscriber {
            id,
            topic: topic.to_string(),
            handler: Arc::new(handler),
        });
        trace!("Subscribed #{} to '{}'", id, topic);

        Subscription {
            bus: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Subscribe one handler to several topics
    pub fn subscribe_many<F>(&self, topics: &[&str], handler: F) -> Vec<Subscription>
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        topics
            .iter()
            .map(|topic| {
                let handler = Arc::clone(&handler);
                self.subscribe(topic, move |event| handler(event))
            })
            .collect()
    }

    /// Deliver `event` to every subscriber of its topic
    ///
    /// Returns the number of handlers that completed without panicking.
    pub fn publish(&self, event: EngineEvent) -> usize {
        let topic = event.topic();
        let handlers: Vec<(u64, Handler)> = lock(&self.inner)
            .subscribers
            .iter()
            .filter(|s| s.topic == topic)
            .map(|s| (s.id, Arc::clone(&s.handler)))
            .collect();

        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!("Handler #{} for '{}' panicked: {}", id, topic, message);
                }
            }
        }
        delivered
    }

    /// Number of subscribers on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        lock(&self.inner)
            .subscribers
            .iter()
            .filter(|s| s.topic == topic)
            .count()
    }

    /// Remove every subscription
    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        let removed = inner.subscribers.len();
        inner.subscribers.clear();
        trace!("Cleared {} subscriptions", removed);
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &lock(&self.inner).subscribers.len())
            .finish()
    }
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<Mutex<BusInner>>,
    id: u64,
}

impl Subscription {
    /// Remove this subscription; no-op if the bus is gone or already cleared
    pub fn unsubscribe(&self) {
        if let Some(bus) = self.bus.upgrade() {
            lock(&bus).subscribers.retain(|s| s.id != self.id);
        }
    }
}

fn lock(inner: &Mutex<BusInner>) -> MutexGuard<'_, BusInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ========================================
// Tests
// ========================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder(bus: &EventBus, topic: &str) -> Arc<Mutex<Vec<EngineEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(topic, move |event| sink.lock().unwrap().push(event.clone()));
        seen
    }

    #[test]
    fn test_publish_reaches_only_matching_topic() {
        let bus = EventBus::new();
        let started = recorder(&bus, topics::PLAYBACK_STARTED);
        let paused = recorder(&bus, topics::PLAYBACK_PAUSED);

        assert_eq!(bus.publish(EngineEvent::PlaybackStarted), 1);

        assert_eq!(started.lock().unwrap().len(), 1);
        assert!(paused.lock().unwrap().is_empty());
    }

    #[test]
    fn test_delivery_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = Arc::clone(&order);
            bus.subscribe(topics::PLAYBACK_ENDED, move |_| order.lock().unwrap().push(n));
        }

        bus.publish(EngineEvent::PlaybackEnded { synthesized: false });

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let before = Arc::clone(&count);
        bus.subscribe(topics::MODE_CHANGED, move |_| {
            before.fetch_add(1, Ordering::SeqCst);
        });
        bus.subscribe(topics::MODE_CHANGED, |_| panic!("handler failure"));
        let after = Arc::clone(&count);
        bus.subscribe(topics::MODE_CHANGED, move |_| {
            after.fetch_add(1, Ordering::SeqCst);
        });

        let delivered = bus.publish(EngineEvent::ModeChanged {
            mode: DriverMode::Light,
        });

        assert_eq!(delivered, 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = bus.subscribe(topics::PLAYBACK_STARTED, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(EngineEvent::PlaybackStarted);
        sub.unsubscribe();
        bus.publish(EngineEvent::PlaybackStarted);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(topics::PLAYBACK_STARTED), 0);
    }

    #[test]
    fn test_topic_matching_is_exact() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        bus.subscribe("playback", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(EngineEvent::PlaybackStarted);

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reentrant_publish_from_handler() {
        let bus = EventBus::new();
        let seen = recorder(&bus, topics::DSP_STATE_CHANGED);
        let inner_bus = bus.clone();
        bus.subscribe(topics::MODE_CHANGED, move |_| {
            inner_bus.publish(EngineEvent::DspStateChanged { enabled: false });
        });

        bus.publish(EngineEvent::ModeChanged {
            mode: DriverMode::Transport,
        });

        assert_eq!(
            *seen.lock().unwrap(),
            vec![EngineEvent::DspStateChanged { enabled: false }]
        );
    }

    #[test]
    fn test_clear_removes_everything() {
        let bus = EventBus::new();
        let _a = recorder(&bus, topics::PLAYBACK_STARTED);
        let _b = recorder(&bus, topics::TIME_UPDATED);

        bus.clear();

        assert_eq!(bus.subscriber_count(topics::PLAYBACK_STARTED), 0);
        assert_eq!(bus.publish(EngineEvent::PlaybackStarted), 0);
    }

    #[test]
    fn test_subscribe_many_shares_handler() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let subs = bus.subscribe_many(
            &[topics::PLAYBACK_STARTED, topics::PLAYBACK_PAUSED],
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            },
        );

        bus.publish(EngineEvent::PlaybackStarted);
        bus.publish(EngineEvent::PlaybackPaused);

        assert_eq!(subs.len(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = EngineEvent::TimeUpdated {
            current_time: 12.5,
            duration: Some(180.0),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "time_updated");
        assert_eq!(json["current_time"], 12.5);
    }

    #[test]
    fn test_outbound_classification() {
        assert!(EngineEvent::PlaybackStarted.is_outbound());
        assert!(EngineEvent::DriverError {
            context: "play".into(),
            error: "blocked".into()
        }
        .is_outbound());
        assert!(!EngineEvent::TransportReady.is_outbound());
        assert!(!EngineEvent::PerformanceUpdated { score: 90 }.is_outbound());
    }
}
