//! Outbound event relay
//!
//! Forwards outbound bus topics to an external [`EventSink`]. While the sink
//! is disconnected (or rejects a send) events are held in a
//! [`PendingEventBuffer`] and delivered in their original order once it is
//! back; a new event is never sent ahead of older buffered ones.

use cadence_common::events::topics;
use cadence_common::{EngineEvent, EventBus, PendingEventBuffer, Subscription};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Event as delivered to a sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundEvent {
    pub topic: &'static str,
    pub emitted_at: DateTime<Utc>,
    pub event: EngineEvent,
}

impl OutboundEvent {
    pub fn new(event: EngineEvent) -> Self {
        Self {
            topic: event.topic(),
            emitted_at: cadence_common::time::now(),
            event,
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink disconnected")]
    Disconnected,

    #[error("Sink write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Receiver of outbound events (UI bridge, sync transport, log)
pub trait EventSink: Send + Sync {
    fn is_connected(&self) -> bool;
    fn send(&self, event: &OutboundEvent) -> Result<(), SinkError>;
}

// ========================================
// JSON lines sink
// ========================================

/// Writes one JSON object per event to any writer
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
    connected: AtomicBool,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            connected: AtomicBool::new(true),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|p| p.into_inner())
    }
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, event: &OutboundEvent) -> Result<(), SinkError> {
        if !self.is_connected() {
            return Err(SinkError::Disconnected);
        }
        let line = serde_json::to_string(event)?;
        let mut writer = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }
}

// ========================================
// Relay
// ========================================

struct RelayInner {
    sink: Arc<dyn EventSink>,
    pending: Mutex<PendingEventBuffer<OutboundEvent>>,
    delivered: AtomicU64,
}

impl RelayInner {
    fn pending(&self) -> MutexGuard<'_, PendingEventBuffer<OutboundEvent>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn forward(&self, event: OutboundEvent) {
        let mut pending = self.pending();
        if !self.sink.is_connected() {
            pending.push(event);
            return;
        }
        if !pending.is_empty() && !self.flush_locked(&mut pending) {
            pending.push(event);
            return;
        }
        match self.sink.send(&event) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                debug!("Outbound {} buffered: {}", event.topic, e);
                pending.push(event);
            }
        }
    }

    /// Returns true when the buffer drained completely
    fn flush_locked(&self, pending: &mut PendingEventBuffer<OutboundEvent>) -> bool {
        let sink = &self.sink;
        let (count, error) = pending.flush(|event| sink.send(event));
        self.delivered.fetch_add(count as u64, Ordering::Relaxed);
        match error {
            None => {
                if count > 0 {
                    info!("Flushed {} buffered outbound events", count);
                }
                true
            }
            Some(e) => {
                warn!(
                    "Outbound flush stopped after {} with {} events pending: {}",
                    count,
                    pending.len(),
                    e
                );
                false
            }
        }
    }
}

/// Bus-to-sink forwarder for the outbound topics
pub struct OutboundRelay {
    inner: Arc<RelayInner>,
    subscriptions: Vec<Subscription>,
}

impl OutboundRelay {
    /// Subscribe to every outbound topic on `bus`
    ///
    /// `capacity` bounds the offline buffer; the oldest entries are dropped
    /// beyond it.
    pub fn attach(bus: &EventBus, sink: Arc<dyn EventSink>, capacity: usize) -> Self {
        let inner = Arc::new(RelayInner {
            sink,
            pending: Mutex::new(PendingEventBuffer::with_capacity(capacity)),
            delivered: AtomicU64::new(0),
        });
        let handler_inner = Arc::clone(&inner);
        let subscriptions = bus.subscribe_many(topics::OUTBOUND, move |event| {
            handler_inner.forward(OutboundEvent::new(event.clone()));
        });
        debug!("Outbound relay attached to {} topics", subscriptions.len());
        Self {
            inner,
            subscriptions,
        }
    }

    /// Deliver buffered events after the sink reconnects
    pub fn flush(&self) -> usize {
        if !self.inner.sink.is_connected() {
            return 0;
        }
        let before = self.inner.delivered.load(Ordering::Relaxed);
        let mut pending = self.inner.pending();
        self.inner.flush_locked(&mut pending);
        (self.inner.delivered.load(Ordering::Relaxed) - before) as usize
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending().len()
    }

    /// Buffered events discarded at capacity
    pub fn dropped(&self) -> u64 {
        self.inner.pending().dropped()
    }

    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    /// Stop forwarding; buffered events stay queued
    pub fn detach(&self) {
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
    }
}

impl std::fmt::Debug for OutboundRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundRelay")
            .field("pending", &self.pending_len())
            .field("delivered", &self.delivered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_common::DriverMode;

    #[derive(Default)]
    struct MemorySink {
        connected: AtomicBool,
        received: Mutex<Vec<EngineEvent>>,
        /// Sends accepted before the sink drops offline again
        budget: Mutex<Option<usize>>,
    }

    impl EventSink for MemorySink {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn send(&self, event: &OutboundEvent) -> Result<(), SinkError> {
            if !self.is_connected() {
                return Err(SinkError::Disconnected);
            }
            if let Some(remaining) = self.budget.lock().unwrap().as_mut() {
                if *remaining == 0 {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(SinkError::Disconnected);
                }
                *remaining -= 1;
            }
            self.received.lock().unwrap().push(event.event.clone());
            Ok(())
        }
    }

    fn connected_sink() -> Arc<MemorySink> {
        let sink = Arc::new(MemorySink::default());
        sink.connected.store(true, Ordering::SeqCst);
        sink
    }

    #[test]
    fn test_forwards_outbound_only() {
        let bus = EventBus::new();
        let sink = connected_sink();
        let relay = OutboundRelay::attach(&bus, sink.clone(), 16);

        bus.publish(EngineEvent::PlaybackStarted);
        bus.publish(EngineEvent::TransportReady);
        bus.publish(EngineEvent::PerformanceUpdated { score: 90 });

        assert_eq!(*sink.received.lock().unwrap(), vec![EngineEvent::PlaybackStarted]);
        assert_eq!(relay.delivered(), 1);
    }

    #[test]
    fn test_buffers_while_disconnected_and_flushes_in_order() {
        let bus = EventBus::new();
        let sink = Arc::new(MemorySink::default());
        let relay = OutboundRelay::attach(&bus, sink.clone(), 16);

        bus.publish(EngineEvent::PlaybackStarted);
        bus.publish(EngineEvent::ModeChanged {
            mode: DriverMode::Light,
        });
        bus.publish(EngineEvent::PlaybackPaused);
        assert_eq!(relay.pending_len(), 3);
        assert!(sink.received.lock().unwrap().is_empty());

        sink.connected.store(true, Ordering::SeqCst);
        assert_eq!(relay.flush(), 3);
        assert_eq!(
            *sink.received.lock().unwrap(),
            vec![
                EngineEvent::PlaybackStarted,
                EngineEvent::ModeChanged {
                    mode: DriverMode::Light
                },
                EngineEvent::PlaybackPaused,
            ]
        );
        assert_eq!(relay.pending_len(), 0);
    }

    #[test]
    fn test_partial_flush_counts_delivered_events() {
        let bus = EventBus::new();
        let sink = Arc::new(MemorySink::default());
        let relay = OutboundRelay::attach(&bus, sink.clone(), 16);

        bus.publish(EngineEvent::PlaybackStarted);
        bus.publish(EngineEvent::PlaybackPaused);
        bus.publish(EngineEvent::PlaybackStopped);

        *sink.budget.lock().unwrap() = Some(2);
        sink.connected.store(true, Ordering::SeqCst);
        assert_eq!(relay.flush(), 2);
        assert_eq!(relay.delivered(), 2);
        assert_eq!(relay.pending_len(), 1);

        *sink.budget.lock().unwrap() = None;
        sink.connected.store(true, Ordering::SeqCst);
        assert_eq!(relay.flush(), 1);
        assert_eq!(relay.delivered(), 3);
        assert_eq!(
            *sink.received.lock().unwrap(),
            vec![
                EngineEvent::PlaybackStarted,
                EngineEvent::PlaybackPaused,
                EngineEvent::PlaybackStopped,
            ]
        );
    }

    #[test]
    fn test_new_event_waits_behind_backlog() {
        let bus = EventBus::new();
        let sink = Arc::new(MemorySink::default());
        let _relay = OutboundRelay::attach(&bus, sink.clone(), 16);

        bus.publish(EngineEvent::PlaybackStarted);
        sink.connected.store(true, Ordering::SeqCst);
        bus.publish(EngineEvent::PlaybackStopped);

        assert_eq!(
            *sink.received.lock().unwrap(),
            vec![EngineEvent::PlaybackStarted, EngineEvent::PlaybackStopped]
        );
    }

    #[test]
    fn test_duplicates_not_collapsed() {
        let bus = EventBus::new();
        let sink = Arc::new(MemorySink::default());
        let relay = OutboundRelay::attach(&bus, sink.clone(), 16);

        bus.publish(EngineEvent::BufferedUpdated { seconds: 4.0 });
        bus.publish(EngineEvent::BufferedUpdated { seconds: 4.0 });
        assert_eq!(relay.pending_len(), 2);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let bus = EventBus::new();
        let sink = Arc::new(MemorySink::default());
        let relay = OutboundRelay::attach(&bus, sink.clone(), 2);

        bus.publish(EngineEvent::PlaybackStarted);
        bus.publish(EngineEvent::PlaybackPaused);
        bus.publish(EngineEvent::PlaybackStopped);
        assert_eq!(relay.dropped(), 1);

        sink.connected.store(true, Ordering::SeqCst);
        relay.flush();
        assert_eq!(
            *sink.received.lock().unwrap(),
            vec![EngineEvent::PlaybackPaused, EngineEvent::PlaybackStopped]
        );
    }

    #[test]
    fn test_detach_stops_forwarding() {
        let bus = EventBus::new();
        let sink = connected_sink();
        let relay = OutboundRelay::attach(&bus, sink.clone(), 16);
        relay.detach();
        bus.publish(EngineEvent::PlaybackStarted);
        assert!(sink.received.lock().unwrap().is_empty());
    }

    #[test]
    fn test_json_lines_sink() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.send(&OutboundEvent::new(EngineEvent::DspStateChanged { enabled: true }))
            .unwrap();
        let output = String::from_utf8(sink.into_inner()).unwrap();
        let value: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(value["topic"], "dsp.state_changed");
        assert_eq!(value["event"]["type"], "dsp_state_changed");
        assert_eq!(value["event"]["enabled"], true);
    }
}
