//! Transport
//!
//! Wraps one media playback primitive and republishes its lifecycle on the
//! event bus. Every `load` starts a new generation; async completions compare
//! against the current generation instead of using cancellation tokens.

use crate::platform::{
    AccessMode, LoadRequest, MediaElement, MediaSignal, PlatformError, ReadyState, TimeRange,
};
use cadence_common::{EngineEvent, EventBus};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Query parameter carrying the cache-busting discriminator
pub const CACHE_BUST_PARAM: &str = "cadence_cb";

/// Result of a load request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The primitive can furnish forthcoming samples
    Ready,
    /// Hard timeout elapsed first; the caller proceeds degraded
    TimedOut,
    /// A newer load started while waiting
    Superseded,
}

struct TransportInner {
    element: Arc<dyn MediaElement>,
    bus: EventBus,
    load_timeout: Duration,
    generation: AtomicU64,
    /// Generation whose end-of-track was already published
    ended_generation: AtomicU64,
    playing: AtomicBool,
    looping: AtomicBool,
    ready: Notify,
}

impl TransportInner {
    fn on_signal(&self, signal: MediaSignal) {
        match signal {
            MediaSignal::Playing => {
                self.playing.store(true, Ordering::SeqCst);
                self.bus.publish(EngineEvent::PlaybackStarted);
            }
            MediaSignal::Pause => {
                self.playing.store(false, Ordering::SeqCst);
                self.bus.publish(EngineEvent::PlaybackPaused);
            }
            MediaSignal::Ended => {
                self.publish_end(false);
            }
            MediaSignal::CanPlay => {
                self.ready.notify_waiters();
                self.bus.publish(EngineEvent::TransportReady);
            }
            MediaSignal::LoadedMetadata | MediaSignal::CanPlayThrough => {
                self.ready.notify_waiters();
            }
            MediaSignal::Waiting => {
                self.bus.publish(EngineEvent::TransportStalled);
            }
            MediaSignal::DurationChange(seconds) => {
                if seconds.is_finite() {
                    self.bus.publish(EngineEvent::DurationChanged { seconds });
                }
            }
            MediaSignal::Progress => {}
            MediaSignal::Error(error) => {
                warn!("Media error: {}", error);
                self.ready.notify_waiters();
                self.bus.publish(EngineEvent::DriverError {
                    context: "transport".to_string(),
                    error,
                });
            }
        }
    }

    /// Publish `playback.ended` unless this generation already did
    fn publish_end(&self, synthesized: bool) -> bool {
        let generation = self.generation.load(Ordering::SeqCst);
        if self.ended_generation.swap(generation, Ordering::SeqCst) == generation {
            debug!(
                "End of track already published for load {}, ignoring {}",
                generation,
                if synthesized { "watchdog" } else { "signal" }
            );
            return false;
        }
        self.playing.store(false, Ordering::SeqCst);
        if synthesized {
            info!("Synthesizing end of track for load {}", generation);
        }
        self.bus.publish(EngineEvent::PlaybackEnded { synthesized });
        true
    }
}

/// Handle to the media transport (cheap to clone)
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl Transport {
    /// Wrap `element` and start forwarding its signals to `bus`
    pub fn new(element: Arc<dyn MediaElement>, bus: EventBus, load_timeout: Duration) -> Self {
        let inner = Arc::new(TransportInner {
            element,
            bus,
            load_timeout,
            generation: AtomicU64::new(0),
            ended_generation: AtomicU64::new(0),
            playing: AtomicBool::new(false),
            looping: AtomicBool::new(false),
            ready: Notify::new(),
        });

        let weak: Weak<TransportInner> = Arc::downgrade(&inner);
        inner
            .element
            .set_signal_listener(Some(Arc::new(move |signal| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_signal(signal);
                }
            })));

        Self { inner }
    }

    /// Load `uri`, resolving once the primitive can play it
    ///
    /// Never hangs: resolves `TimedOut` after the load timeout. Cross-origin
    /// loads always carry a fresh cache-busting discriminator.
    pub async fn load(&self, uri: &str, access: AccessMode) -> LoadOutcome {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.playing.store(false, Ordering::SeqCst);
        // Wake waiters of the previous load so they observe the new generation
        self.inner.ready.notify_waiters();

        let uri = match access {
            AccessMode::CrossOrigin => with_cache_buster(uri),
            AccessMode::Opaque => uri.to_string(),
        };
        info!("Loading {} (load {})", uri, generation);
        self.inner.element.load(&LoadRequest { uri, access });

        let inner = &self.inner;
        let wait = async {
            loop {
                let notified = inner.ready.notified();
                if inner.generation.load(Ordering::SeqCst) != generation {
                    return LoadOutcome::Superseded;
                }
                if inner.element.ready_state() >= ReadyState::CAN_PLAY {
                    return LoadOutcome::Ready;
                }
                notified.await;
            }
        };

        match tokio::time::timeout(inner.load_timeout, wait).await {
            Ok(outcome) => {
                debug!("Load {} settled: {:?}", generation, outcome);
                outcome
            }
            Err(_) if !self.is_current(generation) => LoadOutcome::Superseded,
            Err(_) => {
                warn!(
                    "Load {} not ready after {:?}, proceeding anyway",
                    generation, inner.load_timeout
                );
                LoadOutcome::TimedOut
            }
        }
    }

    /// Start playback on the primitive
    pub async fn play(&self) -> Result<(), PlatformError> {
        let generation = self.generation();
        // A replay after the end re-arms the end-of-track publication
        let _ = self.inner.ended_generation.compare_exchange(
            generation,
            0,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.inner.element.play().await?;
        self.inner.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn pause(&self) {
        self.inner.element.pause();
        self.inner.playing.store(false, Ordering::SeqCst);
    }

    pub fn seek(&self, seconds: f64) {
        if !seconds.is_finite() {
            warn!("Ignoring seek to {}", seconds);
            return;
        }
        self.inner.element.seek(seconds.max(0.0));
    }

    /// Pause and rewind to the start
    pub fn stop(&self) {
        self.inner.element.pause();
        self.inner.element.seek(0.0);
        self.inner.playing.store(false, Ordering::SeqCst);
        self.inner.bus.publish(EngineEvent::PlaybackStopped);
    }

    pub fn set_volume(&self, volume: f64) {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.inner.element.set_volume(volume);
    }

    pub fn set_loop(&self, looping: bool) {
        self.inner.element.set_loop(looping);
        self.inner.looping.store(looping, Ordering::SeqCst);
    }

    pub fn is_looping(&self) -> bool {
        self.inner.looping.load(Ordering::SeqCst)
    }

    pub fn set_rate(&self, rate: f64) {
        if !rate.is_finite() || rate <= 0.0 {
            warn!("Ignoring playback rate {}", rate);
            return;
        }
        self.inner.element.set_rate(rate);
    }

    pub fn set_preserve_pitch(&self, preserve: bool) {
        self.inner.element.set_preserve_pitch(preserve);
    }

    /// Publish `playback.ended { synthesized: true }` at most once per load
    pub fn synthesize_end(&self) -> bool {
        self.inner.publish_end(true)
    }

    /// End of track already published for the current load
    pub fn end_published(&self) -> bool {
        let generation = self.generation();
        generation != 0 && self.inner.ended_generation.load(Ordering::SeqCst) == generation
    }

    /// Nominally playing (play accepted, no pause or end since)
    pub fn is_playing(&self) -> bool {
        self.inner.playing.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    pub fn current_time(&self) -> f64 {
        self.inner.element.current_time()
    }

    pub fn duration(&self) -> Option<f64> {
        self.inner.element.duration()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.element.ready_state()
    }

    pub fn buffered(&self) -> Vec<TimeRange> {
        self.inner.element.buffered()
    }

    /// Underlying primitive, for binding into an audio resource
    pub fn element(&self) -> &Arc<dyn MediaElement> {
        &self.inner.element
    }

    /// Stop forwarding signals
    pub fn dispose(&self) {
        self.inner.element.set_signal_listener(None);
        self.inner.playing.store(false, Ordering::SeqCst);
        self.inner.ready.notify_waiters();
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("generation", &self.generation())
            .field("playing", &self.is_playing())
            .finish()
    }
}

/// Append a fresh discriminator so no cached negotiation is reused
pub fn with_cache_buster(uri: &str) -> String {
    let separator = if uri.contains('?') { '&' } else { '?' };
    format!(
        "{}{}{}={}",
        uri,
        separator,
        CACHE_BUST_PARAM,
        Uuid::new_v4().simple()
    )
}
