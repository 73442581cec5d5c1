//! Unlock gate
//!
//! Obtains the platform audio resource, which may only start running in
//! response to a user gesture. `unlock()` always resolves: with the running
//! resource, with a created-but-refused resource, or with `None` when no
//! resource can be created at all (caller degrades to transport-only).
//!
//! Acquisition order:
//! 1. an existing running resource is returned immediately
//! 2. create (or reuse) and try an inline resume, bounded by the resume timeout
//! 3. register one-shot listeners for every interaction kind, resolve on the
//!    first that fires, remove all listeners, resume
//!
//! Concurrent callers share one pending acquisition.
//!
//! The [`ResourceSlot`] publishes the running resource exactly once per
//! resource instance for consumers that attach late.

use crate::platform::{
    ContextState, InteractionKind, InteractionSource, ResourceFactory, ResourceHandle, ResourceId,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

type PendingUnlock = Shared<BoxFuture<'static, Option<ResourceHandle>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ========================================
// Resource slot
// ========================================

/// Two-phase resource state: pending until a running resource is resolved
#[derive(Clone, Default)]
pub enum SlotState {
    #[default]
    Pending,
    Ready(ResourceHandle),
}

impl SlotState {
    pub fn resource(&self) -> Option<ResourceHandle> {
        match self {
            SlotState::Pending => None,
            SlotState::Ready(resource) => Some(resource.clone()),
        }
    }
}

impl std::fmt::Debug for SlotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotState::Pending => write!(f, "Pending"),
            SlotState::Ready(resource) => write!(f, "Ready({})", resource.id()),
        }
    }
}

/// Watch channel carrying the resolved resource
#[derive(Clone)]
pub struct ResourceSlot {
    tx: Arc<watch::Sender<SlotState>>,
}

impl ResourceSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SlotState::Pending);
        Self { tx: Arc::new(tx) }
    }

    /// Publish `resource`; returns false when that instance was already published
    pub fn resolve(&self, resource: &ResourceHandle) -> bool {
        let id = resource.id();
        self.tx.send_if_modified(|state| match state {
            SlotState::Ready(existing) if existing.id() == id => false,
            _ => {
                *state = SlotState::Ready(resource.clone());
                true
            }
        })
    }

    /// Return to pending (resource closed)
    pub fn clear(&self) {
        self.tx.send_if_modified(|state| {
            let changed = matches!(state, SlotState::Ready(_));
            *state = SlotState::Pending;
            changed
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<SlotState> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Option<ResourceHandle> {
        self.tx.borrow().resource()
    }

    /// Wait for a resolved resource
    pub async fn wait(&self) -> Option<ResourceHandle> {
        let mut rx = self.tx.subscribe();
        let state = rx
            .wait_for(|state| matches!(state, SlotState::Ready(_)))
            .await
            .ok()?;
        state.resource()
    }
}

impl Default for ResourceSlot {
    fn default() -> Self {
        Self::new()
    }
}

// ========================================
// Unlock gate
// ========================================

#[derive(Default)]
struct UnlockState {
    resource: Option<ResourceHandle>,
    pending: Option<PendingUnlock>,
}

struct UnlockInner {
    factory: Arc<dyn ResourceFactory>,
    interactions: Arc<dyn InteractionSource>,
    resume_timeout: Duration,
    state: Mutex<UnlockState>,
    slot: ResourceSlot,
}

/// Shared acquisition of the gesture-gated audio resource
#[derive(Clone)]
pub struct UnlockGate {
    inner: Arc<UnlockInner>,
}

impl UnlockGate {
    pub fn new(
        factory: Arc<dyn ResourceFactory>,
        interactions: Arc<dyn InteractionSource>,
        resume_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(UnlockInner {
                factory,
                interactions,
                resume_timeout,
                state: Mutex::new(UnlockState::default()),
                slot: ResourceSlot::new(),
            }),
        }
    }

    /// Obtain the audio resource; never errors
    pub async fn unlock(&self) -> Option<ResourceHandle> {
        let pending = {
            let mut state = lock(&self.inner.state);
            if let Some(resource) = &state.resource {
                if resource.state() == ContextState::Running {
                    return Some(resource.clone());
                }
            }
            match &state.pending {
                Some(pending) => {
                    debug!("Joining pending unlock");
                    pending.clone()
                }
                None => {
                    let pending = Self::acquire(Arc::clone(&self.inner)).boxed().shared();
                    state.pending = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    /// Current resource, running or not
    pub fn resource(&self) -> Option<ResourceHandle> {
        lock(&self.inner.state).resource.clone()
    }

    pub fn resource_id(&self) -> Option<ResourceId> {
        self.resource().map(|r| r.id())
    }

    /// Acquisition in progress
    pub fn is_pending(&self) -> bool {
        lock(&self.inner.state).pending.is_some()
    }

    pub fn slot(&self) -> &ResourceSlot {
        &self.inner.slot
    }

    /// Close and forget the resource
    pub async fn close(&self) {
        let resource = {
            let mut state = lock(&self.inner.state);
            state.pending = None;
            state.resource.take()
        };
        self.inner.slot.clear();
        if let Some(resource) = resource {
            info!("Closing audio resource {}", resource.id());
            resource.close().await;
        }
    }

    async fn acquire(inner: Arc<UnlockInner>) -> Option<ResourceHandle> {
        let resource = Self::existing_or_create(&inner);
        let result = match resource {
            Some(resource) => Some(Self::activate(&inner, resource).await),
            None => None,
        };
        lock(&inner.state).pending = None;
        result
    }

    fn existing_or_create(inner: &UnlockInner) -> Option<ResourceHandle> {
        let mut state = lock(&inner.state);
        if let Some(resource) = &state.resource {
            if resource.state() != ContextState::Closed {
                return Some(resource.clone());
            }
        }
        match inner.factory.create() {
            Ok(resource) => {
                info!("Created audio resource {}", resource.id());
                state.resource = Some(resource.clone());
                Some(resource)
            }
            Err(e) => {
                warn!("Audio resource unavailable, continuing without DSP: {}", e);
                state.resource = None;
                None
            }
        }
    }

    async fn activate(inner: &UnlockInner, resource: ResourceHandle) -> ResourceHandle {
        if Self::try_resume(inner, &resource).await {
            inner.slot.resolve(&resource);
            return resource;
        }

        debug!("Inline resume refused, waiting for user interaction");
        let gesture = Self::wait_for_interaction(inner.interactions.as_ref()).await;
        match gesture {
            Some(kind) => debug!("Unlocking on {:?}", kind),
            None => warn!("Interaction source dropped its listeners"),
        }

        if Self::try_resume(inner, &resource).await {
            info!("Audio resource {} unlocked", resource.id());
            inner.slot.resolve(&resource);
        } else {
            warn!(
                "Audio resource {} still {} after interaction",
                resource.id(),
                resource.state()
            );
        }
        resource
    }

    async fn try_resume(inner: &UnlockInner, resource: &ResourceHandle) -> bool {
        if resource.state() == ContextState::Running {
            return true;
        }
        match tokio::time::timeout(inner.resume_timeout, resource.resume()).await {
            Ok(Ok(())) => resource.state() == ContextState::Running,
            Ok(Err(e)) => {
                debug!("Resume refused: {}", e);
                false
            }
            Err(_) => {
                warn!("Resume timed out after {:?}", inner.resume_timeout);
                false
            }
        }
    }

    /// One-shot listeners on every interaction kind; first signal wins
    async fn wait_for_interaction(source: &dyn InteractionSource) -> Option<InteractionKind> {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));

        let ids: Vec<_> = InteractionKind::ALL
            .iter()
            .map(|kind| {
                let tx = Arc::clone(&tx);
                source.add_listener(
                    *kind,
                    Arc::new(move |fired| {
                        if let Some(tx) = lock(&tx).take() {
                            let _ = tx.send(fired);
                        }
                    }),
                )
            })
            .collect();

        let fired = rx.await.ok();
        for id in ids {
            source.remove_listener(id);
        }
        fired
    }
}

impl std::fmt::Debug for UnlockGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockGate")
            .field("resource", &self.resource_id())
            .field("pending", &self.is_pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimPlatform;

    fn gate(platform: &SimPlatform) -> UnlockGate {
        UnlockGate::new(
            platform.factory.clone(),
            platform.interactions.clone(),
            Duration::from_millis(500),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_inline_unlock_when_activated() {
        let platform = SimPlatform::activated();
        let gate = gate(&platform);

        let resource = gate.unlock().await.unwrap();
        assert_eq!(resource.state(), ContextState::Running);
        assert_eq!(platform.interactions.listener_count(), 0);
        assert_eq!(gate.slot().current().map(|r| r.id()), Some(resource.id()));

        let again = gate.unlock().await.unwrap();
        assert_eq!(again.id(), resource.id());
        assert_eq!(platform.factory.created_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_interaction() {
        let platform = SimPlatform::new();
        let gate = gate(&platform);

        let pending = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.unlock().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(gate.is_pending());
        assert_eq!(
            platform.interactions.listener_count(),
            InteractionKind::ALL.len()
        );
        assert!(gate.slot().current().is_none());

        platform.interactions.fire(InteractionKind::TouchEnd);
        let resource = pending.await.unwrap().unwrap();

        assert_eq!(resource.state(), ContextState::Running);
        assert_eq!(platform.interactions.listener_count(), 0);
        assert!(!gate.is_pending());
        assert!(gate.slot().current().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_listeners() {
        let platform = SimPlatform::new();
        let gate = gate(&platform);

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.unlock().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            platform.interactions.listener_count(),
            InteractionKind::ALL.len()
        );

        platform.interactions.fire(InteractionKind::KeyDown);
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(platform.factory.created_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_creation_failure_resolves_none() {
        let platform = SimPlatform::activated();
        platform.factory.set_fail(true);
        let gate = gate(&platform);
        assert!(gate.unlock().await.is_none());
        assert!(!gate.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_resolves_once_per_instance() {
        let platform = SimPlatform::activated();
        let slot = ResourceSlot::new();
        let mut rx = slot.subscribe();
        let first = platform.factory.create().unwrap();

        assert!(slot.resolve(&first));
        assert!(!slot.resolve(&first));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        let second = platform.factory.create().unwrap();
        assert!(slot.resolve(&second));
        assert_eq!(slot.wait().await.map(|r| r.id()), Some(second.id()));

        slot.clear();
        assert!(slot.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_allows_fresh_resource() {
        let platform = SimPlatform::activated();
        let gate = gate(&platform);
        let first = gate.unlock().await.unwrap();
        gate.close().await;
        assert_eq!(first.state(), ContextState::Closed);

        let second = gate.unlock().await.unwrap();
        assert_ne!(first.id(), second.id());
    }
}
