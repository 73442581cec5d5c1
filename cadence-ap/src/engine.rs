//! Engine composition root
//!
//! Builds the bus, lifecycle manager, driver and playback manager from the
//! injected platform ports, and forwards every resource resolved by the
//! unlock gate to [`LifecycleManager::inject_context`].

use crate::config::EngineSettings;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::lifecycle::LifecycleManager;
use crate::manager::PlaybackManager;
use crate::platform::Platform;
use crate::presets::{PresetCatalog, PresetStore};
use crate::unlock::ResourceSlot;
use cadence_common::{EventBus, ResourceLifecycleState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};

pub struct Engine {
    platform: Platform,
    settings: EngineSettings,
    catalog: PresetCatalog,
    store: Arc<dyn PresetStore>,
    bus: EventBus,
    lifecycle: Arc<LifecycleManager>,
    manager: Mutex<Option<Arc<PlaybackManager>>>,
    watcher_generation: Arc<AtomicU64>,
}

impl Engine {
    pub fn new(
        platform: Platform,
        settings: EngineSettings,
        catalog: PresetCatalog,
        store: Arc<dyn PresetStore>,
    ) -> Self {
        let bus = EventBus::new();
        let lifecycle = LifecycleManager::new(bus.clone(), &settings);
        Self {
            platform,
            settings,
            catalog,
            store,
            bus,
            lifecycle,
            manager: Mutex::new(None),
            watcher_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn manager_slot(&self) -> MutexGuard<'_, Option<Arc<PlaybackManager>>> {
        self.manager.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Initialize the lifecycle and build a fresh driver and playback manager
    pub fn init(&self) -> Result<Arc<PlaybackManager>> {
        let player = self.lifecycle.init()?;
        let driver = Driver::new(&self.platform, self.bus.clone(), &self.settings);
        let manager = PlaybackManager::new(
            Arc::clone(&driver),
            player,
            &self.settings,
            self.catalog.clone(),
            Arc::clone(&self.store),
        );
        self.lifecycle.bind_playback(Arc::clone(&manager));
        self.watch_resource_slot(driver.resource_slot());
        *self.manager_slot() = Some(Arc::clone(&manager));
        info!(
            "Engine initialized (dsp: {}, heartbeat: {:?})",
            self.settings.dsp_enabled,
            self.settings.heartbeat()
        );
        Ok(manager)
    }

    fn watch_resource_slot(&self, slot: &ResourceSlot) {
        let generation = self.watcher_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let watcher_generation = Arc::clone(&self.watcher_generation);
        let lifecycle: Weak<LifecycleManager> = Arc::downgrade(&self.lifecycle);
        let mut rx = slot.subscribe();

        tokio::spawn(async move {
            loop {
                if watcher_generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                let resource = rx.borrow_and_update().resource();
                if let Some(resource) = resource {
                    let Some(lifecycle) = lifecycle.upgrade() else {
                        return;
                    };
                    if let Err(e) = lifecycle.inject_context(resource) {
                        warn!("Resolved resource not injected: {}", e);
                    }
                }
                if rx.changed().await.is_err() {
                    debug!("Resource slot closed");
                    return;
                }
            }
        });
    }

    /// Current playback manager (None before `init` and after `destroy`)
    pub fn manager(&self) -> Result<Arc<PlaybackManager>> {
        self.manager_slot().clone().ok_or(Error::Destroyed)
    }

    pub async fn suspend(&self) -> Result<()> {
        self.lifecycle.suspend().await
    }

    pub async fn resume(&self) -> Result<()> {
        self.lifecycle.resume().await
    }

    /// Tear everything down; `init` may be called again afterwards
    pub async fn destroy(&self) -> Result<()> {
        self.watcher_generation.fetch_add(1, Ordering::SeqCst);
        self.lifecycle.destroy().await?;
        *self.manager_slot() = None;
        info!("Engine destroyed");
        Ok(())
    }

    pub fn state(&self) -> ResourceLifecycleState {
        self.lifecycle.state()
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state())
            .field("bus", &self.bus)
            .finish()
    }
}
