//! Routing manager
//!
//! Binds the transport's output into an audio resource, at most once per
//! resource instance. Preconditions are checked before the binding is
//! created, each with its own error:
//!
//! - the resource must be running ([`Error::ResourceNotRunning`])
//! - the transport must be decode-ready ([`Error::TransportNotReady`])
//!
//! A second attach against the same resource returns the existing source
//! node; a different resource is rejected with [`Error::ForeignResource`].
//! Bindings cannot migrate; `release` and attach again.

use crate::error::{Error, Result};
use crate::platform::{ContextState, NodeHandle, NodeId, ResourceHandle, ResourceId};
use crate::transport::Transport;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

struct Binding {
    resource: ResourceHandle,
    source: NodeHandle,
    connected_to: Option<NodeId>,
}

/// Singleton transport-to-resource binding
#[derive(Default)]
pub struct RoutingManager {
    binding: Mutex<Option<Binding>>,
}

impl RoutingManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn binding(&self) -> MutexGuard<'_, Option<Binding>> {
        self.binding
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create (or return) the source node for `transport` in `resource`
    pub fn attach(&self, resource: &ResourceHandle, transport: &Transport) -> Result<NodeHandle> {
        let mut binding = self.binding();
        if let Some(existing) = binding.as_ref() {
            if existing.resource.id() == resource.id() {
                warn!(
                    "Transport already routed into resource {}, reusing binding",
                    resource.id()
                );
                return Ok(existing.source.clone());
            }
            warn!(
                "Refusing to route into {}: bound to {}",
                resource.id(),
                existing.resource.id()
            );
            return Err(Error::ForeignResource {
                bound: existing.resource.id(),
                requested: resource.id(),
            });
        }

        let state = resource.state();
        if state != ContextState::Running {
            warn!("Cannot route into resource {}: {}", resource.id(), state);
            return Err(Error::ResourceNotRunning(state));
        }
        let ready = transport.ready_state();
        if !ready.is_decode_ready() {
            warn!("Cannot route transport before decode readiness ({:?})", ready);
            return Err(Error::TransportNotReady(ready));
        }

        let source = resource.create_media_source(transport.element().as_ref())?;
        info!("Transport routed into resource {}", resource.id());
        *binding = Some(Binding {
            resource: resource.clone(),
            source: source.clone(),
            connected_to: None,
        });
        Ok(source)
    }

    /// Point the source node at `destination`, replacing any previous target
    pub fn connect(&self, destination: &NodeHandle) -> Result<()> {
        let mut binding = self.binding();
        let binding = binding.as_mut().ok_or(Error::NotAttached)?;
        let _ = binding.source.disconnect();
        binding.source.connect(destination)?;
        binding.connected_to = Some(destination.id());
        debug!("Routing source connected to {}", destination.label());
        Ok(())
    }

    /// Disconnect the source node, keeping the binding
    pub fn disconnect(&self) {
        if let Some(binding) = self.binding().as_mut() {
            let _ = binding.source.disconnect();
            binding.connected_to = None;
        }
    }

    /// Bound and the resource is running
    pub fn is_healthy(&self) -> bool {
        self.binding()
            .as_ref()
            .map(|b| b.resource.state() == ContextState::Running)
            .unwrap_or(false)
    }

    pub fn is_bound(&self) -> bool {
        self.binding().is_some()
    }

    pub fn bound_resource(&self) -> Option<ResourceHandle> {
        self.binding().as_ref().map(|b| b.resource.clone())
    }

    pub fn bound_resource_id(&self) -> Option<ResourceId> {
        self.binding().as_ref().map(|b| b.resource.id())
    }

    /// Node the source currently feeds
    pub fn connected_to(&self) -> Option<NodeId> {
        self.binding().as_ref().and_then(|b| b.connected_to)
    }

    /// Drop the binding (resource replaced or closed)
    pub fn release(&self) {
        if let Some(binding) = self.binding().take() {
            let _ = binding.source.disconnect();
            info!("Released routing binding for resource {}", binding.resource.id());
        }
    }
}

impl std::fmt::Debug for RoutingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingManager")
            .field("resource", &self.bound_resource_id())
            .field("connected_to", &self.connected_to())
            .finish()
    }
}
