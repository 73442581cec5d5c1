//! Processing graph
//!
//! Ordered chain of effect nodes between a fixed input gain and a fixed
//! master gain. Every mutation relinks the whole chain:
//!
//! 1. disconnect the input and master endpoints (errors swallowed)
//! 2. disconnect only the output side of every member node
//! 3. relink `input -> n0 -> ... -> nN -> master -> destination`
//!
//! Member inputs are never disconnected: a node's input feeds its own
//! internal sub-chain.
//!
//! The graph is owned by exactly one caller (the playback manager) and is
//! recreated, not reset, when the audio resource is replaced.

use crate::error::{Error, Result};
use crate::platform::{NodeHandle, ProcessorKind, ResourceHandle, ResourceId};
use std::collections::BTreeMap;
use tracing::{debug, info, trace, warn};

/// Per-node parameter set applied by presets
pub type NodeParams = BTreeMap<String, f32>;

/// Label of the fixed input endpoint
pub const INPUT_LABEL: &str = "graph-input";

/// Label of the fixed master endpoint
pub const MASTER_LABEL: &str = "graph-master";

/// Stable identity of a node within one graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub u64);

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Uniform contract for effect plug-ins
///
/// `input` and `output` are `None` until `init` succeeds and after `dispose`.
pub trait EffectNode: Send {
    fn name(&self) -> &str;

    /// Build platform nodes and wire the internal sub-chain
    fn init(&mut self, resource: &ResourceHandle) -> Result<()>;

    fn input(&self) -> Option<NodeHandle>;
    fn output(&self) -> Option<NodeHandle>;

    fn set_param(&mut self, name: &str, value: f32) -> Result<()>;

    /// Heavy nodes are bypassed by the reduced profile
    fn is_heavy(&self) -> bool {
        false
    }

    /// Release platform nodes; must be idempotent
    fn dispose(&mut self);
}

struct GraphEntry {
    key: NodeKey,
    node: Box<dyn EffectNode>,
}

struct Endpoints {
    resource: ResourceHandle,
    input: NodeHandle,
    master: NodeHandle,
}

/// Chain of effect nodes between input and master gain
pub struct ProcessingGraph {
    endpoints: Option<Endpoints>,
    nodes: Vec<GraphEntry>,
    next_key: u64,
    reduced: bool,
    master_volume: f32,
}

impl ProcessingGraph {
    pub fn new() -> Self {
        Self {
            endpoints: None,
            nodes: Vec::new(),
            next_key: 0,
            reduced: false,
            master_volume: 1.0,
        }
    }

    /// Create the fixed endpoints against `resource`
    ///
    /// Re-initializing against the same resource is a no-op; a different
    /// resource tears the existing graph down first.
    pub fn init(&mut self, resource: &ResourceHandle) -> Result<()> {
        if let Some(endpoints) = &self.endpoints {
            if endpoints.resource.id() == resource.id() {
                return Ok(());
            }
            info!("Processing graph moving to resource {}", resource.id());
            self.dispose();
        }

        let input = resource.create_processor(ProcessorKind::Gain, INPUT_LABEL)?;
        let master = resource.create_processor(ProcessorKind::Gain, MASTER_LABEL)?;
        master.set_param("gain", self.master_volume)?;

        self.endpoints = Some(Endpoints {
            resource: resource.clone(),
            input,
            master,
        });
        self.rebuild();
        debug!("Processing graph initialized on resource {}", resource.id());
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.endpoints.is_some()
    }

    /// Resource the graph is built on
    pub fn resource_id(&self) -> Option<ResourceId> {
        self.endpoints.as_ref().map(|e| e.resource.id())
    }

    /// Fixed input endpoint
    pub fn get_input(&self) -> Result<NodeHandle> {
        self.endpoints
            .as_ref()
            .map(|e| e.input.clone())
            .ok_or(Error::GraphNotInitialized)
    }

    /// Initialize `node` and append it to the chain
    pub fn push_node(&mut self, mut node: Box<dyn EffectNode>) -> Result<NodeKey> {
        let resource = self
            .endpoints
            .as_ref()
            .map(|e| e.resource.clone())
            .ok_or(Error::GraphNotInitialized)?;
        node.init(&resource)?;

        self.next_key += 1;
        let key = NodeKey(self.next_key);
        debug!("Pushing {} ({}) onto processing graph", node.name(), key);
        self.nodes.push(GraphEntry { key, node });
        self.rebuild();
        Ok(key)
    }

    /// Dispose the node and relink the chain without it
    pub fn remove_node(&mut self, key: NodeKey) -> Result<()> {
        let index = self
            .nodes
            .iter()
            .position(|e| e.key == key)
            .ok_or(Error::NodeNotFound(key.0))?;
        let mut entry = self.nodes.remove(index);
        entry.node.dispose();
        debug!("Removed {} ({}) from processing graph", entry.node.name(), key);
        self.rebuild();
        Ok(())
    }

    /// Set master gain; clamped to [0, 1]
    pub fn set_master_volume(&mut self, volume: f32) {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.master_volume = volume;
        if let Some(endpoints) = &self.endpoints {
            if let Err(e) = endpoints.master.set_param("gain", volume) {
                warn!("Failed to set master volume: {}", e);
            }
        }
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    /// Dispose every member node, leaving `input -> master -> destination`
    pub fn reset(&mut self) {
        for entry in &mut self.nodes {
            entry.node.dispose();
        }
        self.nodes.clear();
        self.rebuild();
    }

    /// Apply per-node parameter sets in chain order without relinking
    ///
    /// `params[i]` goes to the i-th node; extra sets are ignored. Returns the
    /// number of parameters accepted.
    pub fn apply_preset(&mut self, params: &[NodeParams]) -> usize {
        let mut applied = 0;
        for (entry, set) in self.nodes.iter_mut().zip(params) {
            for (name, value) in set {
                match entry.node.set_param(name, *value) {
                    Ok(()) => applied += 1,
                    Err(e) => warn!("Preset parameter {} rejected by {}: {}", name, entry.node.name(), e),
                }
            }
        }
        if params.len() > self.nodes.len() {
            debug!(
                "Preset has {} parameter sets for {} nodes",
                params.len(),
                self.nodes.len()
            );
        }
        applied
    }

    /// Bypass heavy nodes (reduced profile) or restore them
    pub fn set_reduced(&mut self, reduced: bool) {
        if self.reduced == reduced {
            return;
        }
        self.reduced = reduced;
        info!(
            "Processing graph profile: {}",
            if reduced { "reduced" } else { "full" }
        );
        self.rebuild();
    }

    pub fn is_reduced(&self) -> bool {
        self.reduced
    }

    /// Tear down every node and endpoint
    pub fn dispose(&mut self) {
        for entry in &mut self.nodes {
            entry.node.dispose();
        }
        self.nodes.clear();
        if let Some(endpoints) = self.endpoints.take() {
            let _ = endpoints.input.disconnect();
            let _ = endpoints.master.disconnect();
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn keys(&self) -> Vec<NodeKey> {
        self.nodes.iter().map(|e| e.key).collect()
    }

    /// Labels along the active chain, endpoints included
    pub fn chain_labels(&self) -> Vec<String> {
        if self.endpoints.is_none() {
            return Vec::new();
        }
        let mut labels = vec![INPUT_LABEL.to_string()];
        labels.extend(self.active().map(|e| e.node.name().to_string()));
        labels.push(MASTER_LABEL.to_string());
        labels
    }

    fn active(&self) -> impl Iterator<Item = &GraphEntry> {
        let reduced = self.reduced;
        self.nodes
            .iter()
            .filter(move |e| !(reduced && e.node.is_heavy()))
    }

    fn rebuild(&self) {
        let Some(endpoints) = &self.endpoints else {
            return;
        };

        // Already-unconnected endpoints are expected here
        if let Err(e) = endpoints.input.disconnect() {
            trace!("Input disconnect: {}", e);
        }
        if let Err(e) = endpoints.master.disconnect() {
            trace!("Master disconnect: {}", e);
        }
        for entry in &self.nodes {
            if let Some(output) = entry.node.output() {
                let _ = output.disconnect();
            }
        }

        let mut tail = endpoints.input.clone();
        for entry in self.active() {
            match (entry.node.input(), entry.node.output()) {
                (Some(input), Some(output)) => {
                    if let Err(e) = tail.connect(&input) {
                        warn!("Failed to link into {}: {}", entry.node.name(), e);
                        continue;
                    }
                    tail = output;
                }
                _ => warn!("Skipping uninitialized node {}", entry.node.name()),
            }
        }
        if let Err(e) = tail.connect(&endpoints.master) {
            warn!("Failed to link chain into master: {}", e);
        }
        if let Err(e) = endpoints.master.connect(&endpoints.resource.destination()) {
            warn!("Failed to link master to destination: {}", e);
        }
        trace!("Processing graph rebuilt: {:?}", self.chain_labels());
    }
}

impl Default for ProcessingGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessingGraph {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ProcessingGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingGraph")
            .field("chain", &self.chain_labels())
            .field("reduced", &self.reduced)
            .field("master_volume", &self.master_volume)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{EqualizerNode, GainStage, ReverbNode};
    use crate::platform::ResourceFactory;
    use crate::sim::SimPlatform;

    fn graph_on(platform: &SimPlatform) -> (ProcessingGraph, ResourceHandle) {
        let resource = platform.factory.create().unwrap();
        let mut graph = ProcessingGraph::new();
        graph.init(&resource).unwrap();
        (graph, resource)
    }

    fn path(platform: &SimPlatform, graph: &ProcessingGraph) -> Vec<String> {
        platform.patch_bay.path_from(graph.get_input().unwrap().id())
    }

    #[test]
    fn test_empty_graph_links_input_to_destination() {
        let platform = SimPlatform::activated();
        let (graph, _resource) = graph_on(&platform);
        assert_eq!(
            path(&platform, &graph),
            vec![INPUT_LABEL, MASTER_LABEL, "destination"]
        );
    }

    #[test]
    fn test_push_before_init_fails() {
        let mut graph = ProcessingGraph::new();
        let result = graph.push_node(Box::new(GainStage::new("g", 1.0)));
        assert!(matches!(result, Err(Error::GraphNotInitialized)));
        assert!(matches!(graph.get_input(), Err(Error::GraphNotInitialized)));
    }

    #[test]
    fn test_chain_follows_list_order() {
        let platform = SimPlatform::activated();
        let (mut graph, _resource) = graph_on(&platform);
        graph.push_node(Box::new(GainStage::new("pre", 0.8))).unwrap();
        graph.push_node(Box::new(EqualizerNode::default())).unwrap();
        graph.push_node(Box::new(GainStage::new("post", 1.0))).unwrap();

        let labels = path(&platform, &graph);
        assert_eq!(labels.first().map(String::as_str), Some(INPUT_LABEL));
        assert_eq!(labels.last().map(String::as_str), Some("destination"));
        let pre = labels.iter().position(|l| l == "pre").unwrap();
        let eq = labels.iter().position(|l| l.starts_with("eq-")).unwrap();
        let post = labels.iter().position(|l| l == "post").unwrap();
        assert!(pre < eq && eq < post);
    }

    #[test]
    fn test_removed_node_never_relinked() {
        let platform = SimPlatform::activated();
        let (mut graph, _resource) = graph_on(&platform);
        let a = graph.push_node(Box::new(GainStage::new("a", 1.0))).unwrap();
        let b = graph.push_node(Box::new(GainStage::new("b", 1.0))).unwrap();
        graph.remove_node(a).unwrap();

        assert_eq!(
            path(&platform, &graph),
            vec![INPUT_LABEL, "b", MASTER_LABEL, "destination"]
        );
        let a_id = platform.patch_bay.find("a")[0];
        assert!(platform.patch_bay.inputs(a_id).is_empty());
        assert!(platform.patch_bay.outputs(a_id).is_empty());

        graph.remove_node(b).unwrap();
        assert!(matches!(graph.remove_node(b), Err(Error::NodeNotFound(_))));
    }

    #[test]
    fn test_internal_subchain_survives_rebuild() {
        let platform = SimPlatform::activated();
        let (mut graph, _resource) = graph_on(&platform);
        graph.push_node(Box::new(ReverbNode::default())).unwrap();
        graph.push_node(Box::new(GainStage::new("tail", 1.0))).unwrap();
        graph.push_node(Box::new(GainStage::new("extra", 1.0))).unwrap();

        let convolver = platform.patch_bay.find("reverb-convolver")[0];
        assert_eq!(platform.patch_bay.outputs(convolver).len(), 1);
        let reverb_in = platform.patch_bay.find("reverb-in")[0];
        assert_eq!(platform.patch_bay.outputs(reverb_in).len(), 2);
    }

    #[test]
    fn test_reduced_profile_bypasses_heavy_nodes() {
        let platform = SimPlatform::activated();
        let (mut graph, _resource) = graph_on(&platform);
        graph.push_node(Box::new(GainStage::new("g", 1.0))).unwrap();
        graph.push_node(Box::new(ReverbNode::default())).unwrap();

        graph.set_reduced(true);
        assert_eq!(
            graph.chain_labels(),
            vec![INPUT_LABEL, "g", MASTER_LABEL]
        );
        assert_eq!(
            path(&platform, &graph),
            vec![INPUT_LABEL, "g", MASTER_LABEL, "destination"]
        );

        graph.set_reduced(false);
        assert_eq!(graph.chain_labels().len(), 4);
    }

    #[test]
    fn test_master_volume_clamped() {
        let platform = SimPlatform::activated();
        let (mut graph, _resource) = graph_on(&platform);
        graph.set_master_volume(1.7);
        assert_eq!(graph.master_volume(), 1.0);
        graph.set_master_volume(-0.2);
        assert_eq!(graph.master_volume(), 0.0);

        let master = platform.patch_bay.find(MASTER_LABEL)[0];
        assert_eq!(platform.patch_bay.param(master, "gain"), Some(0.0));
    }

    #[test]
    fn test_apply_preset_keeps_topology() {
        let platform = SimPlatform::activated();
        let (mut graph, _resource) = graph_on(&platform);
        graph.push_node(Box::new(GainStage::new("g", 1.0))).unwrap();
        let edges = platform.patch_bay.edge_count();

        let mut params = NodeParams::new();
        params.insert("gain".to_string(), 0.3);
        params.insert("bogus".to_string(), 1.0);
        assert_eq!(graph.apply_preset(&[params]), 1);
        assert_eq!(platform.patch_bay.edge_count(), edges);

        let g = platform.patch_bay.find("g")[0];
        assert_eq!(platform.patch_bay.param(g, "gain"), Some(0.3));
    }

    #[test]
    fn test_reset_and_dispose() {
        let platform = SimPlatform::activated();
        let (mut graph, _resource) = graph_on(&platform);
        graph.push_node(Box::new(EqualizerNode::default())).unwrap();
        graph.reset();
        assert!(graph.is_empty());
        assert_eq!(
            path(&platform, &graph),
            vec![INPUT_LABEL, MASTER_LABEL, "destination"]
        );

        graph.dispose();
        assert!(!graph.is_initialized());
        assert!(graph.chain_labels().is_empty());
        assert_eq!(platform.patch_bay.edge_count(), 0);
    }

    #[test]
    fn test_init_on_new_resource_recreates_endpoints() {
        let platform = SimPlatform::activated();
        let (mut graph, first) = graph_on(&platform);
        let old_input = graph.get_input().unwrap().id();
        graph.init(&first).unwrap();
        assert_eq!(graph.get_input().unwrap().id(), old_input);

        let second = platform.factory.create().unwrap();
        graph.init(&second).unwrap();
        assert_ne!(graph.get_input().unwrap().id(), old_input);
        assert_eq!(graph.resource_id(), Some(second.id()));
    }
}
