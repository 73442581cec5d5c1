//! Reference effect nodes
//!
//! Parameterizable plug-ins behind [`EffectNode`]. The signal math lives in
//! the platform processors; these types only build and wire them.

use crate::error::{Error, Result};
use crate::graph::EffectNode;
use crate::platform::{FilterKind, NodeHandle, PlatformError, ProcessorKind, ResourceHandle};
use serde::{Deserialize, Serialize};
use tracing::trace;

fn disconnect_quietly(node: &NodeHandle) {
    if let Err(e) = node.disconnect() {
        trace!("{} already disconnected: {}", node.label(), e);
    }
}

// ========================================
// Gain stage
// ========================================

/// Single gain processor
pub struct GainStage {
    name: String,
    gain: f32,
    node: Option<NodeHandle>,
}

impl GainStage {
    pub fn new(name: impl Into<String>, gain: f32) -> Self {
        Self {
            name: name.into(),
            gain,
            node: None,
        }
    }
}

impl EffectNode for GainStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, resource: &ResourceHandle) -> Result<()> {
        let node = resource.create_processor(ProcessorKind::Gain, &self.name)?;
        node.set_param("gain", self.gain)?;
        self.node = Some(node);
        Ok(())
    }

    fn input(&self) -> Option<NodeHandle> {
        self.node.clone()
    }

    fn output(&self) -> Option<NodeHandle> {
        self.node.clone()
    }

    fn set_param(&mut self, name: &str, value: f32) -> Result<()> {
        if name != "gain" {
            return Err(PlatformError::UnknownParam(name.to_string()).into());
        }
        self.gain = value;
        if let Some(node) = &self.node {
            node.set_param("gain", value)?;
        }
        Ok(())
    }

    fn dispose(&mut self) {
        if let Some(node) = self.node.take() {
            disconnect_quietly(&node);
        }
    }
}

// ========================================
// Equalizer
// ========================================

/// One equalizer band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqBand {
    pub frequency: f32,
    /// Gain in dB
    pub gain: f32,
    pub q: f32,
}

/// Multi-band equalizer built as an internal filter sub-chain
///
/// The first band is a low shelf, the last a high shelf, everything in
/// between peaking. Parameters are addressed as `band<N>` (gain in dB).
pub struct EqualizerNode {
    bands: Vec<EqBand>,
    filters: Vec<NodeHandle>,
}

impl EqualizerNode {
    pub const DEFAULT_FREQUENCIES: [f32; 5] = [60.0, 230.0, 910.0, 3600.0, 14000.0];

    pub fn new(bands: Vec<EqBand>) -> Self {
        Self {
            bands,
            filters: Vec::new(),
        }
    }

    /// Five-band equalizer with the given gains (missing gains are flat)
    pub fn with_gains(gains: &[f32]) -> Self {
        let bands = Self::DEFAULT_FREQUENCIES
            .iter()
            .enumerate()
            .map(|(i, &frequency)| EqBand {
                frequency,
                gain: gains.get(i).copied().unwrap_or(0.0),
                q: 1.0,
            })
            .collect();
        Self::new(bands)
    }

    pub fn bands(&self) -> &[EqBand] {
        &self.bands
    }

    fn filter_kind(&self, index: usize) -> FilterKind {
        if index == 0 {
            FilterKind::LowShelf
        } else if index + 1 == self.bands.len() {
            FilterKind::HighShelf
        } else {
            FilterKind::Peaking
        }
    }
}

impl Default for EqualizerNode {
    fn default() -> Self {
        Self::with_gains(&[])
    }
}

impl EffectNode for EqualizerNode {
    fn name(&self) -> &str {
        "equalizer"
    }

    fn init(&mut self, resource: &ResourceHandle) -> Result<()> {
        self.dispose();
        let mut filters: Vec<NodeHandle> = Vec::with_capacity(self.bands.len());
        for (i, band) in self.bands.iter().enumerate() {
            let filter = resource.create_processor(
                ProcessorKind::Filter(self.filter_kind(i)),
                &format!("eq-{}", band.frequency as u32),
            )?;
            filter.set_param("frequency", band.frequency)?;
            filter.set_param("q", band.q)?;
            filter.set_param("gain", band.gain)?;
            if let Some(previous) = filters.last() {
                previous.connect(&filter)?;
            }
            filters.push(filter);
        }
        if filters.is_empty() {
            // A band-less equalizer still needs a pass-through node
            filters.push(resource.create_processor(ProcessorKind::Gain, "eq-passthrough")?);
        }
        self.filters = filters;
        Ok(())
    }

    fn input(&self) -> Option<NodeHandle> {
        self.filters.first().cloned()
    }

    fn output(&self) -> Option<NodeHandle> {
        self.filters.last().cloned()
    }

    fn set_param(&mut self, name: &str, value: f32) -> Result<()> {
        let index = name
            .strip_prefix("band")
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|i| *i < self.bands.len())
            .ok_or_else(|| Error::from(PlatformError::UnknownParam(name.to_string())))?;
        self.bands[index].gain = value;
        if let Some(filter) = self.filters.get(index) {
            filter.set_param("gain", value)?;
        }
        Ok(())
    }

    fn dispose(&mut self) {
        for filter in self.filters.drain(..) {
            disconnect_quietly(&filter);
        }
    }
}

// ========================================
// Reverb
// ========================================

/// Reverb send with a dry/wet split
///
/// ```text
/// in -> dry ----------------> out
/// in -> convolver -> wet ---> out
/// ```
pub struct ReverbNode {
    mix: f32,
    decay: f32,
    input: Option<NodeHandle>,
    dry: Option<NodeHandle>,
    convolver: Option<NodeHandle>,
    wet: Option<NodeHandle>,
    output: Option<NodeHandle>,
}

impl ReverbNode {
    pub fn new(mix: f32, decay: f32) -> Self {
        Self {
            mix: mix.clamp(0.0, 1.0),
            decay: decay.max(0.0),
            input: None,
            dry: None,
            convolver: None,
            wet: None,
            output: None,
        }
    }

    fn apply_mix(&self) -> Result<()> {
        if let (Some(dry), Some(wet)) = (&self.dry, &self.wet) {
            dry.set_param("gain", 1.0 - self.mix)?;
            wet.set_param("gain", self.mix)?;
        }
        Ok(())
    }
}

impl Default for ReverbNode {
    fn default() -> Self {
        Self::new(0.25, 2.0)
    }
}

impl EffectNode for ReverbNode {
    fn name(&self) -> &str {
        "reverb"
    }

    fn init(&mut self, resource: &ResourceHandle) -> Result<()> {
        self.dispose();
        let input = resource.create_processor(ProcessorKind::Gain, "reverb-in")?;
        let dry = resource.create_processor(ProcessorKind::Gain, "reverb-dry")?;
        let convolver = resource.create_processor(ProcessorKind::Convolver, "reverb-convolver")?;
        let wet = resource.create_processor(ProcessorKind::Gain, "reverb-wet")?;
        let output = resource.create_processor(ProcessorKind::Gain, "reverb-out")?;

        convolver.set_param("decay", self.decay)?;
        input.connect(&dry)?;
        input.connect(&convolver)?;
        convolver.connect(&wet)?;
        dry.connect(&output)?;
        wet.connect(&output)?;

        self.input = Some(input);
        self.dry = Some(dry);
        self.convolver = Some(convolver);
        self.wet = Some(wet);
        self.output = Some(output);
        self.apply_mix()
    }

    fn input(&self) -> Option<NodeHandle> {
        self.input.clone()
    }

    fn output(&self) -> Option<NodeHandle> {
        self.output.clone()
    }

    fn set_param(&mut self, name: &str, value: f32) -> Result<()> {
        match name {
            "mix" => {
                self.mix = value.clamp(0.0, 1.0);
                self.apply_mix()
            }
            "decay" => {
                self.decay = value.max(0.0);
                if let Some(convolver) = &self.convolver {
                    convolver.set_param("decay", self.decay)?;
                }
                Ok(())
            }
            other => Err(PlatformError::UnknownParam(other.to_string()).into()),
        }
    }

    fn is_heavy(&self) -> bool {
        true
    }

    fn dispose(&mut self) {
        let nodes = [
            self.input.take(),
            self.dry.take(),
            self.convolver.take(),
            self.wet.take(),
            self.output.take(),
        ];
        for node in nodes.iter().flatten() {
            disconnect_quietly(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ResourceFactory;
    use crate::sim::SimPlatform;

    #[test]
    fn test_equalizer_builds_subchain() {
        let platform = SimPlatform::activated();
        let resource = platform.factory.create().unwrap();
        let mut eq = EqualizerNode::with_gains(&[3.0, 0.0, -2.0]);
        eq.init(&resource).unwrap();

        let input = eq.input().unwrap();
        let path = platform.patch_bay.path_from(input.id());
        assert_eq!(path, vec!["eq-60", "eq-230", "eq-910", "eq-3600", "eq-14000"]);
        assert_eq!(platform.patch_bay.param(input.id(), "gain"), Some(3.0));
    }

    #[test]
    fn test_equalizer_band_params() {
        let platform = SimPlatform::activated();
        let resource = platform.factory.create().unwrap();
        let mut eq = EqualizerNode::default();
        eq.init(&resource).unwrap();

        eq.set_param("band2", 4.5).unwrap();
        assert_eq!(eq.bands()[2].gain, 4.5);
        assert!(eq.set_param("band9", 1.0).is_err());
        assert!(eq.set_param("treble", 1.0).is_err());
    }

    #[test]
    fn test_reverb_mix_splits_dry_and_wet() {
        let platform = SimPlatform::activated();
        let resource = platform.factory.create().unwrap();
        let mut reverb = ReverbNode::new(0.4, 1.5);
        reverb.init(&resource).unwrap();
        reverb.set_param("mix", 0.75).unwrap();

        let bay = &platform.patch_bay;
        let dry = bay.find("reverb-dry")[0];
        let wet = bay.find("reverb-wet")[0];
        assert_eq!(bay.param(dry, "gain"), Some(0.25));
        assert_eq!(bay.param(wet, "gain"), Some(0.75));
        assert!(reverb.is_heavy());
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let platform = SimPlatform::activated();
        let resource = platform.factory.create().unwrap();
        let mut reverb = ReverbNode::default();
        reverb.init(&resource).unwrap();
        reverb.dispose();
        reverb.dispose();
        assert!(reverb.input().is_none());
        assert_eq!(platform.patch_bay.edge_count(), 0);
    }

    #[test]
    fn test_gain_stage_param_before_init() {
        let mut gain = GainStage::new("g", 1.0);
        gain.set_param("gain", 0.5).unwrap();
        assert!(gain.set_param("q", 1.0).is_err());
        assert!(gain.input().is_none());
    }
}
