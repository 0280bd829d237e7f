use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::engine::{AudioEngine, NodeId};
use crate::error::{Result, SynthError};
use crate::slot::{Resource, ResourceSlot};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EffectKind {
    BitCrusher,
    Chorus,
    Distortion,
    Reverb,
    Filter,
    Compressor,
}

impl EffectKind {
    /// Series order of the chain. Never changes at runtime.
    pub const CHAIN_ORDER: [EffectKind; 6] = [
        EffectKind::BitCrusher,
        EffectKind::Chorus,
        EffectKind::Distortion,
        EffectKind::Reverb,
        EffectKind::Filter,
        EffectKind::Compressor,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn default_params(self) -> EffectParams {
        match self {
            EffectKind::BitCrusher => EffectParams::BitCrusher(Default::default()),
            EffectKind::Chorus => EffectParams::Chorus(Default::default()),
            EffectKind::Distortion => EffectParams::Distortion(Default::default()),
            EffectKind::Reverb => EffectParams::Reverb(Default::default()),
            EffectKind::Filter => EffectParams::Filter(Default::default()),
            EffectKind::Compressor => EffectParams::Compressor(Default::default()),
        }
    }
}

impl FromStr for EffectKind {
    type Err = SynthError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bitcrusher" | "bit_crusher" | "crusher" => Ok(EffectKind::BitCrusher),
            "chorus" => Ok(EffectKind::Chorus),
            "distortion" => Ok(EffectKind::Distortion),
            "reverb" => Ok(EffectKind::Reverb),
            "filter" => Ok(EffectKind::Filter),
            "compressor" => Ok(EffectKind::Compressor),
            _ => Err(SynthError::InvalidValue {
                what: "effect".into(),
                value: s.into(),
            }),
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            EffectKind::BitCrusher => "bitcrusher",
            EffectKind::Chorus => "chorus",
            EffectKind::Distortion => "distortion",
            EffectKind::Reverb => "reverb",
            EffectKind::Filter => "filter",
            EffectKind::Compressor => "compressor",
        };
        f.write_str(name)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct BitCrusherParams {
    pub bits: f32,
}

impl Default for BitCrusherParams {
    fn default() -> Self {
        Self { bits: 4.0 }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct ChorusParams {
    /// LFO rate in Hz.
    pub frequency: f32,
    /// Base delay in ms.
    pub delay: f32,
    pub depth: f32,
    pub feedback: f32,
    /// Stereo phase offset of the LFO in degrees.
    pub spread: f32,
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct DistortionParams {
    pub amount: f32,
}

impl Default for DistortionParams {
    fn default() -> Self {
        Self { amount: 0.4 }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReverbParams {
    /// Decay time in seconds.
    pub decay: f32,
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self { decay: 0.1 }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    #[default]
    LowPass,
    HighPass,
    BandPass,
}

impl FromStr for FilterType {
    type Err = SynthError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lowpass" => Ok(FilterType::LowPass),
            "highpass" => Ok(FilterType::HighPass),
            "bandpass" => Ok(FilterType::BandPass),
            _ => Err(SynthError::InvalidValue {
                what: "filter type".into(),
                value: s.into(),
            }),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    /// Cutoff or centre frequency in Hz.
    pub frequency: f32,
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    /// Slope in dB per octave: -12, -24 or -48.
    pub rolloff: i32,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            frequency: 350.0,
            filter_type: FilterType::LowPass,
            rolloff: -12,
        }
    }
}

impl FilterParams {
    /// Number of 12 dB/octave stages needed for the rolloff.
    pub fn stages(&self) -> usize {
        (-self.rolloff / 12).max(1) as usize
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct CompressorParams {
    /// Threshold in dB.
    pub threshold: f32,
    pub ratio: f32,
}

impl Default for CompressorParams {
    fn default() -> Self {
        Self {
            threshold: -24.0,
            ratio: 12.0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum EffectParams {
    BitCrusher(BitCrusherParams),
    Chorus(ChorusParams),
    Distortion(DistortionParams),
    Reverb(ReverbParams),
    Filter(FilterParams),
    Compressor(CompressorParams),
}

fn parse_value<T: FromStr>(what: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| SynthError::InvalidValue {
        what: what.into(),
        value: value.into(),
    })
}

impl EffectParams {
    pub fn kind(&self) -> EffectKind {
        match self {
            EffectParams::BitCrusher(_) => EffectKind::BitCrusher,
            EffectParams::Chorus(_) => EffectKind::Chorus,
            EffectParams::Distortion(_) => EffectKind::Distortion,
            EffectParams::Reverb(_) => EffectKind::Reverb,
            EffectParams::Filter(_) => EffectKind::Filter,
            EffectParams::Compressor(_) => EffectKind::Compressor,
        }
    }

    /// Clamps every field into the range its control allows.
    pub fn sanitized(self) -> Self {
        match self {
            EffectParams::BitCrusher(p) => EffectParams::BitCrusher(BitCrusherParams {
                bits: p.bits.clamp(1.0, 16.0),
            }),
            EffectParams::Chorus(p) => EffectParams::Chorus(ChorusParams {
                frequency: p.frequency.clamp(0.0, 10.0),
                delay: p.delay.clamp(0.0, 1000.0),
                depth: p.depth.clamp(0.0, 1.0),
                feedback: p.feedback.clamp(0.0, 0.95),
                spread: p.spread.clamp(0.0, 180.0),
            }),
            EffectParams::Distortion(p) => EffectParams::Distortion(DistortionParams {
                amount: p.amount.clamp(0.0, 1.0),
            }),
            EffectParams::Reverb(p) => EffectParams::Reverb(ReverbParams {
                decay: p.decay.clamp(0.001, 20.0),
            }),
            EffectParams::Filter(p) => EffectParams::Filter(FilterParams {
                frequency: p.frequency.clamp(10.0, 20000.0),
                filter_type: p.filter_type,
                rolloff: match p.rolloff {
                    r if r > -18 => -12,
                    r if r > -36 => -24,
                    _ => -48,
                },
            }),
            EffectParams::Compressor(p) => EffectParams::Compressor(CompressorParams {
                threshold: p.threshold.clamp(-100.0, 0.0),
                ratio: p.ratio.clamp(1.0, 20.0),
            }),
        }
    }

    /// Returns a copy with one named field changed, as a slider would.
    pub fn with_field(mut self, field: &str, value: &str) -> Result<Self> {
        let kind = self.kind();
        let unknown = || SynthError::InvalidValue {
            what: format!("{} parameter", kind),
            value: field.into(),
        };

        match &mut self {
            EffectParams::BitCrusher(p) => match field {
                "bits" => p.bits = parse_value(field, value)?,
                _ => return Err(unknown()),
            },
            EffectParams::Chorus(p) => match field {
                "frequency" => p.frequency = parse_value(field, value)?,
                "delay" => p.delay = parse_value(field, value)?,
                "depth" => p.depth = parse_value(field, value)?,
                "feedback" => p.feedback = parse_value(field, value)?,
                "spread" => p.spread = parse_value(field, value)?,
                _ => return Err(unknown()),
            },
            EffectParams::Distortion(p) => match field {
                "amount" => p.amount = parse_value(field, value)?,
                _ => return Err(unknown()),
            },
            EffectParams::Reverb(p) => match field {
                "decay" => p.decay = parse_value(field, value)?,
                _ => return Err(unknown()),
            },
            EffectParams::Filter(p) => match field {
                "frequency" => p.frequency = parse_value(field, value)?,
                "type" => p.filter_type = value.parse()?,
                "rolloff" => p.rolloff = parse_value(field, value)?,
                _ => return Err(unknown()),
            },
            EffectParams::Compressor(p) => match field {
                "threshold" => p.threshold = parse_value(field, value)?,
                "ratio" => p.ratio = parse_value(field, value)?,
                _ => return Err(unknown()),
            },
        }
        Ok(self)
    }
}

struct EffectNode(NodeId);

impl<E: AudioEngine + ?Sized> Resource<E> for EffectNode {
    fn release(self, engine: &mut E) -> Result<()> {
        engine.dispose(self.0);
        Ok(())
    }
}

/// One stage of the chain: a single engine instance plus the settings it was
/// built with.
pub struct EffectSlot {
    params: EffectParams,
    wet: f32,
    last_wet: f32,
    node: ResourceSlot<EffectNode>,
}

impl EffectSlot {
    /// Builds an inert slot (wet 0) with default parameters.
    fn new<E: AudioEngine + ?Sized>(engine: &mut E, kind: EffectKind) -> Result<Self> {
        let mut slot = Self {
            params: kind.default_params(),
            wet: 0.0,
            last_wet: 1.0,
            node: ResourceSlot::empty(),
        };
        let params = slot.params;
        slot.configure(engine, params, 0.0)?;
        Ok(slot)
    }

    /// Tears down the current instance and builds a replacement with `params` and
    /// `wet`. The caller still has to rebuild the chain to route through it.
    pub fn configure<E: AudioEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        params: EffectParams,
        wet: f32,
    ) -> Result<()> {
        debug_assert_eq!(params.kind(), self.params.kind());
        let params = params.sanitized();
        let wet = wet.clamp(0.0, 1.0);

        self.node.replace(engine, |engine| {
            Ok(EffectNode(engine.create_effect(&params, wet)))
        })?;

        self.params = params;
        self.wet = wet;
        if wet > 0.0 {
            self.last_wet = wet;
        }
        log::debug!("configured {} wet={} {:?}", self.kind(), wet, params);
        Ok(())
    }

    pub fn kind(&self) -> EffectKind {
        self.params.kind()
    }

    pub fn params(&self) -> EffectParams {
        self.params
    }

    pub fn wet(&self) -> f32 {
        self.wet
    }

    pub fn is_bypassed(&self) -> bool {
        self.wet == 0.0
    }

    /// The wet level the slot returns to when it is switched back on.
    pub fn enabled_wet(&self) -> f32 {
        self.last_wet
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node.get().map(|n| n.0)
    }
}

/// The fixed series of effect slots between the voice engine and the output.
pub struct EffectChain {
    slots: Vec<EffectSlot>,
}

impl EffectChain {
    pub fn new<E: AudioEngine + ?Sized>(engine: &mut E) -> Result<Self> {
        let slots = EffectKind::CHAIN_ORDER
            .iter()
            .map(|&kind| EffectSlot::new(engine, kind))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { slots })
    }

    pub fn slot(&self, kind: EffectKind) -> &EffectSlot {
        &self.slots[kind.index()]
    }

    pub fn slot_mut(&mut self, kind: EffectKind) -> &mut EffectSlot {
        &mut self.slots[kind.index()]
    }

    pub fn slots(&self) -> impl Iterator<Item = &EffectSlot> {
        self.slots.iter()
    }

    /// The stage nodes in series order. Bypassed slots stay in, the compressor only
    /// when `compress` is set.
    pub fn stages(&self, compress: bool) -> Vec<NodeId> {
        self.slots
            .iter()
            .filter(|s| compress || s.kind() != EffectKind::Compressor)
            .filter_map(|s| s.node())
            .collect()
    }

    pub fn rebuild<E: AudioEngine + ?Sized>(&self, engine: &mut E, source: NodeId, compress: bool) {
        let stages = self.stages(compress);
        log::debug!("rebuilding chain with {} stage(s)", stages.len());
        engine.chain(source, &stages);
    }

    pub fn dispose<E: AudioEngine + ?Sized>(mut self, engine: &mut E) -> Result<()> {
        for slot in &mut self.slots {
            slot.node.release(engine)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{Call, RecordingEngine};
    use crate::synth::VoiceKind;

    fn chain() -> (RecordingEngine, EffectChain) {
        let mut engine = RecordingEngine::default();
        let chain = EffectChain::new(&mut engine).unwrap();
        (engine, chain)
    }

    #[test]
    fn test_new_chain_is_inert_and_ordered() {
        let (engine, chain) = chain();
        let kinds: Vec<EffectKind> = chain.slots().map(|s| s.kind()).collect();
        assert_eq!(kinds, EffectKind::CHAIN_ORDER.to_vec());
        assert!(chain.slots().all(|s| s.is_bypassed()));
        assert_eq!(engine.live.len(), 6);
    }

    #[test]
    fn test_configure_replaces_instance() {
        let (mut engine, mut chain) = chain();
        let old = chain.slot(EffectKind::Reverb).node().unwrap();

        let params = EffectParams::Reverb(ReverbParams { decay: 3.0 });
        chain
            .slot_mut(EffectKind::Reverb)
            .configure(&mut engine, params, 0.5)
            .unwrap();

        let slot = chain.slot(EffectKind::Reverb);
        assert_eq!(slot.wet(), 0.5);
        assert_eq!(slot.params(), params);
        assert_ne!(slot.node(), Some(old));
        assert_eq!(engine.live_effects(EffectKind::Reverb), 1);
        assert!(engine.position(&Call::Dispose(old)).is_some());
    }

    #[test]
    fn test_configure_clamps() {
        let (mut engine, mut chain) = chain();
        let wild = EffectParams::Chorus(ChorusParams {
            frequency: 50.0,
            delay: -3.0,
            depth: 2.0,
            feedback: 1.0,
            spread: 360.0,
        });
        chain
            .slot_mut(EffectKind::Chorus)
            .configure(&mut engine, wild, 7.0)
            .unwrap();

        let slot = chain.slot(EffectKind::Chorus);
        assert_eq!(slot.wet(), 1.0);
        assert_eq!(
            slot.params(),
            EffectParams::Chorus(ChorusParams {
                frequency: 10.0,
                delay: 0.0,
                depth: 1.0,
                feedback: 0.95,
                spread: 180.0,
            })
        );
    }

    #[test]
    fn test_stages_skip_compressor_without_flag() {
        let (mut engine, chain) = chain();
        let voice = engine.create_voice(VoiceKind::Am, -20.0);

        chain.rebuild(&mut engine, voice, false);
        let (_, stages) = engine.last_chain().unwrap();
        let kinds: Vec<_> = stages.iter().map(|&n| engine.effect_kind(n).unwrap()).collect();
        assert_eq!(kinds, EffectKind::CHAIN_ORDER[..5].to_vec());

        chain.rebuild(&mut engine, voice, true);
        let (_, stages) = engine.last_chain().unwrap();
        assert_eq!(stages.len(), 6);
        assert_eq!(engine.effect_kind(stages[5]), Some(EffectKind::Compressor));
    }

    #[test]
    fn test_with_field() {
        let params = EffectKind::Filter
            .default_params()
            .with_field("type", "highpass")
            .unwrap()
            .with_field("rolloff", "-24")
            .unwrap();
        match params {
            EffectParams::Filter(p) => {
                assert_eq!(p.filter_type, FilterType::HighPass);
                assert_eq!(p.stages(), 2);
            }
            other => panic!("expected filter, got {:?}", other),
        }

        assert!(EffectKind::Reverb
            .default_params()
            .with_field("depth", "1")
            .is_err());
        assert!(EffectKind::Chorus
            .default_params()
            .with_field("depth", "lots")
            .is_err());
    }

    #[test]
    fn test_dispose_releases_everything() {
        let (mut engine, chain) = chain();
        chain.dispose(&mut engine).unwrap();
        assert!(engine.live.is_empty());
    }
}
