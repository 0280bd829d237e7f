use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::engine::{AudioEngine, NodeId};
use crate::error::Result;
use crate::slot::{Resource, ResourceSlot};

/// Output gain of a freshly created voice engine, leaving headroom for the effects.
pub const DEFAULT_VOICE_VOLUME_DB: f32 = -20.0;

/// Quietest output level the engine represents. Used wherever a mapping would
/// otherwise produce negative infinity.
pub const MIN_VOLUME_DB: f32 = -96.0;

/// Cents of detune at full pitch-bend deflection.
pub const PITCH_BEND_SENSITIVITY: f32 = 400.0;

/// Decibels per unit of natural log of the normalized controller value.
pub const CONTROL_CHANGE_SENSITIVITY: f32 = 20.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceKind {
    /// Amplitude modulation.
    #[default]
    Am,
    /// Frequency modulation.
    Fm,
    /// Two detuned oscillators.
    Duo,
}

impl VoiceKind {
    /// Unknown names fall back to the default kind instead of failing.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "am" | "amsynth" => VoiceKind::Am,
            "fm" | "fmsynth" => VoiceKind::Fm,
            "duo" | "duosynth" => VoiceKind::Duo,
            other => {
                log::warn!("unknown voice engine {:?}, using {}", other, VoiceKind::default());
                VoiceKind::default()
            }
        }
    }
}

impl FromStr for VoiceKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(VoiceKind::from_name(s))
    }
}

impl fmt::Display for VoiceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            VoiceKind::Am => "am",
            VoiceKind::Fm => "fm",
            VoiceKind::Duo => "duo",
        };
        f.write_str(name)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EnvelopeField {
    Attack,
    Decay,
    Sustain,
    Release,
}

impl EnvelopeField {
    /// Factor between the control-surface value and the stored time in seconds.
    pub fn scale(self) -> f32 {
        match self {
            EnvelopeField::Attack | EnvelopeField::Decay => 2.0,
            EnvelopeField::Sustain => 1.0,
            EnvelopeField::Release => 20.0,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "attack" => Some(EnvelopeField::Attack),
            "decay" => Some(EnvelopeField::Decay),
            "sustain" => Some(EnvelopeField::Sustain),
            "release" => Some(EnvelopeField::Release),
            _ => None,
        }
    }
}

/// ADSR times in seconds, sustain as a level in [0, 1].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Envelope {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            attack: 0.05,
            decay: 0.1,
            sustain: 0.7,
            release: 1.0,
        }
    }
}

impl Envelope {
    /// Stores a raw control-surface value, scaled for its field. Negative input is
    /// treated as zero and sustain is capped at full level.
    pub fn set_raw(&mut self, field: EnvelopeField, raw: f32) {
        let value = raw.max(0.0) * field.scale();
        match field {
            EnvelopeField::Attack => self.attack = value,
            EnvelopeField::Decay => self.decay = value,
            EnvelopeField::Sustain => self.sustain = value.min(1.0),
            EnvelopeField::Release => self.release = value,
        }
    }
}

pub fn detune_for_bend(bend: f32) -> f32 {
    bend * PITCH_BEND_SENSITIVITY
}

/// Maps a raw 7-bit controller value to an output level in dB.
pub fn volume_for_control(value: u8) -> f32 {
    let normalized = value as f32 / 127.0;
    if normalized <= 0.0 {
        return MIN_VOLUME_DB;
    }
    (normalized.ln() * CONTROL_CHANGE_SENSITIVITY).max(MIN_VOLUME_DB)
}

struct VoiceNode(NodeId);

impl<E: AudioEngine + ?Sized> Resource<E> for VoiceNode {
    fn release(self, engine: &mut E) -> Result<()> {
        engine.dispose(self.0);
        Ok(())
    }
}

/// The one live polyphonic instrument.
pub struct VoiceEngine {
    kind: VoiceKind,
    node: ResourceSlot<VoiceNode>,
}

impl VoiceEngine {
    pub fn new<E: AudioEngine + ?Sized>(engine: &mut E, kind: VoiceKind) -> Result<Self> {
        let mut voice = Self {
            kind,
            node: ResourceSlot::empty(),
        };
        voice.create(engine, kind)?;
        Ok(voice)
    }

    /// Disposes the current instrument and builds a new one of `kind`.
    pub fn create<E: AudioEngine + ?Sized>(&mut self, engine: &mut E, kind: VoiceKind) -> Result<()> {
        self.node.replace(engine, |engine| {
            Ok(VoiceNode(engine.create_voice(kind, DEFAULT_VOICE_VOLUME_DB)))
        })?;
        self.kind = kind;
        log::info!("created {} voice engine", kind);
        Ok(())
    }

    pub fn kind(&self) -> VoiceKind {
        self.kind
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node.get().map(|n| n.0)
    }

    pub fn trigger_attack<E: AudioEngine + ?Sized>(
        &self,
        engine: &mut E,
        envelope: Envelope,
        key: u8,
        vel: u8,
    ) {
        if let Some(node) = self.node() {
            engine.set_envelope(node, envelope);
            engine.trigger_attack(node, key, vel);
        }
    }

    pub fn trigger_release<E: AudioEngine + ?Sized>(&self, engine: &mut E, envelope: Envelope, key: u8) {
        if let Some(node) = self.node() {
            engine.set_envelope(node, envelope);
            engine.trigger_release(node, key);
        }
    }

    pub fn set_detune<E: AudioEngine + ?Sized>(&self, engine: &mut E, cents: f32) {
        if let Some(node) = self.node() {
            engine.set_detune(node, cents);
        }
    }

    pub fn set_output_level<E: AudioEngine + ?Sized>(&self, engine: &mut E, db: f32) {
        if let Some(node) = self.node() {
            engine.set_volume(node, db);
        }
    }

    pub fn dispose<E: AudioEngine + ?Sized>(mut self, engine: &mut E) -> Result<()> {
        self.node.release(engine)
    }
}
