use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::effects::EffectParams;
use crate::error::{Result, SynthError};
use crate::synth::VoiceKind;

/// Envelope as the control surface would set it, before scaling.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RawEnvelope {
    pub attack: Option<f32>,
    pub decay: Option<f32>,
    pub sustain: Option<f32>,
    pub release: Option<f32>,
}

fn full_wet() -> f32 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct EffectPatch {
    #[serde(default = "full_wet")]
    pub wet: f32,
    #[serde(flatten)]
    pub params: EffectParams,
}

/// A starting state for a session, loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Patch {
    pub input: Option<String>,
    pub channel: Option<u8>,
    /// Kept as text so unknown names fall back instead of failing the load.
    pub voice: Option<String>,
    pub compress: bool,
    pub envelope: Option<RawEnvelope>,
    pub effects: Vec<EffectPatch>,
}

impl Patch {
    pub fn from_toml(fname: &Path) -> Result<Self> {
        let mut file = File::open(fname)
            .map_err(|e| SynthError::Patch(format!("{}: {}", fname.display(), e)))?;
        let mut file_as_string = String::new();
        file.read_to_string(&mut file_as_string)
            .map_err(|e| SynthError::Patch(format!("{}: {}", fname.display(), e)))?;
        Self::from_toml_str(&file_as_string)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| SynthError::Patch(e.to_string()))
    }

    pub fn voice_kind(&self) -> Option<VoiceKind> {
        self.voice.as_deref().map(VoiceKind::from_name)
    }
}
