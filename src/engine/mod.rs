//! The audio engine seam. The controller decides which nodes exist and how they
//! are wired; an `AudioEngine` owns the actual sound generation.

mod compressor;
mod filter;
mod graph;
mod processors;
mod render;
mod voices;

pub use graph::GraphEngine;
pub use render::Renderer;

use slotmap::new_key_type;

use crate::effects::EffectParams;
use crate::synth::{Envelope, VoiceKind};

new_key_type! {
    pub struct NodeId;
}

pub trait AudioEngine {
    fn create_voice(&mut self, kind: VoiceKind, volume_db: f32) -> NodeId;
    fn create_effect(&mut self, params: &EffectParams, wet: f32) -> NodeId;

    /// Stops and forgets a node. Any route through it is dropped with it.
    fn dispose(&mut self, node: NodeId);

    /// Routes `source` through `stages` in series to the output sink, replacing the
    /// previous route of `source`.
    fn chain(&mut self, source: NodeId, stages: &[NodeId]);

    fn set_envelope(&mut self, voice: NodeId, envelope: Envelope);
    fn trigger_attack(&mut self, voice: NodeId, key: u8, vel: u8);
    fn trigger_release(&mut self, voice: NodeId, key: u8);
    fn set_detune(&mut self, voice: NodeId, cents: f32);
    fn set_volume(&mut self, voice: NodeId, db: f32);
}
