use std::sync::mpsc;

use slotmap::SlotMap;

use crate::effects::EffectParams;
use crate::synth::{Envelope, VoiceKind};
use crate::util::*;

use super::processors::{self, Processor};
use super::render::Renderer;
use super::voices::PolyVoice;
use super::{AudioEngine, NodeId};

const COMMAND_QUEUE_SIZE: usize = 1024;

pub enum GraphCommand {
    AddVoice(NodeId, Box<PolyVoice>),
    AddEffect(NodeId, Box<dyn Processor>),
    Remove(NodeId),
    Route(NodeId, Vec<NodeId>),
    Envelope(NodeId, Envelope),
    Attack(NodeId, u8, u8),
    Release(NodeId, u8),
    Detune(NodeId, f32),
    Volume(NodeId, f32),
}

impl GraphCommand {
    /// Commands that change which nodes exist or how they are wired. Losing one
    /// would leave the two halves of the engine disagreeing.
    fn is_structural(&self) -> bool {
        matches!(
            self,
            GraphCommand::AddVoice(..)
                | GraphCommand::AddEffect(..)
                | GraphCommand::Remove(_)
                | GraphCommand::Route(..)
        )
    }
}

/// Nodes the renderer has taken out of the graph, sent back so they are freed off
/// the audio thread.
pub enum Retired {
    Voice(Box<PolyVoice>),
    Effect(Box<dyn Processor>),
    Route(Vec<NodeId>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum NodeRole {
    Voice,
    Effect,
}

/// Control-side half of the bundled engine. Node construction happens here, so the
/// audio thread only ever swaps finished nodes in and out.
pub struct GraphEngine {
    sample_rate: f32,
    nodes: SlotMap<NodeId, NodeRole>,
    commands: mpsc::SyncSender<GraphCommand>,
    retired: mpsc::Receiver<Retired>,
}

impl GraphEngine {
    pub fn new(sample_rate: f32) -> (Self, Renderer) {
        let (commands, queue) = mpsc::sync_channel(COMMAND_QUEUE_SIZE);
        let (graveyard, retired) = mpsc::sync_channel(COMMAND_QUEUE_SIZE);
        let engine = Self {
            sample_rate,
            nodes: SlotMap::with_key(),
            commands,
            retired,
        };
        (engine, Renderer::new(queue, graveyard))
    }

    /// Structural commands wait for room in the queue; note and level changes are
    /// dropped with a warning when the renderer falls behind.
    fn send(&mut self, command: GraphCommand) {
        self.collect_retired();
        if command.is_structural() {
            let r = self.commands.send(command).map_err(|_| "renderer is gone");
            log_if_error("graph command send failed", r);
        } else {
            let r = self.commands.try_send(command);
            log_if_error("graph command send failed", r);
        }
    }

    /// Frees whatever the renderer has handed back. Returns how many items that was.
    pub fn collect_retired(&mut self) -> usize {
        self.retired.try_iter().count()
    }

    fn is_voice(&self, node: NodeId) -> bool {
        self.nodes.get(node) == Some(&NodeRole::Voice)
    }

    pub fn live_nodes(&self) -> usize {
        self.nodes.len()
    }
}

impl AudioEngine for GraphEngine {
    fn create_voice(&mut self, kind: VoiceKind, volume_db: f32) -> NodeId {
        let id = self.nodes.insert(NodeRole::Voice);
        let voice = PolyVoice::new(kind, volume_db, self.sample_rate);
        self.send(GraphCommand::AddVoice(id, Box::new(voice)));
        id
    }

    fn create_effect(&mut self, params: &EffectParams, wet: f32) -> NodeId {
        let id = self.nodes.insert(NodeRole::Effect);
        let processor = processors::build(params, wet, self.sample_rate);
        self.send(GraphCommand::AddEffect(id, processor));
        id
    }

    fn dispose(&mut self, node: NodeId) {
        if self.nodes.remove(node).is_some() {
            self.send(GraphCommand::Remove(node));
        } else {
            log::warn!("dispose of unknown node {:?}", node);
        }
    }

    fn chain(&mut self, source: NodeId, stages: &[NodeId]) {
        debug_assert!(self.is_voice(source));
        self.send(GraphCommand::Route(source, stages.to_vec()));
    }

    fn set_envelope(&mut self, voice: NodeId, envelope: Envelope) {
        self.send(GraphCommand::Envelope(voice, envelope));
    }

    fn trigger_attack(&mut self, voice: NodeId, key: u8, vel: u8) {
        self.send(GraphCommand::Attack(voice, key, vel));
    }

    fn trigger_release(&mut self, voice: NodeId, key: u8) {
        self.send(GraphCommand::Release(voice, key));
    }

    fn set_detune(&mut self, voice: NodeId, cents: f32) {
        self.send(GraphCommand::Detune(voice, cents));
    }

    fn set_volume(&mut self, voice: NodeId, db: f32) {
        self.send(GraphCommand::Volume(voice, db));
    }
}
