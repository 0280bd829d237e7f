use std::sync::mpsc;

use slotmap::SecondaryMap;

use super::graph::{GraphCommand, Retired};
use super::processors::Processor;
use super::voices::PolyVoice;
use super::NodeId;

const EAR_SAFETY: f32 = 0.5;

/// Audio-thread half of the bundled engine.
pub struct Renderer {
    queue: mpsc::Receiver<GraphCommand>,
    voices: SecondaryMap<NodeId, Box<PolyVoice>>,
    effects: SecondaryMap<NodeId, Box<dyn Processor>>,
    routes: SecondaryMap<NodeId, Vec<NodeId>>,
    graveyard: mpsc::SyncSender<Retired>,
}

impl Renderer {
    pub(super) fn new(
        queue: mpsc::Receiver<GraphCommand>,
        graveyard: mpsc::SyncSender<Retired>,
    ) -> Self {
        Self {
            queue,
            voices: SecondaryMap::with_capacity(16),
            effects: SecondaryMap::with_capacity(16),
            routes: SecondaryMap::with_capacity(16),
            graveyard,
        }
    }

    fn retire(&self, item: Retired) {
        // If the control side is gone or full the item is dropped here instead.
        let _ = self.graveyard.try_send(item);
    }

    /// Applies queued graph changes. Call once per buffer.
    pub fn pump_commands(&mut self) {
        while let Ok(command) = self.queue.try_recv() {
            self.apply(command);
        }

        // Only keep notes that aren't done yet.
        for voice in self.voices.values_mut() {
            voice.prune();
        }
    }

    fn apply(&mut self, command: GraphCommand) {
        match command {
            GraphCommand::AddVoice(id, voice) => {
                self.voices.insert(id, voice);
            }

            GraphCommand::AddEffect(id, processor) => {
                self.effects.insert(id, processor);
            }

            GraphCommand::Remove(id) => {
                if let Some(v) = self.voices.remove(id) {
                    self.retire(Retired::Voice(v));
                }
                if let Some(p) = self.effects.remove(id) {
                    self.retire(Retired::Effect(p));
                }
                if let Some(r) = self.routes.remove(id) {
                    self.retire(Retired::Route(r));
                }
            }

            GraphCommand::Route(source, stages) => {
                if self.voices.contains_key(source) {
                    if let Some(old) = self.routes.insert(source, stages) {
                        self.retire(Retired::Route(old));
                    }
                } else {
                    self.retire(Retired::Route(stages));
                }
            }

            GraphCommand::Envelope(id, envelope) => {
                if let Some(v) = self.voices.get_mut(id) {
                    v.set_envelope(envelope);
                }
            }

            GraphCommand::Attack(id, key, vel) => {
                if let Some(v) = self.voices.get_mut(id) {
                    v.note_on(key, vel);
                }
            }

            GraphCommand::Release(id, key) => {
                if let Some(v) = self.voices.get_mut(id) {
                    v.note_off(key);
                }
            }

            GraphCommand::Detune(id, cents) => {
                if let Some(v) = self.voices.get_mut(id) {
                    v.set_detune(cents);
                }
            }

            GraphCommand::Volume(id, db) => {
                if let Some(v) = self.voices.get_mut(id) {
                    v.set_volume(db);
                }
            }
        }
    }

    /// Renders one stereo frame. Voices without a route aren't connected to the
    /// output and stay silent.
    pub fn step_frame(&mut self) -> (f32, f32) {
        let (mut out_l, mut out_r) = (0.0, 0.0);

        for (id, voice) in self.voices.iter_mut() {
            let (mut l, mut r) = voice.step_frame();
            let route = match self.routes.get(id) {
                Some(route) => route,
                None => continue,
            };

            for stage in route {
                if let Some(p) = self.effects.get_mut(*stage) {
                    let (pl, pr) = p.process(l, r);
                    l = pl;
                    r = pr;
                }
            }

            out_l += l;
            out_r += r;
        }

        (
            out_l.clamp(-EAR_SAFETY, EAR_SAFETY),
            out_r.clamp(-EAR_SAFETY, EAR_SAFETY),
        )
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }
}
