use crate::binding::{BindingState, MidiBinding};
use crate::effects::{EffectChain, EffectKind, EffectParams, EffectSlot};
use crate::engine::AudioEngine;
use crate::error::Result;
use crate::midi::{Callback, Delivery, DeviceDirectory, EventContent};
use crate::synth::{self, Envelope, EnvelopeField, VoiceEngine, VoiceKind};

/// The synthesizer as the control surface sees it. Owns the voice engine, the
/// effect chain and the MIDI binding, and rebuilds the chain after every change.
pub struct SynthesizerController<E: AudioEngine, D: DeviceDirectory> {
    engine: E,
    directory: D,
    voice: VoiceEngine,
    envelope: Envelope,
    envelope_dirty: bool,
    chain: EffectChain,
    compress: bool,
    binding: MidiBinding,
    detune: f32,
    volume_db: f32,
}

impl<E: AudioEngine, D: DeviceDirectory> SynthesizerController<E, D> {
    /// Starts a session. `callback` receives deliveries from whichever input the
    /// controller ends up bound to; feed them back through `handle_delivery`.
    pub fn new(mut engine: E, mut directory: D, callback: Callback) -> Result<Self> {
        directory.enable()?;
        let voice = VoiceEngine::new(&mut engine, VoiceKind::default())?;
        let chain = EffectChain::new(&mut engine)?;

        let mut ctrlr = Self {
            engine,
            directory,
            voice,
            envelope: Envelope::default(),
            envelope_dirty: true,
            chain,
            compress: false,
            binding: MidiBinding::new(callback),
            detune: 0.0,
            volume_db: synth::DEFAULT_VOICE_VOLUME_DB,
        };
        ctrlr.rebuild();
        Ok(ctrlr)
    }

    fn rebuild(&mut self) {
        if let Some(source) = self.voice.node() {
            self.chain.rebuild(&mut self.engine, source, self.compress);
        }
    }

    /// Swaps the instrument. The current detune and output level carry over to
    /// the new one.
    pub fn select_voice_engine(&mut self, kind: VoiceKind) -> Result<()> {
        self.voice.create(&mut self.engine, kind)?;
        self.voice.set_detune(&mut self.engine, self.detune);
        self.voice.set_output_level(&mut self.engine, self.volume_db);
        self.envelope_dirty = true;
        self.rebuild();
        Ok(())
    }

    pub fn set_envelope_field(&mut self, field: EnvelopeField, raw: f32) {
        self.envelope.set_raw(field, raw);
        self.envelope_dirty = true;
        self.rebuild();
    }

    /// Applies new parameters to the effect they belong to. Touching a bypassed
    /// effect switches it on.
    pub fn set_effect_parameter(&mut self, params: EffectParams) -> Result<()> {
        let slot = self.chain.slot_mut(params.kind());
        let wet = if slot.is_bypassed() { 1.0 } else { slot.wet() };
        slot.configure(&mut self.engine, params, wet)?;
        self.rebuild();
        Ok(())
    }

    pub fn set_effect_wet(&mut self, kind: EffectKind, wet: f32) -> Result<()> {
        let slot = self.chain.slot_mut(kind);
        let params = slot.params();
        slot.configure(&mut self.engine, params, wet)?;
        self.rebuild();
        Ok(())
    }

    /// Switches an effect between bypassed and its last wet level, keeping its
    /// parameters.
    pub fn toggle_effect(&mut self, kind: EffectKind) -> Result<()> {
        let slot = self.chain.slot_mut(kind);
        let wet = if slot.is_bypassed() {
            slot.enabled_wet()
        } else {
            0.0
        };
        let params = slot.params();
        slot.configure(&mut self.engine, params, wet)?;
        self.rebuild();
        Ok(())
    }

    pub fn set_compression(&mut self, compress: bool) {
        self.compress = compress;
        self.rebuild();
    }

    pub fn set_input(&mut self, name: &str) -> Result<()> {
        let result = self.binding.set_input(&mut self.directory, name);
        self.rebuild();
        result
    }

    pub fn set_channel(&mut self, channel: u8) -> Result<()> {
        let result = self.binding.set_channel(&mut self.directory, channel);
        self.rebuild();
        result
    }

    fn sync_envelope(&mut self) -> Envelope {
        self.envelope_dirty = false;
        self.envelope
    }

    pub fn note_on(&mut self, key: u8, vel: u8) {
        let envelope = self.sync_envelope();
        self.voice.trigger_attack(&mut self.engine, envelope, key, vel);
    }

    pub fn note_off(&mut self, key: u8) {
        let envelope = self.sync_envelope();
        self.voice.trigger_release(&mut self.engine, envelope, key);
    }

    pub fn pitch_bend(&mut self, bend: f32) {
        self.detune = synth::detune_for_bend(bend);
        self.voice.set_detune(&mut self.engine, self.detune);
    }

    pub fn control_change(&mut self, value: u8) {
        self.volume_db = synth::volume_for_control(value);
        self.voice.set_output_level(&mut self.engine, self.volume_db);
    }

    /// Acts on an event from the bound input. Events from listeners that were
    /// removed by a rebind are dropped.
    pub fn handle_delivery(&mut self, delivery: Delivery) {
        if !self.binding.owns(&delivery) {
            log::trace!("dropping stale delivery {:?}", delivery);
            return;
        }

        log::trace!("MIDI {:?}", delivery.event);
        match delivery.event.content {
            EventContent::NoteOn { key, vel } => self.note_on(key, vel),
            EventContent::NoteOff { key, .. } => self.note_off(key),
            EventContent::PitchBend { bend } => self.pitch_bend(bend),
            EventContent::Controller { value, .. } => self.control_change(value),
        }
    }

    pub fn voice_kind(&self) -> VoiceKind {
        self.voice.kind()
    }

    pub fn envelope(&self) -> Envelope {
        self.envelope
    }

    /// True while an envelope edit hasn't reached the voice engine yet.
    pub fn is_envelope_dirty(&self) -> bool {
        self.envelope_dirty
    }

    pub fn effect(&self, kind: EffectKind) -> &EffectSlot {
        self.chain.slot(kind)
    }

    pub fn effects(&self) -> impl Iterator<Item = &EffectSlot> {
        self.chain.slots()
    }

    pub fn compression(&self) -> bool {
        self.compress
    }

    pub fn input(&self) -> Option<&str> {
        self.binding.device()
    }

    pub fn channel(&self) -> Option<u8> {
        self.binding.channel()
    }

    pub fn binding_state(&self) -> BindingState {
        self.binding.state()
    }

    pub fn detune(&self) -> f32 {
        self.detune
    }

    pub fn volume_db(&self) -> f32 {
        self.volume_db
    }

    pub fn available_inputs(&self) -> Vec<String> {
        self.directory.input_names()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Ends the session: listeners come off first so no event reaches a voice that
    /// is being torn down.
    pub fn dispose(mut self) -> Result<()> {
        self.binding.unbind()?;
        self.chain.dispose(&mut self.engine)?;
        self.voice.dispose(&mut self.engine)?;
        log::info!("synthesizer disposed");
        Ok(())
    }
}
