use slotmap::{DefaultKey, DenseSlotMap, Key};

use crate::synth::{Envelope, VoiceKind};
use crate::util::*;

const MAX_NOTES: usize = 32;

/// Ratio of modulator to carrier frequency for the AM and FM voices, and of the
/// second oscillator for the duo voice.
const AM_HARMONICITY: f32 = 3.0;
const FM_HARMONICITY: f32 = 3.0;
const FM_MODULATION_INDEX: f32 = 10.0;
const DUO_HARMONICITY: f32 = 1.5;

#[derive(Debug)]
struct Note {
    key: u8,
    pitch: f32,
    vel: f32,
    released: bool,
    id: u64,

    t: f32,
    release_t: f32,
    pre_release_level: f32,

    phase: f32,
    mod_phase: f32,
}

impl Note {
    fn level(&self, env: &Envelope) -> f32 {
        if self.released {
            if env.release <= 0.0 {
                return 0.0;
            }
            let release_perc = ((self.t - self.release_t) / env.release).clamp(0.0, 1.0);
            return (1.0 - release_perc) * self.pre_release_level;
        }

        if self.t < env.attack {
            self.t / env.attack
        } else if self.t < env.attack + env.decay {
            let decay_perc = (self.t - env.attack) / env.decay;
            1.0 - (1.0 - env.sustain) * decay_perc
        } else {
            env.sustain
        }
    }

    fn is_done(&self, env: &Envelope) -> bool {
        self.released && self.t - self.release_t >= env.release
    }
}

fn saw(phase: f32) -> f32 {
    2.0 * phase - 1.0
}

fn sine(phase: f32) -> f32 {
    (phase * 2.0 * std::f32::consts::PI).sin()
}

/// A polyphonic instrument: every note shares the envelope, detune and volume.
pub struct PolyVoice {
    kind: VoiceKind,
    sample_rate: f32,
    envelope: Envelope,
    detune_ratio: f32,

    target_gain: f32,
    gain: f32,

    notes: DenseSlotMap<DefaultKey, Note>,
    held: [DefaultKey; 128],
    id_ctr: u64,
}

impl PolyVoice {
    pub fn new(kind: VoiceKind, volume_db: f32, sample_rate: f32) -> Self {
        let gain = db_to_gain(volume_db);
        Self {
            kind,
            sample_rate,
            envelope: Envelope::default(),
            detune_ratio: 1.0,
            target_gain: gain,
            gain,
            notes: DenseSlotMap::with_capacity(MAX_NOTES + 1),
            held: [DefaultKey::null(); 128],
            id_ctr: 0,
        }
    }

    pub fn active_notes(&self) -> usize {
        self.notes.len()
    }

    pub fn set_envelope(&mut self, envelope: Envelope) {
        self.envelope = envelope;
    }

    pub fn set_detune(&mut self, cents: f32) {
        self.detune_ratio = 2.0f32.powf(cents / 1200.0);
    }

    pub fn set_volume(&mut self, db: f32) {
        self.target_gain = db_to_gain(db);
    }

    pub fn note_on(&mut self, key: u8, vel: u8) {
        let key = key.min(127);
        // Retriggering a held key releases the old note first.
        self.note_off(key);

        if self.notes.len() >= MAX_NOTES {
            // Steal a released note if there is one, otherwise the oldest.
            let victim = self
                .notes
                .iter()
                .min_by_key(|(_, n)| (!n.released, n.id))
                .map(|(k, _)| k);
            if let Some(victim) = victim {
                self.remove_note(victim);
            }
        }

        let note = Note {
            key,
            pitch: key_to_pitch(key),
            vel: vel as f32 / 127.0,
            released: false,
            id: self.id_ctr,
            t: 0.0,
            release_t: 0.0,
            pre_release_level: 0.0,
            phase: 0.0,
            mod_phase: 0.0,
        };
        self.id_ctr = self.id_ctr.wrapping_add(1);
        self.held[key as usize] = self.notes.insert(note);
    }

    pub fn note_off(&mut self, key: u8) {
        let slot = &mut self.held[key.min(127) as usize];
        if let Some(note) = self.notes.get_mut(*slot) {
            note.pre_release_level = note.level(&self.envelope);
            note.released = true;
            note.release_t = note.t;
        }
        *slot = DefaultKey::null();
    }

    fn remove_note(&mut self, key: DefaultKey) {
        if let Some(note) = self.notes.remove(key) {
            if self.held[note.key as usize] == key {
                self.held[note.key as usize] = DefaultKey::null();
            }
        }
    }

    /// Forgets notes whose release has finished.
    pub fn prune(&mut self) {
        let envelope = self.envelope;
        self.notes.retain(|_k, n| !n.is_done(&envelope));
    }

    pub fn step_frame(&mut self) -> (f32, f32) {
        self.gain = 0.95 * self.gain + 0.05 * self.target_gain;

        let mut value = 0.0;
        for note in self.notes.values_mut() {
            let osc = match self.kind {
                VoiceKind::Am => {
                    let modulator = if note.mod_phase < 0.5 { 1.0 } else { 0.0 };
                    sine(note.phase) * modulator
                }
                VoiceKind::Fm => {
                    let modulation = FM_MODULATION_INDEX * sine(note.mod_phase);
                    (note.phase * 2.0 * std::f32::consts::PI + modulation).sin()
                }
                VoiceKind::Duo => 0.5 * (saw(note.phase) + saw(note.mod_phase)),
            };

            value += osc * note.vel * note.level(&self.envelope);

            let harmonicity = match self.kind {
                VoiceKind::Am => AM_HARMONICITY,
                VoiceKind::Fm => FM_HARMONICITY,
                VoiceKind::Duo => DUO_HARMONICITY,
            };
            let step = note.pitch * self.detune_ratio / self.sample_rate;
            note.phase = (note.phase + step) % 1.0;
            note.mod_phase = (note.mod_phase + step * harmonicity) % 1.0;
            note.t += 1.0 / self.sample_rate;
        }

        let wave = value * self.gain;
        (wave, wave)
    }
}
