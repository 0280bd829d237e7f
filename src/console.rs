use std::fmt::Write;

use crate::effects::EffectKind;
use crate::engine::AudioEngine;
use crate::error::{Result, SynthError};
use crate::midi::DeviceDirectory;
use crate::synth::{EnvelopeField, VoiceKind};
use crate::synth_controller::SynthesizerController;

const DEFAULT_VELOCITY: u8 = 100;

/// One control-surface interaction, typed in on stdin.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Voice(VoiceKind),
    Envelope(EnvelopeField, f32),
    Toggle(EffectKind),
    Wet(EffectKind, f32),
    Set {
        effect: EffectKind,
        field: String,
        value: String,
    },
    Compress(bool),
    Input(String),
    Channel(u8),
    NoteOn(u8, u8),
    NoteOff(u8),
    Status,
    Devices,
    Quit,
}

fn number<T: std::str::FromStr>(what: &str, word: Option<&str>) -> Result<T> {
    let word = word.unwrap_or("");
    word.parse().map_err(|_| SynthError::InvalidValue {
        what: what.into(),
        value: word.into(),
    })
}

fn missing(what: &str) -> SynthError {
    SynthError::InvalidValue {
        what: what.into(),
        value: String::new(),
    }
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let head = words.next().unwrap_or("");

        if let Some(field) = EnvelopeField::from_name(head) {
            return Ok(Command::Envelope(field, number(head, words.next())?));
        }

        let command = match head {
            "voice" => Command::Voice(VoiceKind::from_name(words.next().unwrap_or(""))),
            "toggle" => Command::Toggle(words.next().ok_or_else(|| missing("effect"))?.parse()?),
            "wet" => {
                let effect = words.next().ok_or_else(|| missing("effect"))?.parse()?;
                Command::Wet(effect, number("wet", words.next())?)
            }
            "set" => {
                let effect = words.next().ok_or_else(|| missing("effect"))?.parse()?;
                let field = words.next().ok_or_else(|| missing("parameter"))?;
                let value = words.next().ok_or_else(|| missing(field))?;
                Command::Set {
                    effect,
                    field: field.to_owned(),
                    value: value.to_owned(),
                }
            }
            "compress" => match words.next() {
                Some("on") => Command::Compress(true),
                Some("off") => Command::Compress(false),
                other => {
                    return Err(SynthError::InvalidValue {
                        what: "compress".into(),
                        value: other.unwrap_or("").into(),
                    })
                }
            },
            "input" => {
                // Device names often contain spaces.
                let name = words.collect::<Vec<_>>().join(" ");
                if name.is_empty() {
                    return Err(missing("input"));
                }
                Command::Input(name)
            }
            "channel" => Command::Channel(number("channel", words.next())?),
            "note" => {
                let key = number("key", words.next())?;
                let vel = match words.next() {
                    Some(v) => number("velocity", Some(v))?,
                    None => DEFAULT_VELOCITY,
                };
                Command::NoteOn(key, vel)
            }
            "off" => Command::NoteOff(number("key", words.next())?),
            "status" => Command::Status,
            "devices" => Command::Devices,
            "quit" | "exit" => Command::Quit,
            _ => return Err(SynthError::UnknownCommand(line.trim().to_owned())),
        };
        Ok(command)
    }

    /// Runs the command against the controller. Returns text to show the user, if
    /// the command produces any.
    pub fn apply<E: AudioEngine, D: DeviceDirectory>(
        self,
        ctrlr: &mut SynthesizerController<E, D>,
    ) -> Result<Option<String>> {
        match self {
            Command::Voice(kind) => ctrlr.select_voice_engine(kind)?,
            Command::Envelope(field, raw) => ctrlr.set_envelope_field(field, raw),
            Command::Toggle(kind) => ctrlr.toggle_effect(kind)?,
            Command::Wet(kind, wet) => ctrlr.set_effect_wet(kind, wet)?,
            Command::Set {
                effect,
                field,
                value,
            } => {
                let params = ctrlr.effect(effect).params().with_field(&field, &value)?;
                ctrlr.set_effect_parameter(params)?;
            }
            Command::Compress(on) => ctrlr.set_compression(on),
            Command::Input(name) => ctrlr.set_input(&name)?,
            Command::Channel(channel) => ctrlr.set_channel(channel)?,
            Command::NoteOn(key, vel) => ctrlr.note_on(key.min(127), vel.min(127)),
            Command::NoteOff(key) => ctrlr.note_off(key.min(127)),
            Command::Status => return Ok(Some(status_report(ctrlr))),
            Command::Devices => return Ok(Some(ctrlr.available_inputs().join("\n"))),
            Command::Quit => {}
        }
        Ok(None)
    }
}

pub fn status_report<E: AudioEngine, D: DeviceDirectory>(ctrlr: &SynthesizerController<E, D>) -> String {
    let mut out = String::new();
    let env = ctrlr.envelope();
    let _ = writeln!(out, "voice: {}", ctrlr.voice_kind());
    let _ = writeln!(
        out,
        "envelope: attack {:.3}s decay {:.3}s sustain {:.2} release {:.3}s",
        env.attack, env.decay, env.sustain, env.release
    );
    let _ = writeln!(out, "binding: {:?}", ctrlr.binding_state());
    let _ = writeln!(
        out,
        "detune: {:.0} cents, volume: {:.1} dB",
        ctrlr.detune(),
        ctrlr.volume_db()
    );
    let _ = writeln!(out, "compression: {}", if ctrlr.compression() { "on" } else { "off" });
    for slot in ctrlr.effects() {
        let _ = writeln!(out, "{:>10}: wet {:.2} {:?}", slot.kind(), slot.wet(), slot.params());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::RecordingEngine;
    use crate::midi::testing::FakeDirectory;
    use crate::midi::{Callback, Delivery};
    use std::sync::Arc;

    #[test]
    fn test_parse() {
        assert_eq!(Command::parse("voice fm").unwrap(), Command::Voice(VoiceKind::Fm));
        assert_eq!(
            Command::parse("release 0.5").unwrap(),
            Command::Envelope(EnvelopeField::Release, 0.5)
        );
        assert_eq!(
            Command::parse("toggle distortion").unwrap(),
            Command::Toggle(EffectKind::Distortion)
        );
        assert_eq!(
            Command::parse("wet reverb 0.25").unwrap(),
            Command::Wet(EffectKind::Reverb, 0.25)
        );
        assert_eq!(
            Command::parse("input Arturia KeyStep 32").unwrap(),
            Command::Input("Arturia KeyStep 32".into())
        );
        assert_eq!(Command::parse("note 60").unwrap(), Command::NoteOn(60, 100));
        assert_eq!(Command::parse("  compress on ").unwrap(), Command::Compress(true));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Command::parse("wobble"),
            Err(SynthError::UnknownCommand(_))
        ));
        assert!(Command::parse("toggle flanger").is_err());
        assert!(Command::parse("channel x").is_err());
        assert!(Command::parse("set chorus depth").is_err());
        assert!(Command::parse("input").is_err());
    }

    #[test]
    fn test_set_goes_through_controller() {
        let callback: Callback = Arc::new(|_: Delivery| {});
        let mut ctrlr = SynthesizerController::new(
            RecordingEngine::default(),
            FakeDirectory::with_inputs(&[]),
            callback,
        )
        .unwrap();

        Command::parse("set chorus depth 0.5")
            .unwrap()
            .apply(&mut ctrlr)
            .unwrap();

        let chorus = ctrlr.effect(EffectKind::Chorus);
        assert_eq!(chorus.wet(), 1.0);
        match chorus.params() {
            crate::effects::EffectParams::Chorus(p) => assert_eq!(p.depth, 0.5),
            other => panic!("expected chorus, got {:?}", other),
        }

        let report = Command::Status.apply(&mut ctrlr).unwrap().unwrap();
        assert!(report.contains("voice: am"));
    }
}
