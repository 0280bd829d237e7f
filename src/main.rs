use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use structopt::StructOpt;

mod audio;
mod binding;
mod config;
mod console;
mod effects;
mod engine;
mod error;
mod midi;
mod slot;
mod synth;
mod synth_controller;
mod util;

use config::Patch;
use console::Command;
use engine::GraphEngine;
use midi::{Callback, Delivery, MidirDirectory};
use synth::{EnvelopeField, VoiceKind};
use synth_controller::SynthesizerController;
use util::log_if_error;

const SESSION_QUEUE_SIZE: usize = 1024;

#[derive(StructOpt)]
struct PlayOpt {
    #[structopt(short = "i", long = "input")]
    /// Name of the MIDI input to play from.
    input: Option<String>,

    #[structopt(short = "c", long = "channel")]
    /// The MIDI channel (1-16) the synthesizer listens on.
    channel: Option<u8>,

    #[structopt(short = "v", long = "voice")]
    /// Voice engine: am, fm or duo.
    voice: Option<VoiceKind>,

    #[structopt(short = "p", long = "patch", parse(from_os_str))]
    /// TOML patch with the starting envelope and effect settings.
    patch: Option<PathBuf>,

    #[structopt(long = "compress")]
    /// Put the compressor at the end of the effect chain.
    compress: bool,
}

#[derive(StructOpt)]
#[structopt(about = "A MIDI-played synthesizer with a switchable effect chain.")]
enum SynthOpt {
    /// List all available MIDI ports.
    ListMIDI,

    /// Play the software synth.
    Play(PlayOpt),
}

/// Everything the session loop reacts to, in arrival order.
enum Message {
    Midi(Delivery),
    Command(Command),
    Eof,
}

fn apply_patch<E, D>(ctrlr: &mut SynthesizerController<E, D>, patch: &Patch)
where
    E: engine::AudioEngine,
    D: midi::DeviceDirectory,
{
    if let Some(kind) = patch.voice_kind() {
        log_if_error("could not select voice", ctrlr.select_voice_engine(kind));
    }

    if let Some(env) = patch.envelope {
        let fields = [
            (EnvelopeField::Attack, env.attack),
            (EnvelopeField::Decay, env.decay),
            (EnvelopeField::Sustain, env.sustain),
            (EnvelopeField::Release, env.release),
        ];
        for (field, raw) in fields.iter() {
            if let Some(raw) = raw {
                ctrlr.set_envelope_field(*field, *raw);
            }
        }
    }

    for effect in &patch.effects {
        log_if_error("could not configure effect", ctrlr.set_effect_parameter(effect.params));
        log_if_error(
            "could not set effect wet level",
            ctrlr.set_effect_wet(effect.params.kind(), effect.wet),
        );
    }

    ctrlr.set_compression(patch.compress);

    if let Some(input) = &patch.input {
        log_if_error("could not set input", ctrlr.set_input(input));
    }
    if let Some(channel) = patch.channel {
        log_if_error("could not set channel", ctrlr.set_channel(channel));
    }
}

fn spawn_console(sender: mpsc::SyncSender<Message>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    log::error!("failed to read stdin: {}", err);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match Command::parse(&line) {
                Ok(command) => {
                    if sender.send(Message::Command(command)).is_err() {
                        break;
                    }
                }
                Err(err) => println!("{}", err),
            }
        }
        let _ = sender.send(Message::Eof);
    });
}

fn play(opt: PlayOpt) -> Result<()> {
    let mut patch = match &opt.patch {
        Some(path) => Patch::from_toml(path)?,
        None => Patch::default(),
    };
    if opt.input.is_some() {
        patch.input = opt.input.clone();
    }
    if opt.channel.is_some() {
        patch.channel = opt.channel;
    }
    if let Some(kind) = opt.voice {
        patch.voice = Some(kind.to_string());
    }
    patch.compress |= opt.compress;

    let (device, config, sample_format) = audio::default_output()?;
    let (engine, renderer) = GraphEngine::new(config.sample_rate.0 as f32);
    let _stream = audio::start(&device, &config, sample_format, renderer)?;

    let (sender, queue) = mpsc::sync_channel(SESSION_QUEUE_SIZE);
    let midi_sender = sender.clone();
    let callback: Callback = Arc::new(move |delivery: Delivery| {
        let r = midi_sender.try_send(Message::Midi(delivery));
        log_if_error("MIDI event dropped", r);
    });

    let mut ctrlr = SynthesizerController::new(engine, MidirDirectory::new("fxsynth"), callback)
        .context("could not start synthesizer")?;
    apply_patch(&mut ctrlr, &patch);

    spawn_console(sender);
    println!("{}", console::status_report(&ctrlr));

    while let Ok(message) = queue.recv() {
        match message {
            Message::Midi(delivery) => ctrlr.handle_delivery(delivery),
            Message::Command(Command::Quit) | Message::Eof => break,
            Message::Command(command) => match command.apply(&mut ctrlr) {
                Ok(Some(text)) => println!("{}", text),
                Ok(None) => {}
                Err(err) => println!("{}", err),
            },
        }
    }

    ctrlr.dispose()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opt = SynthOpt::from_args();

    match opt {
        SynthOpt::ListMIDI => {
            println!("Available devices:");
            for device_name in midi::list_devices() {
                println!("{}", device_name);
            }
        }

        SynthOpt::Play(playopt) => {
            return play(playopt);
        }
    }

    Ok(())
}
