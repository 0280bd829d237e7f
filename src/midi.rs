use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use midir::{MidiInput, MidiInputConnection};
use midly::live::LiveEvent;
use midly::MidiMessage;
use parking_lot::Mutex;
use slotmap::{new_key_type, SlotMap};

use crate::error::{Result, SynthError};

pub const NUM_CHANNELS: u8 = 16;
const PITCH_BEND_CENTRE: f32 = 8192.0;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum EventContent {
    NoteOff { key: u8, vel: u8 },
    NoteOn { key: u8, vel: u8 },
    /// Bend normalized to [-1, 1).
    PitchBend { bend: f32 },
    Controller { controller: u8, value: u8 },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    NoteOn,
    NoteOff,
    PitchBend,
    ControlChange,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::NoteOn,
        EventKind::NoteOff,
        EventKind::PitchBend,
        EventKind::ControlChange,
    ];
}

impl EventContent {
    pub fn kind(&self) -> EventKind {
        match self {
            EventContent::NoteOff { .. } => EventKind::NoteOff,
            EventContent::NoteOn { .. } => EventKind::NoteOn,
            EventContent::PitchBend { .. } => EventKind::PitchBend,
            EventContent::Controller { .. } => EventKind::ControlChange,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Event {
    pub timestamp: u64,
    /// 1-based, like the channel numbers printed on hardware.
    pub channel: u8,
    pub content: EventContent,
}

/// Parses a raw MIDI message. Messages the synth doesn't listen to yield `None`.
pub fn parse_event(timestamp: u64, bytes: &[u8]) -> Option<Event> {
    let (channel, message) = match LiveEvent::parse(bytes) {
        Ok(LiveEvent::Midi { channel, message }) => (channel, message),
        Ok(_) => return None,
        Err(err) => {
            log::debug!("midly failed to parse {:?}, error: {:?}", bytes, err);
            return None;
        }
    };

    let content = match message {
        MidiMessage::NoteOff { key, vel } => EventContent::NoteOff {
            key: key.into(),
            vel: vel.into(),
        },

        // Running-status keyboards send note-on with velocity 0 instead of note-off.
        MidiMessage::NoteOn { key, vel } if u8::from(vel) == 0 => EventContent::NoteOff {
            key: key.into(),
            vel: 0,
        },

        MidiMessage::NoteOn { key, vel } => EventContent::NoteOn {
            key: key.into(),
            vel: vel.into(),
        },

        MidiMessage::PitchBend { bend } => EventContent::PitchBend {
            bend: normalize_bend(u16::from(bend.0)),
        },

        MidiMessage::Controller { controller, value } => EventContent::Controller {
            controller: controller.into(),
            value: value.into(),
        },

        _ => return None,
    };

    Some(Event {
        timestamp,
        channel: u8::from(channel) + 1,
        content,
    })
}

fn normalize_bend(raw: u16) -> f32 {
    (raw as f32 - PITCH_BEND_CENTRE) / PITCH_BEND_CENTRE
}

new_key_type! {
    /// Identity of one registered listener. Keys are generational, so a removed
    /// listener's key never matches a later registration.
    pub struct ListenerKey;
}

/// Process-unique identity of an `InputPort`. Listener keys are only unique
/// within one port, so a delivery carries both.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PortId(u64);

impl PortId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        PortId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// What an input hands to a listener when a matching event arrives.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Delivery {
    pub port: PortId,
    pub listener: ListenerKey,
    pub event: Event,
}

pub type Callback = Arc<dyn Fn(Delivery) + Send + Sync>;

struct Listener {
    channel: u8,
    kind: EventKind,
    callback: Callback,
}

/// A named MIDI input with per-channel listener registration. The backend feeds raw
/// bytes in through `dispatch`, possibly from its own thread.
pub struct InputPort {
    id: PortId,
    name: String,
    listeners: Mutex<SlotMap<ListenerKey, Listener>>,
}

impl InputPort {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: PortId::next(),
            name: name.into(),
            listeners: Mutex::new(SlotMap::with_key()),
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_listener(&self, channel: u8, kind: EventKind, callback: Callback) -> ListenerKey {
        self.listeners.lock().insert(Listener {
            channel,
            kind,
            callback,
        })
    }

    /// Removes exactly the listener registered under `key`. The channel and kind
    /// must match the registration, otherwise nothing is removed.
    pub fn remove_listener(&self, key: ListenerKey, channel: u8, kind: EventKind) -> Result<()> {
        let mut listeners = self.listeners.lock();
        match listeners.get(key) {
            Some(l) if l.channel == channel && l.kind == kind => {
                listeners.remove(key);
                Ok(())
            }
            _ => Err(SynthError::StaleListener {
                device: self.name.clone(),
                channel,
                kind,
            }),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn listener_count_on(&self, channel: u8) -> usize {
        self.listeners
            .lock()
            .values()
            .filter(|l| l.channel == channel)
            .count()
    }

    pub fn dispatch(&self, timestamp: u64, bytes: &[u8]) {
        if let Some(event) = parse_event(timestamp, bytes) {
            self.dispatch_event(event);
        }
    }

    pub fn dispatch_event(&self, event: Event) {
        // Collect first so callbacks never run with the table locked.
        let targets: Vec<(ListenerKey, Callback)> = self
            .listeners
            .lock()
            .iter()
            .filter(|(_, l)| l.channel == event.channel && l.kind == event.content.kind())
            .map(|(k, l)| (k, l.callback.clone()))
            .collect();

        for (listener, callback) in targets {
            callback(Delivery {
                port: self.id,
                listener,
                event,
            });
        }
    }
}

/// Where the controller looks up inputs by their display name.
pub trait DeviceDirectory {
    /// Called once at startup before any lookup.
    fn enable(&mut self) -> Result<()>;
    fn input_names(&self) -> Vec<String>;
    fn input_by_name(&mut self, name: &str) -> Result<Arc<InputPort>>;
}

struct OpenInput {
    port: Arc<InputPort>,
    _connection: MidiInputConnection<()>,
}

/// Hardware MIDI inputs through midir. Inputs stay open for the whole session once
/// they have been looked up, so switching back to a device doesn't reconnect.
pub struct MidirDirectory {
    client_name: String,
    open: HashMap<String, OpenInput>,
    enabled: bool,
}

impl MidirDirectory {
    pub fn new(client_name: &str) -> Self {
        Self {
            client_name: client_name.to_owned(),
            open: HashMap::new(),
            enabled: false,
        }
    }

    fn midi_input(&self, suffix: &str) -> Result<MidiInput> {
        MidiInput::new(&format!("{} {}", self.client_name, suffix))
            .map_err(|e| SynthError::Midi(e.to_string()))
    }
}

impl DeviceDirectory for MidirDirectory {
    fn enable(&mut self) -> Result<()> {
        self.midi_input("probe")?;
        self.enabled = true;
        log::info!("MIDI enabled, {} input(s) available", self.input_names().len());
        Ok(())
    }

    fn input_names(&self) -> Vec<String> {
        let midi_in = match self.midi_input("enumerate") {
            Ok(m) => m,
            Err(err) => {
                log::warn!("could not enumerate MIDI inputs: {}", err);
                return vec![];
            }
        };

        midi_in
            .ports()
            .iter()
            .filter_map(|p| midi_in.port_name(p).ok())
            .collect()
    }

    fn input_by_name(&mut self, name: &str) -> Result<Arc<InputPort>> {
        if !self.enabled {
            return Err(SynthError::Midi("MIDI has not been enabled".into()));
        }

        if let Some(open) = self.open.get(name) {
            return Ok(open.port.clone());
        }

        let midi_in = self.midi_input(&format!("to {}", name))?;
        let selected_port = midi_in
            .ports()
            .into_iter()
            .find(|p| midi_in.port_name(p).map_or(false, |n| n == name))
            .ok_or_else(|| SynthError::DeviceNotFound(name.to_owned()))?;

        let port = Arc::new(InputPort::new(name));
        let callback_port = port.clone();
        let connection = midi_in
            .connect(
                &selected_port,
                &format!("{} conn to {}", self.client_name, name),
                move |timestamp, bytes, _| callback_port.dispatch(timestamp, bytes),
                (),
            )
            .map_err(|e| SynthError::Midi(e.to_string()))?;

        log::info!("opened MIDI input {:?}", name);
        self.open.insert(
            name.to_owned(),
            OpenInput {
                port: port.clone(),
                _connection: connection,
            },
        );
        Ok(port)
    }
}

pub fn list_devices() -> Vec<String> {
    MidirDirectory::new("fxsynth").input_names()
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// In-memory inputs for tests; no hardware involved.
    #[derive(Default)]
    pub struct FakeDirectory {
        pub ports: HashMap<String, Arc<InputPort>>,
        pub enabled: bool,
    }

    impl FakeDirectory {
        pub fn with_inputs(names: &[&str]) -> Self {
            Self {
                ports: names
                    .iter()
                    .map(|n| (n.to_string(), Arc::new(InputPort::new(*n))))
                    .collect(),
                enabled: false,
            }
        }

        pub fn port(&self, name: &str) -> Arc<InputPort> {
            self.ports[name].clone()
        }
    }

    impl DeviceDirectory for FakeDirectory {
        fn enable(&mut self) -> Result<()> {
            self.enabled = true;
            Ok(())
        }

        fn input_names(&self) -> Vec<String> {
            self.ports.keys().cloned().collect()
        }

        fn input_by_name(&mut self, name: &str) -> Result<Arc<InputPort>> {
            self.ports
                .get(name)
                .cloned()
                .ok_or_else(|| SynthError::DeviceNotFound(name.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn recorder() -> (Callback, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::sync_channel(64);
        let callback: Callback = Arc::new(move |d: Delivery| {
            let _ = tx.try_send(d);
        });
        (callback, rx)
    }

    #[test]
    fn test_parse_note_and_channel() {
        let event = parse_event(7, &[0x90, 60, 100]).unwrap();
        assert_eq!(event.channel, 1);
        assert_eq!(event.timestamp, 7);
        assert_eq!(event.content, EventContent::NoteOn { key: 60, vel: 100 });

        let event = parse_event(0, &[0x83, 60, 10]).unwrap();
        assert_eq!(event.channel, 4);
        assert_eq!(event.content, EventContent::NoteOff { key: 60, vel: 10 });
    }

    #[test]
    fn test_parse_note_on_zero_velocity_is_note_off() {
        let event = parse_event(0, &[0x90, 64, 0]).unwrap();
        assert_eq!(event.content, EventContent::NoteOff { key: 64, vel: 0 });
    }

    #[test]
    fn test_parse_pitch_bend() {
        // 14-bit value 0x2000 is the centre.
        let centre = parse_event(0, &[0xE0, 0x00, 0x40]).unwrap();
        assert_eq!(centre.content, EventContent::PitchBend { bend: 0.0 });

        let max = parse_event(0, &[0xE0, 0x7F, 0x7F]).unwrap();
        match max.content {
            EventContent::PitchBend { bend } => assert!(bend > 0.99 && bend <= 1.0),
            other => panic!("expected pitch bend, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_ignores_other_messages() {
        assert!(parse_event(0, &[0xC0, 5]).is_none());
        assert!(parse_event(0, &[]).is_none());
    }

    #[test]
    fn test_dispatch_filters_on_channel_and_kind() {
        let port = InputPort::new("pads");
        let (callback, rx) = recorder();
        let key = port.add_listener(2, EventKind::NoteOn, callback);

        port.dispatch(0, &[0x90, 60, 100]); // channel 1
        port.dispatch(0, &[0x81, 60, 0]); // channel 2 note-off
        port.dispatch(0, &[0x91, 62, 90]); // channel 2 note-on

        let got: Vec<Delivery> = rx.try_iter().collect();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].port, port.id());
        assert_eq!(got[0].listener, key);
        assert_eq!(got[0].event.content, EventContent::NoteOn { key: 62, vel: 90 });
    }

    #[test]
    fn test_ports_have_distinct_ids() {
        let a = InputPort::new("a");
        let b = InputPort::new("b");
        let (callback, _rx) = recorder();

        // Fresh ports hand out identical listener keys.
        let ka = a.add_listener(1, EventKind::NoteOn, callback.clone());
        let kb = b.add_listener(1, EventKind::NoteOn, callback);
        assert_eq!(ka, kb);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_remove_listener_by_key() {
        let port = InputPort::new("pads");
        let (callback, _rx) = recorder();
        let a = port.add_listener(1, EventKind::NoteOn, callback.clone());
        let b = port.add_listener(1, EventKind::NoteOn, callback);

        port.remove_listener(a, 1, EventKind::NoteOn).unwrap();
        assert_eq!(port.listener_count(), 1);

        // Removing again, or with the wrong registration details, is an error.
        assert!(matches!(
            port.remove_listener(a, 1, EventKind::NoteOn),
            Err(SynthError::StaleListener { .. })
        ));
        assert!(port.remove_listener(b, 3, EventKind::NoteOn).is_err());
        assert_eq!(port.listener_count(), 1);
    }
}
