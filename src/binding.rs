use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, SynthError};
use crate::midi::{
    Callback, Delivery, DeviceDirectory, EventKind, InputPort, ListenerKey, NUM_CHANNELS,
};
use crate::slot::{Resource, ResourceSlot};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindingState {
    Unbound,
    Bound { device: String, channel: u8 },
}

/// The four listeners one binding registers on a single input channel.
struct Binding {
    port: Arc<InputPort>,
    channel: u8,
    listeners: HashMap<EventKind, ListenerKey>,
}

impl Binding {
    fn attach(port: Arc<InputPort>, channel: u8, callback: &Callback) -> Self {
        let listeners = EventKind::ALL
            .iter()
            .map(|&kind| (kind, port.add_listener(channel, kind, callback.clone())))
            .collect();

        Self {
            port,
            channel,
            listeners,
        }
    }
}

impl Resource<()> for Binding {
    fn release(self, _: &mut ()) -> Result<()> {
        // Every listener comes off even if one of them fails.
        let mut first_err = None;
        for (kind, key) in self.listeners {
            if let Err(err) = self.port.remove_listener(key, self.channel, kind) {
                log::error!("{}", err);
                first_err.get_or_insert(err);
            }
        }
        log::info!(
            "unbound from {:?} channel {}",
            self.port.name(),
            self.channel
        );
        first_err.map_or(Ok(()), Err)
    }
}

/// Connects one input device and channel to a callback. Either half of the target
/// can be changed at any time; whenever both are known the old listeners come off
/// before the new ones go on.
pub struct MidiBinding {
    device: Option<String>,
    channel: Option<u8>,
    current: ResourceSlot<Binding>,
    callback: Callback,
}

impl MidiBinding {
    pub fn new(callback: Callback) -> Self {
        Self {
            device: None,
            channel: None,
            current: ResourceSlot::empty(),
            callback,
        }
    }

    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    pub fn channel(&self) -> Option<u8> {
        self.channel
    }

    pub fn state(&self) -> BindingState {
        match self.current.get() {
            Some(b) => BindingState::Bound {
                device: b.port.name().to_owned(),
                channel: b.channel,
            },
            None => BindingState::Unbound,
        }
    }

    pub fn set_input(&mut self, directory: &mut dyn DeviceDirectory, name: &str) -> Result<()> {
        self.device = Some(name.to_owned());
        self.rebind(directory)
    }

    pub fn set_channel(&mut self, directory: &mut dyn DeviceDirectory, channel: u8) -> Result<()> {
        if !(1..=NUM_CHANNELS).contains(&channel) {
            return Err(SynthError::InvalidChannel(channel));
        }
        self.channel = Some(channel);
        self.rebind(directory)
    }

    /// Whether `delivery` came through the live binding: same port, same channel
    /// and one of its current listeners. Deliveries queued before a rebind fail
    /// this check.
    pub fn owns(&self, delivery: &Delivery) -> bool {
        self.current.get().map_or(false, |b| {
            b.port.id() == delivery.port
                && b.channel == delivery.event.channel
                && b.listeners.get(&delivery.event.content.kind()) == Some(&delivery.listener)
        })
    }

    fn rebind(&mut self, directory: &mut dyn DeviceDirectory) -> Result<()> {
        let (device, channel) = match (&self.device, self.channel) {
            (Some(device), Some(channel)) => (device.clone(), channel),
            _ => return Ok(()),
        };

        let callback = self.callback.clone();
        let result = self.current.replace(&mut (), |_| {
            let port = directory.input_by_name(&device)?;
            Ok(Binding::attach(port, channel, &callback))
        });

        match result {
            Ok(_) => {
                log::info!("bound to {:?} channel {}", device, channel);
                Ok(())
            }
            Err(err) => {
                log::warn!("could not bind to {:?} channel {}: {}", device, channel, err);
                Err(err)
            }
        }
    }

    pub fn unbind(&mut self) -> Result<()> {
        self.current.release(&mut ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::testing::FakeDirectory;
    use crate::midi::EventContent;
    use std::sync::mpsc;

    fn binding() -> (MidiBinding, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::sync_channel(64);
        let callback: Callback = Arc::new(move |d: Delivery| {
            let _ = tx.try_send(d);
        });
        (MidiBinding::new(callback), rx)
    }

    #[test]
    fn test_needs_device_and_channel() {
        let mut dir = FakeDirectory::with_inputs(&["ControllerX"]);
        let (mut binding, _rx) = binding();

        binding.set_input(&mut dir, "ControllerX").unwrap();
        assert_eq!(binding.state(), BindingState::Unbound);
        assert_eq!(dir.port("ControllerX").listener_count(), 0);

        binding.set_channel(&mut dir, 1).unwrap();
        assert_eq!(
            binding.state(),
            BindingState::Bound {
                device: "ControllerX".into(),
                channel: 1
            }
        );
        assert_eq!(dir.port("ControllerX").listener_count_on(1), 4);
    }

    #[test]
    fn test_rebind_channel_moves_listeners() {
        let mut dir = FakeDirectory::with_inputs(&["ControllerX"]);
        let port = dir.port("ControllerX");
        let (mut binding, rx) = binding();
        binding.set_channel(&mut dir, 1).unwrap();
        binding.set_input(&mut dir, "ControllerX").unwrap();

        binding.set_channel(&mut dir, 2).unwrap();
        binding.set_channel(&mut dir, 2).unwrap();

        assert_eq!(port.listener_count(), 4);
        assert_eq!(port.listener_count_on(1), 0);
        assert_eq!(port.listener_count_on(2), 4);

        port.dispatch(0, &[0x90, 60, 100]); // channel 1
        port.dispatch(0, &[0x91, 61, 100]); // channel 2
        let got: Vec<Delivery> = rx.try_iter().collect();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].event.content, EventContent::NoteOn { key: 61, vel: 100 });
        assert!(binding.owns(&got[0]));
    }

    #[test]
    fn test_rebind_device_leaves_other_listeners_alone() {
        let mut dir = FakeDirectory::with_inputs(&["a", "b"]);
        let a = dir.port("a");
        let b = dir.port("b");
        let (mut binding, _rx) = binding();

        let (other_tx, _other_rx) = mpsc::sync_channel::<Delivery>(1);
        let other: Callback = Arc::new(move |d: Delivery| {
            let _ = other_tx.try_send(d);
        });
        a.add_listener(1, EventKind::NoteOn, other);

        binding.set_input(&mut dir, "a").unwrap();
        binding.set_channel(&mut dir, 1).unwrap();
        assert_eq!(a.listener_count(), 5);

        binding.set_input(&mut dir, "b").unwrap();
        assert_eq!(a.listener_count(), 1);
        assert_eq!(b.listener_count(), 4);
    }

    #[test]
    fn test_unknown_device_stays_unbound() {
        let mut dir = FakeDirectory::with_inputs(&["a"]);
        let a = dir.port("a");
        let (mut binding, _rx) = binding();
        binding.set_input(&mut dir, "a").unwrap();
        binding.set_channel(&mut dir, 3).unwrap();

        let err = binding.set_input(&mut dir, "ghost").unwrap_err();
        assert!(matches!(err, SynthError::DeviceNotFound(ref name) if name == "ghost"));
        assert_eq!(binding.state(), BindingState::Unbound);
        assert_eq!(a.listener_count(), 0);
    }

    #[test]
    fn test_invalid_channel_is_rejected() {
        let mut dir = FakeDirectory::with_inputs(&["a"]);
        let (mut binding, _rx) = binding();
        binding.set_input(&mut dir, "a").unwrap();
        binding.set_channel(&mut dir, 5).unwrap();

        assert!(matches!(
            binding.set_channel(&mut dir, 17),
            Err(SynthError::InvalidChannel(17))
        ));
        assert!(binding.set_channel(&mut dir, 0).is_err());
        assert_eq!(binding.channel(), Some(5));
        assert_eq!(dir.port("a").listener_count_on(5), 4);
    }

    #[test]
    fn test_stale_delivery_is_not_owned() {
        let mut dir = FakeDirectory::with_inputs(&["a"]);
        let port = dir.port("a");
        let (mut binding, rx) = binding();
        binding.set_input(&mut dir, "a").unwrap();
        binding.set_channel(&mut dir, 1).unwrap();

        port.dispatch(0, &[0x90, 60, 100]);
        let queued = rx.try_recv().unwrap();
        binding.set_channel(&mut dir, 2).unwrap();

        assert!(!binding.owns(&queued));
    }

    #[test]
    fn test_stale_delivery_from_previous_device() {
        let mut dir = FakeDirectory::with_inputs(&["a", "b"]);
        let a = dir.port("a");
        let b = dir.port("b");
        let (mut binding, rx) = binding();
        binding.set_input(&mut dir, "a").unwrap();
        binding.set_channel(&mut dir, 1).unwrap();

        a.dispatch(0, &[0x90, 60, 100]);
        let queued = rx.try_recv().unwrap();
        binding.set_input(&mut dir, "b").unwrap();

        assert!(!binding.owns(&queued));

        b.dispatch(0, &[0x90, 62, 100]);
        let fresh = rx.try_recv().unwrap();
        assert!(binding.owns(&fresh));
        // Same slot in each port's key space, told apart by port.
        assert_eq!(queued.listener, fresh.listener);
    }

    #[test]
    fn test_release_removes_all_listeners_despite_error() {
        let mut dir = FakeDirectory::with_inputs(&["a"]);
        let a = dir.port("a");
        let (mut binding, _rx) = binding();
        binding.set_input(&mut dir, "a").unwrap();
        binding.set_channel(&mut dir, 1).unwrap();

        let note_on = binding.current.get().unwrap().listeners[&EventKind::NoteOn];
        a.remove_listener(note_on, 1, EventKind::NoteOn).unwrap();
        assert_eq!(a.listener_count(), 3);

        assert!(matches!(
            binding.unbind(),
            Err(SynthError::StaleListener {
                kind: EventKind::NoteOn,
                ..
            })
        ));
        assert_eq!(a.listener_count(), 0);
        assert_eq!(binding.state(), BindingState::Unbound);
    }
}
