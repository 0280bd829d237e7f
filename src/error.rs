use thiserror::Error;

use crate::midi::EventKind;

#[derive(Error, Debug)]
pub enum SynthError {
    #[error("could not find MIDI input {0:?}")]
    DeviceNotFound(String),

    #[error("MIDI channel {0} is outside 1..=16")]
    InvalidChannel(u8),

    /// A listener handle was removed that the input does not hold. This means the
    /// binding lost track of what it registered, which is a bug.
    #[error("listener for {kind:?} on {device:?} channel {channel} is not registered")]
    StaleListener {
        device: String,
        channel: u8,
        kind: EventKind,
    },

    #[error("MIDI backend error: {0}")]
    Midi(String),

    #[error("could not load patch: {0}")]
    Patch(String),

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("invalid value {value:?} for {what}")]
    InvalidValue { what: String, value: String },
}

pub type Result<T, E = SynthError> = std::result::Result<T, E>;
