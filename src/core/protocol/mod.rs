//! Protocol implementations
//!
//! Provides encoders, decoders and stream helpers for every supported board:
//! - Generic Arduino single-byte protocol
//! - Extended Arduino protocol with typed sensors
//! - Neobot two-mode robot controller
//! - Pico fixed six-byte frames
//! - Checksum and stream reassembly helpers

pub mod arduino;
pub mod arduino_ext;
pub mod checksum;
pub mod framing;
pub mod neobot;
pub mod pico;

pub use framing::{FrameDecoder, FramingType, HeaderSpec};

use thiserror::Error;

/// Reasons an inbound or outbound frame cannot be decoded
///
/// Decoders never panic on wire data; callers log the error and drop the
/// frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Header magic does not match
    #[error("Bad magic: {0}")]
    BadMagic(String),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    BadChecksum {
        /// Computed checksum
        expected: u8,
        /// Checksum carried by the frame
        actual: u8,
    },

    /// Frame shorter or longer than the layout allows
    #[error("Bad frame length: {0} bytes")]
    BadLength(usize),

    /// Trailer byte missing
    #[error("Bad trailer: {0:#04x}")]
    BadTrailer(u8),

    /// Device kind byte not known to the protocol
    #[error("Unknown device kind: {0}")]
    UnknownDeviceKind(u8),

    /// Command or action byte not known to the protocol
    #[error("Unknown command: {0}")]
    UnknownCommand(u8),

    /// Payload shape does not fit the device kind
    #[error("Unsupported payload: {0}")]
    UnsupportedPayload(String),
}

/// Pin or pin group addressed by a command
///
/// Most sensors sit on one pin; an ultrasonic ranger uses a trigger/echo
/// pair. Each pin carries its own logical clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Port {
    /// Single pin
    Pin(u8),
    /// Two pins used together
    Pair(u8, u8),
}

impl Port {
    /// Pins covered by this port
    pub fn pins(&self) -> Vec<u8> {
        match *self {
            Port::Pin(pin) => vec![pin],
            Port::Pair(a, b) => vec![a, b],
        }
    }

    /// Single pin, if this is not a composite port
    pub fn pin(&self) -> Option<u8> {
        match *self {
            Port::Pin(pin) => Some(pin),
            Port::Pair(..) => None,
        }
    }

    /// Is this a composite port?
    pub fn is_composite(&self) -> bool {
        matches!(self, Port::Pair(..))
    }
}

impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Port::Pin(pin) => write!(f, "{}", pin),
            Port::Pair(a, b) => write!(f, "{},{}", a, b),
        }
    }
}
