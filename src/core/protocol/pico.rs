//! Pico fixed-frame protocol
//!
//! Every packet, in both directions, is six bytes:
//! ```text
//! ff cmd pin value_hi value_lo fe
//! ```
//! There is no checksum; the start and end sentinels are the only framing.

use super::framing::FramingType;
use super::FrameError;
use uuid::Uuid;

/// Start sentinel
pub const START: u8 = 0xFF;
/// End sentinel
pub const END: u8 = 0xFE;
/// Packet length
pub const PACKET_LEN: usize = 6;

/// Number of digital pins
pub const DIGITAL_PINS: usize = 30;
/// Number of analog channels (A0-A3 plus the temperature sensor)
pub const ANALOG_CHANNELS: usize = 5;

/// Framing for the inbound stream
pub const INBOUND_FRAMING: FramingType = FramingType::Sentinel {
    len: PACKET_LEN,
    start: START,
    end: END,
};

/// Nordic UART service
pub const UART_SERVICE: Uuid = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);
/// Host → board characteristic (write)
pub const UART_RX_CHARACTERISTIC: Uuid = Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);
/// Board → host characteristic (notify)
pub const UART_TX_CHARACTERISTIC: Uuid = Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);

/// Packet command byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PicoCommand {
    /// Host sets a digital pin
    WriteDigital = 0x01,
    /// Host sets a PWM duty
    WritePwm = 0x02,
    /// Board reports a digital pin
    ReadDigital = 0x03,
    /// Board reports an analog channel
    ReadAnalog = 0x04,
}

impl PicoCommand {
    /// Get command from u8
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(PicoCommand::WriteDigital),
            0x02 => Some(PicoCommand::WritePwm),
            0x03 => Some(PicoCommand::ReadDigital),
            0x04 => Some(PicoCommand::ReadAnalog),
            _ => None,
        }
    }

    /// Get name of command
    pub fn name(&self) -> &'static str {
        match self {
            PicoCommand::WriteDigital => "WRITE_DIGITAL",
            PicoCommand::WritePwm => "WRITE_PWM",
            PicoCommand::ReadDigital => "READ_DIGITAL",
            PicoCommand::ReadAnalog => "READ_ANALOG",
        }
    }
}

/// One six-byte packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PicoPacket {
    /// Command
    pub command: PicoCommand,
    /// Pin or channel
    pub pin: u8,
    /// 16-bit value
    pub value: u16,
}

impl PicoPacket {
    /// Create packet
    pub fn new(command: PicoCommand, pin: u8, value: u16) -> Self {
        Self {
            command,
            pin,
            value,
        }
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> [u8; PACKET_LEN] {
        let [hi, lo] = self.value.to_be_bytes();
        [START, self.command as u8, self.pin, hi, lo, END]
    }

    /// Decode one packet
    pub fn decode(frame: &[u8]) -> Result<Self, FrameError> {
        if frame.len() != PACKET_LEN {
            return Err(FrameError::BadLength(frame.len()));
        }
        if frame[0] != START {
            return Err(FrameError::BadMagic(format!("{:02x}", frame[0])));
        }
        if frame[5] != END {
            return Err(FrameError::BadTrailer(frame[5]));
        }
        let command = PicoCommand::from_u8(frame[1]).ok_or(FrameError::UnknownCommand(frame[1]))?;
        Ok(Self {
            command,
            pin: frame[2],
            value: u16::from_be_bytes([frame[3], frame[4]]),
        })
    }
}
