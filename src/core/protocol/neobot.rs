//! Neobot robot controller protocol
//!
//! The robot runs in one of two modes. In entry mode it streams sensor
//! frames and accepts control frames:
//! ```text
//! board → host: ab cd in1 in2 in3 ir bat cs
//! host → board: cd ab out1 out2 out3 dcl dcr snd fnd opt cs
//! ```
//! Switching to upload mode and every upload are acknowledged by 6-byte
//! response frames `aa aa bb 03 code cs`. Host app frames use
//! `aa aa aa type data cs`. All checksums are the 8-bit sum of the bytes
//! between the magic and the checksum byte.

use super::checksum::{body_checksum, verify_trailing_sum8};
use super::framing::{FramingType, HeaderSpec};
use super::FrameError;

/// Host app frame magic
pub const APP_MAGIC: [u8; 3] = [0xAA, 0xAA, 0xAA];
/// Board response magic
pub const RESPONSE_MAGIC: [u8; 3] = [0xAA, 0xAA, 0xBB];
/// Board sensor frame magic
pub const SENSOR_MAGIC: [u8; 2] = [0xAB, 0xCD];
/// Host control frame magic
pub const CONTROL_MAGIC: [u8; 2] = [0xCD, 0xAB];

/// Sensor frame length
pub const SENSOR_FRAME_LEN: usize = 8;
/// Response frame length
pub const RESPONSE_FRAME_LEN: usize = 6;
/// Control frame length
pub const CONTROL_FRAME_LEN: usize = 11;

/// Response frame data type
const RESPONSE_TYPE: u8 = 0x03;
/// App command data type
const APP_COMMAND_TYPE: u8 = 0x01;

/// FND display enable bit in the option byte
pub const OPT_FND_ENABLE: u8 = 0x08;

/// Framing for everything the board sends
pub const INBOUND_FRAMING: FramingType = FramingType::Headed(&[
    HeaderSpec {
        magic: &SENSOR_MAGIC,
        len: SENSOR_FRAME_LEN,
    },
    HeaderSpec {
        magic: &RESPONSE_MAGIC,
        len: RESPONSE_FRAME_LEN,
    },
]);

/// Workspace keys of the five sensor inputs, in frame order
pub const SENSOR_KEYS: [&str; 5] = ["IN1", "IN2", "IN3", "IR", "BAT"];
/// Workspace keys of the eight control outputs, in frame order
pub const CONTROL_KEYS: [&str; 8] = ["OUT1", "OUT2", "OUT3", "DCL", "DCR", "SND", "FND", "OPT"];

/// Host app command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppCommand {
    /// Switch the robot to upload mode
    ModeChange,
    /// Start of uploaded data
    DataStart,
    /// Leave upload mode
    DataExit,
}

impl AppCommand {
    /// Data byte
    pub fn code(&self) -> u8 {
        match self {
            AppCommand::ModeChange => 0x04,
            AppCommand::DataStart => 0x01,
            AppCommand::DataExit => 0x02,
        }
    }

    /// Get command from its data byte
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x04 => Some(AppCommand::ModeChange),
            0x01 => Some(AppCommand::DataStart),
            0x02 => Some(AppCommand::DataExit),
            _ => None,
        }
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = APP_MAGIC.to_vec();
        frame.push(APP_COMMAND_TYPE);
        frame.push(self.code());
        frame.push(body_checksum(&frame, APP_MAGIC.len()));
        frame
    }
}

/// Board response to an app frame or an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Mode change accepted
    ConnAck,
    /// Mode change refused
    ConnNack,
    /// Upload accepted
    DataAck,
    /// Upload refused
    DataNack,
}

impl Response {
    /// Data byte
    pub fn code(&self) -> u8 {
        match self {
            Response::ConnAck => 0x03,
            Response::ConnNack => 0x02,
            Response::DataAck => 0x01,
            Response::DataNack => 0x00,
        }
    }

    /// Get response from its data byte
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x03 => Some(Response::ConnAck),
            0x02 => Some(Response::ConnNack),
            0x01 => Some(Response::DataAck),
            0x00 => Some(Response::DataNack),
            _ => None,
        }
    }

    /// Get name of response
    pub fn name(&self) -> &'static str {
        match self {
            Response::ConnAck => "conn-ACK",
            Response::ConnNack => "conn-NACK",
            Response::DataAck => "data-ACK",
            Response::DataNack => "data-NACK",
        }
    }

    /// Is this a refusal?
    pub fn is_nack(&self) -> bool {
        matches!(self, Response::ConnNack | Response::DataNack)
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = RESPONSE_MAGIC.to_vec();
        frame.push(RESPONSE_TYPE);
        frame.push(self.code());
        frame.push(body_checksum(&frame, RESPONSE_MAGIC.len()));
        frame
    }

    /// Decode an exact 6-byte response frame
    pub fn decode(frame: &[u8]) -> Result<Self, FrameError> {
        if frame.len() != RESPONSE_FRAME_LEN {
            return Err(FrameError::BadLength(frame.len()));
        }
        if frame[..3] != RESPONSE_MAGIC {
            return Err(FrameError::BadMagic(hex::encode(&frame[..3])));
        }
        check_sum(frame, RESPONSE_MAGIC.len())?;
        if frame[3] != RESPONSE_TYPE {
            return Err(FrameError::UnknownCommand(frame[3]));
        }
        Response::from_u8(frame[4]).ok_or(FrameError::UnknownCommand(frame[4]))
    }
}

/// Entry-mode sensor snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorFrame {
    /// Input 1
    pub in1: u8,
    /// Input 2
    pub in2: u8,
    /// Input 3
    pub in3: u8,
    /// IR remote code
    pub ir: u8,
    /// Battery level
    pub bat: u8,
}

impl SensorFrame {
    /// Values in [`SENSOR_KEYS`] order
    pub fn values(&self) -> [u8; 5] {
        [self.in1, self.in2, self.in3, self.ir, self.bat]
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = SENSOR_MAGIC.to_vec();
        frame.extend_from_slice(&self.values());
        frame.push(body_checksum(&frame, SENSOR_MAGIC.len()));
        frame
    }

    /// Decode an exact 8-byte sensor frame
    pub fn decode(frame: &[u8]) -> Result<Self, FrameError> {
        if frame.len() != SENSOR_FRAME_LEN {
            return Err(FrameError::BadLength(frame.len()));
        }
        if frame[..2] != SENSOR_MAGIC {
            return Err(FrameError::BadMagic(hex::encode(&frame[..2])));
        }
        check_sum(frame, SENSOR_MAGIC.len())?;
        Ok(Self {
            in1: frame[2],
            in2: frame[3],
            in3: frame[4],
            ir: frame[5],
            bat: frame[6],
        })
    }
}

/// Entry-mode output command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlFrame {
    /// Output 1
    pub out1: u8,
    /// Output 2
    pub out2: u8,
    /// Output 3
    pub out3: u8,
    /// Left DC motor
    pub dcl: u8,
    /// Right DC motor
    pub dcr: u8,
    /// Buzzer note
    pub snd: u8,
    /// Seven-segment display value
    pub fnd: u8,
    /// Option bits
    pub opt: u8,
}

impl ControlFrame {
    /// Build from values in [`CONTROL_KEYS`] order
    ///
    /// A non-zero display value sets [`OPT_FND_ENABLE`] in `opt`, so the
    /// struct always holds what goes on the wire.
    pub fn from_values(values: [u8; 8]) -> Self {
        let fnd = values[6];
        let opt = if fnd > 0 {
            values[7] | OPT_FND_ENABLE
        } else {
            values[7]
        };
        Self {
            out1: values[0],
            out2: values[1],
            out3: values[2],
            dcl: values[3],
            dcr: values[4],
            snd: values[5],
            fnd,
            opt,
        }
    }

    /// Values in wire order
    pub fn wire_values(&self) -> [u8; 8] {
        [
            self.out1, self.out2, self.out3, self.dcl, self.dcr, self.snd, self.fnd, self.opt,
        ]
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = CONTROL_MAGIC.to_vec();
        frame.extend_from_slice(&self.wire_values());
        frame.push(body_checksum(&frame, CONTROL_MAGIC.len()));
        frame
    }

    /// Decode an exact 11-byte control frame
    pub fn decode(frame: &[u8]) -> Result<Self, FrameError> {
        if frame.len() != CONTROL_FRAME_LEN {
            return Err(FrameError::BadLength(frame.len()));
        }
        if frame[..2] != CONTROL_MAGIC {
            return Err(FrameError::BadMagic(hex::encode(&frame[..2])));
        }
        check_sum(frame, CONTROL_MAGIC.len())?;
        let mut values = [0u8; 8];
        values.copy_from_slice(&frame[2..10]);
        Ok(Self::from_values(values))
    }
}

/// Any frame the board can send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundFrame {
    /// Sensor snapshot
    Sensor(SensorFrame),
    /// ACK/NACK response
    Response(Response),
}

/// Decode one reassembled inbound frame
pub fn decode_inbound(frame: &[u8]) -> Result<InboundFrame, FrameError> {
    if frame.starts_with(&SENSOR_MAGIC) {
        SensorFrame::decode(frame).map(InboundFrame::Sensor)
    } else if frame.starts_with(&RESPONSE_MAGIC) {
        Response::decode(frame).map(InboundFrame::Response)
    } else {
        Err(FrameError::BadMagic(hex::encode(
            &frame[..frame.len().min(3)],
        )))
    }
}

/// Does the chunk start with a checksum-valid frame of the given shape?
pub fn has_valid_frame(data: &[u8], magic: &[u8], len: usize) -> bool {
    data.len() >= len && data.starts_with(magic) && verify_trailing_sum8(&data[..len], magic.len())
}

fn check_sum(frame: &[u8], header_len: usize) -> Result<(), FrameError> {
    let (&actual, body) = frame
        .split_last()
        .ok_or(FrameError::BadLength(frame.len()))?;
    let expected = body_checksum(body, header_len);
    if expected != actual {
        return Err(FrameError::BadChecksum { expected, actual });
    }
    Ok(())
}
