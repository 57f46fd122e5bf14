//! Generic Arduino protocol
//!
//! Every host query is a single byte `ooo pppp v` where bits 7..5 carry the
//! opcode. Analog writes need a second byte for the low seven bits. Board
//! reports come back as:
//! - digital: `1 0 pppp x v`
//! - analog:  `1 1 ppp hhh` followed by `0 lllllll` (10-bit value)
//!
//! The analog pair may be split across transport chunks, so decoding goes
//! through the resumable [`GenericDecoder`].

use super::FrameError;

/// Subscribe-port opcode
pub const OP_SUBSCRIBE: u8 = 5;
/// Set-analog (high bit) opcode
pub const OP_ANALOG: u8 = 6;
/// Set-digital opcode
pub const OP_DIGITAL: u8 = 7;

/// Number of digital ports
pub const DIGITAL_PORTS: usize = 14;
/// Number of analog ports
pub const ANALOG_PORTS: usize = 6;

/// Host → board query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenericCommand {
    /// Ask the board to stream a port
    Subscribe {
        /// Port number (0-15)
        port: u8,
    },
    /// Drive a port fully high or low
    SetDigital {
        /// Port number (0-15)
        port: u8,
        /// High (255) or low (0)
        high: bool,
    },
    /// Drive a port with an 8-bit analog value
    SetAnalog {
        /// Port number (0-15)
        port: u8,
        /// Output value
        value: u8,
    },
}

impl GenericCommand {
    /// Pick the command for a workspace output value
    ///
    /// `255` and `0` are digital levels; anything in between is analog.
    pub fn for_value(port: u8, value: u8) -> Self {
        match value {
            255 => GenericCommand::SetDigital { port, high: true },
            0 => GenericCommand::SetDigital { port, high: false },
            value => GenericCommand::SetAnalog { port, value },
        }
    }

    /// Append the wire bytes for this command
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match *self {
            GenericCommand::Subscribe { port } => {
                out.push((OP_SUBSCRIBE << 5) + ((port & 0x0F) << 1));
            }
            GenericCommand::SetDigital { port, high } => {
                out.push((OP_DIGITAL << 5) + ((port & 0x0F) << 1) + u8::from(high));
            }
            GenericCommand::SetAnalog { port, value } => {
                out.push((OP_ANALOG << 5) + ((port & 0x0F) << 1) + (value >> 7));
                out.push(value & 0x7F);
            }
        }
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2);
        self.encode_into(&mut out);
        out
    }
}

/// Decode a host query stream the way the firmware reads it
pub fn decode_commands(data: &[u8]) -> Result<Vec<GenericCommand>, FrameError> {
    let mut commands = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];
        let port = (byte >> 1) & 0x0F;
        match byte >> 5 {
            OP_SUBSCRIBE => commands.push(GenericCommand::Subscribe { port }),
            OP_DIGITAL => commands.push(GenericCommand::SetDigital {
                port,
                high: byte & 1 == 1,
            }),
            OP_ANALOG => {
                let low = *data.get(i + 1).ok_or(FrameError::BadLength(data.len()))?;
                commands.push(GenericCommand::SetAnalog {
                    port,
                    value: ((byte & 1) << 7) | (low & 0x7F),
                });
                i += 1;
            }
            op => return Err(FrameError::UnknownCommand(op)),
        }
        i += 1;
    }

    Ok(commands)
}

/// Board → host report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenericReading {
    /// Digital level
    Digital {
        /// Port number (0-15)
        port: u8,
        /// 0 or 1
        value: u8,
    },
    /// 10-bit analog sample
    Analog {
        /// Port number (0-7)
        port: u8,
        /// Sample (0-1023)
        value: u16,
    },
}

impl GenericReading {
    /// Encode to wire bytes, as the firmware would send it
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            GenericReading::Digital { port, value } => {
                vec![0x80 | ((port & 0x0F) << 2) | (value & 1)]
            }
            GenericReading::Analog { port, value } => vec![
                0xC0 | ((port & 0x07) << 3) | ((value >> 7) & 0x07) as u8,
                (value & 0x7F) as u8,
            ],
        }
    }
}

/// Resumable decoder for board reports
///
/// Holds the analog high byte when a chunk ends between the two halves of a
/// sample, and completes it with the first byte of the next chunk.
#[derive(Debug, Clone, Default)]
pub struct GenericDecoder {
    pending_high: Option<u8>,
}

impl GenericDecoder {
    /// Create new decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every report it completes
    pub fn feed(&mut self, data: &[u8]) -> Vec<GenericReading> {
        let mut readings = Vec::new();

        for &byte in data {
            if let Some(high) = self.pending_high.take() {
                readings.push(GenericReading::Analog {
                    port: (high >> 3) & 0x07,
                    value: (u16::from(high & 0x07) << 7) + u16::from(byte & 0x7F),
                });
                continue;
            }

            if byte & 0x80 == 0 {
                continue;
            }

            if byte & 0x40 != 0 {
                self.pending_high = Some(byte);
            } else {
                readings.push(GenericReading::Digital {
                    port: (byte >> 2) & 0x0F,
                    value: byte & 1,
                });
            }
        }

        readings
    }

    /// Is an analog high byte waiting for its low half?
    pub fn has_pending(&self) -> bool {
        self.pending_high.is_some()
    }

    /// Drop any carried-over byte
    pub fn reset(&mut self) {
        self.pending_high = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_digital_high() {
        let cmd = GenericCommand::for_value(5, 255);
        assert_eq!(cmd.encode(), vec![235]);
    }

    #[test]
    fn test_set_analog_splits_value() {
        let cmd = GenericCommand::for_value(5, 128);
        assert_eq!(cmd.encode(), vec![203, 0]);
    }

    #[test]
    fn test_subscribe() {
        let cmd = GenericCommand::Subscribe { port: 3 };
        assert_eq!(cmd.encode(), vec![(5 << 5) + (3 << 1)]);
    }

    #[test]
    fn test_decode_commands_roundtrip() {
        let commands = vec![
            GenericCommand::Subscribe { port: 2 },
            GenericCommand::SetDigital { port: 13, high: false },
            GenericCommand::SetAnalog { port: 9, value: 200 },
        ];
        let mut bytes = Vec::new();
        for cmd in &commands {
            cmd.encode_into(&mut bytes);
        }
        assert_eq!(decode_commands(&bytes).unwrap(), commands);
    }

    #[test]
    fn test_decode_commands_truncated_analog() {
        assert_eq!(decode_commands(&[203]), Err(FrameError::BadLength(1)));
        assert_eq!(decode_commands(&[0x20]), Err(FrameError::UnknownCommand(1)));
    }

    #[test]
    fn test_reading_roundtrip() {
        let mut decoder = GenericDecoder::new();
        let reading = GenericReading::Analog { port: 3, value: 1000 };
        assert_eq!(decoder.feed(&reading.encode()), vec![reading]);

        let reading = GenericReading::Digital { port: 12, value: 1 };
        assert_eq!(decoder.feed(&reading.encode()), vec![reading]);
    }

    #[test]
    fn test_analog_split_across_chunks() {
        let mut decoder = GenericDecoder::new();
        let bytes = GenericReading::Analog { port: 1, value: 513 }.encode();

        assert!(decoder.feed(&bytes[..1]).is_empty());
        assert!(decoder.has_pending());

        let readings = decoder.feed(&[bytes[1], 0x80 | (4 << 2)]);
        assert_eq!(
            readings,
            vec![
                GenericReading::Analog { port: 1, value: 513 },
                GenericReading::Digital { port: 4, value: 0 },
            ]
        );
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_stray_low_bytes_ignored() {
        let mut decoder = GenericDecoder::new();
        assert!(decoder.feed(&[0x01, 0x7F]).is_empty());
    }
}
