//! Extended Arduino protocol
//!
//! Host frames:
//! ```text
//! ff 55 len idx action kind port… payload… 0a
//! ```
//! `idx` is a rolling sequence index (0-254). Board reports are terminated by
//! `println` (`0d 0a`) and look like:
//! ```text
//! ff 55 size value… port kind
//! ```
//! where `size` 2 means a 4-byte little-endian float and 3 a 2-byte
//! little-endian signed short.

use super::{FrameError, Port};

/// Frame magic
pub const MAGIC: [u8; 2] = [0xFF, 0x55];
/// Host frame trailer
pub const TRAILER: u8 = 0x0A;
/// Board report terminator
pub const REPORT_DELIMITER: &[u8] = b"\r\n";
/// Highest sequence index before wrapping to zero
pub const SEQUENCE_MAX: u8 = 254;

/// Number of digital pins reported by the board
pub const DIGITAL_PORTS: u8 = 14;
/// Number of analog pins reported by the board
pub const ANALOG_PORTS: u8 = 6;

/// Sensor/actuator kinds understood by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum SensorKind {
    /// Board reset (0xFF)
    Reset = 255,
    /// Keep-alive
    Alive = 0,
    /// Digital pin
    Digital = 1,
    /// Analog pin
    Analog = 2,
    /// PWM output
    Pwm = 3,
    /// Servo
    ServoPin = 4,
    /// Tone generator
    Tone = 5,
    /// Pulse width input
    PulseIn = 6,
    /// Ultrasonic ranger (two pins)
    Ultrasonic = 7,
    /// Board timer
    Timer = 8,
    /// Stepper motor
    Stepper = 9,
    /// DHT sensor setup
    DhtInit = 10,
    /// DHT temperature
    DhtTemp = 11,
    /// DHT humidity
    DhtHumi = 12,
    /// IR receiver setup
    IrrInit = 13,
    /// IR remote code
    IrRemote = 14,
}

impl SensorKind {
    /// Get sensor kind from u8
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            255 => Some(SensorKind::Reset),
            0 => Some(SensorKind::Alive),
            1 => Some(SensorKind::Digital),
            2 => Some(SensorKind::Analog),
            3 => Some(SensorKind::Pwm),
            4 => Some(SensorKind::ServoPin),
            5 => Some(SensorKind::Tone),
            6 => Some(SensorKind::PulseIn),
            7 => Some(SensorKind::Ultrasonic),
            8 => Some(SensorKind::Timer),
            9 => Some(SensorKind::Stepper),
            10 => Some(SensorKind::DhtInit),
            11 => Some(SensorKind::DhtTemp),
            12 => Some(SensorKind::DhtHumi),
            13 => Some(SensorKind::IrrInit),
            14 => Some(SensorKind::IrRemote),
            _ => None,
        }
    }

    /// Wire code
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Workspace key for this kind
    pub fn name(&self) -> &'static str {
        match self {
            SensorKind::Reset => "RESET",
            SensorKind::Alive => "ALIVE",
            SensorKind::Digital => "DIGITAL",
            SensorKind::Analog => "ANALOG",
            SensorKind::Pwm => "PWM",
            SensorKind::ServoPin => "SERVO_PIN",
            SensorKind::Tone => "TONE",
            SensorKind::PulseIn => "PULSEIN",
            SensorKind::Ultrasonic => "ULTRASONIC",
            SensorKind::Timer => "TIMER",
            SensorKind::Stepper => "STEPPER",
            SensorKind::DhtInit => "DHTINIT",
            SensorKind::DhtTemp => "DHTTEMP",
            SensorKind::DhtHumi => "DHTHUMI",
            SensorKind::IrrInit => "IRRINIT",
            SensorKind::IrRemote => "IRREMOTE",
        }
    }
}

/// Frame action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Action {
    /// Read or subscribe
    Get = 1,
    /// Drive an output
    Set = 2,
    /// Reset the board
    Reset = 3,
}

impl Action {
    /// Get action from u8
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(Action::Get),
            2 => Some(Action::Set),
            3 => Some(Action::Reset),
            _ => None,
        }
    }
}

/// Value size discriminator of board reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueSize {
    /// 4-byte little-endian float
    Float = 2,
    /// 2-byte little-endian signed short
    Short = 3,
}

/// Stepper motor parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StepperParams {
    /// Coil pin 1
    pub port1: i16,
    /// Coil pin 2
    pub port2: i16,
    /// Coil pin 3
    pub port3: i16,
    /// Coil pin 4
    pub port4: i16,
    /// Speed
    pub speed: i16,
    /// Steps to move
    pub steps: i16,
}

/// Command payload, one shape per device kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Payload {
    /// No payload
    #[default]
    None,
    /// Single 16-bit value
    Value(i16),
    /// Tone frequency and duration
    Tone {
        /// Frequency
        value: i16,
        /// Duration
        duration: i16,
    },
    /// Stepper parameters
    Stepper(StepperParams),
}

impl Payload {
    fn as_value(&self) -> Result<i16, FrameError> {
        match *self {
            Payload::None => Ok(0),
            Payload::Value(v) => Ok(v),
            other => Err(FrameError::UnsupportedPayload(format!("{:?}", other))),
        }
    }
}

/// Per-adapter rolling sequence index
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter {
    next: u8,
}

impl SequenceCounter {
    /// Create a counter starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next frame will carry
    pub fn peek(&self) -> u8 {
        self.next
    }

    /// Take the current index and advance, wrapping after 254
    pub fn advance(&mut self) -> u8 {
        let current = self.next;
        self.next = if current >= SEQUENCE_MAX { 0 } else { current + 1 };
        current
    }

    /// Restart from zero
    pub fn reset(&mut self) {
        self.next = 0;
    }
}

/// Host → board command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtCommand {
    /// Frame action
    pub action: Action,
    /// Target kind
    pub kind: SensorKind,
    /// Target port
    pub port: Port,
    /// Payload
    pub payload: Payload,
    /// Sequence index
    pub seq: u8,
}

impl ExtCommand {
    /// Read/subscribe request
    pub fn get(kind: SensorKind, port: Port, payload: Payload, seq: u8) -> Self {
        Self {
            action: Action::Get,
            kind,
            port,
            payload,
            seq,
        }
    }

    /// Output request; a `Reset` kind becomes a reset frame
    pub fn set(kind: SensorKind, port: Port, payload: Payload, seq: u8) -> Self {
        let action = if kind == SensorKind::Reset {
            Action::Reset
        } else {
            Action::Set
        };
        Self {
            action,
            kind,
            port,
            payload,
            seq,
        }
    }

    /// Board reset probe sent right after connecting
    pub fn reset(seq: u8) -> Self {
        Self::set(SensorKind::Reset, Port::Pin(0), Payload::Value(0), seq)
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        match (self.action, self.kind) {
            (Action::Get, _) => self.encode_get(),
            (_, SensorKind::Reset) => {
                let value = self.payload.as_value()?;
                Ok(self.frame(6, Action::Reset, &value.to_le_bytes()))
            }
            (Action::Set, _) => self.encode_set(),
            (Action::Reset, kind) => Err(FrameError::UnknownDeviceKind(kind.code())),
        }
    }

    fn encode_get(&self) -> Result<Vec<u8>, FrameError> {
        match self.kind {
            SensorKind::Ultrasonic => match self.port {
                Port::Pair(trig, echo) => Ok(vec![
                    MAGIC[0],
                    MAGIC[1],
                    6,
                    self.seq,
                    Action::Get as u8,
                    self.kind.code(),
                    trig,
                    echo,
                    TRAILER,
                ]),
                Port::Pin(_) => Err(FrameError::UnsupportedPayload(
                    "ultrasonic needs a trigger/echo pin pair".to_string(),
                )),
            },
            SensorKind::DhtTemp | SensorKind::DhtHumi | SensorKind::IrRemote | SensorKind::Analog => {
                Ok(vec![
                    MAGIC[0],
                    MAGIC[1],
                    5,
                    self.seq,
                    Action::Get as u8,
                    self.kind.code(),
                    self.single_pin()?,
                    TRAILER,
                ])
            }
            _ => {
                let value = self.payload.as_value()?;
                let mut frame = vec![
                    MAGIC[0],
                    MAGIC[1],
                    7,
                    self.seq,
                    Action::Get as u8,
                    self.kind.code(),
                    self.single_pin()?,
                    TRAILER,
                ];
                frame.extend_from_slice(&value.to_le_bytes());
                frame.push(TRAILER);
                Ok(frame)
            }
        }
    }

    fn encode_set(&self) -> Result<Vec<u8>, FrameError> {
        match self.kind {
            SensorKind::IrrInit
            | SensorKind::DhtInit
            | SensorKind::ServoPin
            | SensorKind::Digital
            | SensorKind::Pwm => {
                let value = self.payload.as_value()?;
                Ok(self.frame(6, Action::Set, &value.to_le_bytes()))
            }
            SensorKind::Tone => {
                let (value, duration) = match self.payload {
                    Payload::Tone { value, duration } => (value, duration),
                    _ => (0, 0),
                };
                let mut body = Vec::with_capacity(4);
                body.extend_from_slice(&value.to_le_bytes());
                body.extend_from_slice(&duration.to_le_bytes());
                Ok(self.frame(8, Action::Set, &body))
            }
            SensorKind::Stepper => {
                let params = match self.payload {
                    Payload::Stepper(params) => params,
                    _ => StepperParams::default(),
                };
                let mut body = Vec::with_capacity(12);
                for field in [
                    params.port1,
                    params.port2,
                    params.port3,
                    params.port4,
                    params.speed,
                    params.steps,
                ] {
                    body.extend_from_slice(&field.to_le_bytes());
                }
                Ok(self.frame(16, Action::Set, &body))
            }
            kind => Err(FrameError::UnknownDeviceKind(kind.code())),
        }
    }

    fn frame(&self, len: u8, action: Action, body: &[u8]) -> Vec<u8> {
        let pin = self.port.pins()[0];
        let mut frame = Vec::with_capacity(8 + body.len());
        frame.extend_from_slice(&[
            MAGIC[0],
            MAGIC[1],
            len,
            self.seq,
            action as u8,
            self.kind.code(),
            pin,
        ]);
        frame.extend_from_slice(body);
        frame.push(TRAILER);
        frame
    }

    fn single_pin(&self) -> Result<u8, FrameError> {
        self.port.pin().ok_or_else(|| {
            FrameError::UnsupportedPayload(format!("{} takes a single pin", self.kind.name()))
        })
    }
}

/// Decode a host frame the way the firmware reads it
pub fn decode_command(frame: &[u8]) -> Result<ExtCommand, FrameError> {
    if frame.len() < 8 {
        return Err(FrameError::BadLength(frame.len()));
    }
    if frame[..2] != MAGIC {
        return Err(FrameError::BadMagic(hex::encode(&frame[..2])));
    }

    let seq = frame[3];
    let action = Action::from_u8(frame[4]).ok_or(FrameError::UnknownCommand(frame[4]))?;
    let kind = SensorKind::from_u8(frame[5]).ok_or(FrameError::UnknownDeviceKind(frame[5]))?;
    let pin = frame[6];

    let (expected_len, port, payload) = match (action, kind) {
        (Action::Get, SensorKind::Ultrasonic) => (9, Port::Pair(frame[6], frame[7]), Payload::None),
        (
            Action::Get,
            SensorKind::DhtTemp | SensorKind::DhtHumi | SensorKind::IrRemote | SensorKind::Analog,
        ) => (8, Port::Pin(pin), Payload::None),
        (Action::Get, _) => {
            if frame.len() != 11 {
                return Err(FrameError::BadLength(frame.len()));
            }
            if frame[7] != TRAILER {
                return Err(FrameError::BadTrailer(frame[7]));
            }
            (11, Port::Pin(pin), Payload::Value(read_i16(frame, 8)))
        }
        (Action::Set, SensorKind::Tone) => {
            if frame.len() != 12 {
                return Err(FrameError::BadLength(frame.len()));
            }
            let payload = Payload::Tone {
                value: read_i16(frame, 7),
                duration: read_i16(frame, 9),
            };
            (12, Port::Pin(pin), payload)
        }
        (Action::Set, SensorKind::Stepper) => {
            if frame.len() != 20 {
                return Err(FrameError::BadLength(frame.len()));
            }
            let params = StepperParams {
                port1: read_i16(frame, 7),
                port2: read_i16(frame, 9),
                port3: read_i16(frame, 11),
                port4: read_i16(frame, 13),
                speed: read_i16(frame, 15),
                steps: read_i16(frame, 17),
            };
            (20, Port::Pin(pin), Payload::Stepper(params))
        }
        (Action::Set | Action::Reset, _) => {
            if frame.len() != 10 {
                return Err(FrameError::BadLength(frame.len()));
            }
            (10, Port::Pin(pin), Payload::Value(read_i16(frame, 7)))
        }
    };

    if frame.len() != expected_len {
        return Err(FrameError::BadLength(frame.len()));
    }
    let trailer = frame[expected_len - 1];
    if trailer != TRAILER {
        return Err(FrameError::BadTrailer(trailer));
    }

    Ok(ExtCommand {
        action,
        kind,
        port,
        payload,
        seq,
    })
}

fn read_i16(frame: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([frame[offset], frame[offset + 1]])
}

/// Value carried by a board report
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorValue {
    /// Float rounded to two decimals
    Float(f64),
    /// Signed short
    Short(i16),
    /// Unrecognised size discriminator; treated as zero
    Unknown(u8),
}

impl SensorValue {
    /// Numeric view of the value
    pub fn as_f64(&self) -> f64 {
        match *self {
            SensorValue::Float(v) => v,
            SensorValue::Short(v) => f64::from(v),
            SensorValue::Unknown(_) => 0.0,
        }
    }

    /// JSON view for the workspace
    pub fn to_json(&self) -> serde_json::Value {
        match *self {
            SensorValue::Float(v) => serde_json::json!(v),
            SensorValue::Short(v) => serde_json::json!(v),
            SensorValue::Unknown(_) => serde_json::json!(0),
        }
    }
}

/// Board → host report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtReading {
    /// Reporting kind
    pub kind: SensorKind,
    /// Reporting pin
    pub port: u8,
    /// Reported value
    pub value: SensorValue,
}

/// Round to two decimals
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Decode one board report (terminator already stripped)
pub fn decode_reading(frame: &[u8]) -> Result<ExtReading, FrameError> {
    if frame.len() <= 4 {
        return Err(FrameError::BadLength(frame.len()));
    }
    if frame[..2] != MAGIC {
        return Err(FrameError::BadMagic(hex::encode(&frame[..2])));
    }

    let body = &frame[2..];
    let value = match body[0] {
        size if size == ValueSize::Float as u8 => {
            let bytes: [u8; 4] = body
                .get(1..5)
                .and_then(|b| b.try_into().ok())
                .ok_or(FrameError::BadLength(frame.len()))?;
            SensorValue::Float(round2(f64::from(f32::from_le_bytes(bytes))))
        }
        size if size == ValueSize::Short as u8 => {
            let bytes: [u8; 2] = body
                .get(1..3)
                .and_then(|b| b.try_into().ok())
                .ok_or(FrameError::BadLength(frame.len()))?;
            SensorValue::Short(i16::from_le_bytes(bytes))
        }
        size => SensorValue::Unknown(size),
    };

    let kind_code = body[body.len() - 1];
    let port = body[body.len() - 2];
    let kind = SensorKind::from_u8(kind_code).ok_or(FrameError::UnknownDeviceKind(kind_code))?;

    Ok(ExtReading { kind, port, value })
}

/// Encode a board report, terminator included
pub fn encode_reading(reading: &ExtReading) -> Vec<u8> {
    let mut frame = MAGIC.to_vec();
    match reading.value {
        SensorValue::Float(v) => {
            frame.push(ValueSize::Float as u8);
            frame.extend_from_slice(&(v as f32).to_le_bytes());
        }
        SensorValue::Short(v) => {
            frame.push(ValueSize::Short as u8);
            frame.extend_from_slice(&v.to_le_bytes());
        }
        SensorValue::Unknown(size) => frame.push(size),
    }
    frame.push(reading.port);
    frame.push(reading.kind.code());
    frame.extend_from_slice(REPORT_DELIMITER);
    frame
}
