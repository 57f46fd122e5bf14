//! Extended Arduino adapter
//!
//! The workspace publishes two command maps every tick:
//! - `GET`: sensor kind code → `{port, data, time}`
//! - `SET`: port → `{type, data, time}`
//!
//! Commands pass the dedup gate before encoding; everything admitted in one
//! tick goes out as a single queued write.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use super::{
    value_as_f64, value_as_i64, value_as_u8, AdapterOptions, DeviceAdapter, DeviceFamily,
    InboundChunk, OutboundFrame, PendingSendQueue, WorkspaceHandler,
};
use crate::core::dedup::DedupGate;
use crate::core::protocol::arduino_ext::{
    decode_reading, Action, ExtCommand, ExtReading, Payload, SensorKind, SensorValue, SequenceCounter,
    StepperParams, ANALOG_PORTS, DIGITAL_PORTS, REPORT_DELIMITER,
};
use crate::core::protocol::{FrameDecoder, FramingType, Port};

const SCALAR_KINDS: [SensorKind; 5] = [
    SensorKind::Timer,
    SensorKind::Ultrasonic,
    SensorKind::DhtTemp,
    SensorKind::DhtHumi,
    SensorKind::IrRemote,
];

/// Adapter for boards running the typed-sensor firmware
#[derive(Debug)]
pub struct ArduinoExtAdapter {
    framer: FrameDecoder,
    seq: SequenceCounter,
    gate: DedupGate<SensorKind, Payload>,
    digital: [SensorValue; DIGITAL_PORTS as usize],
    analog: [SensorValue; ANALOG_PORTS as usize],
    pulse_in: BTreeMap<u8, SensorValue>,
    scalars: BTreeMap<SensorKind, SensorValue>,
    reset_value: Option<SensorValue>,
    queue: PendingSendQueue,
}

impl Default for ArduinoExtAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ArduinoExtAdapter {
    /// Create adapter
    pub fn new() -> Self {
        Self {
            framer: FrameDecoder::new(FramingType::Delimited(REPORT_DELIMITER)),
            seq: SequenceCounter::new(),
            gate: DedupGate::new(singletons(false), [SensorKind::Tone]),
            digital: [SensorValue::Short(0); DIGITAL_PORTS as usize],
            analog: [SensorValue::Short(0); ANALOG_PORTS as usize],
            pulse_in: BTreeMap::new(),
            scalars: SCALAR_KINDS
                .iter()
                .map(|&kind| (kind, SensorValue::Short(0)))
                .collect(),
            reset_value: None,
            queue: PendingSendQueue::new(),
        }
    }

    /// Dedup gate state
    pub fn gate(&self) -> &DedupGate<SensorKind, Payload> {
        &self.gate
    }

    /// Index the next encoded frame will carry
    pub fn next_sequence(&self) -> u8 {
        self.seq.peek()
    }

    fn apply_reading(&mut self, reading: ExtReading) {
        let ExtReading { kind, port, value } = reading;
        if let SensorValue::Unknown(size) = value {
            tracing::warn!("Unhandled value size {} for {}", size, kind.name());
        }

        match kind {
            SensorKind::Reset => {
                tracing::info!("Board reset acknowledged");
                self.reset_value = Some(value);
            }
            SensorKind::Digital => match self.digital.get_mut(usize::from(port)) {
                Some(slot) => *slot = value,
                None => tracing::debug!("Digital report for unknown port {}", port),
            },
            SensorKind::Analog => match self.analog.get_mut(usize::from(port)) {
                Some(slot) => *slot = value,
                None => tracing::debug!("Analog report for unknown port {}", port),
            },
            SensorKind::PulseIn => {
                self.pulse_in.insert(port, value);
            }
            kind if SCALAR_KINDS.contains(&kind) => {
                self.scalars.insert(kind, value);
            }
            kind => tracing::warn!("No reading slot for {}", kind.name()),
        }
    }

    /// Encode without touching the gate or the sequence index
    fn encode(command: &ExtCommand) -> Option<Vec<u8>> {
        match command.encode() {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!("Cannot encode {} on port {}: {}", command.kind.name(), command.port, e);
                None
            }
        }
    }

    /// Queue `command` if the gate admits it
    ///
    /// Commands that cannot be encoded never reach the gate, so they leave
    /// the clock and cache untouched. Only GET frames advance the index.
    fn offer(&mut self, command: ExtCommand, time: f64, buffer: &mut Vec<u8>) {
        let Some(frame) = Self::encode(&command) else {
            return;
        };
        if !self.gate.admit(command.port, time, command.kind, command.payload) {
            return;
        }
        if command.action == Action::Get {
            self.seq.advance();
        }
        tracing::debug!(
            "{:?} {} port {} -> {}",
            command.action,
            command.kind.name(),
            command.port,
            hex::encode(&frame)
        );
        buffer.extend_from_slice(&frame);
    }

    fn import_gets(&mut self, gets: &Map<String, Value>, buffer: &mut Vec<u8>) {
        let mut requests: Vec<(SensorKind, &Value)> = Vec::with_capacity(gets.len());
        for (key, request) in gets {
            match parse_kind(key) {
                Some(kind) => requests.push((kind, request)),
                None => tracing::warn!("Unknown sensor kind in GET: {}", key),
            }
        }
        requests.sort_by_key(|(kind, _)| kind.code());

        for (kind, request) in requests {
            let Some(port) = request.get("port").and_then(parse_port) else {
                continue;
            };
            let Some(time) = request.get("time").and_then(value_as_f64) else {
                continue;
            };
            let payload = match parse_payload(kind, request.get("data")) {
                Ok(payload) => payload,
                Err(reason) => {
                    tracing::warn!("GET {}: {}", kind.name(), reason);
                    continue;
                }
            };

            let command = ExtCommand::get(kind, port, payload, self.seq.peek());
            self.offer(command, time, buffer);
        }
    }

    fn import_sets(&mut self, sets: &Map<String, Value>, buffer: &mut Vec<u8>) {
        let mut requests: Vec<(u8, &Value)> = Vec::with_capacity(sets.len());
        for (key, request) in sets {
            match value_as_u8(&Value::String(key.clone())) {
                Some(pin) => requests.push((pin, request)),
                None => tracing::warn!("Bad port in SET: {}", key),
            }
        }
        requests.sort_by_key(|(pin, _)| *pin);

        for (pin, request) in requests {
            let Some(kind) = request.get("type").and_then(value_as_u8).and_then(SensorKind::from_u8)
            else {
                tracing::warn!("Unknown device kind in SET for port {}", pin);
                continue;
            };
            let Some(time) = request.get("time").and_then(value_as_f64) else {
                continue;
            };
            let payload = match parse_payload(kind, request.get("data")) {
                Ok(payload) => payload,
                Err(reason) => {
                    tracing::warn!("SET {}: {}", kind.name(), reason);
                    continue;
                }
            };

            let command = ExtCommand::set(kind, Port::Pin(pin), payload, self.seq.peek());
            self.offer(command, time, buffer);
        }
    }
}

fn singletons(exclusive_dht: bool) -> Vec<SensorKind> {
    if exclusive_dht {
        vec![SensorKind::Ultrasonic, SensorKind::DhtTemp, SensorKind::DhtHumi]
    } else {
        vec![SensorKind::Ultrasonic]
    }
}

fn parse_kind(key: &str) -> Option<SensorKind> {
    key.trim().parse::<u8>().ok().and_then(SensorKind::from_u8)
}

/// Port from a workspace value: a number, numeric string or pin array
fn parse_port(value: &Value) -> Option<Port> {
    match value {
        Value::Array(pins) => match pins.as_slice() {
            [a] => value_as_u8(a).map(Port::Pin),
            [a, b] => Some(Port::Pair(value_as_u8(a)?, value_as_u8(b)?)),
            _ => None,
        },
        other => value_as_u8(other).map(Port::Pin),
    }
}

fn field_i16(object: &Map<String, Value>, name: &str) -> Result<i16, String> {
    match object.get(name) {
        None | Some(Value::Null) => Ok(0),
        Some(value) => to_i16(value).ok_or_else(|| format!("{} out of range: {}", name, value)),
    }
}

fn to_i16(value: &Value) -> Option<i16> {
    value_as_i64(value).and_then(|v| i16::try_from(v).ok())
}

/// Tagged payload for a device kind; shapes are checked here, not at encode
fn parse_payload(kind: SensorKind, data: Option<&Value>) -> Result<Payload, String> {
    match kind {
        SensorKind::Tone => match data {
            Some(Value::Object(object)) => Ok(Payload::Tone {
                value: field_i16(object, "value")?,
                duration: field_i16(object, "duration")?,
            }),
            _ => Ok(Payload::Tone {
                value: 0,
                duration: 0,
            }),
        },
        SensorKind::Stepper => match data {
            Some(Value::Object(object)) => Ok(Payload::Stepper(StepperParams {
                port1: field_i16(object, "port1")?,
                port2: field_i16(object, "port2")?,
                port3: field_i16(object, "port3")?,
                port4: field_i16(object, "port4")?,
                speed: field_i16(object, "speed")?,
                steps: field_i16(object, "steps")?,
            })),
            _ => Ok(Payload::Stepper(StepperParams::default())),
        },
        _ => match data {
            None | Some(Value::Null) => Ok(Payload::None),
            Some(value) => to_i16(value)
                .map(Payload::Value)
                .ok_or_else(|| format!("value out of range: {}", value)),
        },
    }
}

impl DeviceAdapter for ArduinoExtAdapter {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::ArduinoExt
    }

    fn init(&mut self, options: &AdapterOptions) {
        self.gate.set_singletons(singletons(options.exclusive_dht));
        self.framer.clear();
        self.queue.clear();
    }

    fn on_connect(&mut self) -> Option<OutboundFrame> {
        self.gate.force_resend();
        let frame = Self::encode(&ExtCommand::reset(self.seq.peek()))?;
        Some(OutboundFrame::raw(frame))
    }

    fn check_initial_data(&mut self, data: &[u8]) -> bool {
        tracing::debug!("Initial data: {}", hex::encode(data));
        true
    }

    fn ingest(&mut self, chunk: &InboundChunk) {
        for frame in self.framer.push(&chunk.data) {
            match decode_reading(&frame) {
                Ok(reading) => self.apply_reading(reading),
                Err(e) => tracing::warn!("Dropping report {}: {}", hex::encode(&frame), e),
            }
        }
    }

    fn export_readings(&mut self, handler: &mut dyn WorkspaceHandler) {
        for (port, value) in self.digital.iter().enumerate() {
            handler.write(&port.to_string(), value.to_json());
        }
        for (port, value) in self.analog.iter().enumerate() {
            handler.write(&format!("a{}", port), value.to_json());
        }

        let pulse_in: Map<String, Value> = self
            .pulse_in
            .iter()
            .map(|(port, value)| (port.to_string(), value.to_json()))
            .collect();
        handler.write(SensorKind::PulseIn.name(), Value::Object(pulse_in));

        for (kind, value) in &self.scalars {
            handler.write(kind.name(), value.to_json());
        }
        if let Some(value) = self.reset_value {
            handler.write(SensorKind::Reset.name(), value.to_json());
        }
    }

    fn import_commands(&mut self, handler: &mut dyn WorkspaceHandler) {
        let mut buffer = Vec::new();

        if let Some(Value::Object(gets)) = handler.read("GET") {
            self.import_gets(&gets, &mut buffer);
        }
        if let Some(Value::Object(sets)) = handler.read("SET") {
            self.import_sets(&sets, &mut buffer);
        }

        if !buffer.is_empty() {
            self.queue.push(OutboundFrame::raw(buffer));
        }
    }

    fn queue(&mut self) -> &mut PendingSendQueue {
        &mut self.queue
    }

    fn reset(&mut self) {
        self.framer.clear();
        self.pulse_in.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::device::MemoryHandler;
    use crate::core::protocol::arduino_ext::{decode_command, encode_reading, Action};

    fn set(handler: &mut MemoryHandler, port: u8, kind: SensorKind, data: Value, time: f64) {
        let mut sets = Map::new();
        sets.insert(
            port.to_string(),
            json!({ "type": kind.code(), "data": data, "time": time }),
        );
        handler.set("SET", Value::Object(sets));
    }

    #[test]
    fn test_on_connect_sends_reset() {
        let mut adapter = ArduinoExtAdapter::new();
        let frame = adapter.on_connect().unwrap();
        let command = decode_command(&frame.data).unwrap();
        assert_eq!(command.action, Action::Reset);
        assert_eq!(command.seq, 0);
        assert_eq!(adapter.next_sequence(), 0);
        assert!(adapter.gate().cache().resend_pending());
    }

    #[test]
    fn test_only_gets_advance_sequence() {
        let mut adapter = ArduinoExtAdapter::new();
        let reset = adapter.on_connect().unwrap();
        assert_eq!(decode_command(&reset.data).unwrap().seq, 0);

        let mut handler = MemoryHandler::new();
        handler.set("GET", json!({ "2": { "port": 1, "time": 1.0 } }));
        set(&mut handler, 13, SensorKind::Digital, json!(255), 1.0);
        adapter.import_commands(&mut handler);

        let frame = adapter.drain_outbound().unwrap();
        let get = decode_command(&frame.data[..8]).unwrap();
        let set = decode_command(&frame.data[8..]).unwrap();
        assert_eq!((get.action, get.seq), (Action::Get, 0));
        assert_eq!((set.action, set.seq), (Action::Set, 1));
        assert_eq!(adapter.next_sequence(), 1);
    }

    #[test]
    fn test_unencodable_command_leaves_gate_alone() {
        let mut adapter = ArduinoExtAdapter::new();
        let mut handler = MemoryHandler::new();

        handler.set("GET", json!({ "7": { "port": [2, 3], "time": 1.0 } }));
        adapter.import_commands(&mut handler);
        handler.set("GET", json!({ "7": { "port": 9, "time": 2.0 } }));
        adapter.import_commands(&mut handler);

        assert_eq!(adapter.queue().len(), 1);
        assert_eq!(adapter.gate().cache().ports_of(SensorKind::Ultrasonic), vec![Port::Pair(2, 3)]);
        assert_eq!(adapter.gate().clock().last(9), 0.0);
        assert_eq!(adapter.next_sequence(), 1);

        handler.set("GET", json!({}));
        set(&mut handler, 5, SensorKind::Timer, json!(1), 3.0);
        adapter.import_commands(&mut handler);
        assert_eq!(adapter.queue().len(), 1);
        assert_eq!(adapter.gate().clock().last(5), 0.0);
    }

    #[test]
    fn test_gets_ordered_by_kind() {
        let mut adapter = ArduinoExtAdapter::new();
        let mut handler = MemoryHandler::new();
        handler.set(
            "GET",
            json!({
                "11": { "port": 4, "time": 1.0 },
                "2": { "port": 0, "time": 1.0 },
            }),
        );

        adapter.import_commands(&mut handler);
        let frame = adapter.drain_outbound().unwrap();
        assert_eq!((frame.data[5], frame.data[3]), (SensorKind::Analog.code(), 0));
        assert_eq!((frame.data[8 + 5], frame.data[8 + 3]), (SensorKind::DhtTemp.code(), 1));
    }

    #[test]
    fn test_identical_set_sent_once() {
        let mut adapter = ArduinoExtAdapter::new();
        let mut handler = MemoryHandler::new();

        set(&mut handler, 13, SensorKind::Digital, json!(255), 1.0);
        adapter.import_commands(&mut handler);
        set(&mut handler, 13, SensorKind::Digital, json!(255), 2.0);
        adapter.import_commands(&mut handler);

        assert_eq!(adapter.queue().len(), 1);
        let frame = adapter.drain_outbound().unwrap();
        let command = decode_command(&frame.data).unwrap();
        assert_eq!(command.port, Port::Pin(13));
        assert_eq!(command.payload, Payload::Value(255));
    }

    #[test]
    fn test_tone_always_sent() {
        let mut adapter = ArduinoExtAdapter::new();
        let mut handler = MemoryHandler::new();
        let tone = json!({ "value": 440, "duration": 100 });

        for time in [1.0, 2.0, 3.0] {
            set(&mut handler, 8, SensorKind::Tone, tone.clone(), time);
            adapter.import_commands(&mut handler);
        }
        assert_eq!(adapter.queue().len(), 3);
    }

    #[test]
    fn test_stale_time_ignored() {
        let mut adapter = ArduinoExtAdapter::new();
        let mut handler = MemoryHandler::new();

        set(&mut handler, 9, SensorKind::Pwm, json!(10), 5.0);
        adapter.import_commands(&mut handler);
        set(&mut handler, 9, SensorKind::Pwm, json!(20), 5.0);
        adapter.import_commands(&mut handler);
        assert_eq!(adapter.queue().len(), 1);
    }

    #[test]
    fn test_gets_batched_into_one_write() {
        let mut adapter = ArduinoExtAdapter::new();
        let mut handler = MemoryHandler::new();
        handler.set(
            "GET",
            json!({
                "2": { "port": 0, "time": 1.0 },
                "7": { "port": [2, 3], "time": 1.0 },
            }),
        );

        adapter.import_commands(&mut handler);
        assert_eq!(adapter.queue().len(), 1);
        let frame = adapter.drain_outbound().unwrap();
        assert_eq!(frame.len(), 8 + 9);
        assert_eq!(frame.data[3], 0);
        assert_eq!(frame.data[8 + 3], 1);
    }

    #[test]
    fn test_ultrasonic_resubscribed_after_reconnect() {
        let mut adapter = ArduinoExtAdapter::new();
        let mut handler = MemoryHandler::new();
        let get = |time: f64| json!({ "7": { "port": [2, 3], "time": time } });

        handler.set("GET", get(1.0));
        adapter.import_commands(&mut handler);
        handler.set("GET", get(2.0));
        adapter.import_commands(&mut handler);
        assert_eq!(adapter.queue().len(), 1);

        adapter.disconnect();
        adapter.init(&AdapterOptions::default());
        adapter.on_connect();
        handler.set("GET", get(3.0));
        adapter.import_commands(&mut handler);
        assert_eq!(adapter.queue().len(), 1);
    }

    #[test]
    fn test_reading_split_byte_by_byte() {
        let reading = ExtReading {
            kind: SensorKind::DhtTemp,
            port: 4,
            value: SensorValue::Float(21.5),
        };
        let bytes = encode_reading(&reading);

        let mut whole = ArduinoExtAdapter::new();
        whole.ingest(&InboundChunk::raw(bytes.clone()));

        let mut split = ArduinoExtAdapter::new();
        for byte in &bytes {
            split.ingest(&InboundChunk::raw(vec![*byte]));
        }

        let mut a = MemoryHandler::new();
        let mut b = MemoryHandler::new();
        whole.export_readings(&mut a);
        split.export_readings(&mut b);
        assert_eq!(a.get("DHTTEMP"), Some(&json!(21.5)));
        assert_eq!(a.get("DHTTEMP"), b.get("DHTTEMP"));
    }

    #[test]
    fn test_reset_clears_pulse_in() {
        let mut adapter = ArduinoExtAdapter::new();
        let reading = ExtReading {
            kind: SensorKind::PulseIn,
            port: 7,
            value: SensorValue::Short(1200),
        };
        adapter.ingest(&InboundChunk::raw(encode_reading(&reading)));

        let mut handler = MemoryHandler::new();
        adapter.export_readings(&mut handler);
        assert_eq!(handler.get("PULSEIN"), Some(&json!({ "7": 1200 })));

        adapter.reset();
        adapter.export_readings(&mut handler);
        assert_eq!(handler.get("PULSEIN"), Some(&json!({})));
    }

    #[test]
    fn test_parse_payload_rejects_out_of_range() {
        assert!(parse_payload(SensorKind::Pwm, Some(&json!(70000))).is_err());
        assert_eq!(
            parse_payload(SensorKind::Tone, Some(&json!(3))),
            Ok(Payload::Tone {
                value: 0,
                duration: 0
            })
        );
    }
}
