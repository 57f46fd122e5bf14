//! Device adapters
//!
//! One adapter per board family composes the frame codec, stream
//! reassembly, dedup gate and (for Neobot) the handshake machine behind the
//! [`DeviceAdapter`] lifecycle. The session driver calls, once per tick:
//! `ingest` → `export_readings` → `import_commands` → `drain_outbound`.

mod arduino;
mod arduino_ext;
mod neobot;
mod pico;

pub use arduino::ArduinoAdapter;
pub use arduino_ext::ArduinoExtAdapter;
pub use neobot::NeobotAdapter;
pub use pico::PicoAdapter;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::core::transport::TransportType;

/// Supported board families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceFamily {
    /// Generic Arduino single-byte protocol
    #[default]
    Arduino,
    /// Extended Arduino protocol with typed sensors
    ArduinoExt,
    /// Neobot robot controller
    Neobot,
    /// Raspberry Pi Pico
    Pico,
}

impl DeviceFamily {
    /// All families
    pub const ALL: [DeviceFamily; 4] = [
        DeviceFamily::Arduino,
        DeviceFamily::ArduinoExt,
        DeviceFamily::Neobot,
        DeviceFamily::Pico,
    ];

    /// Config/CLI name
    pub fn name(&self) -> &'static str {
        match self {
            DeviceFamily::Arduino => "arduino",
            DeviceFamily::ArduinoExt => "arduino-ext",
            DeviceFamily::Neobot => "neobot",
            DeviceFamily::Pico => "pico",
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "arduino" => Ok(DeviceFamily::Arduino),
            "arduino-ext" | "arduino_ext" | "arduinoext" => Ok(DeviceFamily::ArduinoExt),
            "neobot" => Ok(DeviceFamily::Neobot),
            "pico" => Ok(DeviceFamily::Pico),
            other => Err(format!("Unknown device family: {}", other)),
        }
    }
}

/// Key/value store shared with the block-programming workspace
///
/// The two directions are separate: `read` sees what the workspace sent,
/// `write` publishes readings back to it. Keys are device defined (`"a3"`,
/// `"13"`, `"GET"`, `"SET"`, `"frame"`).
pub trait WorkspaceHandler {
    /// Current workspace value of a key
    fn read(&self, key: &str) -> Option<Value>;

    /// Publish a reading
    fn write(&mut self, key: &str, value: Value);

    /// Read a one-shot workspace value and remove it
    fn consume(&mut self, key: &str) -> Option<Value> {
        self.read(key)
    }

    /// Called by the session before a tick touches the workspace
    fn begin_tick(&mut self) {}

    /// Called by the session after a tick
    fn end_tick(&mut self) {}
}

/// In-memory workspace
#[derive(Debug, Clone, Default)]
pub struct MemoryHandler {
    inputs: HashMap<String, Value>,
    outputs: HashMap<String, Value>,
}

impl MemoryHandler {
    /// Create empty workspace
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value as the workspace would
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.inputs.insert(key.into(), value);
    }

    /// Workspace value not yet consumed
    pub fn input(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key)
    }

    /// Published reading
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.outputs.get(key)
    }

    /// Forget a published reading
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.outputs.remove(key)
    }

    /// All published readings
    pub fn values(&self) -> &HashMap<String, Value> {
        &self.outputs
    }
}

impl WorkspaceHandler for MemoryHandler {
    fn read(&self, key: &str) -> Option<Value> {
        self.inputs.get(key).cloned()
    }

    fn write(&mut self, key: &str, value: Value) {
        self.outputs.insert(key.to_string(), value);
    }

    fn consume(&mut self, key: &str) -> Option<Value> {
        self.inputs.remove(key)
    }
}

/// Bytes delivered by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundChunk {
    /// Notifying characteristic (BLE only)
    pub characteristic: Option<Uuid>,
    /// Raw bytes
    pub data: Bytes,
}

impl InboundChunk {
    /// Serial chunk
    pub fn raw(data: impl Into<Bytes>) -> Self {
        Self {
            characteristic: None,
            data: data.into(),
        }
    }

    /// BLE notification
    pub fn notification(characteristic: Uuid, data: impl Into<Bytes>) -> Self {
        Self {
            characteristic: Some(characteristic),
            data: data.into(),
        }
    }
}

/// Encoded frame waiting for a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Target characteristic (BLE only)
    pub characteristic: Option<Uuid>,
    /// Wire bytes
    pub data: Bytes,
}

impl OutboundFrame {
    /// Frame for a byte stream
    pub fn raw(data: impl Into<Bytes>) -> Self {
        Self {
            characteristic: None,
            data: data.into(),
        }
    }

    /// Frame for a BLE characteristic
    pub fn to_characteristic(characteristic: Uuid, data: impl Into<Bytes>) -> Self {
        Self {
            characteristic: Some(characteristic),
            data: data.into(),
        }
    }

    /// Frame length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Is the frame empty?
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// FIFO of encoded frames with at most one in flight
#[derive(Debug, Clone, Default)]
pub struct PendingSendQueue {
    queue: VecDeque<OutboundFrame>,
    in_flight: Option<OutboundFrame>,
}

impl PendingSendQueue {
    /// Create empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame
    pub fn push(&mut self, frame: OutboundFrame) {
        if !frame.is_empty() {
            self.queue.push_back(frame);
        }
    }

    /// Drop every queued frame not yet in flight and queue `frame`
    pub fn replace(&mut self, frame: OutboundFrame) {
        self.queue.clear();
        self.push(frame);
    }

    /// Drop queued frames, leaving the in-flight one alone
    pub fn discard_queued(&mut self) {
        self.queue.clear();
    }

    /// Pop the next frame unless one is already in flight
    pub fn begin_send(&mut self) -> Option<OutboundFrame> {
        if self.in_flight.is_some() {
            return None;
        }
        let frame = self.queue.pop_front()?;
        self.in_flight = Some(frame.clone());
        Some(frame)
    }

    /// Report the in-flight frame's outcome; a failed frame goes back to
    /// the head of the queue
    pub fn complete(&mut self, ok: bool) {
        if let Some(frame) = self.in_flight.take() {
            if !ok {
                self.queue.push_front(frame);
            }
        }
    }

    /// Is a frame in flight?
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Queued frames, excluding the in-flight one
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Is nothing queued?
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop everything, including the in-flight marker
    pub fn clear(&mut self) {
        self.queue.clear();
        self.in_flight = None;
    }
}

/// GATT layout a BLE board exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BleProfile {
    /// Primary service
    pub service: Uuid,
    /// Host → board characteristic
    pub write: Uuid,
    /// Board → host characteristic
    pub notify: Uuid,
}

/// Options passed at init
#[derive(Debug, Clone, Default)]
pub struct AdapterOptions {
    /// Transport the adapter is bound to
    pub transport: Option<TransportType>,
    /// Treat DHT temperature and humidity as singleton subscriptions
    pub exclusive_dht: bool,
}

impl AdapterOptions {
    /// Is the adapter talking over BLE?
    pub fn is_bluetooth(&self) -> bool {
        self.transport == Some(TransportType::Bluetooth)
    }
}

/// Lifecycle every board family implements
pub trait DeviceAdapter: Send {
    /// Board family
    fn family(&self) -> DeviceFamily;

    /// Prepare for a new connection
    fn init(&mut self, options: &AdapterOptions);

    /// Probe frame sent right after connecting
    fn on_connect(&mut self) -> Option<OutboundFrame> {
        None
    }

    /// Is the first response acceptable?
    fn check_initial_data(&mut self, _data: &[u8]) -> bool {
        true
    }

    /// Should a received chunk be ingested at all?
    fn validate_local_data(&self, _data: &[u8]) -> bool {
        true
    }

    /// Feed transport bytes
    fn ingest(&mut self, chunk: &InboundChunk);

    /// Publish current readings
    fn export_readings(&mut self, handler: &mut dyn WorkspaceHandler);

    /// Read workspace commands and queue the frames they need
    fn import_commands(&mut self, handler: &mut dyn WorkspaceHandler);

    /// Outbound queue
    fn queue(&mut self) -> &mut PendingSendQueue;

    /// Next frame for the transport, unless one is in flight
    fn drain_outbound(&mut self) -> Option<OutboundFrame> {
        self.queue().begin_send()
    }

    /// Transport finished (or failed) writing the in-flight frame
    fn send_completed(&mut self, ok: bool) {
        self.queue().complete(ok);
    }

    /// Clear transient state without tearing the adapter down
    fn reset(&mut self);

    /// Connection closed
    fn disconnect(&mut self) {
        self.queue().clear();
        self.reset();
    }

    /// GATT layout when used over BLE
    fn ble_profile(&self) -> Option<BleProfile> {
        None
    }
}

/// Create the adapter for a family
pub fn create_adapter(family: DeviceFamily) -> Box<dyn DeviceAdapter> {
    match family {
        DeviceFamily::Arduino => Box::new(ArduinoAdapter::new()),
        DeviceFamily::ArduinoExt => Box::new(ArduinoExtAdapter::new()),
        DeviceFamily::Neobot => Box::new(NeobotAdapter::new()),
        DeviceFamily::Pico => Box::new(PicoAdapter::new()),
    }
}

/// Numeric view of a workspace value; numeric strings are accepted
pub(crate) fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Integer view of a workspace value, truncated toward zero
pub(crate) fn value_as_i64(value: &Value) -> Option<i64> {
    value_as_f64(value).map(|v| v as i64)
}

/// Byte view of a workspace value; out-of-range values are rejected
pub(crate) fn value_as_u8(value: &Value) -> Option<u8> {
    value_as_i64(value).and_then(|v| u8::try_from(v).ok())
}

/// Byte array view of a workspace value
pub(crate) fn value_as_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Array(items) => items.iter().map(value_as_u8).collect(),
        Value::String(s) => hex::decode(s.replace(' ', "")).ok(),
        _ => None,
    }
}
