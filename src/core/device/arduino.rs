//! Generic Arduino adapter

use serde_json::{json, Value};

use super::{
    value_as_u8, AdapterOptions, DeviceAdapter, DeviceFamily, InboundChunk, OutboundFrame,
    PendingSendQueue, WorkspaceHandler,
};
use crate::core::protocol::arduino::{
    GenericCommand, GenericDecoder, GenericReading, ANALOG_PORTS, DIGITAL_PORTS,
};

/// Adapter for boards running the single-byte query firmware
///
/// Every tick rebuilds the whole query (subscriptions plus output levels),
/// so only the latest query is kept queued.
#[derive(Debug)]
pub struct ArduinoAdapter {
    decoder: GenericDecoder,
    digital: [Option<u8>; DIGITAL_PORTS],
    analog: [Option<u16>; ANALOG_PORTS],
    readable_ports: Vec<u8>,
    outputs: [Option<u8>; DIGITAL_PORTS],
    queue: PendingSendQueue,
}

impl Default for ArduinoAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ArduinoAdapter {
    /// Create adapter
    pub fn new() -> Self {
        Self {
            decoder: GenericDecoder::new(),
            digital: [None; DIGITAL_PORTS],
            analog: [None; ANALOG_PORTS],
            readable_ports: Vec::new(),
            outputs: [None; DIGITAL_PORTS],
            queue: PendingSendQueue::new(),
        }
    }

    /// Last digital level reported on a port
    pub fn digital(&self, port: usize) -> Option<u8> {
        self.digital.get(port).copied().flatten()
    }

    /// Last analog sample reported on a channel
    pub fn analog(&self, channel: usize) -> Option<u16> {
        self.analog.get(channel).copied().flatten()
    }

    fn build_query(&self) -> Vec<u8> {
        let mut query = Vec::new();

        for &port in &self.readable_ports {
            GenericCommand::Subscribe { port }.encode_into(&mut query);
        }

        for (port, value) in self.outputs.iter().enumerate() {
            let port = port as u8;
            if self.readable_ports.contains(&port) {
                continue;
            }
            if let Some(value) = *value {
                GenericCommand::for_value(port, value).encode_into(&mut query);
            }
        }

        query
    }
}

fn parse_ports(value: &Value) -> Vec<u8> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map.values().collect(),
        _ => Vec::new(),
    };
    items.into_iter().filter_map(value_as_u8).collect()
}

impl DeviceAdapter for ArduinoAdapter {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Arduino
    }

    fn init(&mut self, _options: &AdapterOptions) {
        self.decoder.reset();
        self.queue.clear();
    }

    fn ingest(&mut self, chunk: &InboundChunk) {
        for reading in self.decoder.feed(&chunk.data) {
            match reading {
                GenericReading::Digital { port, value } => {
                    if let Some(slot) = self.digital.get_mut(usize::from(port)) {
                        *slot = Some(value);
                    }
                }
                GenericReading::Analog { port, value } => {
                    if let Some(slot) = self.analog.get_mut(usize::from(port)) {
                        *slot = Some(value);
                    } else {
                        tracing::debug!("Analog report for unknown channel {}", port);
                    }
                }
            }
        }
    }

    fn export_readings(&mut self, handler: &mut dyn WorkspaceHandler) {
        for (channel, value) in self.analog.iter().enumerate() {
            if let Some(value) = value {
                handler.write(&format!("a{}", channel), json!(value));
            }
        }
        for (port, value) in self.digital.iter().enumerate() {
            if let Some(value) = value {
                handler.write(&port.to_string(), json!(value));
            }
        }
    }

    fn import_commands(&mut self, handler: &mut dyn WorkspaceHandler) {
        self.readable_ports = handler
            .read("readablePorts")
            .map(|value| parse_ports(&value))
            .unwrap_or_default();

        for (port, slot) in self.outputs.iter_mut().enumerate() {
            *slot = handler.read(&port.to_string()).as_ref().and_then(value_as_u8);
        }

        let query = self.build_query();
        if query.is_empty() {
            self.queue.discard_queued();
        } else {
            tracing::trace!("Generic query {}", hex::encode(&query));
            self.queue.replace(OutboundFrame::raw(query));
        }
    }

    fn queue(&mut self) -> &mut PendingSendQueue {
        &mut self.queue
    }

    fn reset(&mut self) {
        self.decoder.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::device::MemoryHandler;

    #[test]
    fn test_query_skips_readable_ports() {
        let mut adapter = ArduinoAdapter::new();
        let mut handler = MemoryHandler::new();
        handler.set("readablePorts", json!([2]));
        handler.set("2", json!(255));
        handler.set("5", json!(255));
        handler.set("6", json!(128));

        adapter.import_commands(&mut handler);
        let frame = adapter.drain_outbound().unwrap();
        assert_eq!(frame.data.as_ref(), &[(5 << 5) + (2 << 1), 235, 205, 0]);
    }

    #[test]
    fn test_query_replaced_each_tick() {
        let mut adapter = ArduinoAdapter::new();
        let mut handler = MemoryHandler::new();
        handler.set("3", json!(0));
        adapter.import_commands(&mut handler);
        handler.set("3", json!(255));
        adapter.import_commands(&mut handler);

        assert_eq!(adapter.queue().len(), 1);
        assert_eq!(adapter.drain_outbound().unwrap().data.as_ref(), &[(7 << 5) + (3 << 1) + 1]);
    }

    #[test]
    fn test_ingest_and_export() {
        let mut adapter = ArduinoAdapter::new();
        let mut bytes = GenericReading::Analog { port: 2, value: 700 }.encode();
        bytes.extend(GenericReading::Digital { port: 9, value: 1 }.encode());

        adapter.ingest(&InboundChunk::raw(bytes[..1].to_vec()));
        adapter.ingest(&InboundChunk::raw(bytes[1..].to_vec()));

        let mut handler = MemoryHandler::new();
        adapter.export_readings(&mut handler);
        assert_eq!(handler.get("a2"), Some(&json!(700)));
        assert_eq!(handler.get("9"), Some(&json!(1)));
        assert_eq!(handler.get("a0"), None);
    }
}
