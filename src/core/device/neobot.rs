//! Neobot adapter

use serde_json::json;

use super::{
    value_as_bytes, value_as_u8, AdapterOptions, DeviceAdapter, DeviceFamily, InboundChunk,
    OutboundFrame, PendingSendQueue, WorkspaceHandler,
};
use crate::core::protocol::neobot::{
    decode_inbound, has_valid_frame, ControlFrame, InboundFrame, SensorFrame, CONTROL_KEYS,
    INBOUND_FRAMING, RESPONSE_FRAME_LEN, RESPONSE_MAGIC, SENSOR_FRAME_LEN, SENSOR_KEYS,
    SENSOR_MAGIC,
};
use crate::core::protocol::FrameDecoder;
use crate::core::state_machine::{HandshakeMachine, LinkMode, Pending};

/// Adapter for the Neobot robot controller
#[derive(Debug)]
pub struct NeobotAdapter {
    framer: FrameDecoder,
    machine: HandshakeMachine,
    sensors: Option<SensorFrame>,
    queue: PendingSendQueue,
}

impl Default for NeobotAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl NeobotAdapter {
    /// Create adapter
    pub fn new() -> Self {
        Self {
            framer: FrameDecoder::new(INBOUND_FRAMING),
            machine: HandshakeMachine::new(),
            sensors: None,
            queue: PendingSendQueue::new(),
        }
    }

    /// Handshake state
    pub fn machine(&self) -> &HandshakeMachine {
        &self.machine
    }

    /// Current link mode
    pub fn mode(&self) -> LinkMode {
        self.machine.mode()
    }

    fn read_control(handler: &dyn WorkspaceHandler) -> Option<ControlFrame> {
        let mut values = [0u8; 8];
        for (slot, key) in values.iter_mut().zip(CONTROL_KEYS) {
            *slot = handler.read(key).as_ref().and_then(value_as_u8)?;
        }
        Some(ControlFrame::from_values(values))
    }
}

impl DeviceAdapter for NeobotAdapter {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Neobot
    }

    fn init(&mut self, _options: &AdapterOptions) {
        self.queue.clear();
        self.reset();
    }

    fn validate_local_data(&self, data: &[u8]) -> bool {
        let (magic, len) = if self.machine.expects_sensor_frames() {
            (&SENSOR_MAGIC[..], SENSOR_FRAME_LEN)
        } else {
            (&RESPONSE_MAGIC[..], RESPONSE_FRAME_LEN)
        };

        // Only a complete leading frame can be judged; fragments are left
        // to reassembly.
        if data.len() >= len && data.starts_with(magic) {
            let valid = has_valid_frame(data, magic, len);
            if !valid {
                tracing::warn!("Checksum failed on {}", hex::encode(&data[..len]));
            }
            valid
        } else {
            true
        }
    }

    fn ingest(&mut self, chunk: &InboundChunk) {
        for frame in self.framer.push(&chunk.data) {
            match decode_inbound(&frame) {
                Ok(InboundFrame::Sensor(sensors)) => {
                    if self.machine.mode().streams_sensors() {
                        self.sensors = Some(sensors);
                    }
                }
                Ok(InboundFrame::Response(response)) => {
                    let outcome = self.machine.handle_response(response);
                    tracing::debug!("{} -> {:?}", response.name(), outcome);
                }
                Err(e) => tracing::warn!("Dropping frame {}: {}", hex::encode(&frame), e),
            }
        }
    }

    fn export_readings(&mut self, handler: &mut dyn WorkspaceHandler) {
        if !self.machine.mode().streams_sensors() {
            return;
        }
        if let Some(sensors) = self.sensors.take() {
            for (key, value) in SENSOR_KEYS.iter().zip(sensors.values()) {
                handler.write(key, json!(value));
            }
        }
    }

    fn import_commands(&mut self, handler: &mut dyn WorkspaceHandler) {
        let upload = handler
            .consume("frame")
            .as_ref()
            .and_then(value_as_bytes)
            .filter(|payload| !payload.is_empty());

        if let Some(payload) = upload {
            self.machine.request_upload(payload);
        }

        let control = if self.machine.accepts_control() {
            Self::read_control(handler)
        } else {
            None
        };

        match self.machine.poll_outbound(control) {
            Some(frame) => self.queue.replace(OutboundFrame::raw(frame)),
            // A mode change that failed to send stays queued for retry
            None if self.machine.pending() == Some(Pending::ModeChange) => {}
            None => self.queue.discard_queued(),
        }
    }

    fn queue(&mut self) -> &mut PendingSendQueue {
        &mut self.queue
    }

    fn reset(&mut self) {
        self.machine.reset();
        self.framer.clear();
        self.sensors = None;
    }
}
