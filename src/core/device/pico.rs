//! Pico adapter

use serde_json::json;

use super::{
    value_as_i64, AdapterOptions, BleProfile, DeviceAdapter, DeviceFamily, InboundChunk,
    OutboundFrame, PendingSendQueue, WorkspaceHandler,
};
use crate::core::protocol::pico::{
    PicoCommand, PicoPacket, ANALOG_CHANNELS, DIGITAL_PINS, INBOUND_FRAMING, UART_RX_CHARACTERISTIC,
    UART_SERVICE, UART_TX_CHARACTERISTIC,
};
use crate::core::protocol::FrameDecoder;

/// Adapter for the Pico firmware, over serial or Nordic UART BLE
#[derive(Debug)]
pub struct PicoAdapter {
    framer: FrameDecoder,
    bluetooth: bool,
    digital: [u16; DIGITAL_PINS],
    analog: [u16; ANALOG_CHANNELS],
    remote_digital: [u16; DIGITAL_PINS],
    last_pwm: [Option<u16>; DIGITAL_PINS],
    queue: PendingSendQueue,
}

impl Default for PicoAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PicoAdapter {
    /// Create adapter
    pub fn new() -> Self {
        Self {
            framer: FrameDecoder::new(INBOUND_FRAMING),
            bluetooth: false,
            digital: [0; DIGITAL_PINS],
            analog: [0; ANALOG_CHANNELS],
            remote_digital: [0; DIGITAL_PINS],
            last_pwm: [None; DIGITAL_PINS],
            queue: PendingSendQueue::new(),
        }
    }

    /// Bytes skipped while resynchronising on the inbound stream
    pub fn discarded(&self) -> u64 {
        self.framer.discarded()
    }

    fn apply(&mut self, packet: PicoPacket) {
        let pin = usize::from(packet.pin);
        match packet.command {
            PicoCommand::ReadDigital => {
                if let Some(slot) = self.digital.get_mut(pin) {
                    *slot = packet.value;
                }
            }
            PicoCommand::ReadAnalog => {
                if let Some(slot) = self.analog.get_mut(pin) {
                    *slot = packet.value;
                }
            }
            command => tracing::debug!("Ignoring {} from board", command.name()),
        }
    }
}

fn read_u16(handler: &dyn WorkspaceHandler, key: &str) -> Option<u16> {
    let value = handler.read(key)?;
    match value_as_i64(&value).and_then(|v| u16::try_from(v).ok()) {
        Some(v) => Some(v),
        None => {
            tracing::warn!("Ignoring {} = {}", key, value);
            None
        }
    }
}

impl DeviceAdapter for PicoAdapter {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Pico
    }

    fn init(&mut self, options: &AdapterOptions) {
        self.bluetooth = options.is_bluetooth();
        self.framer.clear();
        self.queue.clear();
    }

    fn ingest(&mut self, chunk: &InboundChunk) {
        if let Some(characteristic) = chunk.characteristic {
            if characteristic != UART_TX_CHARACTERISTIC {
                tracing::trace!("Ignoring notification from {}", characteristic);
                return;
            }
        }

        for frame in self.framer.push(&chunk.data) {
            match PicoPacket::decode(&frame) {
                Ok(packet) => self.apply(packet),
                Err(e) => tracing::warn!("Dropping packet {}: {}", hex::encode(&frame), e),
            }
        }
    }

    fn export_readings(&mut self, handler: &mut dyn WorkspaceHandler) {
        for (pin, value) in self.digital.iter().enumerate() {
            handler.write(&format!("digital_{}", pin), json!(value));
        }
        for (channel, value) in self.analog.iter().enumerate() {
            handler.write(&format!("analog_{}", channel), json!(value));
        }
    }

    fn import_commands(&mut self, handler: &mut dyn WorkspaceHandler) {
        let mut buffer = Vec::new();

        for pin in 0..DIGITAL_PINS {
            if let Some(value) = read_u16(handler, &format!("digital_{}", pin)) {
                if self.remote_digital[pin] != value {
                    self.remote_digital[pin] = value;
                    let packet = PicoPacket::new(PicoCommand::WriteDigital, pin as u8, value);
                    buffer.extend_from_slice(&packet.encode());
                }
            }
        }

        for pin in 0..DIGITAL_PINS {
            if let Some(value) = read_u16(handler, &format!("pwm_{}", pin)) {
                if self.last_pwm[pin] != Some(value) {
                    self.last_pwm[pin] = Some(value);
                    let packet = PicoPacket::new(PicoCommand::WritePwm, pin as u8, value);
                    buffer.extend_from_slice(&packet.encode());
                }
            }
        }

        if buffer.is_empty() {
            return;
        }
        tracing::debug!("Pico commands {}", hex::encode(&buffer));

        let frame = if self.bluetooth {
            OutboundFrame::to_characteristic(UART_RX_CHARACTERISTIC, buffer)
        } else {
            OutboundFrame::raw(buffer)
        };
        self.queue.push(frame);
    }

    fn queue(&mut self) -> &mut PendingSendQueue {
        &mut self.queue
    }

    fn reset(&mut self) {
        self.framer.clear();
        self.digital = [0; DIGITAL_PINS];
        self.analog = [0; ANALOG_CHANNELS];
        self.last_pwm = [None; DIGITAL_PINS];
    }

    fn ble_profile(&self) -> Option<BleProfile> {
        Some(BleProfile {
            service: UART_SERVICE,
            write: UART_RX_CHARACTERISTIC,
            notify: UART_TX_CHARACTERISTIC,
        })
    }
}
