//! Session driver against a scripted transport

use async_trait::async_trait;
use boardlink_core::core::device::{
    create_adapter, AdapterOptions, DeviceFamily, InboundChunk, MemoryHandler, OutboundFrame,
};
use boardlink_core::core::protocol::arduino_ext::{decode_command, Action};
use boardlink_core::core::protocol::neobot::{AppCommand, Response, SensorFrame};
use boardlink_core::core::protocol::pico::{PicoCommand, PicoPacket, UART_RX_CHARACTERISTIC, UART_TX_CHARACTERISTIC};
use boardlink_core::core::session::{BridgeSession, SessionEvent, SessionState};
use boardlink_core::core::transport::{TransportError, TransportStats, TransportTrait, TransportType};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Link {
    inbound: VecDeque<InboundChunk>,
    sent: Vec<OutboundFrame>,
}

struct LoopbackTransport {
    link: Arc<Mutex<Link>>,
    kind: TransportType,
    connected: bool,
}

#[async_trait]
impl TransportTrait for LoopbackTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn send(&mut self, frame: &OutboundFrame) -> Result<usize, TransportError> {
        self.link.lock().sent.push(frame.clone());
        Ok(frame.len())
    }

    async fn receive(&mut self) -> Result<Option<InboundChunk>, TransportError> {
        Ok(self.link.lock().inbound.pop_front())
    }

    fn transport_type(&self) -> TransportType {
        self.kind
    }

    fn connection_info(&self) -> String {
        "loopback".to_string()
    }

    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

fn session(family: DeviceFamily, kind: TransportType) -> (BridgeSession, Arc<Mutex<Link>>) {
    let link = Arc::new(Mutex::new(Link::default()));
    let transport = LoopbackTransport {
        link: link.clone(),
        kind,
        connected: false,
    };
    let options = AdapterOptions {
        transport: Some(kind),
        exclusive_dht: false,
    };
    let session = BridgeSession::new(
        Box::new(transport),
        create_adapter(family),
        options,
        Duration::from_millis(5),
    );
    (session, link)
}

#[tokio::test]
async fn test_extended_reset_sent_on_connect() {
    let (mut session, link) = session(DeviceFamily::ArduinoExt, TransportType::Serial);
    session.connect().await.unwrap();

    let sent = link.lock().sent.clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(decode_command(&sent[0].data).unwrap().action, Action::Reset);
    assert!(session.is_connected());
}

#[tokio::test]
async fn test_neobot_handshake_through_session() {
    let (mut session, link) = session(DeviceFamily::Neobot, TransportType::Serial);
    let mut events = session.subscribe();
    session.connect().await.unwrap();

    let mut handler = MemoryHandler::new();
    handler.set("frame", json!([0xA0, 0xA1]));
    session.tick(&mut handler).await.unwrap();
    assert_eq!(link.lock().sent.last().unwrap().data.to_vec(), AppCommand::ModeChange.encode());

    // A corrupted ACK is rejected before it reaches the state machine
    let mut bad_ack = Response::ConnAck.encode();
    bad_ack[5] ^= 0x01;
    link.lock().inbound.push_back(InboundChunk::raw(bad_ack));
    session.tick(&mut handler).await.unwrap();
    assert_eq!(link.lock().sent.len(), 1);

    link.lock().inbound.push_back(InboundChunk::raw(Response::ConnAck.encode()));
    session.tick(&mut handler).await.unwrap();
    assert_eq!(link.lock().sent.last().unwrap().data.to_vec(), vec![0xA0, 0xA1]);

    let mut rejected = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::ChunkRejected(_)) {
            rejected = true;
        }
    }
    assert!(rejected);
}

#[tokio::test]
async fn test_neobot_sensors_reach_workspace() {
    let (mut session, link) = session(DeviceFamily::Neobot, TransportType::Serial);
    session.connect().await.unwrap();

    let frame = SensorFrame {
        in1: 10,
        in2: 20,
        in3: 30,
        ir: 40,
        bat: 50,
    }
    .encode();
    link.lock().inbound.push_back(InboundChunk::raw(frame[..4].to_vec()));
    link.lock().inbound.push_back(InboundChunk::raw(frame[4..].to_vec()));

    let mut handler = MemoryHandler::new();
    session.tick(&mut handler).await.unwrap();
    assert_eq!(handler.get("IR"), Some(&json!(40)));
    assert_eq!(handler.get("BAT"), Some(&json!(50)));
}

#[tokio::test]
async fn test_pico_over_ble() {
    let (mut session, link) = session(DeviceFamily::Pico, TransportType::Bluetooth);
    session.connect().await.unwrap();

    let packet = PicoPacket::new(PicoCommand::ReadDigital, 15, 1).encode().to_vec();
    link.lock().inbound.push_back(InboundChunk::notification(UART_TX_CHARACTERISTIC, packet));

    let mut handler = MemoryHandler::new();
    handler.set("digital_2", json!(1));
    session.tick(&mut handler).await.unwrap();

    assert_eq!(handler.get("digital_15"), Some(&json!(1)));
    let sent = link.lock().sent.clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].characteristic, Some(UART_RX_CHARACTERISTIC));
    assert_eq!(PicoPacket::decode(&sent[0].data).unwrap().pin, 2);
}

#[tokio::test]
async fn test_disconnect_resets_state() {
    let (mut session, _link) = session(DeviceFamily::Arduino, TransportType::Serial);
    session.connect().await.unwrap();
    session.disconnect().await.unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);

    let mut handler = MemoryHandler::new();
    assert!(session.tick(&mut handler).await.is_err());
}
