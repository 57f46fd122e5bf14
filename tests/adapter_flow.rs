//! Adapter lifecycle against an in-memory workspace

use boardlink_core::core::device::{create_adapter, AdapterOptions, DeviceAdapter, DeviceFamily, InboundChunk, MemoryHandler};
use boardlink_core::core::protocol::arduino::{decode_commands, GenericCommand, GenericReading};
use boardlink_core::core::protocol::arduino_ext::{
    decode_command, encode_reading, Action, ExtReading, SensorKind, SensorValue,
};
use boardlink_core::core::protocol::neobot::{AppCommand, Response, SensorFrame};
use boardlink_core::core::protocol::pico::{PicoCommand, PicoPacket};
use boardlink_core::core::protocol::Port;
use serde_json::json;

fn tick(adapter: &mut dyn DeviceAdapter, handler: &mut MemoryHandler) -> Option<Vec<u8>> {
    adapter.export_readings(handler);
    adapter.import_commands(handler);
    let frame = adapter.drain_outbound()?;
    adapter.send_completed(true);
    Some(frame.data.to_vec())
}

#[test]
fn test_generic_digital_and_analog_outputs() {
    let mut adapter = create_adapter(DeviceFamily::Arduino);
    adapter.init(&AdapterOptions::default());
    let mut handler = MemoryHandler::new();

    handler.set("5", json!(255));
    assert_eq!(tick(adapter.as_mut(), &mut handler), Some(vec![235]));

    handler.set("5", json!(128));
    let frame = tick(adapter.as_mut(), &mut handler).unwrap();
    assert_eq!(frame, vec![203, 0]);
    assert_eq!(
        decode_commands(&frame).unwrap(),
        vec![GenericCommand::SetAnalog { port: 5, value: 128 }]
    );
}

#[test]
fn test_generic_analog_split_across_chunks() {
    let mut adapter = create_adapter(DeviceFamily::Arduino);
    let report = GenericReading::Analog { port: 3, value: 700 }.encode();

    adapter.ingest(&InboundChunk::raw(report[..1].to_vec()));
    adapter.ingest(&InboundChunk::raw(report[1..].to_vec()));

    let mut handler = MemoryHandler::new();
    adapter.export_readings(&mut handler);
    assert_eq!(handler.get("a3"), Some(&json!(700)));
}

#[test]
fn test_extended_reset_then_commands() {
    let mut adapter = create_adapter(DeviceFamily::ArduinoExt);
    adapter.init(&AdapterOptions::default());

    let reset = adapter.on_connect().unwrap();
    let command = decode_command(&reset.data).unwrap();
    assert_eq!(command.action, Action::Reset);
    assert_eq!(command.seq, 0);

    let mut handler = MemoryHandler::new();
    handler.set("SET", json!({ "13": { "type": 1, "data": 255, "time": 1 } }));
    let frame = tick(adapter.as_mut(), &mut handler).unwrap();

    let command = decode_command(&frame).unwrap();
    assert_eq!(command.action, Action::Set);
    assert_eq!(command.kind, SensorKind::Digital);
    assert_eq!(command.port, Port::Pin(13));
    // RESET and SET reuse the index; only GET advances it
    assert_eq!(command.seq, 0);

    // Same command at a later time is a duplicate
    handler.set("SET", json!({ "13": { "type": 1, "data": 255, "time": 2 } }));
    assert_eq!(tick(adapter.as_mut(), &mut handler), None);
}

#[test]
fn test_extended_singleton_ultrasonic_moves_port() {
    let mut adapter = create_adapter(DeviceFamily::ArduinoExt);
    adapter.init(&AdapterOptions::default());
    let mut handler = MemoryHandler::new();

    handler.set("GET", json!({ "7": { "port": [2, 3], "time": 1 } }));
    assert!(tick(adapter.as_mut(), &mut handler).is_some());

    handler.set("GET", json!({ "7": { "port": [4, 5], "time": 2 } }));
    let frame = tick(adapter.as_mut(), &mut handler).unwrap();
    assert_eq!(decode_command(&frame).unwrap().port, Port::Pair(4, 5));
}

#[test]
fn test_extended_readings_exported() {
    let mut adapter = create_adapter(DeviceFamily::ArduinoExt);
    let mut bytes = encode_reading(&ExtReading {
        kind: SensorKind::Analog,
        port: 2,
        value: SensorValue::Float(3.25),
    });
    bytes.extend(encode_reading(&ExtReading {
        kind: SensorKind::PulseIn,
        port: 7,
        value: SensorValue::Short(1200),
    }));
    adapter.ingest(&InboundChunk::raw(bytes));

    let mut handler = MemoryHandler::new();
    adapter.export_readings(&mut handler);
    assert_eq!(handler.get("a2"), Some(&json!(3.25)));
    assert_eq!(handler.get("PULSEIN"), Some(&json!({ "7": 1200 })));
}

#[test]
fn test_neobot_upload_after_ack() {
    let mut adapter = create_adapter(DeviceFamily::Neobot);
    adapter.init(&AdapterOptions::default());
    let mut handler = MemoryHandler::new();

    handler.set("frame", json!("0102"));
    assert_eq!(tick(adapter.as_mut(), &mut handler), Some(AppCommand::ModeChange.encode()));

    // Sensor frames are not expected while the mode change is pending
    let sensors = SensorFrame {
        bat: 80,
        ..SensorFrame::default()
    }
    .encode();
    assert!(adapter.validate_local_data(&sensors));

    let ack = Response::ConnAck.encode();
    assert!(adapter.validate_local_data(&ack));
    adapter.ingest(&InboundChunk::raw(ack));
    assert_eq!(tick(adapter.as_mut(), &mut handler), Some(vec![0x01, 0x02]));
}

#[test]
fn test_neobot_nack_discards_upload() {
    let mut adapter = create_adapter(DeviceFamily::Neobot);
    let mut handler = MemoryHandler::new();

    handler.set("frame", json!([9, 9]));
    tick(adapter.as_mut(), &mut handler);
    adapter.ingest(&InboundChunk::raw(Response::ConnNack.encode()));

    assert_eq!(tick(adapter.as_mut(), &mut handler), None);
    adapter.ingest(&InboundChunk::raw(
        SensorFrame {
            in1: 7,
            ..SensorFrame::default()
        }
        .encode(),
    ));
    adapter.export_readings(&mut handler);
    assert_eq!(handler.get("IN1"), Some(&json!(7)));
}

#[test]
fn test_pico_garbage_then_packet() {
    let mut adapter = create_adapter(DeviceFamily::Pico);
    let mut bytes = vec![0x42];
    bytes.extend_from_slice(&PicoPacket::new(PicoCommand::ReadAnalog, 2, 4095).encode());
    adapter.ingest(&InboundChunk::raw(bytes));

    let mut handler = MemoryHandler::new();
    adapter.export_readings(&mut handler);
    assert_eq!(handler.get("analog_2"), Some(&json!(4095)));
}

#[test]
fn test_disconnect_clears_queue() {
    for family in DeviceFamily::ALL {
        let mut adapter = create_adapter(family);
        adapter.init(&AdapterOptions::default());
        let mut handler = MemoryHandler::new();
        handler.set("5", json!(255));
        handler.set("pwm_5", json!(10));
        handler.set("frame", json!([1]));
        handler.set("SET", json!({ "5": { "type": 3, "data": 10, "time": 1 } }));

        adapter.import_commands(&mut handler);
        adapter.disconnect();
        assert!(adapter.drain_outbound().is_none(), "{} kept frames", family);
        assert_eq!(adapter.family(), family);
    }
}
