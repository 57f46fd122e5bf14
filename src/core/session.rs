//! Bridge session
//!
//! A session owns one transport and one device adapter and drives the
//! adapter on a fixed cadence. Each tick:
//!
//! 1. receive every waiting chunk, gate it through `validate_local_data`,
//!    then `ingest` it
//! 2. `export_readings` into the workspace
//! 3. `import_commands` from the workspace
//! 4. `drain_outbound` at most one frame, send it, report `send_completed`
//!
//! Observers subscribe to [`SessionEvent`]s on a broadcast channel.

use super::device::{create_adapter, AdapterOptions, DeviceAdapter, WorkspaceHandler};
use super::transport::{create_transport, TransportConfig, TransportError, TransportStats, TransportTrait};
use crate::config::BridgeConfig;
use bytes::Bytes;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Chunks read per tick before moving on to the workspace
const MAX_CHUNKS_PER_TICK: usize = 64;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected
    Disconnected,
    /// Connecting in progress
    Connecting,
    /// Connected and active
    Connected,
    /// Connection error occurred
    Error,
}

/// Session events
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// State changed
    StateChanged(SessionState),
    /// Chunk accepted and ingested
    ChunkReceived(Bytes),
    /// Chunk dropped by the adapter's validation
    ChunkRejected(Bytes),
    /// First response did not look like the expected firmware
    FirmwareMismatch(Bytes),
    /// Frame written to the transport
    FrameSent(Bytes),
    /// Transport error; the frame stays queued for the next tick
    Error(String),
    /// Connection statistics updated
    StatsUpdated(TransportStats),
}

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Tick or send without a connection
    #[error("Session is not connected")]
    NotConnected,
}

/// One board bridged to one workspace
pub struct BridgeSession {
    id: Uuid,
    transport: Box<dyn TransportTrait>,
    adapter: Box<dyn DeviceAdapter>,
    options: AdapterOptions,
    poll_interval: Duration,
    state: Arc<RwLock<SessionState>>,
    event_tx: broadcast::Sender<SessionEvent>,
    awaiting_initial_data: bool,
}

impl BridgeSession {
    /// Build a session from parts
    pub fn new(
        transport: Box<dyn TransportTrait>,
        adapter: Box<dyn DeviceAdapter>,
        options: AdapterOptions,
        poll_interval: Duration,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            id: Uuid::new_v4(),
            transport,
            adapter,
            options,
            poll_interval,
            state: Arc::new(RwLock::new(SessionState::Disconnected)),
            event_tx,
            awaiting_initial_data: false,
        }
    }

    /// Build the adapter and transport a config describes
    ///
    /// A Bluetooth transport takes its GATT layout from the adapter when the
    /// board family declares one.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, SessionError> {
        let adapter = create_adapter(config.device);

        let transport_config = match (&config.transport, adapter.ble_profile()) {
            (TransportConfig::Bluetooth(ble), Some(profile)) => {
                TransportConfig::Bluetooth(ble.clone().with_profile(profile))
            }
            (other, _) => other.clone(),
        };
        let transport = create_transport(transport_config)?;

        Ok(Self::new(
            transport,
            adapter,
            config.adapter_options(),
            config.poll_interval(),
        ))
    }

    /// Session ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// The adapter being driven
    pub fn adapter(&self) -> &dyn DeviceAdapter {
        self.adapter.as_ref()
    }

    /// Connection info string
    pub fn connection_info(&self) -> String {
        self.transport.connection_info()
    }

    /// Transport statistics
    pub fn stats(&self) -> TransportStats {
        self.transport.stats()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
        let _ = self.event_tx.send(SessionEvent::StateChanged(state));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Open the transport, initialise the adapter and send its probe frame
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        self.set_state(SessionState::Connecting);

        if let Err(e) = self.transport.connect().await {
            self.set_state(SessionState::Error);
            return Err(e.into());
        }

        self.adapter.init(&self.options);
        self.awaiting_initial_data = true;
        self.set_state(SessionState::Connected);
        tracing::info!(
            "{} session {} on {}",
            self.adapter.family(),
            self.id,
            self.transport.connection_info()
        );

        if let Some(probe) = self.adapter.on_connect() {
            tracing::debug!("Probe {}", hex::encode(&probe.data));
            self.adapter.queue().push(probe);
            self.flush_one().await?;
        }

        Ok(())
    }

    /// Run one poll tick against the workspace
    pub async fn tick(&mut self, handler: &mut dyn WorkspaceHandler) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }

        handler.begin_tick();
        self.receive_pending().await?;
        self.adapter.export_readings(handler);
        self.adapter.import_commands(handler);
        self.flush_one().await?;
        handler.end_tick();

        Ok(())
    }

    /// Tick on the poll interval until `shutdown` resolves or the link drops
    pub async fn run<F>(&mut self, handler: &mut dyn WorkspaceHandler, shutdown: F) -> Result<(), SessionError>
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    self.tick(handler).await?;
                }
            }
        }

        self.emit(SessionEvent::StatsUpdated(self.transport.stats()));
        Ok(())
    }

    /// Clear adapter queues and release the transport
    pub async fn disconnect(&mut self) -> Result<(), SessionError> {
        self.adapter.disconnect();
        self.awaiting_initial_data = false;
        let result = self.transport.disconnect().await;
        self.set_state(SessionState::Disconnected);
        result.map_err(Into::into)
    }

    async fn receive_pending(&mut self) -> Result<(), SessionError> {
        for _ in 0..MAX_CHUNKS_PER_TICK {
            let chunk = match self.transport.receive().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => return Err(self.link_lost(e)),
            };

            if chunk.data.is_empty() {
                continue;
            }

            if self.awaiting_initial_data {
                if !self.adapter.check_initial_data(&chunk.data) {
                    tracing::warn!("Unexpected firmware response {}", hex::encode(&chunk.data));
                    self.emit(SessionEvent::FirmwareMismatch(chunk.data));
                    continue;
                }
                self.awaiting_initial_data = false;
            }

            if !self.adapter.validate_local_data(&chunk.data) {
                self.emit(SessionEvent::ChunkRejected(chunk.data));
                continue;
            }

            tracing::trace!("RX {}", hex::encode(&chunk.data));
            self.adapter.ingest(&chunk);
            self.emit(SessionEvent::ChunkReceived(chunk.data));
        }
        Ok(())
    }

    async fn flush_one(&mut self) -> Result<(), SessionError> {
        let Some(frame) = self.adapter.drain_outbound() else {
            return Ok(());
        };

        match self.transport.send(&frame).await {
            Ok(_) => {
                tracing::debug!("TX {}", hex::encode(&frame.data));
                self.adapter.send_completed(true);
                self.emit(SessionEvent::FrameSent(frame.data));
                Ok(())
            }
            Err(e) => {
                self.adapter.send_completed(false);
                match e {
                    TransportError::Disconnected | TransportError::NotConnected => Err(self.link_lost(e)),
                    other => {
                        tracing::warn!("Send failed, retrying next tick: {}", other);
                        self.emit(SessionEvent::Error(other.to_string()));
                        Ok(())
                    }
                }
            }
        }
    }

    fn link_lost(&mut self, error: TransportError) -> SessionError {
        tracing::warn!("Link lost: {}", error);
        self.adapter.disconnect();
        self.emit(SessionEvent::Error(error.to_string()));
        self.set_state(SessionState::Disconnected);
        error.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::device::{ArduinoAdapter, InboundChunk, MemoryHandler, OutboundFrame};
    use crate::core::protocol::arduino::GenericReading;
    use crate::core::transport::TransportType;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Script {
        inbound: VecDeque<Result<InboundChunk, TransportError>>,
        sent: Vec<Vec<u8>>,
        fail_sends: usize,
    }

    struct ScriptedTransport {
        script: Arc<Mutex<Script>>,
        connected: bool,
    }

    #[async_trait]
    impl TransportTrait for ScriptedTransport {
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
            let mut script = self.script.lock();
            if script.fail_sends > 0 {
                script.fail_sends -= 1;
                return Err(TransportError::SendError("busy".to_string()));
            }
            script.sent.push(frame.data.to_vec());
            Ok(frame.len())
        }

        async fn receive(&mut self) -> Result<Option<InboundChunk>, TransportError> {
            self.script.lock().inbound.pop_front().transpose()
        }

        fn transport_type(&self) -> TransportType {
            TransportType::Serial
        }

        fn connection_info(&self) -> String {
            "scripted".to_string()
        }

        fn stats(&self) -> TransportStats {
            TransportStats::default()
        }
    }

    fn session(script: &Arc<Mutex<Script>>) -> BridgeSession {
        let transport = ScriptedTransport {
            script: script.clone(),
            connected: false,
        };
        BridgeSession::new(
            Box::new(transport),
            Box::new(ArduinoAdapter::new()),
            AdapterOptions::default(),
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    async fn test_tick_requires_connection() {
        let script = Arc::new(Mutex::new(Script::default()));
        let mut session = session(&script);
        let mut handler = MemoryHandler::new();
        assert!(matches!(session.tick(&mut handler).await, Err(SessionError::NotConnected)));
    }

    #[tokio::test]
    async fn test_tick_round_trip() {
        let script = Arc::new(Mutex::new(Script::default()));
        let report = GenericReading::Digital { port: 7, value: 1 }.encode();
        script.lock().inbound.push_back(Ok(InboundChunk::raw(report)));

        let mut session = session(&script);
        let mut events = session.subscribe();
        session.connect().await.unwrap();

        let mut handler = MemoryHandler::new();
        handler.set("readablePorts", json!([7]));
        handler.set("5", json!(255));
        session.tick(&mut handler).await.unwrap();

        assert_eq!(handler.get("7"), Some(&json!(1)));
        assert_eq!(script.lock().sent, vec![vec![(5 << 5) + (7 << 1), 235]]);
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::StateChanged(SessionState::Connecting)
        ));
    }

    #[tokio::test]
    async fn test_failed_send_retried() {
        let script = Arc::new(Mutex::new(Script::default()));
        script.lock().fail_sends = 1;

        let mut session = session(&script);
        session.connect().await.unwrap();

        let mut handler = MemoryHandler::new();
        handler.set("5", json!(255));
        session.tick(&mut handler).await.unwrap();
        assert!(script.lock().sent.is_empty());

        session.tick(&mut handler).await.unwrap();
        assert_eq!(script.lock().sent, vec![vec![235]]);
    }

    #[tokio::test]
    async fn test_disconnect_surfaces() {
        let script = Arc::new(Mutex::new(Script::default()));
        script.lock().inbound.push_back(Err(TransportError::Disconnected));

        let mut session = session(&script);
        session.connect().await.unwrap();

        let mut handler = MemoryHandler::new();
        let result = session.tick(&mut handler).await;
        assert!(matches!(result, Err(SessionError::Transport(TransportError::Disconnected))));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let script = Arc::new(Mutex::new(Script::default()));
        let mut session = session(&script);
        session.connect().await.unwrap();

        let mut handler = MemoryHandler::new();
        handler.set("13", json!(1));
        session
            .run(&mut handler, tokio::time::sleep(Duration::from_millis(30)))
            .await
            .unwrap();

        assert!(!script.lock().sent.is_empty());
        session.disconnect().await.unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
