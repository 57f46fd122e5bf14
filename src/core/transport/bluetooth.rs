//! Bluetooth LE transport
//!
//! Connects to a GATT peripheral by advertised name or address, subscribes
//! to the notify characteristic and forwards every notification, tagged with
//! its characteristic, to [`TransportTrait::receive`].

use super::{TransportError, TransportStats, TransportTrait, TransportType};
use crate::core::device::{BleProfile, InboundChunk, OutboundFrame};
use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Bluetooth connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Device name or address
    pub device: String,
    /// Primary service
    pub service: Uuid,
    /// Host → board characteristic
    pub write_characteristic: Uuid,
    /// Board → host characteristic
    pub notify_characteristic: Uuid,
    /// Scan duration before looking for the device
    pub scan_secs: u64,
    /// Connection timeout in seconds
    pub timeout_secs: u64,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        // Nordic UART Service (NUS)
        Self {
            device: String::new(),
            service: Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E),
            write_characteristic: Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E),
            notify_characteristic: Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E),
            scan_secs: 3,
            timeout_secs: 10,
        }
    }
}

impl BluetoothConfig {
    /// Configuration for a named device with the default service
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            ..Self::default()
        }
    }

    /// Use the GATT layout a board adapter declares
    #[must_use]
    pub fn with_profile(mut self, profile: BleProfile) -> Self {
        self.service = profile.service;
        self.write_characteristic = profile.write;
        self.notify_characteristic = profile.notify;
        self
    }
}

/// Bluetooth BLE transport
pub struct BluetoothTransport {
    config: BluetoothConfig,
    adapter: Option<Adapter>,
    peripheral: Option<Peripheral>,
    characteristics: Vec<Characteristic>,
    write_char: Option<Characteristic>,
    stats: Arc<RwLock<TransportStats>>,
    connected_at: Option<Instant>,
    rx: Option<mpsc::UnboundedReceiver<InboundChunk>>,
    notification_task: Option<tokio::task::JoinHandle<()>>,
}

impl BluetoothTransport {
    /// Create a new Bluetooth transport
    pub fn new(config: BluetoothConfig) -> Self {
        Self {
            config,
            adapter: None,
            peripheral: None,
            characteristics: Vec::new(),
            write_char: None,
            stats: Arc::new(RwLock::new(TransportStats::default())),
            connected_at: None,
            rx: None,
            notification_task: None,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &BluetoothConfig {
        &self.config
    }

    /// Find peripheral by name or address
    async fn find_peripheral(&self, adapter: &Adapter) -> Result<Peripheral, TransportError> {
        let peripherals = adapter.peripherals().await
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to get peripherals: {}", e)))?;

        for peripheral in peripherals {
            if let Ok(Some(props)) = peripheral.properties().await {
                let name = props.local_name.unwrap_or_default();
                let address = peripheral.id().to_string();

                if name == self.config.device || address == self.config.device {
                    return Ok(peripheral);
                }
            }
        }

        Err(TransportError::ConnectionFailed(format!("Device '{}' not found", self.config.device)))
    }

    /// Find characteristics after connection
    async fn discover_characteristics(&mut self, peripheral: &Peripheral) -> Result<Characteristic, TransportError> {
        peripheral.discover_services().await
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to discover services: {}", e)))?;

        self.characteristics = peripheral
            .characteristics()
            .into_iter()
            .filter(|c| c.service_uuid == self.config.service)
            .collect();

        let find = |uuid: Uuid| self.characteristics.iter().find(|c| c.uuid == uuid).cloned();

        self.write_char = Some(find(self.config.write_characteristic).ok_or_else(|| {
            TransportError::ConnectionFailed("Write characteristic not found".to_string())
        })?);

        find(self.config.notify_characteristic).ok_or_else(|| {
            TransportError::ConnectionFailed("Notify characteristic not found".to_string())
        })
    }

    /// Start notification subscription
    async fn start_notifications(
        &mut self,
        peripheral: Peripheral,
        notify_char: Characteristic,
    ) -> Result<(), TransportError> {
        peripheral.subscribe(&notify_char).await
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to subscribe: {}", e)))?;

        let mut notification_stream = peripheral.notifications().await
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to open notifications: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let stats = self.stats.clone();

        let task = tokio::spawn(async move {
            while let Some(data) = notification_stream.next().await {
                {
                    let mut s = stats.write();
                    s.bytes_received += data.value.len() as u64;
                    s.packets_received += 1;
                }

                if tx.send(InboundChunk::notification(data.uuid, data.value)).is_err() {
                    break;
                }
            }
            tracing::debug!("BLE notification stream ended");
        });

        self.rx = Some(rx);
        self.notification_task = Some(task);
        Ok(())
    }
}

#[async_trait]
impl TransportTrait for BluetoothTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Bluetooth
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.config.device.is_empty() {
            return Err(TransportError::InvalidConfiguration("No device name given".to_string()));
        }

        let manager = Manager::new().await
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to create manager: {}", e)))?;

        let adapters = manager.adapters().await
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to get adapters: {}", e)))?;

        let adapter = adapters.into_iter().next()
            .ok_or_else(|| TransportError::ConnectionFailed("No Bluetooth adapter found".to_string()))?;

        adapter.start_scan(ScanFilter { services: vec![self.config.service] }).await
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to start scan: {}", e)))?;

        tokio::time::sleep(Duration::from_secs(self.config.scan_secs)).await;

        let peripheral = self.find_peripheral(&adapter).await?;

        adapter.stop_scan().await
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to stop scan: {}", e)))?;

        tokio::time::timeout(Duration::from_secs(self.config.timeout_secs), peripheral.connect()).await
            .map_err(|_| TransportError::Timeout(self.config.timeout_secs))?
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to connect: {}", e)))?;

        let notify_char = self.discover_characteristics(&peripheral).await?;
        self.start_notifications(peripheral.clone(), notify_char).await?;

        self.adapter = Some(adapter);
        self.peripheral = Some(peripheral);
        self.connected_at = Some(Instant::now());
        *self.stats.write() = TransportStats::default();

        tracing::info!("Connected to {}", self.connection_info());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(task) = self.notification_task.take() {
            task.abort();
        }
        self.rx = None;

        if let Some(peripheral) = self.peripheral.take() {
            peripheral.disconnect().await
                .map_err(|e| TransportError::ConnectionFailed(format!("Failed to disconnect: {}", e)))?;
        }

        self.adapter = None;
        self.characteristics.clear();
        self.write_char = None;
        self.connected_at = None;

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.peripheral.is_some() && self.connected_at.is_some()
    }

    async fn send(&mut self, frame: &OutboundFrame) -> Result<usize, TransportError> {
        let peripheral = self.peripheral.as_ref()
            .ok_or(TransportError::NotConnected)?;

        let target = match frame.characteristic {
            Some(uuid) => self.characteristics.iter().find(|c| c.uuid == uuid)
                .ok_or_else(|| TransportError::SendError(format!("Unknown characteristic {}", uuid)))?,
            None => self.write_char.as_ref().ok_or(TransportError::NotConnected)?,
        };

        peripheral.write(target, &frame.data, WriteType::WithoutResponse).await
            .map_err(|e| {
                self.stats.write().errors += 1;
                TransportError::SendError(format!("Write failed: {}", e))
            })?;

        let len = frame.data.len();
        {
            let mut stats = self.stats.write();
            stats.bytes_sent += len as u64;
            stats.packets_sent += 1;
        }

        Ok(len)
    }

    async fn receive(&mut self) -> Result<Option<InboundChunk>, TransportError> {
        let rx = self.rx.as_mut().ok_or(TransportError::NotConnected)?;
        match rx.try_recv() {
            Ok(chunk) => Ok(Some(chunk)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(TransportError::Disconnected),
        }
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats.read().clone();
        if let Some(connected_at) = self.connected_at {
            stats.uptime_secs = connected_at.elapsed().as_secs();
        }
        stats
    }

    fn connection_info(&self) -> String {
        if let Some(ref peripheral) = self.peripheral {
            format!("BLE: {} ({})", self.config.device, peripheral.id())
        } else {
            format!("BLE: {} (disconnected)", self.config.device)
        }
    }
}
