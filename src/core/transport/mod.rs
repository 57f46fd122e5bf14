//! Transport layer
//!
//! Supports:
//! - Serial ports (USB-Serial boards)
//! - Bluetooth Low Energy (GATT write/notify characteristics)
//!
//! A transport only moves bytes. BLE chunks keep the characteristic they
//! came from, and BLE frames name the characteristic they go to.

mod bluetooth;
mod serial;

pub use bluetooth::{BluetoothConfig, BluetoothTransport};
pub use serial::{SerialConfig, SerialParity, SerialTransport};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::core::device::{InboundChunk, OutboundFrame};

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Serial port connection
    Serial(SerialConfig),
    /// Bluetooth LE connection
    Bluetooth(BluetoothConfig),
}

impl TransportConfig {
    /// Transport type of this configuration
    pub fn transport_type(&self) -> TransportType {
        match self {
            Self::Serial(_) => TransportType::Serial,
            Self::Bluetooth(_) => TransportType::Bluetooth,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Serial(SerialConfig::default())
    }
}

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportType {
    /// Serial port
    Serial,
    /// Bluetooth LE
    Bluetooth,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "Serial"),
            Self::Bluetooth => write!(f, "Bluetooth"),
        }
    }
}

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timeout
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Disconnected
    #[error("Disconnected")]
    Disconnected,

    /// Send error
    #[error("Send error: {0}")]
    SendError(String),

    /// Receive error
    #[error("Receive error: {0}")]
    ReceiveError(String),
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Frames sent
    pub packets_sent: u64,
    /// Chunks received
    pub packets_received: u64,
    /// Errors count
    pub errors: u64,
    /// Connection uptime in seconds
    pub uptime_secs: u64,
}

/// Transport trait for all connection types
#[async_trait]
pub trait TransportTrait: Send + Sync {
    /// Connect to the target
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Disconnect from the target
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Write one frame and wait until it has drained
    async fn send(&mut self, frame: &OutboundFrame) -> Result<usize, TransportError>;

    /// Next chunk of received data, `None` when nothing is waiting
    async fn receive(&mut self) -> Result<Option<InboundChunk>, TransportError>;

    /// Get transport type
    fn transport_type(&self) -> TransportType;

    /// Get connection info string
    fn connection_info(&self) -> String;

    /// Get statistics
    fn stats(&self) -> TransportStats;
}

/// Create a transport instance from configuration
pub fn create_transport(config: TransportConfig) -> Result<Box<dyn TransportTrait>, TransportError> {
    match config {
        TransportConfig::Serial(cfg) => Ok(Box::new(SerialTransport::new(cfg)?)),
        TransportConfig::Bluetooth(cfg) => Ok(Box::new(BluetoothTransport::new(cfg))),
    }
}
