//! Serial transport
//!
//! Boards enumerate as USB CDC or FTDI ports and talk 8N1 by default. Reads
//! use a short timeout so an idle poll returns `None` instead of blocking
//! the tick.

use super::{TransportError, TransportStats, TransportTrait, TransportType};
use crate::core::device::{InboundChunk, OutboundFrame};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

/// Largest chunk handed to an adapter per read
const READ_CHUNK: usize = 1024;

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl SerialParity {
    fn letter(self) -> char {
        match self {
            SerialParity::None => 'N',
            SerialParity::Odd => 'O',
            SerialParity::Even => 'E',
        }
    }
}

impl From<SerialParity> for Parity {
    fn from(parity: SerialParity) -> Self {
        match parity {
            SerialParity::None => Parity::None,
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
        }
    }
}

impl std::str::FromStr for SerialParity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            other => Err(format!("Unknown parity: {}", other)),
        }
    }
}

/// Serial link settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5 to 8)
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// How long an idle read waits, in milliseconds
    pub read_timeout_ms: u64,
}

impl SerialConfig {
    /// 8N1 link on `port`
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            read_timeout_ms: 5,
        }
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    /// Check what `serialport` would otherwise reject at open time
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.port.is_empty() {
            return Err(TransportError::InvalidConfiguration(
                "Serial port name is empty".to_string(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(TransportError::InvalidConfiguration(
                "Baud rate must be positive".to_string(),
            ));
        }
        self.frame_format().map(|_| ())
    }

    fn frame_format(&self) -> Result<(DataBits, StopBits), TransportError> {
        let data_bits = match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            other => {
                return Err(TransportError::InvalidConfiguration(format!(
                    "Unsupported data bits: {}",
                    other
                )))
            }
        };
        let stop_bits = match self.stop_bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            other => {
                return Err(TransportError::InvalidConfiguration(format!(
                    "Unsupported stop bits: {}",
                    other
                )))
            }
        };
        Ok((data_bits, stop_bits))
    }

    /// Short form such as `8N1`
    pub fn format_string(&self) -> String {
        format!("{}{}{}", self.data_bits, self.parity.letter(), self.stop_bits)
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("/dev/ttyUSB0", 115_200)
    }
}

fn open_error(port: &str, error: &serialport::Error) -> TransportError {
    match error.kind() {
        serialport::ErrorKind::NoDevice => TransportError::PortNotFound(port.to_string()),
        serialport::ErrorKind::Io(ErrorKind::NotFound) => TransportError::PortNotFound(port.to_string()),
        serialport::ErrorKind::Io(ErrorKind::PermissionDenied) => {
            TransportError::PermissionDenied(port.to_string())
        }
        _ => TransportError::ConnectionFailed(format!("{}: {}", port, error)),
    }
}

/// Transport over a local serial port
pub struct SerialTransport {
    config: SerialConfig,
    port: Mutex<Option<Box<dyn SerialPort>>>,
    stats: RwLock<TransportStats>,
    opened_at: Option<Instant>,
}

impl SerialTransport {
    /// Transport for `config`; the port is opened by `connect`
    pub fn new(config: SerialConfig) -> Result<Self, TransportError> {
        config.validate()?;
        Ok(Self {
            config,
            port: Mutex::new(None),
            stats: RwLock::new(TransportStats::default()),
            opened_at: None,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn count_error(&self, error: std::io::Error) -> TransportError {
        self.stats.write().errors += 1;
        match error.kind() {
            ErrorKind::BrokenPipe | ErrorKind::NotConnected | ErrorKind::UnexpectedEof => {
                TransportError::Disconnected
            }
            _ => TransportError::IoError(error),
        }
    }
}

#[async_trait]
impl TransportTrait for SerialTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let (data_bits, stop_bits) = self.config.frame_format()?;

        let port = serialport::new(&self.config.port, self.config.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(self.config.parity.into())
            .timeout(Duration::from_millis(self.config.read_timeout_ms))
            .open()
            .map_err(|e| open_error(&self.config.port, &e))?;

        *self.port.lock() = Some(port);
        *self.stats.write() = TransportStats::default();
        self.opened_at = Some(Instant::now());

        tracing::info!("Opened {}", self.connection_info());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.port.lock().take().is_some() {
            tracing::info!("Closed {}", self.config.port);
        }
        self.opened_at = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.lock().is_some()
    }

    async fn send(&mut self, frame: &OutboundFrame) -> Result<usize, TransportError> {
        let result = {
            let mut guard = self.port.lock();
            let port = guard.as_mut().ok_or(TransportError::Disconnected)?;
            port.write_all(&frame.data).and_then(|()| port.flush())
        };

        match result {
            Ok(()) => {
                let mut stats = self.stats.write();
                stats.bytes_sent += frame.len() as u64;
                stats.packets_sent += 1;
                Ok(frame.len())
            }
            Err(e) => Err(self.count_error(e)),
        }
    }

    async fn receive(&mut self) -> Result<Option<InboundChunk>, TransportError> {
        let mut buffer = vec![0u8; READ_CHUNK];
        let result = {
            let mut guard = self.port.lock();
            let port = guard.as_mut().ok_or(TransportError::Disconnected)?;
            port.read(&mut buffer)
        };

        match result {
            // A USB serial device that vanished reads as end of stream
            Ok(0) => Err(TransportError::Disconnected),
            Ok(n) => {
                buffer.truncate(n);
                let mut stats = self.stats.write();
                stats.bytes_received += n as u64;
                stats.packets_received += 1;
                Ok(Some(InboundChunk::raw(buffer)))
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(None),
            Err(e) => Err(self.count_error(e)),
        }
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Serial
    }

    fn connection_info(&self) -> String {
        format!(
            "{} @ {} baud ({})",
            self.config.port,
            self.config.baud_rate,
            self.config.format_string()
        )
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats.read().clone();
        if let Some(opened_at) = self.opened_at {
            stats.uptime_secs = opened_at.elapsed().as_secs();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_settings() {
        assert!(matches!(
            SerialTransport::new(SerialConfig::new("", 9600)),
            Err(TransportError::InvalidConfiguration(_))
        ));

        let mut config = SerialConfig::new("/dev/ttyACM0", 57600);
        config.stop_bits = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_connection_info() {
        let transport =
            SerialTransport::new(SerialConfig::new("/dev/ttyACM0", 57600).parity(SerialParity::Even))
                .unwrap();
        assert_eq!(transport.connection_info(), "/dev/ttyACM0 @ 57600 baud (8E1)");
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_parity_parse() {
        assert_eq!("o".parse::<SerialParity>(), Ok(SerialParity::Odd));
        assert!("mark".parse::<SerialParity>().is_err());
    }

    #[test]
    fn test_send_without_connect_fails() {
        let mut transport = SerialTransport::new(SerialConfig::default()).unwrap();
        let result = tokio_test::block_on(transport.send(&OutboundFrame::raw(vec![1])));
        assert!(matches!(result, Err(TransportError::Disconnected)));
    }
}
