//! # Boardlink Core Library
//!
//! Hardware link layer between a block-programming workspace and
//! educational boards:
//! - Generic Arduino single-byte protocol
//! - Extended Arduino protocol with typed sensors and sequence indices
//! - Neobot robot controller with an ACK/NACK upload handshake
//! - Raspberry Pi Pico over serial or Nordic UART BLE
//!
//! ## Features
//!
//! - Resumable frame reassembly across transport chunks
//! - Per-port logical clock and recent-command dedup
//! - Serial (`serialport`) and BLE (`btleplug`) transports
//! - Poll-driven session with a broadcast event stream
//! - CLI with exit codes and a JSON-lines workspace
//!
//! ## Example
//!
//! ```rust,no_run
//! use boardlink_core::{BridgeConfig, BridgeSession, DeviceFamily, MemoryHandler};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = BridgeConfig::default();
//!     config.device = DeviceFamily::ArduinoExt;
//!
//!     let mut session = BridgeSession::from_config(&config)?;
//!     session.connect().await?;
//!
//!     let mut workspace = MemoryHandler::new();
//!     loop {
//!         session.tick(&mut workspace).await?;
//!         if let Some(value) = workspace.get("a0") {
//!             println!("A0 = {}", value);
//!         }
//!         tokio::time::sleep(config.poll_interval()).await;
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, JsonLineWorkspace};
pub use crate::config::{BridgeConfig, ConfigError};
pub use crate::core::device::{
    create_adapter, DeviceAdapter, DeviceFamily, InboundChunk, MemoryHandler, OutboundFrame,
    WorkspaceHandler,
};
pub use crate::core::protocol::{FrameDecoder, FrameError, Port};
pub use crate::core::session::{BridgeSession, SessionError, SessionEvent, SessionState};
pub use crate::core::transport::{
    BluetoothConfig, SerialConfig, SerialParity, TransportConfig, TransportError,
    TransportType,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
