//! Core module containing the bridge functionality
//!
//! This module provides:
//! - Frame codecs and stream reassembly for each board family
//! - Per-port logical clock and recent-command dedup
//! - Neobot handshake state machine
//! - Device adapters behind one lifecycle trait
//! - Transport layer (Serial, Bluetooth LE)
//! - Poll-driven session

pub mod dedup;
pub mod device;
pub mod protocol;
pub mod session;
pub mod state_machine;
pub mod transport;
