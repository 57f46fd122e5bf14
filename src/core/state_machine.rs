//! Neobot handshake state machine
//!
//! Tracks the robot's link mode and the acknowledgement owed for the last
//! app frame or upload. Transitions happen only on checksum-valid response
//! frames; there is no timeout on an unanswered send.
//!
//! ```text
//! Entry ──mode-change──▶ Entry (ack pending) ──conn-ACK──▶ Upload
//!   ▲                          │                             │
//!   └──────── NACK ────────────┘       upload ─▶ Upload (ack pending)
//!                                                 │ data-ACK / NACK
//!                                                 ▼
//!                                               Upload
//! ```

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::core::protocol::neobot::{AppCommand, ControlFrame, Response};

/// Robot link mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LinkMode {
    /// Streaming sensors, accepting control frames
    #[default]
    Entry,
    /// Accepting acknowledged uploads
    Upload,
}

impl LinkMode {
    /// Get name of mode
    pub fn name(&self) -> &'static str {
        match self {
            LinkMode::Entry => "ENTRY_MODE",
            LinkMode::Upload => "UPLOAD_MODE",
        }
    }

    /// Does the robot stream sensor frames in this mode?
    pub fn streams_sensors(&self) -> bool {
        matches!(self, LinkMode::Entry)
    }
}

/// What an outstanding acknowledgement is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pending {
    /// Mode change frame
    ModeChange,
    /// Uploaded payload
    Upload,
}

/// Recorded mode or acknowledgement change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeTransition {
    /// Mode before
    pub from: LinkMode,
    /// Mode after
    pub to: LinkMode,
    /// Timestamp
    pub timestamp: DateTime<Local>,
    /// What caused it
    pub reason: String,
}

/// Result of feeding a response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// Nothing was pending, response ignored
    Ignored,
    /// Robot switched to upload mode
    EnteredUpload,
    /// Upload accepted
    UploadAcked,
    /// Request refused; outbound buffer dropped
    Refused,
}

/// Neobot handshake state
pub struct HandshakeMachine {
    mode: LinkMode,
    pending: Option<Pending>,
    queued_upload: Option<Vec<u8>>,
    outbound: Option<Vec<u8>>,
    history: Vec<HandshakeTransition>,
    max_history: usize,
    on_mode_change: Option<Box<dyn Fn(LinkMode, LinkMode) + Send + Sync>>,
}

impl Default for HandshakeMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandshakeMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeMachine")
            .field("mode", &self.mode)
            .field("pending", &self.pending)
            .field("queued_upload", &self.queued_upload.as_ref().map(Vec::len))
            .field("outbound", &self.outbound.as_ref().map(Vec::len))
            .finish()
    }
}

impl HandshakeMachine {
    /// Create a machine in entry mode
    pub fn new() -> Self {
        Self {
            mode: LinkMode::Entry,
            pending: None,
            queued_upload: None,
            outbound: None,
            history: Vec::new(),
            max_history: 100,
            on_mode_change: None,
        }
    }

    /// Current mode
    pub fn mode(&self) -> LinkMode {
        self.mode
    }

    /// Is an acknowledgement outstanding?
    pub fn ack_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// What the outstanding acknowledgement is for
    pub fn pending(&self) -> Option<Pending> {
        self.pending
    }

    /// Is an upload waiting to be sent?
    pub fn has_queued_upload(&self) -> bool {
        self.queued_upload.is_some()
    }

    /// Frame that will be repeated until acknowledged
    pub fn outbound(&self) -> Option<&[u8]> {
        self.outbound.as_deref()
    }

    /// Are control frames sent this tick?
    pub fn accepts_control(&self) -> bool {
        self.mode == LinkMode::Entry && self.pending.is_none() && self.queued_upload.is_none()
    }

    /// Should inbound chunks be checked as sensor frames?
    ///
    /// Otherwise they are checked as response frames.
    pub fn expects_sensor_frames(&self) -> bool {
        self.pending.is_none() && self.mode == LinkMode::Entry
    }

    /// Transition history
    pub fn history(&self) -> &[HandshakeTransition] {
        &self.history
    }

    /// Set mode change callback
    pub fn on_mode_change<F>(&mut self, callback: F)
    where
        F: Fn(LinkMode, LinkMode) + Send + Sync + 'static,
    {
        self.on_mode_change = Some(Box::new(callback));
    }

    /// Queue a payload for upload, replacing any earlier one not yet sent
    pub fn request_upload(&mut self, payload: Vec<u8>) {
        if payload.is_empty() {
            return;
        }
        tracing::debug!("Upload of {} bytes queued", payload.len());
        self.queued_upload = Some(payload);
    }

    /// Frame to send this tick
    ///
    /// In entry mode the control frame (if any) is sent; a queued upload
    /// first needs a mode change, which is sent once and then awaited with
    /// nothing else going out. In
    /// upload mode the queued payload is sent once nothing is pending, and
    /// repeated every tick until a response arrives.
    pub fn poll_outbound(&mut self, control: Option<ControlFrame>) -> Option<Vec<u8>> {
        match self.mode {
            LinkMode::Entry => {
                if self.pending.is_some() {
                    return None;
                }
                if self.queued_upload.is_some() {
                    tracing::info!("Requesting upload mode");
                    self.pending = Some(Pending::ModeChange);
                    return Some(AppCommand::ModeChange.encode());
                }
                self.outbound = control.map(|frame| frame.encode());
            }
            LinkMode::Upload => {
                if self.pending.is_none() {
                    if let Some(payload) = self.queued_upload.take() {
                        tracing::info!("Sending upload of {} bytes", payload.len());
                        self.outbound = Some(payload);
                        self.pending = Some(Pending::Upload);
                    }
                }
            }
        }

        self.outbound.clone()
    }

    /// Apply a checksum-valid response frame
    pub fn handle_response(&mut self, response: Response) -> ResponseOutcome {
        let Some(pending) = self.pending else {
            tracing::debug!("Ignoring {} with nothing pending", response.name());
            return ResponseOutcome::Ignored;
        };

        match response {
            Response::ConnAck => {
                self.pending = None;
                self.outbound = None;
                self.set_mode(LinkMode::Upload, response.name());
                ResponseOutcome::EnteredUpload
            }
            Response::DataAck => {
                self.pending = None;
                self.outbound = None;
                tracing::info!("Upload acknowledged");
                ResponseOutcome::UploadAcked
            }
            Response::ConnNack | Response::DataNack => {
                tracing::warn!("{} while waiting for {:?}", response.name(), pending);
                self.pending = None;
                self.outbound = None;
                self.queued_upload = None;
                self.record(self.mode, response.name());
                ResponseOutcome::Refused
            }
        }
    }

    /// Back to entry mode with nothing pending
    pub fn reset(&mut self) {
        if self.mode != LinkMode::Entry {
            self.set_mode(LinkMode::Entry, "reset");
        }
        self.pending = None;
        self.queued_upload = None;
        self.outbound = None;
    }

    fn set_mode(&mut self, mode: LinkMode, reason: &str) {
        let old = self.mode;
        self.mode = mode;
        self.record(old, reason);
        if old != mode {
            tracing::info!("Neobot link {} -> {}", old.name(), mode.name());
            if let Some(ref callback) = self.on_mode_change {
                callback(old, mode);
            }
        }
    }

    fn record(&mut self, from: LinkMode, reason: &str) {
        self.history.push(HandshakeTransition {
            from,
            to: self.mode,
            timestamp: Local::now(),
            reason: reason.to_string(),
        });
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }
    }
}
