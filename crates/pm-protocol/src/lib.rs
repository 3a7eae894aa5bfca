// pm-protocol: PaperMinder wire protocol types and serialization.
//
// All WebSocket messages use a top-level `kind` field for discriminated
// deserialization.  The enum variants map 1:1 to the frozen message kinds
// spoken by printers and web clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Shared sub-types
// ---------------------------------------------------------------------------

/// Release track tagging both firmware versions and printer preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateChannel {
    #[default]
    Stable,
    Beta,
    Canary,
}

impl UpdateChannel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateChannel::Stable => "stable",
            UpdateChannel::Beta => "beta",
            UpdateChannel::Canary => "canary",
        }
    }

    /// Parse a stored or announced channel name.  Unknown names map to
    /// `None` so callers can decide between rejecting and defaulting.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stable" => Some(UpdateChannel::Stable),
            "beta" => Some(UpdateChannel::Beta),
            "canary" => Some(UpdateChannel::Canary),
            _ => None,
        }
    }
}

impl std::fmt::Display for UpdateChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Printer/client -> server messages
// ---------------------------------------------------------------------------

/// Printer opening handshake.
///
/// Sent as the first frame after connecting (and again after a Wi-Fi blip;
/// printers re-announce without closing the socket).  `printer_id` is the
/// authoritative identity; the legacy `api_key` field is accepted for old
/// firmware builds and ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default)]
    pub printer_name: String,
    pub printer_id: Uuid,
    pub platform: String,
    #[serde(default = "default_firmware_version")]
    pub firmware_version: String,
    #[serde(default = "default_true")]
    pub auto_update: bool,
    #[serde(default)]
    pub update_channel: UpdateChannel,
    /// Legacy credential, ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_firmware_version() -> String {
    "0.0.0".to_owned()
}

fn default_true() -> bool {
    true
}

/// Short text message from a human sender to one printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    pub recipient_id: Uuid,
    pub sender_name: String,
    pub message: String,
}

/// Download progress report for an in-flight firmware update.
///
/// `percent` is 0-100, or -1 when the printer hit an error it will report
/// separately via `firmware_failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareProgress {
    pub percent: i32,
    pub status: String,
}

/// Printer finished flashing and rebooted into `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareComplete {
    pub version: String,
}

/// Firmware download or flash failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareFailed {
    pub error: String,
}

/// Printer (or its owner) refused an offered update.  `auto_update` carries
/// the printer's post-decline preference so the server can stop offering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareDeclined {
    pub version: String,
    pub auto_update: bool,
}

/// Printer acknowledgement that a bitmap is being printed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitmapPrinting {
    pub width: u32,
    pub height: u32,
}

/// Printer-side bitmap failure (decode error, out of paper, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitmapError {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Server -> printer/client messages
// ---------------------------------------------------------------------------

/// A delivered text message.
///
/// `daily_number` is the per-printer counter assigned at routing time;
/// printers dedup redelivered frames by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outbound {
    pub sender_name: String,
    pub message: String,
    pub daily_number: i32,
    pub timestamp: DateTime<Utc>,
}

/// Out-of-band notice: validation failures, cache-drain notices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusNotice {
    pub level: String,
    pub message: String,
}

/// Push offering a firmware binary.  The printer fetches `url` itself and
/// verifies the blob against `md5` before flashing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareUpdate {
    pub version: String,
    pub url: String,
    pub md5: String,
}

/// Raw 1-bit bitmap to print: packed MSB-first, row-major top-to-bottom,
/// `1` = print.  `width % 8 == 0`; decoded length `width * height / 8`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintBitmap {
    pub width: u32,
    pub height: u32,
    /// Base64-encoded packed rows.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// Status notice levels.
pub mod status_levels {
    pub const INFO: &str = "info";
    pub const WARN: &str = "warn";
    pub const ERROR: &str = "error";
}

// ---------------------------------------------------------------------------
// Top-level discriminated union
// ---------------------------------------------------------------------------

/// All WebSocket message kinds.
///
/// Serializes/deserializes using the `kind` field as a tag.
///
/// ```json
/// { "kind": "subscription", ... }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
#[serde(rename_all = "snake_case")]
pub enum WsMessage {
    Subscription(Subscription),
    Message(TextMessage),
    FirmwareProgress(FirmwareProgress),
    FirmwareComplete(FirmwareComplete),
    FirmwareFailed(FirmwareFailed),
    FirmwareDeclined(FirmwareDeclined),
    BitmapPrinting(BitmapPrinting),
    BitmapError(BitmapError),
    Outbound(Outbound),
    Status(StatusNotice),
    FirmwareUpdate(FirmwareUpdate),
    PrintBitmap(PrintBitmap),
}

impl WsMessage {
    /// Shorthand for the `status` frames the server sends on validation
    /// failures and drain notices.
    #[must_use]
    pub fn status(level: &str, message: impl Into<String>) -> Self {
        WsMessage::Status(StatusNotice {
            level: level.to_owned(),
            message: message.into(),
        })
    }
}
