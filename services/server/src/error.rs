use thiserror::Error;
use uuid::Uuid;

/// Error kinds surfaced by the delivery and rollout core.
///
/// Senders see at most a `status` frame describing the failure; printers
/// never receive retry-control frames (retries are driven internally).
#[derive(Debug, Error)]
pub enum CoreError {
    /// JSON parse or schema failure on an inbound frame.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Unknown recipient UUID.
    #[error("recipient {0} not found")]
    RecipientNotFound(Uuid),

    /// Recipient has no live session.  Not an error for text messages
    /// (those fall through to the cache); bitmaps surface it to the caller.
    #[error("recipient {0} not connected")]
    RecipientNotConnected(Uuid),

    /// A socket write failed or timed out.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Width not divisible by 8, size mismatch, or payload over cap.
    #[error("invalid bitmap: {0}")]
    InvalidBitmap(String),

    /// No binary stored for (version, platform).
    #[error("no firmware binary for {version} on {platform}")]
    FirmwareUnavailable { version: String, platform: String },

    /// Uploaded binary exceeds the configured cap.
    #[error("firmware binary of {size} bytes exceeds cap of {max}")]
    FirmwareTooLarge { size: usize, max: usize },

    /// Persistence failure.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
