//! Bitmap dispatch to a live printer session.
//!
//! Bitmaps are never cached: an offline printer is an error to the caller,
//! not a queued delivery.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pm_protocol::{PrintBitmap, WsMessage};
use tracing::info;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::repo;
use crate::state::AppState;

/// Decoded payload cap: 50 KiB.
pub const MAX_BITMAP_BYTES: usize = 50 * 1024;

/// Validate a bitmap frame against the wire contract: width a multiple of
/// 8, payload valid base64 of exactly `width * height / 8` bytes, at most
/// [`MAX_BITMAP_BYTES`] in total.
pub fn validate(frame: &PrintBitmap) -> CoreResult<()> {
    if frame.width == 0 || frame.height == 0 {
        return Err(CoreError::InvalidBitmap(format!(
            "dimensions {}x{} are empty",
            frame.width, frame.height
        )));
    }
    if frame.width % 8 != 0 {
        return Err(CoreError::InvalidBitmap(format!(
            "width {} is not a multiple of 8",
            frame.width
        )));
    }
    let decoded = BASE64
        .decode(&frame.data)
        .map_err(|e| CoreError::InvalidBitmap(format!("payload is not valid base64: {e}")))?;
    if decoded.len() > MAX_BITMAP_BYTES {
        return Err(CoreError::InvalidBitmap(format!(
            "payload of {} bytes exceeds the {} byte cap",
            decoded.len(),
            MAX_BITMAP_BYTES
        )));
    }
    let expected = (u64::from(frame.width) * u64::from(frame.height) / 8) as usize;
    if decoded.len() != expected {
        return Err(CoreError::InvalidBitmap(format!(
            "payload is {} bytes, expected {} for {}x{}",
            decoded.len(),
            expected,
            frame.width,
            frame.height
        )));
    }
    Ok(())
}

/// Forward a validated bitmap to every live session of the target printer.
///
/// Returns the number of sessions reached.  Failures are surfaced to the
/// caller rather than cached.
pub async fn dispatch_bitmap(
    state: &AppState,
    printer_id: Uuid,
    frame: PrintBitmap,
) -> CoreResult<usize> {
    validate(&frame)?;
    let printer = repo::printers::fetch(&state.pool, printer_id)
        .await?
        .ok_or(CoreError::RecipientNotFound(printer_id))?;

    let (width, height) = (frame.width, frame.height);
    let outcome = state
        .registry
        .broadcast(printer.printer_id, &WsMessage::PrintBitmap(frame))
        .await;
    if outcome.sessions == 0 {
        return Err(CoreError::RecipientNotConnected(printer_id));
    }
    if outcome.delivered == 0 {
        return Err(CoreError::SendFailed(
            "bitmap write failed on every session".to_owned(),
        ));
    }
    info!(printer_id = %printer_id, width, height, sessions = outcome.delivered, "bitmap dispatched");
    Ok(outcome.delivered)
}
