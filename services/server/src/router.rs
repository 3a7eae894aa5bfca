//! Text message routing: sanitize, sequence, deliver-or-cache.

use chrono::Utc;
use pm_protocol::{Outbound, TextMessage, WsMessage};
use tracing::debug;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::registry::SessionHandle;
use crate::repo;
use crate::sanitize::sanitize;
use crate::state::AppState;

#[derive(Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Written to this many live sessions.
    Delivered(usize),
    /// Recipient offline (or every write failed); queued for drain.
    Cached,
}

/// Route one inbound `message` frame.
///
/// The daily number is assigned before the delivery attempt, so cached and
/// live messages share one contiguous per-printer sequence.
pub async fn route_message(
    state: &AppState,
    sender_id: Option<Uuid>,
    msg: &TextMessage,
) -> CoreResult<DeliveryOutcome> {
    let printer = repo::printers::fetch(&state.pool, msg.recipient_id)
        .await?
        .ok_or(CoreError::RecipientNotFound(msg.recipient_id))?;

    let sender_name = sanitize(&msg.sender_name);
    let body = sanitize(&msg.message);
    let now = Utc::now();
    let daily_number =
        repo::printers::next_daily_number(&state.pool, printer.printer_id, now.date_naive())
            .await?;

    repo::messages::insert_log(
        &state.pool,
        sender_id,
        printer.printer_id,
        &sender_name,
        &body,
        daily_number,
        now,
    )
    .await?;

    let frame = WsMessage::Outbound(Outbound {
        sender_name: sender_name.clone(),
        message: body.clone(),
        daily_number,
        timestamp: now,
    });
    let outcome = state.registry.broadcast(printer.printer_id, &frame).await;
    if outcome.delivered > 0 {
        debug!(printer_id = %printer.printer_id, daily_number, sessions = outcome.delivered, "message delivered");
        return Ok(DeliveryOutcome::Delivered(outcome.delivered));
    }

    repo::messages::insert_cache(
        &state.pool,
        printer.printer_id,
        &sender_name,
        &body,
        daily_number,
        now,
    )
    .await?;
    debug!(printer_id = %printer.printer_id, daily_number, "recipient offline, message cached");
    Ok(DeliveryOutcome::Cached)
}

/// Deliver queued messages to a freshly attached printer session, in
/// insertion order.
///
/// Each row is marked delivered only after its frame was handed to the
/// socket write path without error; the first failure aborts the drain and
/// leaves the remaining rows queued.  A failure between write and mark
/// redelivers on the next drain -- printers dedup by daily number.
pub async fn drain_cache(
    state: &AppState,
    printer_id: Uuid,
    session: &SessionHandle,
) -> CoreResult<usize> {
    let rows = repo::messages::fetch_undelivered(&state.pool, printer_id).await?;
    let mut drained = 0;
    for row in rows {
        let frame = WsMessage::Outbound(Outbound {
            sender_name: row.sender_name,
            message: row.body,
            daily_number: row.daily_number,
            timestamp: row.sent_at,
        });
        session.send(frame).await?;
        repo::messages::mark_delivered(&state.pool, row.id).await?;
        drained += 1;
    }
    Ok(drained)
}
