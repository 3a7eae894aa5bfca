//! Firmware update attempt tracking.
//!
//! Printers report progress and outcomes with no rollout id attached; each
//! report is applied to the printer's most recent non-terminal
//! UpdateHistory row.  Terminal states are absorbing: a late or duplicate
//! report after completion finds no open row and is dropped.

use pm_protocol::{FirmwareComplete, FirmwareDeclined, FirmwareFailed, FirmwareProgress};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::CoreResult;
use crate::platform;
use crate::repo;
use crate::state::AppState;

pub async fn handle_progress(
    state: &AppState,
    printer_id: Uuid,
    report: &FirmwareProgress,
) -> CoreResult<()> {
    let Some(row) = repo::update_history::latest_open_for_printer(&state.pool, printer_id).await?
    else {
        debug!(printer_id = %printer_id, "progress report without an open update attempt");
        return Ok(());
    };
    repo::update_history::set_progress(&state.pool, row.id, report.percent, &report.status)
        .await?;
    Ok(())
}

pub async fn handle_complete(
    state: &AppState,
    printer_id: Uuid,
    report: &FirmwareComplete,
) -> CoreResult<()> {
    // The printer is the authority on what it is now running, whether or
    // not we still hold an open attempt for it.
    repo::printers::set_firmware_version(&state.pool, printer_id, &report.version).await?;

    let Some(row) = repo::update_history::latest_open_for_printer(&state.pool, printer_id).await?
    else {
        warn!(printer_id = %printer_id, version = %report.version, "completion report without an open update attempt");
        return Ok(());
    };
    repo::update_history::mark_completed(&state.pool, row.id).await?;
    if let Some(printer) = repo::printers::fetch(&state.pool, printer_id).await? {
        repo::firmware::record_success(
            &state.pool,
            &row.version,
            &platform::variants(&printer.platform),
        )
        .await?;
    }
    repo::rollouts::record_completed(&state.pool, row.rollout_id).await?;
    finish_if_drained(state, row.rollout_id).await?;
    info!(printer_id = %printer_id, version = %report.version, "firmware update completed");
    Ok(())
}

pub async fn handle_failed(
    state: &AppState,
    printer_id: Uuid,
    report: &FirmwareFailed,
) -> CoreResult<()> {
    let Some(row) = repo::update_history::latest_open_for_printer(&state.pool, printer_id).await?
    else {
        warn!(printer_id = %printer_id, error = %report.error, "failure report without an open update attempt");
        return Ok(());
    };
    repo::update_history::mark_failed(&state.pool, row.id, &report.error).await?;
    if let Some(printer) = repo::printers::fetch(&state.pool, printer_id).await? {
        repo::firmware::record_failure(
            &state.pool,
            &row.version,
            &platform::variants(&printer.platform),
        )
        .await?;
    }
    repo::rollouts::record_failed(&state.pool, row.rollout_id).await?;
    finish_if_drained(state, row.rollout_id).await?;
    warn!(printer_id = %printer_id, version = %row.version, error = %report.error, "firmware update failed");
    Ok(())
}

pub async fn handle_declined(
    state: &AppState,
    printer_id: Uuid,
    report: &FirmwareDeclined,
) -> CoreResult<()> {
    if !report.auto_update {
        // The printer turned auto-update off while declining; stop offering.
        repo::printers::set_auto_update(&state.pool, printer_id, false).await?;
    }
    let Some(row) = repo::update_history::latest_open_for_printer(&state.pool, printer_id).await?
    else {
        debug!(printer_id = %printer_id, version = %report.version, "decline report without an open update attempt");
        return Ok(());
    };
    repo::update_history::mark_declined(&state.pool, row.id).await?;
    repo::rollouts::record_declined(&state.pool, row.rollout_id).await?;
    finish_if_drained(state, row.rollout_id).await?;
    info!(printer_id = %printer_id, version = %report.version, "firmware update declined");
    Ok(())
}

async fn finish_if_drained(state: &AppState, rollout_id: Uuid) -> CoreResult<()> {
    if repo::rollouts::complete_if_drained(&state.pool, rollout_id).await? {
        info!(rollout_id = %rollout_id, "rollout completed: all targets drained");
    }
    Ok(())
}
