//! Rollout evaluation: which firmware, if any, a printer should be offered
//! right now.

use chrono::{DateTime, Utc};
use pm_protocol::{FirmwareUpdate, WsMessage};
use semver::Version;
use tracing::{debug, info};
use uuid::Uuid;

use crate::bucket::bucket;
use crate::error::CoreResult;
use crate::platform;
use crate::repo;
use crate::repo::printers::PrinterRow;
use crate::repo::rollouts::{RolloutRow, RolloutStatus, RolloutType};
use crate::repo::update_history::UpdateStatus;
use crate::state::AppState;
use crate::version;

/// Pick the single rollout a printer qualifies for, if any.
///
/// Targeting is a union: `all`, an explicit user or printer id, or a
/// channel match each qualify on their own.  Version bounds are inclusive;
/// the target version must be a strict upgrade.  Gradual rollouts admit a
/// printer when its stable bucket falls below the percentage.  Of the
/// qualifiers, the highest target version wins; ties go to the most
/// recently created rollout.
pub fn select_rollout<'a>(
    printer: &PrinterRow,
    rollouts: &'a [RolloutRow],
    now: DateTime<Utc>,
) -> Option<&'a RolloutRow> {
    if !printer.auto_update {
        return None;
    }
    let current = version::parse_or_zero(&printer.firmware_version);
    let mut best: Option<(&RolloutRow, Version)> = None;

    for rollout in rollouts {
        if RolloutStatus::parse(&rollout.status) != Some(RolloutStatus::Active) {
            continue;
        }
        if rollout.scheduled_for.is_some_and(|at| at > now) {
            continue;
        }
        if !targets_match(printer, rollout) {
            continue;
        }
        let Some(target) = version::parse(&rollout.version) else {
            continue;
        };
        if target <= current {
            continue;
        }
        if let Some(min) = rollout.min_version.as_deref() {
            if current < version::parse_or_zero(min) {
                continue;
            }
        }
        if let Some(max) = rollout.max_version.as_deref() {
            if current > version::parse_or_zero(max) {
                continue;
            }
        }
        if RolloutType::parse(&rollout.rollout_type) == Some(RolloutType::Gradual) {
            let percentage = rollout.rollout_percentage.unwrap_or(0);
            if i32::from(bucket(printer.printer_id)) >= percentage {
                continue;
            }
        }
        best = match best {
            None => Some((rollout, target)),
            Some((held, held_version)) => {
                if target > held_version
                    || (target == held_version && rollout.created_at > held.created_at)
                {
                    Some((rollout, target))
                } else {
                    Some((held, held_version))
                }
            }
        };
    }
    best.map(|(rollout, _)| rollout)
}

fn targets_match(printer: &PrinterRow, rollout: &RolloutRow) -> bool {
    if rollout.target_all {
        return true;
    }
    if printer
        .user_id
        .is_some_and(|user| rollout.target_user_ids.contains(&user))
    {
        return true;
    }
    if rollout.target_printer_ids.contains(&printer.printer_id) {
        return true;
    }
    rollout
        .target_channels
        .iter()
        .any(|channel| channel == &printer.update_channel)
}

/// Evaluate rollouts for a printer and prepare the `firmware_update` frame
/// to push, creating the UpdateHistory row and bumping rollout counters.
///
/// Returns `None` when the printer is ineligible, no binary exists for its
/// platform, or a prior attempt for the chosen rollout is already past
/// `pending`.  A still-`pending` attempt re-emits the frame without a new
/// row, so a printer that missed the push gets it again on reconnect or on
/// the next scheduler tick.
pub async fn prepare_push(
    state: &AppState,
    printer_id: Uuid,
    now: DateTime<Utc>,
) -> CoreResult<Option<WsMessage>> {
    let Some(printer) = repo::printers::fetch(&state.pool, printer_id).await? else {
        return Ok(None);
    };
    if !printer.auto_update {
        return Ok(None);
    }

    let rollouts = repo::rollouts::fetch_active(&state.pool, now).await?;
    let Some(rollout) = select_rollout(&printer, &rollouts, now) else {
        return Ok(None);
    };

    let platforms = platform::variants(&printer.platform);
    let Some(firmware) =
        repo::firmware::find_by_version_platforms(&state.pool, &rollout.version, &platforms)
            .await?
    else {
        debug!(
            printer_id = %printer.printer_id,
            version = %rollout.version,
            platform = %printer.platform,
            "no firmware binary for eligible rollout"
        );
        return Ok(None);
    };

    if let Some(prior) =
        repo::update_history::find_latest(&state.pool, rollout.rollout_id, printer.printer_id)
            .await?
    {
        return match UpdateStatus::parse(&prior.status) {
            // The printer may have missed the earlier push; offer it again.
            Some(UpdateStatus::Pending) => Ok(Some(push_frame(state, &firmware))),
            _ => Ok(None),
        };
    }

    let inserted = repo::update_history::insert_pending(
        &state.pool,
        rollout.rollout_id,
        printer.printer_id,
        &rollout.version,
    )
    .await?;
    if inserted.is_none() {
        // A concurrent evaluation admitted this printer first; the attempt
        // is pending, so offering again is harmless.
        return Ok(Some(push_frame(state, &firmware)));
    }
    repo::rollouts::admit_target(&state.pool, rollout.rollout_id).await?;
    info!(
        printer_id = %printer.printer_id,
        rollout_id = %rollout.rollout_id,
        version = %rollout.version,
        "offering firmware update"
    );
    Ok(Some(push_frame(state, &firmware)))
}

fn push_frame(state: &AppState, firmware: &repo::firmware::FirmwareRow) -> WsMessage {
    let url = format!(
        "{}/api/firmware/download/{}?platform={}",
        state.config.base_url.trim_end_matches('/'),
        firmware.version,
        firmware.platform
    );
    WsMessage::FirmwareUpdate(FirmwareUpdate {
        version: firmware.version.clone(),
        url,
        md5: firmware.md5.clone(),
    })
}
