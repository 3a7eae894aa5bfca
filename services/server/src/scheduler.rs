//! Background rollout scheduler.
//!
//! Activates scheduled rollouts as they come due and re-evaluates every
//! connected printer, so newly activated or widened rollouts reach online
//! printers without a reconnect, and printers that missed a push get it
//! again.

use chrono::Utc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::error::CoreResult;
use crate::rollout;
use crate::state::AppState;

pub const TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Spawn the scheduler loop; dropping or firing the returned sender stops
/// it after the in-flight tick finishes.
pub fn spawn(state: AppState) -> oneshot::Sender<()> {
    let (stop_tx, stop_rx) = oneshot::channel();
    tokio::spawn(run(state, TICK_INTERVAL, stop_rx));
    stop_tx
}

async fn run(state: AppState, every: Duration, mut stop: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(every) => {}
            _ = &mut stop => {
                info!("scheduler stopped");
                return;
            }
        }
        // The tick runs outside the select so a stop request never cancels
        // it midway; stop is observed on the next iteration.
        if let Err(e) = tick(&state).await {
            warn!(error = %e, "scheduler tick failed");
        }
    }
}

/// One scheduler pass.  Public so tests (and an admin trigger) can run a
/// pass on demand against a fresh instance.
pub async fn tick(state: &AppState) -> CoreResult<()> {
    let now = Utc::now();
    let activated = crate::repo::rollouts::activate_due(&state.pool, now).await?;
    if activated > 0 {
        info!(activated, "activated scheduled rollouts");
    }

    for identity in state.registry.connected_identities().await {
        // User identities fall out naturally: they have no printer row.
        match rollout::prepare_push(state, identity, now).await {
            Ok(Some(frame)) => {
                let outcome = state.registry.broadcast(identity, &frame).await;
                if outcome.delivered == 0 {
                    // History row stays pending; the next tick retries.
                    warn!(printer_id = %identity, "firmware push reached no session");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(printer_id = %identity, error = %e, "rollout evaluation failed"),
        }
    }
    Ok(())
}
