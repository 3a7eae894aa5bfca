//! End-to-end firmware rollout: push on subscribe, idempotent re-offer,
//! progress tracking, and counter drain to completion.

mod support;

use pm_protocol::{FirmwareComplete, FirmwareProgress, WsMessage};
use pm_server::repo;
use std::time::Duration;
use support::{insert_channel_rollout, start_server, subscription, wait_until, WsClient};
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);
const FIRMWARE_BLOB: &[u8] = b"\xE9firmware-image-bytes";

#[tokio::test]
async fn subscribe_receives_push_and_complete_drains_the_rollout() {
    let (pool, addr, _state) = start_server().await;

    let firmware = repo::firmware::insert(
        &pool,
        "1.5.0",
        "esp32-c3",
        "stable",
        "bugfixes",
        false,
        None,
        FIRMWARE_BLOB,
        5 * 1024 * 1024,
    )
    .await
    .unwrap();
    assert_eq!(firmware.size as usize, FIRMWARE_BLOB.len());

    let rollout_id = Uuid::new_v4();
    insert_channel_rollout(&pool, rollout_id, "1.5.0", &["stable"], "immediate", None, "active")
        .await;

    // The printer announces the fused platform spelling; lookups widen to
    // the canonical form the firmware row uses.
    let printer_id = Uuid::new_v4();
    let mut printer = WsClient::connect(addr, printer_id).await;
    printer
        .send(&subscription(printer_id, "esp32c3", "1.0.0"))
        .await;

    let push = printer
        .recv_matching(WAIT, |f| matches!(f, WsMessage::FirmwareUpdate(_)))
        .await
        .expect("firmware push on subscribe");
    let offered = match push {
        WsMessage::FirmwareUpdate(update) => {
            assert_eq!(update.version, "1.5.0");
            assert!(update.url.contains("/api/firmware/download/1.5.0"));
            assert!(update.url.contains("platform=esp32-c3"));
            assert_eq!(update.md5, firmware.md5);
            update
        }
        other => panic!("expected firmware_update, got {other:?}"),
    };

    // One pending history row; counters admit the printer.
    let admitted = wait_until(WAIT, || async {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT status FROM update_history WHERE rollout_id = $1 AND printer_id = $2",
        )
        .bind(rollout_id)
        .bind(printer_id)
        .fetch_optional(&pool)
        .await
        .unwrap();
        matches!(row, Some((status,)) if status == "pending")
    })
    .await;
    assert!(admitted);
    let (total, pending): (i32, i32) = sqlx::query_as(
        "SELECT total_targets, pending_count FROM update_rollouts WHERE rollout_id = $1",
    )
    .bind(rollout_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!((total, pending), (1, 1));

    // Reconnect with unchanged state: the pending offer is re-emitted, but
    // no second history row appears.
    drop(printer);
    let mut printer = WsClient::connect(addr, printer_id).await;
    printer
        .send(&subscription(printer_id, "esp32c3", "1.0.0"))
        .await;
    let repush = printer
        .recv_matching(WAIT, |f| matches!(f, WsMessage::FirmwareUpdate(_)))
        .await
        .expect("pending offer re-emitted on reconnect");
    match repush {
        WsMessage::FirmwareUpdate(update) => assert_eq!(update.md5, offered.md5),
        other => panic!("expected firmware_update, got {other:?}"),
    }
    let rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM update_history WHERE rollout_id = $1 AND printer_id = $2",
    )
    .bind(rollout_id)
    .bind(printer_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(rows, 1, "re-subscribe must not duplicate the attempt row");

    // Progress moves the attempt to downloading.
    printer
        .send(&WsMessage::FirmwareProgress(FirmwareProgress {
            percent: 42,
            status: "downloading".to_owned(),
        }))
        .await;
    let downloading = wait_until(WAIT, || async {
        let (status, percent): (String, i32) = sqlx::query_as(
            "SELECT status, progress_percent FROM update_history WHERE rollout_id = $1 AND printer_id = $2",
        )
        .bind(rollout_id)
        .bind(printer_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        status == "downloading" && percent == 42
    })
    .await;
    assert!(downloading);

    // Completion terminalizes the row, bumps counters, updates the printer,
    // and drains the rollout to completed.
    printer
        .send(&WsMessage::FirmwareComplete(FirmwareComplete {
            version: "1.5.0".to_owned(),
        }))
        .await;

    let completed = wait_until(WAIT, || async {
        let (status, completed_count, pending_count): (String, i32, i32) = sqlx::query_as(
            "SELECT status, completed_count, pending_count FROM update_rollouts WHERE rollout_id = $1",
        )
        .bind(rollout_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        status == "completed" && completed_count == 1 && pending_count == 0
    })
    .await;
    assert!(completed, "rollout should complete once its targets drain");

    let printer_version: String =
        sqlx::query_scalar("SELECT firmware_version FROM printers WHERE printer_id = $1")
            .bind(printer_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(printer_version, "1.5.0");

    let success_count: i32 =
        sqlx::query_scalar("SELECT success_count FROM firmware_versions WHERE id = $1")
            .bind(firmware.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(success_count, 1);

    // A further subscription at the new version offers nothing.
    drop(printer);
    let mut printer = WsClient::connect(addr, printer_id).await;
    printer
        .send(&subscription(printer_id, "esp32c3", "1.5.0"))
        .await;
    assert!(
        printer
            .recv_matching(Duration::from_millis(500), |f| matches!(
                f,
                WsMessage::FirmwareUpdate(_)
            ))
            .await
            .is_none(),
        "a printer already on the target version gets no offer"
    );
}

#[tokio::test]
async fn firmware_store_enforces_the_size_cap_exactly() {
    let (pool, _addr, _state) = start_server().await;

    let at_cap = repo::firmware::insert(
        &pool,
        "3.0.0",
        "esp8266",
        "stable",
        "",
        false,
        None,
        FIRMWARE_BLOB,
        FIRMWARE_BLOB.len(),
    )
    .await;
    assert!(at_cap.is_ok(), "a blob exactly at the cap is accepted");

    let over = repo::firmware::insert(
        &pool,
        "3.0.1",
        "esp8266",
        "stable",
        "",
        false,
        None,
        FIRMWARE_BLOB,
        FIRMWARE_BLOB.len() - 1,
    )
    .await;
    assert!(
        matches!(over, Err(pm_server::error::CoreError::FirmwareTooLarge { .. })),
        "one byte over the cap is rejected"
    );

    // The stored digests describe the blob itself.
    let row = at_cap.unwrap();
    assert_eq!(row.md5, hex::encode(md5::compute(FIRMWARE_BLOB).0));
}

#[tokio::test]
async fn declining_with_opt_out_disables_auto_update() {
    let (pool, addr, _state) = start_server().await;

    repo::firmware::insert(
        &pool,
        "2.0.0",
        "esp8266",
        "stable",
        "",
        false,
        None,
        FIRMWARE_BLOB,
        5 * 1024 * 1024,
    )
    .await
    .unwrap();
    let rollout_id = Uuid::new_v4();
    insert_channel_rollout(&pool, rollout_id, "2.0.0", &["stable"], "immediate", None, "active")
        .await;

    let printer_id = Uuid::new_v4();
    let mut printer = WsClient::connect(addr, printer_id).await;
    printer
        .send(&subscription(printer_id, "esp8266", "1.0.0"))
        .await;
    printer
        .recv_matching(WAIT, |f| matches!(f, WsMessage::FirmwareUpdate(_)))
        .await
        .expect("offer before decline");

    printer
        .send(&WsMessage::FirmwareDeclined(pm_protocol::FirmwareDeclined {
            version: "2.0.0".to_owned(),
            auto_update: false,
        }))
        .await;

    let settled = wait_until(WAIT, || async {
        let (auto_update,): (bool,) =
            sqlx::query_as("SELECT auto_update FROM printers WHERE printer_id = $1")
                .bind(printer_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        let (declined, pending): (i32, i32) = sqlx::query_as(
            "SELECT declined_count, pending_count FROM update_rollouts WHERE rollout_id = $1",
        )
        .bind(rollout_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        !auto_update && declined == 1 && pending == 0
    })
    .await;
    assert!(settled, "decline should persist the opt-out and move counters");

    let status: String = sqlx::query_scalar(
        "SELECT status FROM update_history WHERE rollout_id = $1 AND printer_id = $2",
    )
    .bind(rollout_id)
    .bind(printer_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(status, "declined");
}
