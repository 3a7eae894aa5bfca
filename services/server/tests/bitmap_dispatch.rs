//! Bitmap dispatch over the HTTP seam.

mod support;

use pm_protocol::WsMessage;
use std::time::Duration;
use support::{insert_printer, start_server, subscription, WsClient};
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

fn bitmap_body(width: u32, height: u32) -> serde_json::Value {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    let payload = vec![0xF0_u8; (width as usize * height as usize) / 8];
    serde_json::json!({
        "width": width,
        "height": height,
        "data": STANDARD.encode(payload),
        "caption": "test page",
    })
}

fn dispatch_url(addr: std::net::SocketAddr, printer_id: Uuid) -> String {
    format!("http://{addr}/api/printers/{printer_id}/print-bitmap")
}

#[tokio::test]
async fn connected_printer_receives_the_bitmap_frame() {
    let (pool, addr, _state) = start_server().await;
    let printer_id = Uuid::new_v4();
    insert_printer(&pool, printer_id, "esp8266", "1.0.0", "stable", true).await;

    let mut printer = WsClient::connect(addr, printer_id).await;
    printer
        .send(&subscription(printer_id, "esp8266", "1.0.0"))
        .await;

    // Wait for the handshake to settle so the dispatch finds the session.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = reqwest::Client::new()
        .post(dispatch_url(addr, printer_id))
        .json(&bitmap_body(384, 96))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["delivered"], 1);

    let frame = printer
        .recv_matching(WAIT, |f| matches!(f, WsMessage::PrintBitmap(_)))
        .await
        .expect("bitmap frame");
    match frame {
        WsMessage::PrintBitmap(bitmap) => {
            assert_eq!(bitmap.width, 384);
            assert_eq!(bitmap.height, 96);
            assert_eq!(bitmap.caption.as_deref(), Some("test page"));
        }
        other => panic!("expected print_bitmap, got {other:?}"),
    }
}

#[tokio::test]
async fn offline_printer_is_a_conflict_not_a_cache_write() {
    let (pool, addr, _state) = start_server().await;
    let printer_id = Uuid::new_v4();
    insert_printer(&pool, printer_id, "esp8266", "1.0.0", "stable", true).await;

    let response = reqwest::Client::new()
        .post(dispatch_url(addr, printer_id))
        .json(&bitmap_body(384, 96))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    let cached: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM message_cache WHERE printer_id = $1")
        .bind(printer_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(cached, 0, "bitmaps are never cached for offline printers");
}

#[tokio::test]
async fn invalid_width_and_unknown_printer_are_rejected() {
    let (pool, addr, _state) = start_server().await;
    let printer_id = Uuid::new_v4();
    insert_printer(&pool, printer_id, "esp8266", "1.0.0", "stable", true).await;

    // Width 7 fails the octet check before any delivery attempt.
    let mut body = bitmap_body(8, 8);
    body["width"] = serde_json::json!(7);
    let response = reqwest::Client::new()
        .post(dispatch_url(addr, printer_id))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = reqwest::Client::new()
        .post(dispatch_url(addr, Uuid::new_v4()))
        .json(&bitmap_body(8, 8))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}
