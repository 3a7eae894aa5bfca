//! Per-socket session loop.
//!
//! One endpoint serves both printers and human clients; the first frame
//! decides the role.  Printers open with `subscription` and then speak the
//! firmware/bitmap response kinds; anything else is a user session limited
//! to `message` frames.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::stream::{SplitStream, StreamExt};
use pm_protocol::{status_levels, Subscription, WsMessage};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::platform;
use crate::registry::{write_loop, SessionCommand, SessionHandle};
use crate::repo;
use crate::rollout;
use crate::router;
use crate::state::AppState;
use crate::tracker;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const SESSION_TIMEOUT: Duration = Duration::from_secs(90);
const MAX_PARSE_FAILURES: u32 = 3;
const COMMAND_QUEUE_DEPTH: usize = 64;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(identity): Path<Uuid>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

async fn handle_socket(socket: WebSocket, state: AppState, path_identity: Uuid) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel::<SessionCommand>(COMMAND_QUEUE_DEPTH);
    tokio::spawn(write_loop(sink, rx));
    let handle = SessionHandle::new(tx.clone());

    // The opening frame decides the role; malformed attempts get a status
    // reply and another chance, up to the repeat limit.
    let mut parse_failures = 0u32;
    let role_frame = loop {
        let Some(text) = read_first_frame(&mut stream, &tx).await else {
            return;
        };
        if text.len() > state.config.max_frame_bytes {
            let _ = handle
                .send(oversize_notice(state.config.max_frame_bytes))
                .await;
            return;
        }
        match serde_json::from_str::<WsMessage>(&text) {
            Ok(frame) => break frame,
            Err(e) => {
                parse_failures += 1;
                let err = CoreError::MalformedFrame(e.to_string());
                let _ = handle
                    .send(WsMessage::status(status_levels::ERROR, err.to_string()))
                    .await;
                if parse_failures >= MAX_PARSE_FAILURES {
                    return;
                }
            }
        }
    };
    match role_frame {
        WsMessage::Subscription(sub) => {
            run_printer_session(state, handle, tx, stream, path_identity, sub).await;
        }
        frame => run_user_session(state, handle, tx, stream, path_identity, frame).await,
    }
}

/// Wait for the opening text frame, answering pings meanwhile.
async fn read_first_frame(
    stream: &mut SplitStream<WebSocket>,
    tx: &mpsc::Sender<SessionCommand>,
) -> Option<String> {
    loop {
        match tokio::time::timeout(SESSION_TIMEOUT, stream.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return Some(text),
            Ok(Some(Ok(Message::Ping(data)))) => {
                let _ = tx.send(SessionCommand::Control(Message::Pong(data))).await;
            }
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) | Err(_) => return None,
            Ok(Some(Ok(_))) => {}
        }
    }
}

fn oversize_notice(cap: usize) -> WsMessage {
    WsMessage::status(
        status_levels::ERROR,
        format!("frame exceeds the {cap} byte limit"),
    )
}

// ---------------------------------------------------------------------------
// Printer sessions
// ---------------------------------------------------------------------------

async fn run_printer_session(
    state: AppState,
    handle: SessionHandle,
    tx: mpsc::Sender<SessionCommand>,
    mut stream: SplitStream<WebSocket>,
    path_identity: Uuid,
    sub: Subscription,
) {
    let printer_id = sub.printer_id;
    if printer_id != path_identity {
        warn!(
            path = %path_identity,
            announced = %printer_id,
            "socket path and subscription identity disagree; subscription wins"
        );
    }
    if let Err(e) = apply_subscription(&state, &sub).await {
        warn!(printer_id = %printer_id, error = %e, "subscription failed");
        let _ = handle
            .send(WsMessage::status(status_levels::ERROR, "subscription failed"))
            .await;
        return;
    }
    state.registry.attach(printer_id, handle.clone()).await;
    persist_online(&state, printer_id, true);
    info!(printer_id = %printer_id, platform = %sub.platform, "printer connected");

    post_subscribe(&state, &handle, printer_id).await;

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;
    let mut parse_failures = 0u32;

    loop {
        tokio::select! {
            msg = tokio::time::timeout(SESSION_TIMEOUT, stream.next()) => {
                match msg {
                    Ok(Some(Ok(Message::Text(text)))) => {
                        if text.len() > state.config.max_frame_bytes {
                            let _ = handle.send(oversize_notice(state.config.max_frame_bytes)).await;
                            break;
                        }
                        match serde_json::from_str::<WsMessage>(&text) {
                            Ok(frame) => {
                                parse_failures = 0;
                                handle_printer_frame(&state, &handle, printer_id, frame).await;
                            }
                            Err(e) => {
                                parse_failures += 1;
                                let err = CoreError::MalformedFrame(e.to_string());
                                let _ = handle.send(WsMessage::status(status_levels::ERROR, err.to_string())).await;
                                if parse_failures >= MAX_PARSE_FAILURES {
                                    warn!(printer_id = %printer_id, "closing after repeated malformed frames");
                                    break;
                                }
                            }
                        }
                    }
                    Ok(Some(Ok(Message::Ping(data)))) => {
                        let _ = tx.send(SessionCommand::Control(Message::Pong(data))).await;
                    }
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                        info!(printer_id = %printer_id, "printer disconnected");
                        break;
                    }
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(e))) => { warn!(printer_id = %printer_id, error = %e, "WS error"); break; }
                    Err(_) => { warn!(printer_id = %printer_id, "session timeout"); break; }
                }
            }
            _ = ping.tick() => {
                let _ = tx.send(SessionCommand::Control(Message::Ping(Vec::new()))).await;
            }
        }
    }

    let last = state.registry.detach(printer_id, handle.session_id()).await;
    if last {
        persist_online(&state, printer_id, false);
    }
    info!(printer_id = %printer_id, "printer session ended");
}

async fn handle_printer_frame(
    state: &AppState,
    handle: &SessionHandle,
    printer_id: Uuid,
    frame: WsMessage,
) {
    let result = match &frame {
        // Printers re-announce after Wi-Fi blips without closing the
        // socket; refresh metadata and re-run evaluation + drain.
        WsMessage::Subscription(sub) => {
            if sub.printer_id != printer_id {
                let _ = handle
                    .send(WsMessage::status(
                        status_levels::ERROR,
                        "printer identity cannot change mid-session",
                    ))
                    .await;
                return;
            }
            match apply_subscription(state, sub).await {
                Ok(()) => {
                    post_subscribe(state, handle, printer_id).await;
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        WsMessage::FirmwareProgress(report) => {
            tracker::handle_progress(state, printer_id, report).await
        }
        WsMessage::FirmwareComplete(report) => {
            tracker::handle_complete(state, printer_id, report).await
        }
        WsMessage::FirmwareFailed(report) => {
            tracker::handle_failed(state, printer_id, report).await
        }
        WsMessage::FirmwareDeclined(report) => {
            tracker::handle_declined(state, printer_id, report).await
        }
        WsMessage::BitmapPrinting(ack) => {
            info!(printer_id = %printer_id, width = ack.width, height = ack.height, "printer started bitmap print");
            Ok(())
        }
        WsMessage::BitmapError(report) => {
            warn!(printer_id = %printer_id, error = %report.error, "printer reported bitmap error");
            Ok(())
        }
        _ => {
            let _ = handle
                .send(WsMessage::status(
                    status_levels::ERROR,
                    "unexpected frame kind for a printer session",
                ))
                .await;
            Ok(())
        }
    };
    if let Err(e) = result {
        warn!(printer_id = %printer_id, error = %e, "failed to process printer frame");
        let _ = handle
            .send(WsMessage::status(
                status_levels::ERROR,
                "temporary server failure, frame not processed",
            ))
            .await;
    }
}

async fn apply_subscription(state: &AppState, sub: &Subscription) -> CoreResult<()> {
    let canonical = platform::canonicalize(&sub.platform);
    repo::printers::upsert_from_subscription(&state.pool, sub, &canonical).await?;
    Ok(())
}

/// Firmware evaluation first, then cache drain, on the session that just
/// subscribed.
async fn post_subscribe(state: &AppState, handle: &SessionHandle, printer_id: Uuid) {
    match rollout::prepare_push(state, printer_id, Utc::now()).await {
        Ok(Some(frame)) => {
            if let Err(e) = handle.send(frame).await {
                // The history row stays pending; the scheduler retries.
                warn!(printer_id = %printer_id, error = %e, "firmware push failed");
            }
        }
        Ok(None) => {}
        Err(e) => warn!(printer_id = %printer_id, error = %e, "rollout evaluation failed"),
    }

    match router::drain_cache(state, printer_id, handle).await {
        Ok(0) => {}
        Ok(drained) => {
            info!(printer_id = %printer_id, drained, "drained message cache");
            let _ = handle
                .send(WsMessage::status(
                    status_levels::INFO,
                    format!("delivered {drained} queued messages"),
                ))
                .await;
        }
        Err(e) => warn!(printer_id = %printer_id, error = %e, "cache drain aborted"),
    }
}

/// Online flips are best-effort: the registry is the authoritative view
/// and a store hiccup must not stall the session.
fn persist_online(state: &AppState, printer_id: Uuid, online: bool) {
    let pool = state.pool.clone();
    tokio::spawn(async move {
        if let Err(e) = repo::printers::set_online(&pool, printer_id, online).await {
            warn!(printer_id = %printer_id, error = %e, "failed to persist online flag");
        }
    });
}

// ---------------------------------------------------------------------------
// User sessions
// ---------------------------------------------------------------------------

async fn run_user_session(
    state: AppState,
    handle: SessionHandle,
    tx: mpsc::Sender<SessionCommand>,
    mut stream: SplitStream<WebSocket>,
    user_id: Uuid,
    first: WsMessage,
) {
    state.registry.attach(user_id, handle.clone()).await;
    info!(user_id = %user_id, "user connected");
    handle_user_frame(&state, &handle, user_id, first).await;

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;
    let mut parse_failures = 0u32;

    loop {
        tokio::select! {
            msg = tokio::time::timeout(SESSION_TIMEOUT, stream.next()) => {
                match msg {
                    Ok(Some(Ok(Message::Text(text)))) => {
                        if text.len() > state.config.max_frame_bytes {
                            let _ = handle.send(oversize_notice(state.config.max_frame_bytes)).await;
                            break;
                        }
                        match serde_json::from_str::<WsMessage>(&text) {
                            Ok(frame) => {
                                parse_failures = 0;
                                handle_user_frame(&state, &handle, user_id, frame).await;
                            }
                            Err(e) => {
                                parse_failures += 1;
                                let err = CoreError::MalformedFrame(e.to_string());
                                let _ = handle.send(WsMessage::status(status_levels::ERROR, err.to_string())).await;
                                if parse_failures >= MAX_PARSE_FAILURES {
                                    warn!(user_id = %user_id, "closing after repeated malformed frames");
                                    break;
                                }
                            }
                        }
                    }
                    Ok(Some(Ok(Message::Ping(data)))) => {
                        let _ = tx.send(SessionCommand::Control(Message::Pong(data))).await;
                    }
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                        info!(user_id = %user_id, "user disconnected");
                        break;
                    }
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(e))) => { warn!(user_id = %user_id, error = %e, "WS error"); break; }
                    Err(_) => { warn!(user_id = %user_id, "session timeout"); break; }
                }
            }
            _ = ping.tick() => {
                let _ = tx.send(SessionCommand::Control(Message::Ping(Vec::new()))).await;
            }
        }
    }

    state.registry.detach(user_id, handle.session_id()).await;
    info!(user_id = %user_id, "user session ended");
}

async fn handle_user_frame(
    state: &AppState,
    handle: &SessionHandle,
    user_id: Uuid,
    frame: WsMessage,
) {
    match frame {
        WsMessage::Message(msg) => {
            match router::route_message(state, Some(user_id), &msg).await {
                // A cached message is not an error to the sender.
                Ok(_) => {}
                Err(e @ CoreError::RecipientNotFound(_)) => {
                    let _ = handle
                        .send(WsMessage::status(status_levels::ERROR, e.to_string()))
                        .await;
                }
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "message routing failed");
                    let _ = handle
                        .send(WsMessage::status(
                            status_levels::ERROR,
                            "message could not be processed",
                        ))
                        .await;
                }
            }
        }
        _ => {
            let _ = handle
                .send(WsMessage::status(
                    status_levels::ERROR,
                    "only message frames are accepted on a user session",
                ))
                .await;
        }
    }
}
