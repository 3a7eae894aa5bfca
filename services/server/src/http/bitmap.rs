//! Dispatch seam for the HTTP control plane: push a prepared bitmap frame
//! to a live printer session.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use pm_protocol::PrintBitmap;
use uuid::Uuid;

use crate::bitmap::dispatch_bitmap;
use crate::error::CoreError;
use crate::http::HttpErrorEnvelope;
use crate::state::AppState;

pub async fn print_bitmap(
    State(state): State<AppState>,
    Path(printer_id): Path<Uuid>,
    Json(frame): Json<PrintBitmap>,
) -> impl IntoResponse {
    match dispatch_bitmap(&state, printer_id, frame).await {
        Ok(delivered) => (
            StatusCode::OK,
            Json(serde_json::json!({ "delivered": delivered })),
        )
            .into_response(),
        Err(e) => {
            let (status, code) = match &e {
                CoreError::InvalidBitmap(_) => (StatusCode::BAD_REQUEST, "INVALID_BITMAP"),
                CoreError::RecipientNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                CoreError::RecipientNotConnected(_) => (StatusCode::CONFLICT, "NOT_CONNECTED"),
                CoreError::SendFailed(_) => (StatusCode::BAD_GATEWAY, "SEND_FAILED"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            };
            (
                status,
                Json(HttpErrorEnvelope {
                    code: code.to_owned(),
                    message: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}
