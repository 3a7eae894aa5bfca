pub mod bitmap;
pub mod bucket;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod platform;
pub mod registry;
pub mod repo;
pub mod rollout;
pub mod router;
pub mod sanitize;
pub mod scheduler;
pub mod state;
pub mod tracker;
pub mod version;
pub mod ws_session;

pub use config::Config;
pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let cors = state.config.cors_layer();
    Router::new()
        .route("/ws/:identity", get(ws_session::ws_handler))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route(
            "/api/printers/:printer_id/print-bitmap",
            post(http::bitmap::print_bitmap),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

mod health {
    use axum::response::IntoResponse;
    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }
    pub async fn readyz() -> impl IntoResponse {
        "ok"
    }
}
