use axum::http::HeaderValue;
use std::env;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_MAX_FIRMWARE_SIZE: usize = 5 * 1024 * 1024;
const DEFAULT_MAX_FRAME_BYTES: usize = 128 * 1024;

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    /// CSV of allowed origins; `*` means any.
    pub cors_allowed_origins: Vec<String>,
    /// Public base URL used to build firmware download links.
    pub base_url: String,
    pub max_firmware_size: usize,
    /// Inbound WebSocket frames over this many bytes are rejected.
    pub max_frame_bytes: usize,
    /// Opaque; held for the HTTP auth collaborators.
    pub jwt_secret: String,
}

impl Config {
    /// Defaults for everything except the database URL.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            bind_addr: "0.0.0.0:8000".to_owned(),
            cors_allowed_origins: vec!["*".to_owned()],
            base_url: DEFAULT_BASE_URL.to_owned(),
            max_firmware_size: DEFAULT_MAX_FIRMWARE_SIZE,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            jwt_secret: String::new(),
        }
    }

    /// Read configuration from the environment.
    ///
    /// # Panics
    ///
    /// Panics if `DATABASE_URL` is unset; everything else has a default.
    pub fn from_env() -> Self {
        let mut config = Self::new(env::var("DATABASE_URL").expect("DATABASE_URL must be set"));
        if let Ok(addr) = env::var("BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(origins) = env::var("CORS_ALLOWED_ORIGINS") {
            config.cors_allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_owned())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Ok(url) = env::var("BASE_URL") {
            config.base_url = url;
        }
        if let Some(size) = env::var("MAX_FIRMWARE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.max_firmware_size = size;
        }
        if let Some(bytes) = env::var("MAX_FRAME_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.max_frame_bytes = bytes;
        }
        if let Ok(secret) = env::var("JWT_SECRET") {
            config.jwt_secret = secret;
        }
        config
    }

    pub fn cors_layer(&self) -> CorsLayer {
        let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
        if self.cors_allowed_origins.iter().any(|o| o == "*") {
            layer.allow_origin(Any)
        } else {
            let origins: Vec<HeaderValue> = self
                .cors_allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            layer.allow_origin(AllowOrigin::list(origins))
        }
    }
}
