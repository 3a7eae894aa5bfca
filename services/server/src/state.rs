use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Config;
use crate::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub registry: ConnectionRegistry,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        Self {
            pool,
            registry: ConnectionRegistry::new(),
            config: Arc::new(config),
        }
    }
}
