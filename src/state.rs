// src/state.rs

use crate::config::Config;
use crate::realtime::RealtimeHub;
use axum::extract::FromRef;
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub hub: RealtimeHub,
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for RealtimeHub {
    fn from_ref(state: &AppState) -> Self {
        state.hub.clone()
    }
}
