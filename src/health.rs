use std::time::Instant;

use axum::{debug_handler, extract::State, Json};
use serde::Serialize;

use crate::{chat::HubHandle, AppResult, AppState};

#[derive(Debug, Clone, Copy)]
pub struct StartedAt(pub Instant);

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    /// Open chat sockets, joined or not.
    pub connections: usize,
}

#[debug_handler(state = AppState)]
pub async fn health(
    State(StartedAt(started)): State<StartedAt>,
    State(hub): State<HubHandle>,
) -> AppResult<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "ok",
        uptime_secs: started.elapsed().as_secs(),
        connections: hub.connection_count().await?,
    }))
}
