use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::super::AppState;
use crate::payment::Ledger;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    /// Package name and version
    pub service: Vec<String>,
    pub service_uptime_secs: u64,
    /// Number of registered tools
    pub tools: usize,
    /// Ledger backend in use (`memory` or `remote`)
    pub ledger: String,
    /// Requests currently holding a wallet context
    pub live_contexts: usize,
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: vec![
            env!("CARGO_PKG_NAME").to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        ],
        service_uptime_secs: state.started_at.elapsed().as_secs(),
        tools: state.server.registry().len(),
        ledger: state.ledger().kind().to_string(),
        live_contexts: state.wallets.len(),
    })
}
