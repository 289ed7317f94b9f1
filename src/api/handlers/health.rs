use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub warehouse_backend: String,
    pub warehouse_configured: bool,
    pub missing_settings: Vec<String>,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let provisioner = state.controller.provisioner();
    // Reports configuration only; no session is opened here.
    let missing: Vec<String> = provisioner
        .config()
        .missing_fields()
        .into_iter()
        .map(str::to_string)
        .collect();

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        warehouse_backend: provisioner.backend().to_string(),
        warehouse_configured: missing.is_empty(),
        missing_settings: missing,
    })
}
