//! HTTP API endpoints (§6 [AMBIENT] HTTP surface): liveness and the
//! controller-only session export/import pair.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::state::export::SessionExport;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET /healthz. No auth, for load balancer / orchestrator liveness probes.
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// GET /api/sessions/:id/export (§6). Behind `auth::admin_auth_middleware`.
pub async fn export_session(State(state): State<Arc<AppState>>, Path(session_id): Path<String>) -> Response {
    match state.export_session(&session_id).await {
        Some(export) => Json(export).into_response(),
        None => (StatusCode::NOT_FOUND, "session not found").into_response(),
    }
}

/// POST /api/sessions/:id/import (§6). The path id is informational only —
/// the imported snapshot carries its own session id and is trusted as-is
/// once `SessionExport::validate` passes.
pub async fn import_session(State(state): State<Arc<AppState>>, Path(_session_id): Path<String>, Json(export): Json<SessionExport>) -> Response {
    match state.import_session(export).await {
        Ok(()) => (StatusCode::OK, "session imported").into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "session import rejected");
            (StatusCode::BAD_REQUEST, format!("import failed: {err}")).into_response()
        }
    }
}
