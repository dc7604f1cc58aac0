use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::AppState;

/// Service health check
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let active_sessions = state.auth.sessions().active_count();
    ::metrics::gauge!("auth_sessions_active").set(active_sessions as f64);

    Json(json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "active_sessions": active_sessions,
    }))
}

/// Prometheus exposition
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "# Metrics recorder not installed\n".to_string(),
        ),
    }
}
