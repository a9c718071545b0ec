use axum::extract::State;
use axum::http::StatusCode;
use std::sync::Arc;

use crate::handlers::AppState;

/// Returns OK while the published API store is readable.
pub async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match state.store.list().await {
        Ok(_) => (StatusCode::OK, "OK"),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable")
        }
    }
}
