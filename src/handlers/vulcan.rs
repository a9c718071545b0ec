use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::Method;
use axum::Json;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::connection::ConnectionDescriptor;
use crate::error::ApiError;
use crate::handlers::AppState;
use crate::vulcan::types::HttpMethod;
use crate::vulcan::VulcanRequest;

/// The connection travels either as `connection` in the JSON body or as a
/// JSON-encoded `connection` query parameter.
fn connection_from(
    body: Option<&Value>,
    query: &HashMap<String, String>,
) -> Result<ConnectionDescriptor, ApiError> {
    let raw = match body.and_then(|b| b.get("connection")) {
        Some(value) => value.clone(),
        None => match query.get("connection") {
            Some(text) => serde_json::from_str(text)
                .map_err(|e| ApiError::validation_with("Invalid connection configuration", e.to_string()))?,
            None => return Err(ApiError::validation("Connection configuration is required")),
        },
    };
    serde_json::from_value(raw)
        .map_err(|e| ApiError::validation_with("Invalid connection configuration", e.to_string()))
}

/// `ANY /api/vulcan/execute/{*path}`: dispatches to a registered endpoint.
pub async fn execute(
    State(state): State<Arc<AppState>>,
    method: Method,
    Path(path): Path<String>,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
    body: Bytes,
) -> Result<Json<Vec<Value>>, ApiError> {
    let Query(query) = query?;
    let body: Option<Value> = if body.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice(&body)
                .map_err(|e| ApiError::validation_with("Invalid JSON body", e.to_string()))?,
        )
    };

    let connection = connection_from(body.as_ref(), &query)?;
    let method = HttpMethod::from_http(&method).ok_or(ApiError::MethodNotAllowed { allow: None })?;
    let path = format!("/api/{}", path.trim_start_matches('/'));

    let request = VulcanRequest {
        method,
        path: &path,
        query: &query,
        body: body.as_ref(),
    };
    tracing::debug!("Vulcan request {} {}", method, path);

    let rows = state
        .vulcans
        .handle(&connection.key(), request, state.runner.as_ref(), state.store.as_ref())
        .await?;
    Ok(Json(rows))
}

/// `GET /api/vulcan/swagger?connection=<json>`
pub async fn swagger(
    State(state): State<Arc<AppState>>,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let connection = connection_from(None, &query)?;
    state
        .vulcans
        .docs(&connection.key())
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Documentation is disabled for this connection".to_string()))
}
