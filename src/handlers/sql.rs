use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::{Method, Uri};
use axum::Json;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::connection::ConnectionDescriptor;
use crate::error::ApiError;
use crate::handlers::status_check::resolve_published_api;
use crate::handlers::AppState;
use crate::store::models::CallOutcome;
use crate::vulcan::{bind_sql, validate_params};

/// Runs a published query: `GET /api/sql/{table}?connectionInfo=..&query=..`.
///
/// The request is matched to its published API first; that API's
/// concurrency and call counters follow the request. The counted part runs
/// on its own task so a dropped client connection still closes the call.
pub async fn run_published_query(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    Path(table): Path<String>,
    params: Result<Query<HashMap<String, String>>, QueryRejection>,
) -> Result<Json<Vec<Value>>, ApiError> {
    if method != Method::GET {
        return Err(ApiError::MethodNotAllowed { allow: Some("GET") });
    }
    let Query(params) = params?;

    let api_id = params.get("apiId").map(String::as_str);
    let api = resolve_published_api(state.store.as_ref(), uri.path(), api_id).await?;

    let call = tokio::spawn(async move {
        state.store.begin_call(&api.id).await?;
        let started = Instant::now();

        let result = execute(&state, &table, &params).await;

        let outcome = match &result {
            Ok(_) => CallOutcome::Success,
            Err(e) if e.is_rejection() => CallOutcome::Rejected,
            Err(_) => CallOutcome::Failure,
        };
        let latency_ms = started.elapsed().as_millis() as u64;
        if let Err(e) = state.store.finish_call(&api.id, outcome, latency_ms).await {
            tracing::warn!("Failed to update metrics for API {}: {}", api.id, e);
        }
        result
    });

    let rows = call
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Published query task failed: {}", e)))??;
    Ok(Json(rows))
}

async fn execute(
    state: &AppState,
    table: &str,
    params: &HashMap<String, String>,
) -> Result<Vec<Value>, ApiError> {
    let table = table.replace(';', "");
    tracing::info!("Processing request for table: {}", table);

    let connection = decode_connection(state, params)?;
    let sql = params
        .get("query")
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ApiError::validation("Missing query"))?;

    // Literals in the published template act as defaults, so request
    // parameters are optional overrides here.
    let mut endpoint = crate::vulcan::parser::parse_sql(sql);
    endpoint.params.iter_mut().for_each(|p| p.required = false);
    let values = validate_params(&endpoint, params, None)?;
    let bound = bind_sql(&endpoint.sql, &values);

    state.runner.run(&connection, &bound).await.map_err(|e| {
        tracing::error!("Error executing query: {:#}", e);
        ApiError::Execution {
            message: "Query execution failed".to_string(),
            details: Some(e.to_string()),
        }
    })
}

fn decode_connection(
    state: &AppState,
    params: &HashMap<String, String>,
) -> Result<ConnectionDescriptor, ApiError> {
    let encrypted = params
        .get("connectionInfo")
        .ok_or_else(|| ApiError::validation("Missing connection information"))?;

    let connection: ConnectionDescriptor = state
        .cipher
        .decrypt(encrypted)
        .and_then(|plain| serde_json::from_str(&plain).map_err(anyhow::Error::from))
        .map_err(|e| {
            tracing::warn!("Error decrypting connection info: {:#}", e);
            ApiError::validation_with(
                "Invalid connection information",
                "Failed to decrypt or parse connection information",
            )
        })?;

    connection
        .validate()
        .map_err(|e| ApiError::validation_with("Invalid connection information", e.to_string()))?;
    tracing::debug!("Decrypted connection info: {:?}", connection);
    Ok(connection)
}
