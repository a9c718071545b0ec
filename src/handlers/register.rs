use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::connection::url::generate_sql_api_url;
use crate::connection::ConnectionDescriptor;
use crate::error::ApiError;
use crate::handlers::AppState;
use crate::store::models::NewApi;
use crate::vulcan::types::HttpMethod;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    pub connection: Option<ConnectionDescriptor>,
    #[serde(default)]
    pub table_name: String,
    #[serde(default)]
    pub sql_query: String,
    pub database: Option<String>,
}

/// `POST /api/vulcan/register`: registers the SQL with the connection's
/// router table and publishes a GET-callable URL for it.
pub async fn register_api(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let req: RegisterRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::validation_with("Invalid request body", e.to_string()))?;

    let table_name = req.table_name.trim().to_string();
    let mut connection = match req.connection {
        Some(c) if !req.name.trim().is_empty() && !req.sql_query.trim().is_empty() && !table_name.is_empty() => c,
        _ => {
            return Err(ApiError::validation(
                "Name, connection, SQL query and table name are required",
            ));
        }
    };
    if connection.database.is_empty() {
        if let Some(database) = req.database.as_ref().filter(|d| !d.is_empty()) {
            connection.database = database.clone();
        }
    }

    let key = connection.key();
    if !state.vulcans.contains(&key).await {
        if let Err(e) = state.runner.ping(&connection).await {
            tracing::error!("Connection validation failed for {:?}: {:#}", connection, e);
            return Err(ApiError::validation("Failed to validate database connection"));
        }
    }

    let url = generate_sql_api_url(&state.cipher, &connection, &req.sql_query, Some(&table_name), None)
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let endpoint = state.vulcans.register(connection, &req.sql_query).await;

    let api = state
        .store
        .add(NewApi {
            name: req.name,
            url: url.clone(),
            method: HttpMethod::Get,
            connection_id: key,
            table_name,
            sql_query: req.sql_query,
            database: req.database,
            description: req.description.clone(),
        })
        .await?;

    Ok(Json(json!({
        "message": "SQL API registered successfully",
        "api": api,
        "endpoint": endpoint,
        "documentation": {
            "url": url,
            "method": "GET",
            "description": req.description.unwrap_or_else(|| "No description provided".to_string()),
            "parameters": {
                "connectionInfo": "Connection information (encrypted)",
                "query": "SQL query (URL encoded)",
            },
        },
    })))
}
