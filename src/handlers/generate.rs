use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::connection::url::{generate_curl_command, generate_sql_api_url};
use crate::connection::ConnectionDescriptor;
use crate::error::ApiError;
use crate::handlers::AppState;
use crate::vulcan::parser::parse_sql;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub sql: String,
    pub connection: Option<ConnectionDescriptor>,
    pub table_name: Option<String>,
    pub api_id: Option<String>,
}

/// `POST /api/sql-to-api`: previews the endpoint a SQL string would become.
/// With a connection it also returns the encrypted published URL.
pub async fn sql_to_api(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let req: GenerateRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::validation_with("Invalid request body", e.to_string()))?;
    if req.sql.trim().is_empty() {
        return Err(ApiError::validation("SQL query is required"));
    }

    let endpoint = parse_sql(&req.sql);
    let example = if endpoint.params.is_empty() {
        format!("curl -X {} {}", endpoint.method, endpoint.path)
    } else {
        let query: Vec<String> = endpoint.params.iter().map(|p| format!("{}=value", p.name)).collect();
        format!("curl -X {} {}?{}", endpoint.method, endpoint.path, query.join("&"))
    };

    let mut response = json!({
        "success": true,
        "endpoint": endpoint,
        "documentation": {
            "endpoint": endpoint.path,
            "method": endpoint.method,
            "parameters": endpoint.params,
            "example": {
                "request": example,
                "response": { "type": "array", "items": { "type": "object", "properties": {} } },
            },
        },
    });

    if let Some(connection) = &req.connection {
        let url = generate_sql_api_url(
            &state.cipher,
            connection,
            &req.sql,
            req.table_name.as_deref(),
            req.api_id.as_deref(),
        )
        .map_err(|e| ApiError::validation(e.to_string()))?;
        response["curl"] = json!(generate_curl_command(&url));
        response["url"] = json!(url);
    }

    Ok(Json(response))
}
