use axum::extract::{Path, State};
use axum::extract::rejection::JsonRejection;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ApiError;
use crate::handlers::AppState;
use crate::store::models::{ApiStatus, NewApi, PublishedApi};

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub id: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub apis: Vec<PublishedApi>,
}

fn parse_body<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|e| ApiError::validation_with("Invalid request body", e.to_string()))
}

pub async fn list_apis(State(state): State<Arc<AppState>>) -> Result<Json<Vec<PublishedApi>>, ApiError> {
    Ok(Json(state.store.list().await?))
}

pub async fn get_api(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PublishedApi>, ApiError> {
    state
        .store
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("API not found with id: {}", id)))
}

pub async fn create_api(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let new_api: NewApi = parse_body(body)?;
    let missing = new_api.missing_fields();
    if !missing.is_empty() {
        return Err(ApiError::validation_with("Missing required fields", missing.join(", ")));
    }

    let api = state.store.add(new_api).await?;
    tracing::info!("Created API {} ({})", api.id, api.name);
    Ok(Json(json!({ "message": "API created successfully", "api": api })))
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let update: StatusUpdate = parse_body(body)?;
    let (Some(id), Some(status)) = (update.id, update.status) else {
        return Err(ApiError::validation("Missing required fields"));
    };
    let status = match status.as_str() {
        "active" => ApiStatus::Active,
        "inactive" => ApiStatus::Inactive,
        other => return Err(ApiError::validation(format!("Invalid status: {}", other))),
    };

    let api = state.store.update_status(&id, status).await?;
    Ok(Json(json!({ "message": "API status updated successfully", "api": api })))
}

pub async fn delete_api(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let request: DeleteRequest = parse_body(body)?;
    let id = request
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::validation("API ID is required"))?;

    state.store.delete(&id).await?;
    Ok(Json(json!({ "message": "API deleted successfully", "id": id })))
}

pub async fn clear_all(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    state.store.clear_all().await?;
    Ok(Json(json!({ "message": "All APIs cleared successfully" })))
}

pub async fn get_state(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let apis = state.store.list().await?;
    Ok(Json(json!({ "apis": apis })))
}

pub async fn sync_state(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let request: SyncRequest = parse_body(body)?;
    let apis = state.store.sync(request.apis).await?;
    Ok(Json(json!({ "message": "State synced successfully", "apis": apis })))
}
