use crate::error::ApiError;
use crate::store::models::{ApiStatus, PublishedApi};
use crate::store::ApiRepository;

/// Finds the published API a request targets: by `apiId` when given,
/// otherwise by URL path. Inactive APIs are refused.
pub async fn resolve_published_api(
    store: &dyn ApiRepository,
    request_path: &str,
    api_id: Option<&str>,
) -> Result<PublishedApi, ApiError> {
    let apis = store.list().await?;
    if apis.is_empty() {
        return Err(ApiError::NotFound("No APIs available".to_string()));
    }

    if let Some(id) = api_id.filter(|id| !id.is_empty()) {
        let api = apis
            .into_iter()
            .find(|api| api.id == id)
            .ok_or_else(|| ApiError::NotFound(format!("API with ID {} not found", id)))?;
        if api.status == ApiStatus::Inactive {
            return Err(ApiError::Forbidden(format!("API {} is currently inactive", id)));
        }
        return Ok(api);
    }

    let matching = store.find_by_url(request_path).await?;
    if matching.is_empty() {
        return Err(ApiError::NotFound("No matching API found for this URL".to_string()));
    }
    let api = matching.into_iter().find(|api| api.status == ApiStatus::Active).ok_or_else(|| {
        ApiError::Forbidden("All matching APIs for this URL are currently inactive".to_string())
    })?;

    tracing::debug!("Request {} matched API {}", request_path, api.id);
    Ok(api)
}
