pub mod models;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::connection::url::normalize_path_for_match;
use crate::store::models::{ApiMetrics, ApiStatus, CallOutcome, MetricsPatch, NewApi, PublishedApi};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("API not found with id: {0}")]
    NotFound(String),

    #[error("Failed to access state file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persisted list of published APIs.
#[async_trait]
pub trait ApiRepository: Send + Sync {
    async fn list(&self) -> StoreResult<Vec<PublishedApi>>;
    async fn get(&self, id: &str) -> StoreResult<Option<PublishedApi>>;
    /// Every API addressed by `url`, compared with `normalize_path_for_match`,
    /// in insertion order.
    async fn find_by_url(&self, url: &str) -> StoreResult<Vec<PublishedApi>>;
    async fn add(&self, api: NewApi) -> StoreResult<PublishedApi>;
    async fn update_status(&self, id: &str, status: ApiStatus) -> StoreResult<PublishedApi>;
    async fn update_metrics(&self, id: &str, patch: MetricsPatch) -> StoreResult<PublishedApi>;
    /// Takes a concurrency slot.
    async fn begin_call(&self, id: &str) -> StoreResult<PublishedApi>;
    /// Releases the slot taken by `begin_call` and records the outcome.
    async fn finish_call(&self, id: &str, outcome: CallOutcome, latency_ms: u64) -> StoreResult<PublishedApi>;
    /// Records an outcome without touching concurrency counters.
    async fn record_call(&self, id: &str, outcome: CallOutcome, latency_ms: u64) -> StoreResult<PublishedApi>;
    async fn delete(&self, id: &str) -> StoreResult<()>;
    async fn clear_all(&self) -> StoreResult<()>;
    async fn sync(&self, apis: Vec<PublishedApi>) -> StoreResult<Vec<PublishedApi>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    apis: Vec<PublishedApi>,
}

/// Single-writer store backed by one JSON file, rewritten whole on every
/// mutation. All read-modify-write cycles hold the same lock.
pub struct JsonFileStore {
    path: PathBuf,
    reload_on_access: bool,
    apis: Mutex<Vec<PublishedApi>>,
}

impl JsonFileStore {
    pub async fn open(path: impl Into<PathBuf>, reload_on_access: bool) -> anyhow::Result<Self> {
        let path = path.into();
        let apis = match read_state(&path).await? {
            Some(state) => state.apis,
            None => Vec::new(),
        };
        tracing::info!("Loaded {} published APIs from {}", apis.len(), path.display());

        Ok(Self {
            path,
            reload_on_access,
            apis: Mutex::new(apis),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn refresh(&self, apis: &mut Vec<PublishedApi>) {
        if !self.reload_on_access {
            return;
        }
        match read_state(&self.path).await {
            Ok(Some(state)) => *apis = state.apis,
            Ok(None) => apis.clear(),
            Err(e) => tracing::warn!("Failed to reload state from {}: {:#}", self.path.display(), e),
        }
    }

    async fn persist(&self, apis: &[PublishedApi]) -> StoreResult<()> {
        #[derive(Serialize)]
        struct StateRef<'a> {
            apis: &'a [PublishedApi],
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&StateRef { apis })?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::debug!("Saved {} published APIs", apis.len());
        Ok(())
    }

    async fn read<T>(&self, f: impl FnOnce(&[PublishedApi]) -> T) -> T {
        let mut apis = self.apis.lock().await;
        self.refresh(&mut apis).await;
        f(&apis)
    }

    /// Applies `f` to a copy of the list, persists the copy, then swaps it in.
    async fn mutate<T>(&self, f: impl FnOnce(&mut Vec<PublishedApi>) -> StoreResult<T>) -> StoreResult<T> {
        let mut apis = self.apis.lock().await;
        self.refresh(&mut apis).await;
        let mut next = apis.clone();
        let out = f(&mut next)?;
        self.persist(&next).await?;
        *apis = next;
        Ok(out)
    }

    async fn update_one(
        &self,
        id: &str,
        f: impl FnOnce(&PublishedApi) -> PublishedApi,
    ) -> StoreResult<PublishedApi> {
        self.mutate(|apis| {
            let index = apis
                .iter()
                .position(|api| api.id == id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            let updated = f(&apis[index]);
            apis[index] = updated.clone();
            Ok(updated)
        })
        .await
    }

    async fn update_metrics_with(
        &self,
        id: &str,
        f: impl FnOnce(&ApiMetrics) -> ApiMetrics,
    ) -> StoreResult<PublishedApi> {
        self.update_one(id, |api| PublishedApi {
            metrics: f(&api.metrics),
            ..api.clone()
        })
        .await
    }
}

async fn read_state(path: &Path) -> anyhow::Result<Option<StateFile>> {
    use anyhow::Context;

    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(None);
    }
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if data.trim().is_empty() {
        return Ok(Some(StateFile::default()));
    }
    let state = serde_json::from_str::<StateFile>(&data)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(state))
}

#[async_trait]
impl ApiRepository for JsonFileStore {
    async fn list(&self) -> StoreResult<Vec<PublishedApi>> {
        Ok(self.read(|apis| apis.to_vec()).await)
    }

    async fn get(&self, id: &str) -> StoreResult<Option<PublishedApi>> {
        Ok(self.read(|apis| apis.iter().find(|api| api.id == id).cloned()).await)
    }

    async fn find_by_url(&self, url: &str) -> StoreResult<Vec<PublishedApi>> {
        let wanted = normalize_path_for_match(url);
        Ok(self
            .read(|apis| {
                apis.iter()
                    .filter(|api| normalize_path_for_match(&api.url) == wanted)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn add(&self, api: NewApi) -> StoreResult<PublishedApi> {
        let published = api.into_published();
        let created = published.clone();
        self.mutate(move |apis| {
            apis.push(published);
            Ok(())
        })
        .await?;
        tracing::info!("Published API: {} (id: {})", created.name, created.id);
        Ok(created)
    }

    async fn update_status(&self, id: &str, status: ApiStatus) -> StoreResult<PublishedApi> {
        let updated = self
            .update_one(id, |api| PublishedApi { status, ..api.clone() })
            .await?;
        tracing::info!("Updated API status: {} -> {:?}", id, status);
        Ok(updated)
    }

    async fn update_metrics(&self, id: &str, patch: MetricsPatch) -> StoreResult<PublishedApi> {
        self.update_metrics_with(id, |metrics| metrics.merged(&patch)).await
    }

    async fn begin_call(&self, id: &str) -> StoreResult<PublishedApi> {
        self.update_metrics_with(id, ApiMetrics::call_started).await
    }

    async fn finish_call(&self, id: &str, outcome: CallOutcome, latency_ms: u64) -> StoreResult<PublishedApi> {
        let now = Utc::now();
        self.update_metrics_with(id, |metrics| metrics.call_finished(outcome, latency_ms, now))
            .await
    }

    async fn record_call(&self, id: &str, outcome: CallOutcome, latency_ms: u64) -> StoreResult<PublishedApi> {
        let now = Utc::now();
        self.update_metrics_with(id, |metrics| metrics.call_recorded(outcome, latency_ms, now))
            .await
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.mutate(|apis| {
            let index = apis
                .iter()
                .position(|api| api.id == id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            apis.remove(index);
            Ok(())
        })
        .await?;
        tracing::info!("Deleted API: {}", id);
        Ok(())
    }

    async fn clear_all(&self) -> StoreResult<()> {
        self.mutate(|apis| {
            apis.clear();
            Ok(())
        })
        .await?;
        tracing::info!("Cleared all published APIs");
        Ok(())
    }

    async fn sync(&self, incoming: Vec<PublishedApi>) -> StoreResult<Vec<PublishedApi>> {
        let synced = self
            .mutate(move |apis| {
                *apis = incoming;
                Ok(apis.clone())
            })
            .await?;
        tracing::info!("Synced {} published APIs", synced.len());
        Ok(synced)
    }
}
