use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::vulcan::types::HttpMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiMetrics {
    pub total_calls: u64,
    pub success_calls: u64,
    pub failed_calls: u64,
    /// Running mean in milliseconds.
    pub average_response_time: f64,
    pub current_concurrent_calls: u64,
    pub max_concurrent_calls: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_called_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsPatch {
    pub success_calls: Option<u64>,
    pub failed_calls: Option<u64>,
    pub average_response_time: Option<f64>,
    pub current_concurrent_calls: Option<u64>,
    pub last_called_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    /// Turned away before execution; only the concurrency slot is released.
    Rejected,
}

impl ApiMetrics {
    /// Shallow merge; totals are recomputed from the merged counters.
    pub fn merged(&self, patch: &MetricsPatch) -> ApiMetrics {
        let success_calls = patch.success_calls.unwrap_or(self.success_calls);
        let failed_calls = patch.failed_calls.unwrap_or(self.failed_calls);
        let current = patch.current_concurrent_calls.unwrap_or(self.current_concurrent_calls);
        ApiMetrics {
            total_calls: success_calls + failed_calls,
            success_calls,
            failed_calls,
            average_response_time: patch.average_response_time.unwrap_or(self.average_response_time),
            current_concurrent_calls: current,
            max_concurrent_calls: self.max_concurrent_calls.max(current),
            last_called_at: patch.last_called_at.or(self.last_called_at),
        }
    }

    pub fn call_started(&self) -> ApiMetrics {
        self.merged(&MetricsPatch {
            current_concurrent_calls: Some(self.current_concurrent_calls + 1),
            ..Default::default()
        })
    }

    pub fn call_recorded(&self, outcome: CallOutcome, latency_ms: u64, at: DateTime<Utc>) -> ApiMetrics {
        let patch = match outcome {
            CallOutcome::Success => MetricsPatch {
                success_calls: Some(self.success_calls + 1),
                average_response_time: Some(
                    (self.average_response_time * self.total_calls as f64 + latency_ms as f64)
                        / (self.total_calls + 1) as f64,
                ),
                last_called_at: Some(at),
                ..Default::default()
            },
            CallOutcome::Failure => MetricsPatch {
                failed_calls: Some(self.failed_calls + 1),
                last_called_at: Some(at),
                ..Default::default()
            },
            CallOutcome::Rejected => MetricsPatch::default(),
        };
        self.merged(&patch)
    }

    pub fn call_finished(&self, outcome: CallOutcome, latency_ms: u64, at: DateTime<Utc>) -> ApiMetrics {
        let released = self.merged(&MetricsPatch {
            current_concurrent_calls: Some(self.current_concurrent_calls.saturating_sub(1)),
            ..Default::default()
        });
        released.call_recorded(outcome, latency_ms, at)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedApi {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub connection_id: String,
    #[serde(default)]
    pub table_name: String,
    #[serde(default)]
    pub sql_query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: ApiStatus,
    #[serde(default)]
    pub metrics: ApiMetrics,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewApi {
    pub name: String,
    pub url: String,
    pub method: HttpMethod,
    pub connection_id: String,
    pub table_name: String,
    pub sql_query: String,
    pub database: Option<String>,
    pub description: Option<String>,
}

impl NewApi {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.name.trim().is_empty() {
            missing.push("name");
        }
        if self.sql_query.trim().is_empty() {
            missing.push("sqlQuery");
        }
        if self.connection_id.trim().is_empty() {
            missing.push("connectionId");
        }
        if self.url.trim().is_empty() {
            missing.push("url");
        }
        missing
    }

    pub fn into_published(self) -> PublishedApi {
        PublishedApi {
            id: uuid::Uuid::new_v4().to_string(),
            name: self.name,
            url: self.url,
            method: self.method,
            connection_id: self.connection_id,
            table_name: self.table_name,
            sql_query: self.sql_query,
            database: self.database,
            description: self.description,
            created_at: Utc::now(),
            status: ApiStatus::Active,
            metrics: ApiMetrics::default(),
        }
    }
}
