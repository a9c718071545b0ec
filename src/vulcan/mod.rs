//! Ad-hoc SQL endpoints: a raw SQL string becomes a (path, method) route
//! whose WHERE-clause literals can be overridden per request.

pub mod docs;
pub mod parser;
pub mod types;

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::connection::ConnectionDescriptor;
use crate::db::QueryRunner;
use crate::error::ApiError;
use crate::store::models::CallOutcome;
use crate::store::ApiRepository;
use crate::vulcan::parser::{HeuristicSqlAnalyzer, RegexSqlAnalyzer};
use crate::vulcan::types::{HttpMethod, ParamLocation, ParamType, ParamValue, SqlEndpoint, VulcanRouter};

/// An incoming call, already split into its parts.
#[derive(Debug, Clone, Copy)]
pub struct VulcanRequest<'a> {
    pub method: HttpMethod,
    pub path: &'a str,
    pub query: &'a HashMap<String, String>,
    pub body: Option<&'a Value>,
}

impl VulcanRequest<'_> {
    pub fn api_id(&self) -> Option<String> {
        self.query
            .get("apiId")
            .cloned()
            .or_else(|| self.body.and_then(|b| b.get("apiId")).and_then(value_as_text))
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    NewRouter,
    Appended,
    /// Same path and method were registered before; the old endpoint is gone.
    Replaced,
}

/// Router table for one connection.
pub struct Vulcan {
    connection: ConnectionDescriptor,
    routers: Vec<VulcanRouter>,
    enable_docs: bool,
    analyzer: Arc<dyn HeuristicSqlAnalyzer>,
}

impl Vulcan {
    pub fn new(connection: ConnectionDescriptor) -> Self {
        Self::with_analyzer(connection, Arc::new(RegexSqlAnalyzer))
    }

    pub fn with_analyzer(connection: ConnectionDescriptor, analyzer: Arc<dyn HeuristicSqlAnalyzer>) -> Self {
        Self {
            connection,
            routers: Vec::new(),
            enable_docs: true,
            analyzer,
        }
    }

    pub fn set_docs_enabled(&mut self, enabled: bool) {
        self.enable_docs = enabled;
    }

    pub fn connection(&self) -> &ConnectionDescriptor {
        &self.connection
    }

    pub fn routers(&self) -> &[VulcanRouter] {
        &self.routers
    }

    pub fn add_sql(&mut self, sql: &str) -> SqlEndpoint {
        let endpoint = self.analyzer.analyze(sql);
        let outcome = self.add_endpoint(endpoint.clone());
        tracing::info!("Registered {} {} ({:?})", endpoint.method, endpoint.path, outcome);
        endpoint
    }

    pub fn add_endpoint(&mut self, endpoint: SqlEndpoint) -> RegisterOutcome {
        let Some(router) = self.routers.iter_mut().find(|r| r.path == endpoint.path) else {
            self.routers.push(VulcanRouter {
                path: endpoint.path.clone(),
                endpoints: vec![endpoint],
            });
            return RegisterOutcome::NewRouter;
        };

        match router.endpoints.iter_mut().find(|e| e.method == endpoint.method) {
            Some(existing) => {
                *existing = endpoint;
                RegisterOutcome::Replaced
            }
            None => {
                router.endpoints.push(endpoint);
                RegisterOutcome::Appended
            }
        }
    }

    /// First router, in registration order, whose path prefixes `path`.
    /// `/api/users` therefore also answers `/api/users_archive` when it was
    /// registered first.
    pub fn find_router(&self, path: &str) -> Option<&VulcanRouter> {
        self.routers.iter().find(|r| path.starts_with(&r.path))
    }

    pub fn resolve(&self, path: &str, method: HttpMethod) -> Result<&SqlEndpoint, ApiError> {
        let path = path.split('?').next().unwrap_or(path);
        let router = self
            .find_router(path)
            .ok_or_else(|| ApiError::NotFound("API endpoint not found".to_string()))?;
        router
            .endpoints
            .iter()
            .find(|e| e.method == method)
            .ok_or(ApiError::MethodNotAllowed { allow: None })
    }

    /// Resolves, validates and binds; returns the SQL to run.
    pub fn prepare(&self, request: &VulcanRequest<'_>) -> Result<String, ApiError> {
        let endpoint = self.resolve(request.path, request.method)?;
        let values = validate_params(endpoint, request.query, request.body)?;
        Ok(bind_sql(&endpoint.sql, &values))
    }

    pub fn openapi_docs(&self) -> Option<Value> {
        self.enable_docs.then(|| docs::openapi_document(&self.routers))
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub fn validate_params(
    endpoint: &SqlEndpoint,
    query: &HashMap<String, String>,
    body: Option<&Value>,
) -> Result<Vec<(String, ParamValue)>, ApiError> {
    let mut values = Vec::with_capacity(endpoint.params.len());
    for param in &endpoint.params {
        let raw = match param.location {
            ParamLocation::Query | ParamLocation::Path => query.get(&param.name).cloned(),
            ParamLocation::Body => body.and_then(|b| b.get(&param.name)).and_then(value_as_text),
        };

        match raw {
            Some(raw) => values.push((param.name.clone(), coerce(&param.name, &raw, param.param_type)?)),
            None if param.required => {
                return Err(ApiError::validation(format!(
                    "Missing required parameter: {}",
                    param.name
                )));
            }
            None => {}
        }
    }
    Ok(values)
}

pub fn coerce(name: &str, raw: &str, param_type: ParamType) -> Result<ParamValue, ApiError> {
    match param_type {
        ParamType::String => Ok(ParamValue::Text(raw.to_string())),
        ParamType::Number => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(ParamValue::Number)
            .ok_or_else(|| ApiError::validation(format!("Invalid number for parameter: {}", name))),
        ParamType::Boolean => Ok(ParamValue::Bool(raw == "true")),
    }
}

/// Replaces the first `name = <token>` per bound value. Values are quoted by
/// type only, never escaped.
///
/// The name must start the SQL or follow a non-word character; names that
/// begin with punctuation (`(id` from `WHERE (id = 1 ...`) still bind.
pub fn bind_sql(template: &str, values: &[(String, ParamValue)]) -> String {
    let mut sql = template.to_string();
    for (name, value) in values {
        let Ok(re) = Regex::new(&format!(r"(^|[^\w]){}\s*=\s*[^\s]+", regex::escape(name))) else {
            continue;
        };
        let replacement = format!("{} = {}", name, value.to_sql_literal());
        sql = re
            .replacen(&sql, 1, |caps: &regex::Captures| format!("{}{}", &caps[1], replacement))
            .into_owned();
    }
    sql
}

/// One router table per connection key.
#[derive(Default)]
pub struct VulcanRegistry {
    instances: RwLock<HashMap<String, Vulcan>>,
}

impl VulcanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.instances.read().await.contains_key(key)
    }

    pub async fn register(&self, connection: ConnectionDescriptor, sql: &str) -> SqlEndpoint {
        let mut instances = self.instances.write().await;
        instances
            .entry(connection.key())
            .or_insert_with(|| Vulcan::new(connection))
            .add_sql(sql)
    }

    pub async fn docs(&self, key: &str) -> Option<Value> {
        match self.instances.read().await.get(key) {
            Some(vulcan) => vulcan.openapi_docs(),
            None => Some(docs::openapi_document(&[])),
        }
    }

    /// RECEIVED → VALIDATING → EXECUTING → SUCCEEDED | FAILED.
    ///
    /// Routing and validation failures return before any metrics are
    /// touched. Execution outcomes are recorded against `apiId` when the
    /// request names one.
    pub async fn handle(
        &self,
        key: &str,
        request: VulcanRequest<'_>,
        runner: &dyn QueryRunner,
        store: &dyn ApiRepository,
    ) -> Result<Vec<Value>, ApiError> {
        let started = Instant::now();
        let (connection, sql) = {
            let instances = self.instances.read().await;
            let vulcan = instances
                .get(key)
                .ok_or_else(|| ApiError::NotFound("No API found for this connection".to_string()))?;
            (vulcan.connection().clone(), vulcan.prepare(&request)?)
        };

        let result = runner.run(&connection, &sql).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        if let Some(api_id) = request.api_id() {
            let outcome = if result.is_ok() { CallOutcome::Success } else { CallOutcome::Failure };
            if let Err(e) = store.record_call(&api_id, outcome, latency_ms).await {
                tracing::warn!("Failed to record metrics for API {}: {}", api_id, e);
            }
        }

        result.map_err(|e| {
            tracing::error!("Vulcan error on {} {}: {:#}", request.method, request.path, e);
            ApiError::Execution {
                message: "Internal server error".to_string(),
                details: None,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::NewApi;
    use crate::store::JsonFileStore;
    use crate::testing::{descriptor, RecordingRunner};
    use serde_json::json;

    fn endpoint(sql: &str) -> SqlEndpoint {
        parser::parse_sql(sql)
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_same_path_and_method_is_replaced() {
        let mut vulcan = Vulcan::new(descriptor());
        assert_eq!(vulcan.add_endpoint(endpoint("SELECT * FROM users")), RegisterOutcome::NewRouter);
        assert_eq!(
            vulcan.add_endpoint(endpoint("SELECT * FROM users WHERE id = 1")),
            RegisterOutcome::Replaced
        );
        assert_eq!(
            vulcan.add_endpoint(endpoint("DELETE FROM users WHERE id = 1")),
            RegisterOutcome::Appended
        );

        assert_eq!(vulcan.routers().len(), 1);
        let endpoints = &vulcan.routers()[0].endpoints;
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].sql, "SELECT * FROM users WHERE id = 1");
    }

    #[test]
    fn test_first_registered_prefix_wins() {
        let mut vulcan = Vulcan::new(descriptor());
        vulcan.add_sql("SELECT * FROM users");
        vulcan.add_sql("SELECT * FROM users_archive");

        let found = vulcan.find_router("/api/users_archive").unwrap();
        assert_eq!(found.path, "/api/users");
        assert!(vulcan.find_router("/other").is_none());
    }

    #[test]
    fn test_resolve_status_mapping() {
        let mut vulcan = Vulcan::new(descriptor());
        vulcan.add_sql("SELECT * FROM users");

        assert!(vulcan.resolve("/api/users?x=1", HttpMethod::Get).is_ok());
        assert!(matches!(
            vulcan.resolve("/api/users", HttpMethod::Post),
            Err(ApiError::MethodNotAllowed { .. })
        ));
        assert!(matches!(vulcan.resolve("/nope", HttpMethod::Get), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn test_missing_param_names_it() {
        let ep = endpoint("SELECT * FROM users WHERE id = 5");
        let err = validate_params(&ep, &HashMap::new(), None).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("id"));
    }

    #[test]
    fn test_coercion_by_type() {
        let ep = endpoint("SELECT * FROM t WHERE id = 1 AND active = true AND name = 'x'");
        let values =
            validate_params(&ep, &query(&[("id", "42"), ("active", "yes"), ("name", "bob")]), None).unwrap();
        assert_eq!(
            values,
            vec![
                ("id".to_string(), ParamValue::Number(42.0)),
                ("active".to_string(), ParamValue::Bool(false)),
                ("name".to_string(), ParamValue::Text("bob".to_string())),
            ]
        );

        let err = validate_params(&ep, &query(&[("id", "abc"), ("active", "true"), ("name", "x")]), None);
        assert!(err.is_err());
    }

    #[test]
    fn test_body_params() {
        let mut ep = endpoint("UPDATE t SET a = 1 WHERE id = 1");
        ep.params[0].location = ParamLocation::Body;
        let body = json!({ "id": 7 });
        let values = validate_params(&ep, &HashMap::new(), Some(&body)).unwrap();
        assert_eq!(values, vec![("id".to_string(), ParamValue::Number(7.0))]);
    }

    #[test]
    fn test_bind_replaces_first_match_only() {
        let sql = bind_sql(
            "SELECT * FROM t WHERE name = 'x' OR name = 'y'",
            &[("name".to_string(), ParamValue::Text("bob".to_string()))],
        );
        assert_eq!(sql, "SELECT * FROM t WHERE name = 'bob' OR name = 'y'");

        let sql = bind_sql(
            "SELECT * FROM t WHERE id=5 LIMIT 1",
            &[("id".to_string(), ParamValue::Number(9.0))],
        );
        assert_eq!(sql, "SELECT * FROM t WHERE id = 9 LIMIT 1");
    }

    #[test]
    fn test_bind_does_not_expand_dollar() {
        let sql = bind_sql(
            "SELECT * FROM t WHERE code = 'a'",
            &[("code".to_string(), ParamValue::Text("$1".to_string()))],
        );
        assert_eq!(sql, "SELECT * FROM t WHERE code = '$1'");
    }

    #[test]
    fn test_bind_name_with_leading_paren() {
        let endpoint = parser::parse_sql("SELECT * FROM t WHERE (id = 1 AND kind = 'a')");
        assert_eq!(endpoint.params[0].name, "(id");

        let sql = bind_sql(&endpoint.sql, &[("(id".to_string(), ParamValue::Number(5.0))]);
        assert_eq!(sql, "SELECT * FROM t WHERE (id = 5 AND kind = 'a')");
    }

    #[test]
    fn test_bind_skips_names_inside_longer_identifiers() {
        let sql = bind_sql(
            "SELECT * FROM t WHERE user_id = 1 AND id = 2",
            &[("id".to_string(), ParamValue::Number(7.0))],
        );
        assert_eq!(sql, "SELECT * FROM t WHERE user_id = 1 AND id = 7");

        let sql = bind_sql("id = 1", &[("id".to_string(), ParamValue::Number(3.0))]);
        assert_eq!(sql, "id = 3");
    }

    #[test]
    fn test_docs_can_be_disabled() {
        let mut vulcan = Vulcan::new(descriptor());
        vulcan.add_sql("SELECT * FROM users WHERE id = 1");
        let docs = vulcan.openapi_docs().unwrap();
        assert_eq!(docs["paths"]["/api/users"]["get"]["parameters"][0]["name"], "id");
        assert_eq!(docs["paths"]["/api/users"]["get"]["parameters"][0]["schema"]["type"], "number");

        vulcan.set_docs_enabled(false);
        assert!(vulcan.openapi_docs().is_none());
    }

    #[tokio::test]
    async fn test_registry_handle_records_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("state.json"), false).await.unwrap();
        let api = store
            .add(NewApi {
                name: "users".into(),
                url: "/api/sql/users".into(),
                connection_id: "c".into(),
                sql_query: "SELECT * FROM users WHERE id = 1".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let registry = VulcanRegistry::new();
        let connection = descriptor();
        registry.register(connection.clone(), "SELECT * FROM users WHERE id = 1").await;

        let runner = RecordingRunner::returning(vec![json!({"id": 3})]);
        let q = query(&[("id", "3"), ("apiId", api.id.as_str())]);
        let request = VulcanRequest { method: HttpMethod::Get, path: "/api/users", query: &q, body: None };
        let rows = registry.handle(&connection.key(), request, &runner, &store).await.unwrap();

        assert_eq!(rows, vec![json!({"id": 3})]);
        assert_eq!(runner.last_sql().as_deref(), Some("SELECT * FROM users WHERE id = 3"));
        let metrics = store.get(&api.id).await.unwrap().unwrap().metrics;
        assert_eq!(metrics.success_calls, 1);
        assert_eq!(metrics.total_calls, 1);
    }

    #[tokio::test]
    async fn test_registry_validation_skips_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("state.json"), false).await.unwrap();
        let api = store
            .add(NewApi {
                name: "users".into(),
                url: "/api/sql/users".into(),
                connection_id: "c".into(),
                sql_query: "SELECT * FROM users WHERE id = 1".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let registry = VulcanRegistry::new();
        let connection = descriptor();
        registry.register(connection.clone(), "SELECT * FROM users WHERE id = 1").await;

        let runner = RecordingRunner::returning(vec![]);
        let q = query(&[("apiId", api.id.as_str())]);
        let request = VulcanRequest { method: HttpMethod::Get, path: "/api/users", query: &q, body: None };
        let err = registry.handle(&connection.key(), request, &runner, &store).await.unwrap_err();

        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert!(runner.last_sql().is_none());
        assert_eq!(store.get(&api.id).await.unwrap().unwrap().metrics.total_calls, 0);
    }

    #[tokio::test]
    async fn test_registry_execution_failure_counts() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("state.json"), false).await.unwrap();
        let api = store
            .add(NewApi {
                name: "users".into(),
                url: "/api/sql/users".into(),
                connection_id: "c".into(),
                sql_query: "SELECT * FROM users".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let registry = VulcanRegistry::new();
        let connection = descriptor();
        registry.register(connection.clone(), "SELECT * FROM users").await;

        let runner = RecordingRunner::failing("connection refused");
        let body = json!({ "apiId": api.id });
        let empty = HashMap::new();
        let request = VulcanRequest { method: HttpMethod::Get, path: "/api/users", query: &empty, body: Some(&body) };
        let err = registry.handle(&connection.key(), request, &runner, &store).await.unwrap_err();

        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        let metrics = store.get(&api.id).await.unwrap().unwrap().metrics;
        assert_eq!(metrics.failed_calls, 1);
        assert_eq!(metrics.total_calls, 1);
    }
}
