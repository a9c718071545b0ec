pub mod generate;
pub mod health;
pub mod management;
pub mod register;
pub mod sql;
pub mod status_check;
pub mod vulcan;

use axum::routing::{any, get, post};
use axum::Router;
use std::sync::Arc;

use crate::connection::cipher::ConnectionCipher;
use crate::db::QueryRunner;
use crate::store::ApiRepository;
use crate::vulcan::VulcanRegistry;

pub struct AppState {
    pub store: Arc<dyn ApiRepository>,
    pub runner: Arc<dyn QueryRunner>,
    pub cipher: ConnectionCipher,
    pub vulcans: VulcanRegistry,
}

impl AppState {
    pub fn new(store: Arc<dyn ApiRepository>, runner: Arc<dyn QueryRunner>, cipher: ConnectionCipher) -> Self {
        Self {
            store,
            runner,
            cipher,
            vulcans: VulcanRegistry::new(),
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/api/vulcan/register", post(register::register_api))
        .route("/api/vulcan/swagger", get(vulcan::swagger))
        .route("/api/vulcan/execute/{*path}", any(vulcan::execute))
        .route("/api/sql/{table}", any(sql::run_published_query))
        .route("/api/sql-to-api", post(generate::sql_to_api))
        .route("/api/api-management/list", get(management::list_apis))
        .route("/api/api-management/apis/{id}", get(management::get_api))
        .route("/api/api-management/create", post(management::create_api))
        .route("/api/api-management/update-status", post(management::update_status))
        .route("/api/api-management/delete", post(management::delete_api))
        .route("/api/api-management/clear-all", post(management::clear_all))
        .route(
            "/api/api-management/sync-state",
            get(management::get_state).post(management::sync_state),
        )
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::derive_key;
    use crate::store::JsonFileStore;
    use crate::testing::RecordingRunner;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    pub struct TestApp {
        pub router: Router,
        pub state: Arc<AppState>,
        pub runner: Arc<RecordingRunner>,
        dir: tempfile::TempDir,
    }

    impl TestApp {
        pub async fn new(runner: RecordingRunner) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = JsonFileStore::open(dir.path().join("server-state.json"), false)
                .await
                .unwrap();
            let runner = Arc::new(runner);
            let state = Arc::new(AppState::new(
                Arc::new(store),
                runner.clone(),
                ConnectionCipher::new(derive_key("test")),
            ));
            Self {
                router: build_router(state.clone()),
                state,
                runner,
                dir,
            }
        }

        pub fn state_file(&self) -> std::path::PathBuf {
            self.dir.path().join("server-state.json")
        }

        pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let json = if body.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(&body).unwrap_or_else(|_| {
                    serde_json::Value::String(String::from_utf8_lossy(&body).into_owned())
                })
            };
            (status, json)
        }

        pub async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
            self.send(Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap())
                .await
        }

        pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
            self.send(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
        }
    }
}
