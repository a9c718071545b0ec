//! Test doubles shared by unit tests.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;

use crate::connection::{ConnectionDescriptor, Engine};
use crate::db::QueryRunner;

pub fn descriptor() -> ConnectionDescriptor {
    ConnectionDescriptor {
        engine_type: Engine::PostgreSql,
        host: "localhost".into(),
        port: "5432".into(),
        username: "app".into(),
        password: "pw".into(),
        database: "shop".into(),
        encrypt: None,
    }
}

/// Remembers every SQL string and answers with canned rows or an error.
pub struct RecordingRunner {
    rows: Vec<Value>,
    failure: Option<String>,
    delay: Option<Duration>,
    seen: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn returning(rows: Vec<Value>) -> Self {
        Self { rows, failure: None, delay: None, seen: Mutex::new(Vec::new()) }
    }

    pub fn failing(message: &str) -> Self {
        Self { rows: Vec::new(), failure: Some(message.to_string()), delay: None, seen: Mutex::new(Vec::new()) }
    }

    /// Answers only after `delay`, like a slow database.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn last_sql(&self) -> Option<String> {
        self.seen.lock().unwrap().last().cloned()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl QueryRunner for RecordingRunner {
    async fn run(&self, _connection: &ConnectionDescriptor, sql: &str) -> anyhow::Result<Vec<Value>> {
        self.seen.lock().unwrap().push(sql.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(message) => Err(anyhow::anyhow!(message.clone())),
            None => Ok(self.rows.clone()),
        }
    }
}
