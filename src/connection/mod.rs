pub mod cipher;
pub mod url;

use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Engine {
    MySql,
    PostgreSql,
}

impl Engine {
    pub fn default_port(self) -> &'static str {
        match self {
            Engine::MySql => "3306",
            Engine::PostgreSql => "5432",
        }
    }
}

/// Everything needed to reach a target database. Travels encrypted inside
/// published URLs, so field names follow the JSON wire format.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDescriptor {
    pub engine_type: Engine,
    #[serde(default)]
    pub host: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub port: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypt: Option<bool>,
}

impl ConnectionDescriptor {
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.host.trim().is_empty() {
            missing.push("host");
        }
        if self.username.trim().is_empty() {
            missing.push("username");
        }
        if self.port.trim().is_empty() {
            missing.push("port");
        }
        if self.database.trim().is_empty() {
            missing.push("database");
        }
        if !missing.is_empty() {
            anyhow::bail!("Missing required parameters: {}", missing.join(", "));
        }
        Ok(())
    }

    pub fn port_number(&self) -> Result<u16> {
        self.port
            .trim()
            .parse::<u16>()
            .map_err(|_| anyhow::anyhow!("Invalid port: {}", self.port))
    }

    /// Stable key shared by one router table per connection. Hashed so the
    /// persisted `connectionId` never holds credentials.
    pub fn key(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("engine_type", &self.engine_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &if self.password.is_empty() { "" } else { "[REDACTED]" })
            .field("database", &self.database)
            .finish()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!("invalid port: {}", other))),
    }
}
