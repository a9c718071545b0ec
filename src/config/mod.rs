use anyhow::{Context, Result};
use rand::TryRngCore;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn get_app_dir() -> Result<PathBuf> {
    let base_dir = dirs::config_dir()
        .context("Failed to resolve config directory")?
        .join("sql-publisher");

    Ok(base_dir)
}

pub fn get_state_path() -> Result<PathBuf> {
    let state_path = get_app_dir()?.join("server-state.json");
    Ok(state_path)
}

pub fn get_key_path() -> Result<PathBuf> {
    let key_path = get_app_dir()?.join("connection.key");
    Ok(key_path)
}

/// Resolves the 32-byte key used for connection descriptors.
///
/// A passphrase is hashed with SHA-256, which keeps URLs published by
/// earlier deployments decryptable when the same passphrase is supplied.
/// Without one, a random key is generated once and kept in the app dir.
pub fn resolve_connection_key(secret: Option<&str>) -> Result<[u8; 32]> {
    match secret.map(str::trim).filter(|s| !s.is_empty()) {
        Some(passphrase) => Ok(derive_key(passphrase)),
        None => load_or_create_key(&get_key_path()?),
    }
}

pub fn derive_key(passphrase: &str) -> [u8; 32] {
    Sha256::digest(passphrase.as_bytes()).into()
}

pub fn load_or_create_key(key_path: &Path) -> Result<[u8; 32]> {
    if key_path.exists() {
        let key_hex = fs::read_to_string(key_path)
            .context("Failed to read connection key")?;
        let key_bytes = hex::decode(key_hex.trim())
            .context("Failed to decode connection key")?;
        return key_bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Connection key must be 32 bytes"));
    }

    let mut key = [0u8; 32];
    let mut rng = rand::rngs::OsRng;
    rng.try_fill_bytes(&mut key)
        .context("Failed to generate connection key")?;
    let key_hex = hex::encode(key);

    let mut file = fs::File::create(key_path)
        .context("Failed to create connection key file")?;
    file.write_all(key_hex.as_bytes())
        .context("Failed to write connection key")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(key_path, perms)
            .context("Failed to set connection key permissions")?;
    }

    tracing::info!("Created connection key: {}", key_path.display());
    Ok(key)
}

pub fn init_directories() -> Result<()> {
    let app_dir = get_app_dir()?;

    if !app_dir.exists() {
        fs::create_dir_all(&app_dir)
            .context("Failed to create application directory")?;
        tracing::info!("Created application directory: {}", app_dir.display());
    }

    Ok(())
}

pub fn normalize_base_path(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return "/".to_string();
    }
    let mut path = trimmed.to_string();
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    while path.ends_with('/') {
        path.pop();
    }
    path
}
