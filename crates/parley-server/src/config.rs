use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub upload_secret: Option<String>,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub public_url: String,
    pub storage_dir: PathBuf,
    pub upload_ttl_secs: i64,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = var("PARLEY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!(
                "PARLEY_JWT_SECRET is unset or still a placeholder; \
                 it must match the identity provider's signing secret"
            );
        }

        let port: u16 = var("PARLEY_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("PARLEY_PORT must be a port number")?;

        Ok(Self {
            jwt_secret,
            upload_secret: var("PARLEY_UPLOAD_SECRET").filter(|s| !s.is_empty()),
            db_path: var("PARLEY_DB_PATH")
                .unwrap_or_else(|| "parley.db".into())
                .into(),
            host: var("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            public_url: var("PARLEY_PUBLIC_URL")
                .unwrap_or_else(|| format!("http://localhost:{}", port)),
            storage_dir: var("PARLEY_STORAGE_DIR")
                .unwrap_or_else(|| "./storage".into())
                .into(),
            upload_ttl_secs: var("PARLEY_UPLOAD_TTL_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),
            max_upload_bytes: var("PARLEY_MAX_UPLOAD_BYTES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20 * 1024 * 1024),
        })
    }
}
