// src/ingest/config.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use super::retry::RetryPolicy;
use crate::extract::{ExtractOptions, LocationScope};

pub const ENV_PATH: &str = "FEED_INGEST_CONFIG";
const DEFAULT_TOML: &str = "config/feed_ingest.toml";
const DEFAULT_JSON: &str = "config/feed_ingest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub database: String,
    pub collection: String,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub backoff_ceiling_secs: u64,
    pub feed_dir: PathBuf,
    pub data_dir: PathBuf,
    pub location_scope: LocationScope,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database: "supmap".into(),
            collection: "incidents".into(),
            batch_size: 50,
            max_attempts: 5,
            backoff_ceiling_secs: 30,
            feed_dir: PathBuf::from("data/xml"),
            data_dir: PathBuf::from("data/store"),
            location_scope: LocationScope::Document,
        }
    }
}

impl IngestConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading ingest config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = match ext.as_str() {
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?,
            "toml" => {
                toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
            }
            other => bail!("unsupported config format '{other}' ({})", path.display()),
        };
        Ok(cfg)
    }

    /// Resolve the config using env var + fallbacks, then apply env overrides:
    /// 1) $FEED_INGEST_CONFIG
    /// 2) config/feed_ingest.toml
    /// 3) config/feed_ingest.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        let base = if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_PATH} points to non-existent path {}", pb.display()));
            }
            Self::load_from(&pb)?
        } else if Path::new(DEFAULT_TOML).exists() {
            Self::load_from(Path::new(DEFAULT_TOML))?
        } else if Path::new(DEFAULT_JSON).exists() {
            Self::load_from(Path::new(DEFAULT_JSON))?
        } else {
            Self::default()
        };
        let cfg = base.with_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(v) = env_var("FEED_INGEST_DATABASE") {
            self.database = v;
        }
        if let Some(v) = env_var("FEED_INGEST_COLLECTION") {
            self.collection = v;
        }
        if let Some(v) = env_parse("FEED_INGEST_BATCH_SIZE")? {
            self.batch_size = v;
        }
        if let Some(v) = env_parse("FEED_INGEST_MAX_ATTEMPTS")? {
            self.max_attempts = v;
        }
        if let Some(v) = env_parse("FEED_INGEST_BACKOFF_CEILING_SECS")? {
            self.backoff_ceiling_secs = v;
        }
        if let Some(v) = env_var("FEED_INGEST_FEED_DIR") {
            self.feed_dir = PathBuf::from(v);
        }
        if let Some(v) = env_var("FEED_INGEST_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = env_var("FEED_INGEST_LOCATION_SCOPE") {
            self.location_scope = serde_json::from_value(serde_json::Value::String(v.clone()))
                .with_context(|| format!("FEED_INGEST_LOCATION_SCOPE: unknown scope '{v}'"))?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.trim().is_empty() {
            bail!("database name must not be empty");
        }
        if self.collection.trim().is_empty() {
            bail!("collection name must not be empty");
        }
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_secs(self.backoff_ceiling_secs),
        )
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            location_scope: self.location_scope,
        }
    }

    /// Log the effective configuration once at startup.
    pub fn log_config(&self) {
        tracing::info!(
            database = %self.database,
            collection = %self.collection,
            batch_size = self.batch_size,
            max_attempts = self.max_attempts,
            backoff_ceiling_secs = self.backoff_ceiling_secs,
            feed_dir = %self.feed_dir.display(),
            data_dir = %self.data_dir.display(),
            location_scope = ?self.location_scope,
            "ingest config"
        );
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_var(key)
        .map(|v| v.parse::<T>().with_context(|| format!("{key}: invalid value '{v}'")))
        .transpose()
}
