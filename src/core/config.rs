//! Engine configuration.
//!
//! Loaded from `config.toml` in the data directory (every field optional,
//! defaults carry the standard intervals), with environment overrides for
//! the external service endpoints so deployments can rewire without touching
//! the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::retry::{Backoff, RetryPolicy};
use crate::platform::{NativePlatform, Platform};

pub const DB_FILE: &str = "insight-sync.db";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub document_bucket: String,
    /// Build runner endpoint (knowledge-base deployment builds).
    pub build_endpoint: String,
    /// Deployment service endpoint (stack output lookups).
    pub deploy_endpoint: String,
    /// Ingestion service endpoint (ingestion job start/poll).
    pub ingestion_endpoint: String,
    pub use_standby_replicas: bool,
    pub poll_interval_secs: u64,
    pub queue_sweep_secs: u64,
    pub status_retry_attempts: u32,
    pub status_retry_delay_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: NativePlatform::data_dir(),
            document_bucket: "insight-documents".to_string(),
            build_endpoint: "http://127.0.0.1:9410".to_string(),
            deploy_endpoint: "http://127.0.0.1:9411".to_string(),
            ingestion_endpoint: "http://127.0.0.1:9412".to_string(),
            use_standby_replicas: false,
            poll_interval_secs: 3,
            queue_sweep_secs: 30,
            status_retry_attempts: 4,
            status_retry_delay_secs: 2,
        }
    }
}

impl EngineConfig {
    /// Load from an explicit path, or from `config.toml` in the default data
    /// directory. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => NativePlatform::data_dir().join("config.toml"),
        };
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        for (var, field) in [
            ("INSIGHT_SYNC_BUILD_ENDPOINT", &mut self.build_endpoint),
            ("INSIGHT_SYNC_DEPLOY_ENDPOINT", &mut self.deploy_endpoint),
            ("INSIGHT_SYNC_INGESTION_ENDPOINT", &mut self.ingestion_endpoint),
            ("INSIGHT_SYNC_DOCUMENT_BUCKET", &mut self.document_bucket),
        ] {
            if let Ok(value) = std::env::var(var)
                && !value.is_empty()
            {
                *field = value;
            }
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    pub fn poll_backoff(&self) -> Backoff {
        Backoff::Fixed(Duration::from_secs(self.poll_interval_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.queue_sweep_secs)
    }

    pub fn status_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.status_retry_attempts,
            Duration::from_secs(self.status_retry_delay_secs),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_standard_intervals() {
        let config = EngineConfig::default();
        assert_eq!(config.poll_interval_secs, 3);
        assert_eq!(config.status_retry_attempts, 4);
        assert_eq!(config.status_retry_delay_secs, 2);
    }

    #[test]
    fn partial_file_fills_missing_fields_from_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "document_bucket = \"custom-docs\"\nuse_standby_replicas = true\n",
        )
        .unwrap();

        let config = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.document_bucket, "custom-docs");
        assert!(config.use_standby_replicas);
        assert_eq!(config.poll_interval_secs, 3);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(config.status_retry_attempts, 4);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = EngineConfig::default();
        let raw = toml::to_string(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed, config);
    }
}
