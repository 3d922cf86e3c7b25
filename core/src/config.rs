//! Loads, validates and persists `orchestrator.toml` (§10.3)
//!
//! A trimmed-down version of the grounding project's `ConfigManager`: one
//! config file instead of two, no checksum-based hot reload (the executor is
//! restarted, not reloaded, to pick up new routing/rate settings), but the
//! same load-then-validate discipline and `anyhow::Context` error style.

use anyhow::{Context, Result};
use shared::config::OrchestratorConfig;
use std::path::PathBuf;
use tracing::{debug, info};

const CONFIG_FILE: &str = "orchestrator.toml";

pub struct ConfigManager {
    config_dir: PathBuf,
    config: Option<OrchestratorConfig>,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Result<Self> {
        if !config_dir.exists() {
            return Err(anyhow::anyhow!(
                "configuration directory does not exist: {}",
                config_dir.display()
            ));
        }
        if !config_dir.is_dir() {
            return Err(anyhow::anyhow!(
                "configuration path is not a directory: {}",
                config_dir.display()
            ));
        }
        Ok(Self {
            config_dir,
            config: None,
        })
    }

    fn path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Loads, parses and validates `orchestrator.toml` (§10.3).
    pub async fn load(&mut self) -> Result<&OrchestratorConfig> {
        let path = self.path();
        info!(path = %path.display(), "loading orchestrator configuration");

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;

        let config: OrchestratorConfig = toml::from_str(&content)
            .with_context(|| format!("TOML syntax error in {}", path.display()))?;

        config
            .validate()
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("validation failed for {}", path.display()))?;

        debug!(
            models = config.models.len(),
            categories = config.routing.len(),
            max_concurrent = config.executor.max_concurrent,
            "configuration parameters"
        );
        info!(models = config.models.len(), "configuration loaded successfully");

        self.config = Some(config);
        Ok(self.config.as_ref().unwrap())
    }

    pub fn get(&self) -> Option<&OrchestratorConfig> {
        self.config.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.config.is_some()
    }

    /// Writes the in-memory config back to disk, validating first.
    pub async fn persist(&self) -> Result<()> {
        let Some(config) = &self.config else {
            return Err(anyhow::anyhow!("no configuration loaded to persist"));
        };
        config.validate().map_err(|e| anyhow::anyhow!(e))?;

        let toml = toml::to_string_pretty(config).context("failed to serialize configuration")?;
        let path = self.path();
        tokio::fs::write(&path, toml)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "configuration persisted");
        Ok(())
    }

    /// Writes a fresh default-ish config to `orchestrator.toml` if one is not
    /// already present, used by the `init` CLI command.
    pub async fn write_if_absent(config_dir: &std::path::Path, config: &OrchestratorConfig) -> Result<bool> {
        let path = config_dir.join(CONFIG_FILE);
        if path.exists() {
            return Ok(false);
        }
        config.validate().map_err(|e| anyhow::anyhow!(e))?;
        let toml = toml::to_string_pretty(config).context("failed to serialize configuration")?;
        tokio::fs::write(&path, toml)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::config::{BackendConfig, ExecutorConfig, GatewayConfig, ModelConfig, StoreConfig};
    use shared::model::TaskCategory;
    use std::collections::HashMap;

    fn sample_config() -> OrchestratorConfig {
        let mut routing = HashMap::new();
        for category in TaskCategory::ALL {
            routing.insert(category, vec!["m".to_string()]);
        }
        OrchestratorConfig {
            models: vec![ModelConfig {
                key: "m".to_string(),
                max_requests: 10,
                window_duration_ms: 60_000,
                endpoint: Some("http://localhost:9000/invoke".to_string()),
            }],
            routing,
            priority_weights: None,
            backend: BackendConfig::default(),
            executor: ExecutorConfig::default(),
            store: StoreConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }

    #[tokio::test]
    async fn load_round_trips_through_persist() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample_config();
        ConfigManager::write_if_absent(dir.path(), &config).await.unwrap();

        let mut manager = ConfigManager::new(dir.path().to_path_buf()).unwrap();
        let loaded = manager.load().await.unwrap();
        assert_eq!(loaded.models.len(), 1);
        assert_eq!(loaded.models[0].key, "m");
    }

    #[tokio::test]
    async fn load_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = sample_config();
        bad.routing.clear();
        let toml = toml::to_string_pretty(&bad).unwrap();
        tokio::fs::write(dir.path().join(CONFIG_FILE), toml).await.unwrap();

        let mut manager = ConfigManager::new(dir.path().to_path_buf()).unwrap();
        assert!(manager.load().await.is_err());
    }

    #[tokio::test]
    async fn write_if_absent_does_not_overwrite_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample_config();
        assert!(ConfigManager::write_if_absent(dir.path(), &config).await.unwrap());
        assert!(!ConfigManager::write_if_absent(dir.path(), &config).await.unwrap());
    }
}
