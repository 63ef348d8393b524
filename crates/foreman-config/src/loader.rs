use foreman_core::{ForemanError, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::schema::ForemanConfig;

/// Loads the Foreman configuration.
pub struct ConfigLoader {
    config: ForemanConfig,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > FOREMAN_CONFIG env > ~/.foreman/foreman.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("FOREMAN_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".foreman")
            .join("foreman.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::read(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            ForemanConfig::default()
        };

        let config = Self::apply_env_overrides(config);
        for w in config.validate()? {
            warn!("{}", w);
        }

        Ok(Self {
            config,
            config_path,
        })
    }

    fn read(path: &Path) -> Result<ForemanConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<ForemanConfig>(&raw).map_err(|e| {
            ForemanError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    pub fn get(&self) -> &ForemanConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply env var overrides (FOREMAN_MODEL, FOREMAN_LOG_LEVEL, etc.)
    fn apply_env_overrides(mut config: ForemanConfig) -> ForemanConfig {
        if let Ok(v) = std::env::var("FOREMAN_MODEL") {
            config.model.model = v;
        }
        if let Ok(v) = std::env::var("FOREMAN_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("FOREMAN_DB_PATH") {
            config.memory.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FOREMAN_MAX_CYCLES") {
            if let Ok(n) = v.parse::<usize>() {
                config.agent.max_cycles = n;
            }
        }
        // Config file takes priority, env is the fallback.
        if config.model.api_key.is_none() {
            if let Ok(v) = std::env::var("OPENAI_API_KEY") {
                config.model.api_key = Some(v);
            }
        }
        config
    }
}
