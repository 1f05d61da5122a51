//! Agent configuration, read from a TOML file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nid_bootstrap::BootstrapConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

const APP_DIR: &str = "nid-agent";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Durable bootstrap state (prefetched token, last permission).
    pub state_file: PathBuf,
    /// Cookie jars the agent installs into.
    pub cookie_jar: PathBuf,
    /// Whether the agent may operate on private jars.
    pub private_access_allowed: bool,
    pub bootstrap: BootstrapConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            state_file: data_dir.join("state.json"),
            cookie_jar: data_dir.join("cookies.json"),
            private_access_allowed: true,
            bootstrap: BootstrapConfig {
                instance_id: APP_DIR.to_string(),
                ..Default::default()
            },
        }
    }
}

impl AgentConfig {
    /// Default config file location, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    /// Load from `path`, or from the default location when it exists,
    /// otherwise fall back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => path,
                None => {
                    debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.bootstrap.validate()?;
        Ok(config)
    }
}
