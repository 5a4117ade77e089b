//! TOML configuration for the reef daemon.

use std::path::{Path, PathBuf};

use anyhow::Context;
use reef_home::HomeConfig;
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Node identity and addresses.
    pub node: NodeSection,
    /// Line storage backend.
    pub store: StoreSection,
    /// Authority tuning.
    pub home: HomeSection,
    /// Activity counters.
    pub monitor: MonitorSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Directory for persistent data.
    pub data_dir: PathBuf,
    /// Address nodes connect to.
    pub listen_addr: String,
    /// Start as the primary authority.
    pub primary: bool,
}

impl Default for NodeSection {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".reef"))
            .unwrap_or_else(|| PathBuf::from(".reef"));
        Self {
            data_dir,
            listen_addr: "0.0.0.0:4830".to_string(),
            primary: true,
        }
    }
}

/// `[store]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Backend type: `"fjall"` (default) or `"memory"`.
    pub backend: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: "fjall".to_string(),
        }
    }
}

/// `[home]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HomeSection {
    /// Give up on a request after this many lost ownership races.
    /// Unset retries until the line settles.
    pub cas_retry_limit: Option<u32>,
}

/// `[monitor]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    /// Count authority activity and log the totals on shutdown.
    pub enabled: bool,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("cannot read {}", p.display()))?;
                let config: CliConfig = toml::from_str(&content)
                    .with_context(|| format!("invalid config in {}", p.display()))?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Whether lines are kept in memory only.
    pub fn memory_mode(&self) -> bool {
        self.store.backend == "memory"
    }

    /// Directory of the Fjall line database.
    pub fn store_path(&self) -> PathBuf {
        self.node.data_dir.join("lines")
    }

    /// Settings for the authority.
    pub fn home_config(&self) -> HomeConfig {
        HomeConfig {
            cas_retry_limit: self.home.cas_retry_limit,
        }
    }
}
