//! lumen configuration - plugin directories and chain definitions

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use lumen_plugin_api::{FailurePolicy, PluginChain};

use crate::plugins::{PluginRegistry, RegistryError};

/// Top-level configuration, stored as TOML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LumenConfig {
    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub chains: Vec<ChainConfig>,
}

/// Where to look for plugin modules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Directories scanned for `.so` / `.dylib` / `.dll` modules, in order
    #[serde(default)]
    pub plugin_dirs: Vec<PathBuf>,
}

/// One chain, assembled from plugin names against a brought-up registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub name: String,

    /// DictHash entry the chain reads and writes
    #[serde(default = "default_dict")]
    pub dict: String,

    /// Plugin names in run order
    #[serde(default)]
    pub plugins: Vec<String>,

    /// Seconds between scheduled runs; 0 never, negative runs once
    #[serde(default)]
    pub period: i64,

    #[serde(default)]
    pub hidden: bool,

    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_dict() -> String {
    "default".to_string()
}

impl LumenConfig {
    /// Load config from a TOML file
    ///
    /// Returns the default config if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| RegistryError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save config to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| RegistryError::Config(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn chain(&self, name: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.name == name)
    }

    /// Assemble every configured chain. The registry must be brought up.
    pub fn build_chains(&self, registry: &PluginRegistry) -> Result<Vec<PluginChain>, RegistryError> {
        self.chains.iter().map(|c| c.build(registry)).collect()
    }
}

impl ChainConfig {
    pub fn new(name: impl Into<String>, dict: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dict: dict.into(),
            plugins: Vec::new(),
            period: 0,
            hidden: false,
            failure_policy: FailurePolicy::default(),
        }
    }

    /// Build the chain, failing if any plugin is unknown or not runnable
    pub fn build(&self, registry: &PluginRegistry) -> Result<PluginChain, RegistryError> {
        let mut chain = registry.new_chain(&self.name, &self.dict);
        for name in &self.plugins {
            chain.append(registry.runnable_by_name(name)?)?;
        }
        chain.set_period(self.period);
        chain.set_hidden(self.hidden);
        chain.set_failure_policy(self.failure_policy);

        tracing::debug!(
            chain = %self.name,
            dict = %self.dict,
            plugins = chain.len(),
            "Chain assembled"
        );
        Ok(chain)
    }
}
