//! CLI subcommands

pub mod dict;
pub mod list;
pub mod run;
pub mod schedule;

use anyhow::{Context, Result};
use std::path::PathBuf;

use lumen_core::{LumenConfig, PluginRegistry};

/// Options shared by every subcommand
pub struct HostArgs {
    pub config: PathBuf,
    pub plugin_dirs: Vec<PathBuf>,
}

impl HostArgs {
    pub fn load_config(&self) -> Result<LumenConfig> {
        LumenConfig::load(&self.config)
            .with_context(|| format!("Failed to read config {}", self.config.display()))
    }

    /// Load built-ins and every module, then bring them all up
    pub fn bring_up(&self, config: &LumenConfig) -> Result<PluginRegistry> {
        let mut registry = PluginRegistry::with_builtins();

        let dirs: Vec<PathBuf> = config
            .registry
            .plugin_dirs
            .iter()
            .chain(&self.plugin_dirs)
            .cloned()
            .collect();
        let modules = registry.register_plugins(&dirs)?;

        let runnable = registry.bring_up();
        tracing::debug!(modules, runnable, "Registry ready");
        Ok(registry)
    }
}
