//! lumen-core: Host side of the lumen display calibration framework
//!
//! This crate provides:
//!
//! - **Plugin registry** - [`PluginRegistry`] loads dynamic modules and
//!   in-process plugins, brings them up and answers name/attribute queries
//! - **Built-in plugins** - the shared dict store and [`DataSavior`] persistence
//! - **Configuration** - [`LumenConfig`] with plugin directories and chain definitions
//!
//! Plugin authors only need `lumen-plugin-api`.

pub mod builtins;
pub mod config;
pub mod plugins;

pub use builtins::{CalibRecordItem, DataSavior};
pub use config::{ChainConfig, LumenConfig, RegistryConfig};
pub use plugins::{PluginInfo, PluginOrigin, PluginRegistry, RegistryError};
