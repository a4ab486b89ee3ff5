//! Plugin system for lumen
//!
//! This module provides the infrastructure for loading and bringing up plugins:
//!
//! - [`PluginRegistry`]: Loads modules and in-process plugins, runs bring-up and answers queries
//! - [`ItemTypes`]: Item factories contributed by plugins, shared by every dict
//! - [`RegistryError`]: Error types for registry operations
//!
//! # Modules
//!
//! A module is a shared library exporting the symbols generated by
//! `lumen_plugin_api::export_plugins!`. [`PluginRegistry::register_plugins`]
//! scans each configured directory for `.so` (`.dylib` on macOS, `.dll` on
//! Windows) files and loads them in path order.
//!
//! # Example
//!
//! ```ignore
//! use lumen_core::plugins::PluginRegistry;
//! use lumen_plugin_api::PluginLookup;
//!
//! let mut registry = PluginRegistry::with_builtins();
//! registry.register_plugins(&[PathBuf::from("/usr/lib/lumen/plugins")])?;
//! registry.bring_up();
//!
//! for sensor in registry.query_by_attribute("Sensor") {
//!     println!("{}", sensor.name());
//! }
//! ```

mod error;
mod foreign;
mod items;
mod registry;
mod resolver;

pub use error::RegistryError;
pub use items::ItemTypes;
pub use registry::{PluginInfo, PluginOrigin, PluginRegistry};
