//! Plugin registry error types

use std::path::PathBuf;
use thiserror::Error;

use lumen_plugin_api::{ChainError, LifecycleError, PluginError};

/// Errors that can occur in the plugin registry
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Failed to load dynamic library
    #[error("Failed to load plugin library: {0}")]
    LibraryLoad(#[from] libloading::Error),

    /// API version mismatch between lumen and a module
    #[error("API version mismatch: lumen expects {expected}, module has {found}")]
    ApiVersionMismatch { expected: u32, found: u32 },

    /// A module opened fine but registered nothing
    #[error("Module {path} exports no plugins")]
    NoPlugins { path: PathBuf },

    /// Plugin directory not found
    #[error("Plugin directory not found: {path}")]
    PluginDirNotFound { path: PathBuf },

    /// Plugin not found
    #[error("Plugin '{name}' not found")]
    NotFound { name: String },

    /// Plugin step failed
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Invalid lifecycle transition
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Chain could not be assembled
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Config error (parsing, saving, etc.)
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_version_mismatch_display() {
        let err = RegistryError::ApiVersionMismatch {
            expected: 1,
            found: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("1"));
        assert!(msg.contains("2"));
    }

    #[test]
    fn test_no_plugins_display() {
        let err = RegistryError::NoPlugins {
            path: PathBuf::from("/opt/lumen/libempty.so"),
        };
        assert!(err.to_string().contains("libempty.so"));
    }

    #[test]
    fn test_not_found_display() {
        let err = RegistryError::NotFound {
            name: "Sensor".to_string(),
        };
        assert!(err.to_string().contains("Sensor"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RegistryError = io_err.into();
        assert!(matches!(err, RegistryError::Io(_)));
    }

    #[test]
    fn test_chain_error_conversion() {
        let err: RegistryError = ChainError::NotRunnable {
            name: "Lut".into(),
            state: "Loaded".into(),
        }
        .into();
        assert!(err.to_string().contains("Lut"));
    }
}
