//! Error types for plugin authors

use thiserror::Error;

/// Errors that plugins can return from lifecycle and run steps
#[derive(Error, Debug)]
pub enum PluginError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A collaborator required by this plugin is missing or was rejected
    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    /// A required key is absent from the chain's dict
    #[error("Missing key: {0}")]
    MissingKey(String),

    /// A dict entry exists but holds a different item type
    #[error("Type mismatch for '{key}': expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: String,
        found: String,
    },

    /// Required hardware or resource is not available
    #[error("Hardware unavailable: {0}")]
    Hardware(String),

    /// The chain was cancelled while this plugin was working
    #[error("Cancelled")]
    Cancelled,

    /// The plugin panicked; the panic was contained by the host
    #[error("Plugin panicked")]
    Panicked,

    /// Dict serialization error
    #[error("Dict error: {0}")]
    Dict(#[from] DictError),

    /// Custom error with message
    #[error("{0}")]
    Custom(String),
}

impl PluginError {
    /// Create a custom error with a message
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a missing-dependency error
    pub fn missing_dependency(name: impl Into<String>) -> Self {
        Self::MissingDependency(name.into())
    }
}

/// Errors raised while reading or writing dicts and their items
#[derive(Error, Debug)]
pub enum DictError {
    /// Malformed XML
    #[error("XML error: {0}")]
    Xml(String),

    /// Node content does not parse into a valid value of the item's type
    #[error("Invalid {item_type} value: {value:?}")]
    InvalidValue { item_type: String, value: String },

    /// Structure of the document is not a dict
    #[error("Unexpected element <{found}>, expected <{expected}>")]
    UnexpectedElement { expected: String, found: String },

    /// No registered factory can build this item type
    #[error("Unknown item type: {0}")]
    UnknownType(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DictError {
    pub fn invalid(item_type: &str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            item_type: item_type.to_string(),
            value: value.into(),
        }
    }
}

/// Invalid lifecycle transition on a plugin handle
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Plugin '{plugin}' cannot enter {to} from {from}")]
pub struct LifecycleError {
    pub plugin: String,
    pub from: String,
    pub to: String,
}

/// Errors reported by a chain run or chain assembly
#[derive(Error, Debug)]
pub enum ChainError {
    /// Plugin has not completed bring-up and cannot join a chain
    #[error("Plugin '{name}' is not runnable ({state})")]
    NotRunnable { name: String, state: String },

    /// The run was cancelled before all plugins completed
    #[error("Chain '{chain}' was cancelled")]
    Cancelled { chain: String },

    /// One or more plugins failed
    #[error("Chain '{chain}' failed in: {}", failed_plugins(.failures))]
    PluginFailed {
        chain: String,
        failures: Vec<StageFailure>,
    },
}

/// A single plugin failure recorded during a chain run
#[derive(Debug, Clone, PartialEq)]
pub struct StageFailure {
    pub plugin: String,
    pub stage: crate::RunStage,
    pub message: String,
}

fn failed_plugins(failures: &[StageFailure]) -> String {
    failures
        .iter()
        .map(|f| f.plugin.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RunStage;

    #[test]
    fn test_error_display() {
        let config_err = PluginError::Config("missing key".to_string());
        assert_eq!(config_err.to_string(), "Configuration error: missing key");

        let dep_err = PluginError::missing_dependency("Sensor");
        assert_eq!(dep_err.to_string(), "Missing dependency: Sensor");

        let custom_err = PluginError::Custom("something happened".to_string());
        assert_eq!(custom_err.to_string(), "something happened");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let plugin_err: PluginError = io_err.into();

        assert!(matches!(plugin_err, PluginError::Io(_)));
        assert!(plugin_err.to_string().contains("file not found"));
    }

    #[test]
    fn test_type_mismatch_display() {
        let err = PluginError::TypeMismatch {
            key: "Lut::gamma".into(),
            expected: "double".into(),
            found: "string".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Lut::gamma"));
        assert!(msg.contains("double"));
        assert!(msg.contains("string"));
    }

    #[test]
    fn test_invalid_value_display() {
        let err = DictError::invalid("bool", "yes");
        assert_eq!(err.to_string(), "Invalid bool value: \"yes\"");
    }

    #[test]
    fn test_chain_failure_lists_plugins() {
        let err = ChainError::PluginFailed {
            chain: "calibrate".into(),
            failures: vec![
                StageFailure {
                    plugin: "Sensor".into(),
                    stage: RunStage::Run,
                    message: "timeout".into(),
                },
                StageFailure {
                    plugin: "Lut".into(),
                    stage: RunStage::PostRun,
                    message: "bad".into(),
                },
            ],
        };
        assert_eq!(err.to_string(), "Chain 'calibrate' failed in: Sensor, Lut");
    }

    #[test]
    fn test_lifecycle_error_display() {
        let err = LifecycleError {
            plugin: "Foo".into(),
            from: "Loaded".into(),
            to: "DepsChecked".into(),
        };
        assert_eq!(
            err.to_string(),
            "Plugin 'Foo' cannot enter DepsChecked from Loaded"
        );
    }
}
