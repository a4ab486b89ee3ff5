//! Plugin handles, lifecycle state and discovery traits

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::Plugin;
use crate::error::{LifecycleError, PluginError};
use crate::sync::{lock, try_lock};

/// Shared, non-owning-by-convention reference to a loaded plugin
pub type PluginRef = Arc<PluginHandle>;

/// Bring-up phase in which a plugin was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BringUpStage {
    PostLoad,
    CheckDeps,
    PostCheckDeps,
}

/// Lifecycle of a plugin instance.
///
/// States only move forward: Loaded, PostLoaded, DepsChecked, DepsFinalized,
/// Runnable. A plugin that fails a bring-up phase is Rejected and stays
/// loaded, but never becomes Runnable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LifecycleState {
    Loaded,
    PostLoaded,
    DepsChecked,
    DepsFinalized,
    Runnable,
    Rejected { stage: BringUpStage, reason: String },
}

impl LifecycleState {
    fn rank(&self) -> Option<u8> {
        match self {
            Self::Loaded => Some(0),
            Self::PostLoaded => Some(1),
            Self::DepsChecked => Some(2),
            Self::DepsFinalized => Some(3),
            Self::Runnable => Some(4),
            Self::Rejected { .. } => None,
        }
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_enter(&self, next: &LifecycleState) -> bool {
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to == from + 1,
            // Any live state short of Runnable may be rejected.
            (Some(from), None) => from < 4,
            (None, _) => false,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loaded => write!(f, "Loaded"),
            Self::PostLoaded => write!(f, "PostLoaded"),
            Self::DepsChecked => write!(f, "DepsChecked"),
            Self::DepsFinalized => write!(f, "DepsFinalized"),
            Self::Runnable => write!(f, "Runnable"),
            Self::Rejected { stage, reason } => write!(f, "Rejected in {stage:?}: {reason}"),
        }
    }
}

/// A loaded plugin together with its cached identity and lifecycle state.
///
/// Name and attributes are read once at construction, so discovery never
/// has to lock the plugin itself.
pub struct PluginHandle {
    name: String,
    attributes: Vec<String>,
    plugin: Mutex<Box<dyn Plugin>>,
    state: Mutex<LifecycleState>,
    error: Mutex<Option<String>>,
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHandle")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .field("state", &self.state())
            .finish()
    }
}

impl PluginHandle {
    pub fn new(plugin: Box<dyn Plugin>) -> Self {
        let name = plugin.name().to_string();
        let attributes = plugin.attributes();
        Self {
            name,
            attributes,
            plugin: Mutex::new(plugin),
            state: Mutex::new(LifecycleState::Loaded),
            error: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    pub fn match_name(&self, name: &str) -> bool {
        self.name == name
    }

    pub fn match_attribute(&self, attribute: &str) -> bool {
        self.attributes.iter().any(|a| a == attribute)
    }

    /// True only if every requested attribute is present
    pub fn match_attributes(&self, attributes: &[&str]) -> bool {
        attributes.iter().all(|a| self.match_attribute(a))
    }

    pub fn state(&self) -> LifecycleState {
        lock(&self.state).clone()
    }

    pub fn is_runnable(&self) -> bool {
        *lock(&self.state) == LifecycleState::Runnable
    }

    pub fn is_rejected(&self) -> bool {
        lock(&self.state).is_rejected()
    }

    /// Description of the last failure, if any
    pub fn error_string(&self) -> Option<String> {
        lock(&self.error).clone()
    }

    pub fn set_error(&self, message: impl Into<String>) {
        *lock(&self.error) = Some(message.into());
    }

    /// Move to `next`, refusing to go backwards or skip a phase
    pub fn transition(&self, next: LifecycleState) -> Result<(), LifecycleError> {
        let mut state = lock(&self.state);
        if !state.can_enter(&next) {
            return Err(LifecycleError {
                plugin: self.name.clone(),
                from: state.to_string(),
                to: next.to_string(),
            });
        }
        tracing::debug!(plugin = %self.name, from = %*state, to = %next, "Plugin state change");
        if let LifecycleState::Rejected { reason, .. } = &next {
            self.set_error(reason.clone());
        }
        *state = next;
        Ok(())
    }

    /// Reject the plugin in `stage`, recording `reason` as its error string
    pub fn reject(&self, stage: BringUpStage, reason: impl Into<String>) -> Result<(), LifecycleError> {
        self.transition(LifecycleState::Rejected {
            stage,
            reason: reason.into(),
        })
    }

    /// Run `f` against the plugin with panic isolation.
    ///
    /// A panic is reported as [`PluginError::Panicked`]. Any error is
    /// recorded as the plugin's error string.
    pub fn invoke<R>(
        &self,
        f: impl FnOnce(&mut dyn Plugin) -> Result<R, PluginError>,
    ) -> Result<R, PluginError> {
        let mut guard = lock(&self.plugin);
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| f(guard.as_mut())))
            .unwrap_or_else(|_| {
                tracing::error!(plugin = %self.name, "Plugin panicked");
                Err(PluginError::Panicked)
            });
        drop(guard);

        if let Err(e) = &result {
            self.set_error(e.to_string());
        }
        result
    }

    /// Like [`PluginHandle::invoke`] but returns `None` instead of blocking
    /// when the plugin is busy, e.g. when it is the caller itself.
    pub fn try_invoke<R>(
        &self,
        f: impl FnOnce(&mut dyn Plugin) -> Result<R, PluginError>,
    ) -> Option<Result<R, PluginError>> {
        let mut guard = try_lock(&self.plugin)?;
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| f(guard.as_mut())))
            .unwrap_or_else(|_| Err(PluginError::Panicked));
        drop(guard);

        if let Err(e) = &result {
            self.set_error(e.to_string());
        }
        Some(result)
    }
}

/// Name and attribute based discovery over a set of plugins.
///
/// Every query returns all matches in order, or an empty vector.
pub trait PluginLookup {
    /// All members for which `pred` holds
    fn query(&self, pred: &dyn Fn(&PluginHandle) -> bool) -> Vec<PluginRef>;

    fn query_by_index(&self, index: usize) -> Option<PluginRef>;

    fn query_by_name(&self, name: &str) -> Vec<PluginRef> {
        self.query(&|p| p.match_name(name))
    }

    fn query_by_attribute(&self, attribute: &str) -> Vec<PluginRef> {
        self.query(&|p| p.match_attribute(attribute))
    }

    fn query_by_attributes(&self, attributes: &[&str]) -> Vec<PluginRef> {
        self.query(&|p| p.match_attributes(attributes))
    }

    /// First member called `name` that completed bring-up
    fn first_runnable(&self, name: &str) -> Option<PluginRef> {
        self.query(&|p| p.match_name(name) && p.is_runnable())
            .into_iter()
            .next()
    }
}

/// Registry access handed to [`Plugin::check_deps`].
///
/// `require*` runs the dependency's own check first (memoized, safe against
/// cycles) and only returns collaborators that passed it. Plugins keep the
/// names, not the handles, and look collaborators up again at run time
/// through [`PluginChain::registry`](crate::PluginChain::registry).
pub trait Dependencies: PluginLookup {
    fn require(&mut self, name: &str) -> Result<PluginRef, PluginError>;

    /// Every accepted plugin carrying all `attributes`; an error if there is none
    fn require_attributes(&mut self, attributes: &[&str]) -> Result<Vec<PluginRef>, PluginError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Photometer {
        fail: bool,
    }

    impl Plugin for Photometer {
        fn name(&self) -> &str {
            "Photometer"
        }

        fn attributes(&self) -> Vec<String> {
            vec!["Sensor".into(), "Usb".into()]
        }

        fn post_load(&mut self) -> Result<(), PluginError> {
            if self.fail {
                return Err(PluginError::Hardware("no device".into()));
            }
            Ok(())
        }
    }

    fn handle(fail: bool) -> PluginHandle {
        PluginHandle::new(Box::new(Photometer { fail }))
    }

    #[test]
    fn test_matching_helpers() {
        let h = handle(false);
        assert!(h.match_name("Photometer"));
        assert!(!h.match_name("photometer"));
        assert!(h.match_attribute("Usb"));
        assert!(h.match_attributes(&["Sensor", "Usb"]));
        assert!(!h.match_attributes(&["Sensor", "Ddc"]));
        assert!(h.match_attributes(&[]));
    }

    #[test]
    fn test_forward_transitions_only() {
        let h = handle(false);
        assert!(h.transition(LifecycleState::DepsChecked).is_err());
        h.transition(LifecycleState::PostLoaded).unwrap();
        h.transition(LifecycleState::DepsChecked).unwrap();
        assert!(h.transition(LifecycleState::PostLoaded).is_err());
        h.transition(LifecycleState::DepsFinalized).unwrap();
        h.transition(LifecycleState::Runnable).unwrap();
        assert!(h.is_runnable());
        assert!(h.reject(BringUpStage::CheckDeps, "late").is_err());
    }

    #[test]
    fn test_rejection_is_terminal() {
        let h = handle(false);
        h.reject(BringUpStage::PostLoad, "absent").unwrap();
        assert!(h.is_rejected());
        assert_eq!(h.error_string().as_deref(), Some("absent"));
        assert!(h.transition(LifecycleState::PostLoaded).is_err());
    }

    #[test]
    fn test_invoke_records_error() {
        let h = handle(true);
        let result = h.invoke(|p| p.post_load());
        assert!(matches!(result, Err(PluginError::Hardware(_))));
        assert!(h.error_string().unwrap().contains("no device"));
    }

    #[test]
    fn test_invoke_isolates_panics() {
        let h = handle(false);
        let result: Result<(), _> = h.invoke(|_| panic!("boom"));
        assert!(matches!(result, Err(PluginError::Panicked)));
        // The plugin stays usable after a panic.
        assert!(h.invoke(|p| p.post_load()).is_ok());
    }

    #[test]
    fn test_try_invoke_when_busy() {
        let h = Arc::new(handle(false));
        let inner = h.clone();
        let nested = h.invoke(|_| Ok(inner.try_invoke(|_| Ok(())).is_none()));
        assert!(nested.unwrap());
    }
}
