//! PluginChain - ordered plugin pipeline bound to a named dict
//!
//! A chain runs its plugins synchronously on the calling thread:
//!
//! 1. `pre_run` on every plugin, in order
//! 2. `run` on every plugin whose `pre_run` succeeded, in order, until
//!    cancellation or (with [`FailurePolicy::StopOnFailure`]) a failure
//! 3. `post_run` on every plugin, in order, whatever happened before
//!
//! Cancellation is cooperative. [`PluginChain::cancel`] may be called from
//! any thread; plugins have to poll [`PluginChain::was_cancelled`] (or the
//! token from [`PluginChain::cancel_token`]) inside long loops. A plugin that
//! never polls runs to completion.
//!
//! Plugins reach collaborators outside the chain through
//! [`PluginChain::registry`], looking them up again on every run. The chain
//! only holds a weak reference, so it never keeps a dropped registry alive.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::capability::ATTR_UI;
use crate::dict_hash::{DictHash, SharedDict};
use crate::error::{ChainError, PluginError, StageFailure};
use crate::handle::{PluginHandle, PluginLookup, PluginRef};
use crate::item::{BoolItem, DictItem, DoubleItem, IntItem, StringItem};
use crate::sync::lock;

/// The per-run phase a plugin is in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    PreRun,
    Run,
    PostRun,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreRun => write!(f, "pre_run"),
            Self::Run => write!(f, "run"),
            Self::PostRun => write!(f, "post_run"),
        }
    }
}

/// What a chain does with the remaining `run` steps after one fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    StopOnFailure,
    ContinueOnFailure,
}

/// Registry-wide plugin lookup a chain can be bound to
pub type SharedLookup = Arc<dyn PluginLookup + Send + Sync>;

pub struct PluginChain {
    name: String,
    dict_name: String,
    dicts: Arc<DictHash>,
    registry: Option<Weak<dyn PluginLookup + Send + Sync>>,
    plugins: Vec<PluginRef>,
    /// Token of the current run; replaced at the start of every run
    cancel: Mutex<CancellationToken>,
    /// Seconds between runs: < 0 once at startup, 0 never, > 0 interval
    period: i64,
    last_execution: Mutex<Option<Instant>>,
    hidden: bool,
    failure_policy: FailurePolicy,
}

impl fmt::Debug for PluginChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginChain")
            .field("name", &self.name)
            .field("dict_name", &self.dict_name)
            .field(
                "plugins",
                &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("period", &self.period)
            .field("hidden", &self.hidden)
            .finish()
    }
}

impl PluginChain {
    pub fn new(name: impl Into<String>, dict_name: impl Into<String>, dicts: Arc<DictHash>) -> Self {
        Self {
            name: name.into(),
            dict_name: dict_name.into(),
            dicts,
            registry: None,
            plugins: Vec::new(),
            cancel: Mutex::new(CancellationToken::new()),
            period: 0,
            last_execution: Mutex::new(None),
            hidden: false,
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dict_name(&self) -> &str {
        &self.dict_name
    }

    pub fn set_dict_name(&mut self, dict_name: impl Into<String>) {
        self.dict_name = dict_name.into();
    }

    /// The chain's dict, looked up by name on every call
    pub fn dict(&self) -> Option<SharedDict> {
        self.dicts.get_dict(&self.dict_name)
    }

    pub fn dicts(&self) -> &Arc<DictHash> {
        &self.dicts
    }

    pub fn bind_registry(&mut self, registry: Weak<dyn PluginLookup + Send + Sync>) {
        self.registry = Some(registry);
    }

    /// Every plugin of the registry this chain was built from, or `None` if
    /// the chain is unbound or the registry is gone
    pub fn registry(&self) -> Option<SharedLookup> {
        self.registry.as_ref().and_then(Weak::upgrade)
    }

    /// Append a plugin. Only plugins that completed bring-up are accepted.
    pub fn append(&mut self, plugin: PluginRef) -> Result<(), ChainError> {
        if !plugin.is_runnable() {
            return Err(ChainError::NotRunnable {
                name: plugin.name().to_string(),
                state: plugin.state().to_string(),
            });
        }
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.plugins.clear();
    }

    pub fn plugins(&self) -> &[PluginRef] {
        &self.plugins
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn set_failure_policy(&mut self, policy: FailurePolicy) {
        self.failure_policy = policy;
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    // ─── Cancellation ────────────────────────────────────────────────

    /// Request that the current run stop. Safe from any thread.
    pub fn cancel(&self) {
        let token = lock(&self.cancel);
        if !token.is_cancelled() {
            tracing::info!(chain = %self.name, "Chain cancellation requested");
        }
        token.cancel();
    }

    pub fn was_cancelled(&self) -> bool {
        lock(&self.cancel).is_cancelled()
    }

    /// Token of the current run, for handing to long operations
    pub fn cancel_token(&self) -> CancellationToken {
        lock(&self.cancel).clone()
    }

    fn reset_cancellation(&self) -> CancellationToken {
        let mut token = lock(&self.cancel);
        *token = CancellationToken::new();
        token.clone()
    }

    // ─── Scheduling ──────────────────────────────────────────────────

    pub fn period(&self) -> i64 {
        self.period
    }

    pub fn set_period(&mut self, seconds: i64) {
        self.period = seconds;
    }

    pub fn last_execution_time(&self) -> Option<Instant> {
        *lock(&self.last_execution)
    }

    pub fn needs_periodic_execution(&self) -> bool {
        self.needs_periodic_execution_at(Instant::now())
    }

    /// Whether a host scheduler polling at `now` should run this chain
    pub fn needs_periodic_execution_at(&self, now: Instant) -> bool {
        let last = self.last_execution_time();
        match self.period {
            p if p < 0 => last.is_none(),
            0 => false,
            p => match last {
                None => true,
                Some(last) => {
                    now.saturating_duration_since(last) >= Duration::from_secs(p.unsigned_abs())
                }
            },
        }
    }

    // ─── Execution ───────────────────────────────────────────────────

    /// Run every plugin through `pre_run`, `run` and `post_run`.
    ///
    /// Resets the cancellation flag first. `post_run` is always called for
    /// every plugin, even after a failure or cancellation, so anything
    /// acquired in `pre_run` can be released. Plugins returning
    /// [`PluginError::Cancelled`] are not counted as failures.
    pub fn run(&self) -> Result<(), ChainError> {
        let token = self.reset_cancellation();
        *lock(&self.last_execution) = Some(Instant::now());
        tracing::debug!(chain = %self.name, plugins = self.plugins.len(), "Running chain");

        let mut failures = Vec::new();

        let mut prepared: Vec<&PluginRef> = Vec::with_capacity(self.plugins.len());
        for plugin in &self.plugins {
            match plugin.invoke(|p| p.pre_run(self)) {
                Ok(()) => prepared.push(plugin),
                Err(e) => self.record(&mut failures, plugin, RunStage::PreRun, e),
            }
        }

        for plugin in &prepared {
            if token.is_cancelled() {
                tracing::info!(chain = %self.name, plugin = %plugin.name(), "Chain cancelled, skipping remaining plugins");
                break;
            }
            if let Err(e) = plugin.invoke(|p| p.run(self)) {
                let fatal = !matches!(e, PluginError::Cancelled);
                self.record(&mut failures, plugin, RunStage::Run, e);
                if fatal && self.failure_policy == FailurePolicy::StopOnFailure {
                    break;
                }
            }
        }

        for plugin in &self.plugins {
            if let Err(e) = plugin.invoke(|p| p.post_run(self)) {
                self.record(&mut failures, plugin, RunStage::PostRun, e);
            }
        }

        if !failures.is_empty() {
            return Err(ChainError::PluginFailed {
                chain: self.name.clone(),
                failures,
            });
        }
        if token.is_cancelled() {
            return Err(ChainError::Cancelled {
                chain: self.name.clone(),
            });
        }
        Ok(())
    }

    fn record(
        &self,
        failures: &mut Vec<StageFailure>,
        plugin: &PluginHandle,
        stage: RunStage,
        error: PluginError,
    ) {
        if matches!(error, PluginError::Cancelled) {
            tracing::debug!(chain = %self.name, plugin = %plugin.name(), %stage, "Plugin stopped on cancellation");
            return;
        }
        tracing::warn!(chain = %self.name, plugin = %plugin.name(), %stage, error = %error, "Plugin failed");
        failures.push(StageFailure {
            plugin: plugin.name().to_string(),
            stage,
            message: error.to_string(),
        });
    }

    // ─── UI forwarding ───────────────────────────────────────────────

    /// Forward `key = item` to the first `Ui` plugin in this chain.
    ///
    /// Returns false if the chain has no UI plugin, or the UI plugin is busy
    /// (for instance because it is the caller), or it rejected the update.
    pub fn set_ui_item(&self, key: &str, item: Box<dyn DictItem>) -> bool {
        let Some(ui) = self.plugins.iter().find(|p| p.match_attribute(ATTR_UI)) else {
            return false;
        };

        let forwarded = ui.try_invoke(|p| match p.as_ui() {
            Some(ui) => ui.set_item(key, item).map(|()| true),
            None => Ok(false),
        });
        match forwarded {
            Some(Ok(done)) => done,
            Some(Err(e)) => {
                tracing::debug!(chain = %self.name, key, error = %e, "UI rejected update");
                false
            }
            None => false,
        }
    }

    pub fn set_ui_bool(&self, key: &str, value: bool) -> bool {
        self.set_ui_item(key, Box::new(BoolItem::new(value)))
    }

    pub fn set_ui_int(&self, key: &str, value: i32) -> bool {
        self.set_ui_item(key, Box::new(IntItem::new(value)))
    }

    pub fn set_ui_double(&self, key: &str, value: f64) -> bool {
        self.set_ui_item(key, Box::new(DoubleItem::new(value)))
    }

    pub fn set_ui_string(&self, key: &str, value: &str) -> bool {
        self.set_ui_item(key, Box::new(StringItem::from(value)))
    }
}

impl PluginLookup for PluginChain {
    fn query(&self, pred: &dyn Fn(&PluginHandle) -> bool) -> Vec<PluginRef> {
        self.plugins.iter().filter(|p| pred(p)).cloned().collect()
    }

    fn query_by_index(&self, index: usize) -> Option<PluginRef> {
        self.plugins.get(index).cloned()
    }
}
