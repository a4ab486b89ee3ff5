//! Memoized dependency check over the loaded plugins.
//!
//! Edges are discovered lazily: a plugin's `check_deps` asks for
//! collaborators through [`Dependencies`], and each request resolves the
//! collaborator first and records an edge. A collaborator that is still being
//! resolved further up the stack (a cycle) is assumed to pass. Once every
//! plugin has been visited, rejections are pushed along the recorded edges
//! until nothing changes, so both ends of a cycle settle on the same answer.

use lumen_plugin_api::{
    BringUpStage, Dependencies, LifecycleState, PluginError, PluginHandle, PluginLookup, PluginRef,
};

/// Requirements of one plugin: each group is satisfied while any member is
/// accepted
pub type Requirements = Vec<Vec<usize>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Pending,
    InProgress,
    Accepted,
    Rejected,
}

pub(crate) struct DepResolver<'a> {
    plugins: &'a [PluginRef],
    marks: Vec<Mark>,
    pending: Vec<bool>,
    requires: Vec<Requirements>,
    reasons: Vec<Option<String>>,
}

impl<'a> DepResolver<'a> {
    /// Plugins already past this phase keep their result and are never
    /// called again.
    pub fn new(plugins: &'a [PluginRef], mut requires: Vec<Requirements>) -> Self {
        requires.resize_with(plugins.len(), Vec::new);
        let marks: Vec<Mark> = plugins
            .iter()
            .map(|p| match p.state() {
                LifecycleState::PostLoaded => Mark::Pending,
                LifecycleState::DepsChecked
                | LifecycleState::DepsFinalized
                | LifecycleState::Runnable => Mark::Accepted,
                LifecycleState::Loaded | LifecycleState::Rejected { .. } => Mark::Rejected,
            })
            .collect();
        let pending = marks.iter().map(|m| *m == Mark::Pending).collect();
        Self {
            plugins,
            reasons: vec![None; plugins.len()],
            marks,
            pending,
            requires,
        }
    }

    /// Check every pending plugin, move it to DepsChecked or reject it, and
    /// return the dependency edges recorded so far.
    pub fn resolve_all(mut self) -> Vec<Requirements> {
        for index in 0..self.plugins.len() {
            self.resolve(index);
        }
        self.propagate();

        let plugins = self.plugins;
        for (index, plugin) in plugins.iter().enumerate() {
            if !self.pending[index] {
                continue;
            }
            let outcome = match self.marks[index] {
                Mark::Accepted => plugin.transition(LifecycleState::DepsChecked),
                _ => {
                    let reason = self.reasons[index]
                        .take()
                        .unwrap_or_else(|| "dependency check failed".to_string());
                    tracing::warn!(plugin = %plugin.name(), reason = %reason, "Plugin rejected in dependency check");
                    plugin.reject(BringUpStage::CheckDeps, reason)
                }
            };
            if let Err(e) = outcome {
                tracing::error!(plugin = %plugin.name(), error = %e, "Unexpected plugin state after dependency check");
            }
        }
        self.requires
    }

    fn resolve(&mut self, index: usize) -> bool {
        match self.marks[index] {
            // Optimistic for a plugin further up the stack.
            Mark::Accepted | Mark::InProgress => return true,
            Mark::Rejected => return false,
            Mark::Pending => {}
        }

        self.marks[index] = Mark::InProgress;
        let plugin = self.plugins[index].clone();
        tracing::debug!(plugin = %plugin.name(), "Checking dependencies");

        let result = plugin.invoke(|p| {
            p.check_deps(&mut Scope {
                resolver: self,
                from: index,
            })
        });

        match result {
            Ok(()) => {
                self.marks[index] = Mark::Accepted;
                true
            }
            Err(e) => {
                self.marks[index] = Mark::Rejected;
                self.reasons[index] = Some(e.to_string());
                false
            }
        }
    }

    fn propagate(&mut self) {
        loop {
            let mut changed = false;
            for index in 0..self.plugins.len() {
                if self.marks[index] != Mark::Accepted {
                    continue;
                }
                let failed = failed_requirement(&self.requires[index], |j| {
                    self.marks[j] == Mark::Rejected
                })
                .map(|group| self.describe(group));
                if let Some(names) = failed {
                    self.marks[index] = Mark::Rejected;
                    self.reasons[index] = Some(format!("Dependency rejected: {names}"));
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn describe(&self, group: &[usize]) -> String {
        group
            .iter()
            .map(|&j| self.plugins[j].name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn candidates(&self, from: usize, pred: impl Fn(&PluginHandle) -> bool) -> Vec<usize> {
        self.plugins
            .iter()
            .enumerate()
            .filter(|(j, p)| *j != from && pred(p))
            .map(|(j, _)| j)
            .collect()
    }
}

/// First requirement group whose members are all rejected
pub(crate) fn failed_requirement(
    requires: &[Vec<usize>],
    is_rejected: impl Fn(usize) -> bool,
) -> Option<&[usize]> {
    requires
        .iter()
        .find(|group| !group.is_empty() && group.iter().all(|&j| is_rejected(j)))
        .map(Vec::as_slice)
}

/// What one plugin's `check_deps` sees of the registry
struct Scope<'r, 'a> {
    resolver: &'r mut DepResolver<'a>,
    from: usize,
}

impl PluginLookup for Scope<'_, '_> {
    fn query(&self, pred: &dyn Fn(&PluginHandle) -> bool) -> Vec<PluginRef> {
        self.resolver
            .plugins
            .iter()
            .filter(|p| pred(p))
            .cloned()
            .collect()
    }

    fn query_by_index(&self, index: usize) -> Option<PluginRef> {
        self.resolver.plugins.get(index).cloned()
    }
}

impl Dependencies for Scope<'_, '_> {
    fn require(&mut self, name: &str) -> Result<PluginRef, PluginError> {
        for j in self.resolver.candidates(self.from, |p| p.match_name(name)) {
            if self.resolver.resolve(j) {
                self.resolver.requires[self.from].push(vec![j]);
                return Ok(self.resolver.plugins[j].clone());
            }
        }
        Err(PluginError::missing_dependency(name))
    }

    fn require_attributes(&mut self, attributes: &[&str]) -> Result<Vec<PluginRef>, PluginError> {
        let mut accepted = Vec::new();
        for j in self
            .resolver
            .candidates(self.from, |p| p.match_attributes(attributes))
        {
            if self.resolver.resolve(j) {
                accepted.push(j);
            }
        }
        if accepted.is_empty() {
            return Err(PluginError::missing_dependency(attributes.join(" + ")));
        }

        let plugins = accepted
            .iter()
            .map(|&j| self.resolver.plugins[j].clone())
            .collect();
        self.resolver.requires[self.from].push(accepted);
        Ok(plugins)
    }
}
