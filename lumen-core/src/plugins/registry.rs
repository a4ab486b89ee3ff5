//! PluginRegistry - loads plugins, brings them up and answers queries

use libloading::Library;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use lumen_plugin_api::descriptor::{
    API_VERSION_SYMBOL, ApiVersionFn, PluginDescriptor, REGISTER_SYMBOL, RegisterFn,
};
use lumen_plugin_api::sync::{read, write};
use lumen_plugin_api::{
    API_VERSION, BringUpStage, DictHash, DictHashPlugin, DictItem, ItemFactory, LifecycleState,
    Plugin, PluginChain, PluginHandle, PluginLookup, PluginRef, SharedLookup,
};

use super::error::RegistryError;
use super::foreign::{ForeignPlugin, ModuleItems};
use super::items::ItemTypes;
use super::resolver::{DepResolver, Requirements, failed_requirement};
use crate::builtins::{CalibRecordFactory, DataSavior};

/// Where a plugin instance came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PluginOrigin {
    /// Compiled into lumen
    Builtin,
    /// Handed over in-process by the application
    Static,
    /// Created by a dynamically loaded module
    Module { path: PathBuf },
}

impl fmt::Display for PluginOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin => write!(f, "builtin"),
            Self::Static => write!(f, "static"),
            Self::Module { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Information about a plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub attributes: Vec<String>,
    /// `major.minor` from the module descriptor
    pub version: Option<String>,
    pub origin: PluginOrigin,
    pub state: LifecycleState,
    pub error: Option<String>,
}

struct PluginEntry {
    handle: PluginRef,
    origin: PluginOrigin,
    version: Option<(u32, u32)>,
}

/// Every plugin handle in load order, shared weakly with the chains
#[derive(Default)]
struct PluginSet {
    plugins: RwLock<Vec<PluginRef>>,
}

impl PluginLookup for PluginSet {
    fn query(&self, pred: &dyn Fn(&PluginHandle) -> bool) -> Vec<PluginRef> {
        read(&self.plugins)
            .iter()
            .filter(|p| pred(p))
            .cloned()
            .collect()
    }

    fn query_by_index(&self, index: usize) -> Option<PluginRef> {
        read(&self.plugins).get(index).cloned()
    }
}

/// Catalog of every loaded plugin and module.
///
/// Plugins are brought up in three phases. `post_load` runs as soon as a
/// plugin is added. [`PluginRegistry::check_deps`] and
/// [`PluginRegistry::post_check_deps`] (or [`PluginRegistry::bring_up`] for
/// both) run once every plugin is loaded. Plugins that fail a phase stay
/// listed but never become runnable.
///
/// On drop, plugin instances are released before the modules that define
/// them, and modules are closed in reverse load order.
pub struct PluginRegistry {
    entries: Vec<PluginEntry>,
    plugins: Arc<PluginSet>,
    /// Dependency edges recorded during `check_deps`, by plugin index
    requires: Vec<Requirements>,
    modules: Vec<Arc<Library>>,
    items: Arc<ItemTypes>,
    dicts: Arc<DictHash>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        let items = Arc::new(ItemTypes::new());
        let dicts = Arc::new(DictHash::with_factory(items.clone()));
        Self {
            entries: Vec::new(),
            plugins: Arc::new(PluginSet::default()),
            requires: Vec::new(),
            modules: Vec::new(),
            items,
            dicts,
        }
    }

    /// Create a registry holding the built-in DictHash and DataSavior plugins
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let dict_hash = DictHashPlugin::new(registry.dicts.clone());
        registry.add(Box::new(dict_hash), PluginOrigin::Builtin, None);

        let items: Arc<dyn ItemFactory> = registry.items.clone();
        let records = CalibRecordFactory::new(Arc::downgrade(&items));
        registry.items.register(DataSavior::NAME, Arc::new(records));
        let savior = DataSavior::new(registry.dicts.clone());
        registry.add(Box::new(savior), PluginOrigin::Builtin, None);
        registry
    }

    /// The named dicts shared by every chain built from this registry
    pub fn dict_hash(&self) -> &Arc<DictHash> {
        &self.dicts
    }

    pub fn item_types(&self) -> &Arc<ItemTypes> {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of dynamic modules currently open
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    // ─── Loading ─────────────────────────────────────────────────────

    /// Load every plugin exported by the module at `path`.
    ///
    /// Returns the number of plugins created. Each one has already been
    /// through `post_load`, whether or not it passed.
    pub fn load_plugin(&mut self, path: &Path) -> Result<usize, RegistryError> {
        // SAFETY: Loading a module runs its initializers. Modules are
        // expected to be built against this API and to export the symbols
        // generated by `export_plugins!`.
        let library = Arc::new(unsafe { Library::new(path)? });

        let module_api_version = {
            let api_version_fn: libloading::Symbol<ApiVersionFn> =
                unsafe { library.get(API_VERSION_SYMBOL)? };
            api_version_fn()
        };
        if module_api_version != API_VERSION {
            return Err(RegistryError::ApiVersionMismatch {
                expected: API_VERSION,
                found: module_api_version,
            });
        }

        let descriptors = {
            let register: libloading::Symbol<RegisterFn> =
                unsafe { library.get(REGISTER_SYMBOL)? };
            let mut count = 0usize;
            let table = register(&mut count);
            if table.is_null() || count == 0 {
                return Err(RegistryError::NoPlugins {
                    path: path.to_path_buf(),
                });
            }
            // SAFETY: The table is static data in the module, kept mapped
            // by `library`.
            unsafe { std::slice::from_raw_parts(table, count) }
        };

        let loaded = unsafe { self.load_descriptors(&library, descriptors, path) };
        if loaded == 0 {
            return Err(RegistryError::NoPlugins {
                path: path.to_path_buf(),
            });
        }

        tracing::info!(path = %path.display(), plugins = loaded, "Module loaded");
        self.modules.push(library);
        Ok(loaded)
    }

    /// Instantiate the plugins described by a module's descriptor table.
    ///
    /// # Safety
    ///
    /// Every descriptor must come from the module loaded as `library`.
    pub unsafe fn load_descriptors(
        &mut self,
        library: &Arc<Library>,
        descriptors: &[PluginDescriptor],
        path: &Path,
    ) -> usize {
        let mut factories: Vec<ModuleItems> = Vec::new();
        let mut loaded = 0;

        for descriptor in descriptors {
            let name = unsafe { descriptor.name_str() };

            if let (Some(create), Some(destroy)) = (descriptor.item_create, descriptor.item_destroy)
                && !factories.iter().any(|f| std::ptr::fn_addr_eq(f.create_fn(), create))
            {
                factories.push(ModuleItems::new(create, destroy, library.clone()));
            }

            let raw = (descriptor.create)();
            if raw.is_null() {
                tracing::error!(plugin = %name, path = %path.display(), "Module returned no plugin instance");
                continue;
            }
            let plugin = unsafe { ForeignPlugin::from_raw(raw, descriptor.destroy, library.clone()) };
            if plugin.name() != name {
                tracing::warn!(
                    descriptor = %name,
                    plugin = %plugin.name(),
                    "Plugin name differs from its descriptor"
                );
            }

            self.add(
                Box::new(plugin),
                PluginOrigin::Module {
                    path: path.to_path_buf(),
                },
                Some((descriptor.major_version, descriptor.minor_version)),
            );
            loaded += 1;
        }

        // A module without plugins leaves nothing behind, item types included.
        if loaded > 0 {
            for factory in factories {
                self.items
                    .register(path.display().to_string(), Arc::new(factory));
            }
        }
        loaded
    }

    /// Add an in-process plugin, with an optional factory for its own item
    /// types. `post_load` runs immediately.
    pub fn load_static(
        &mut self,
        plugin: Box<dyn Plugin>,
        items: Option<Arc<dyn ItemFactory>>,
    ) -> PluginRef {
        if let Some(factory) = items {
            self.items.register(plugin.name().to_string(), factory);
        }
        self.add(plugin, PluginOrigin::Static, None)
    }

    /// Load every module directly inside `dir`.
    ///
    /// A module that fails to load is logged and does not stop the others.
    /// Returns the number of modules loaded.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, RegistryError> {
        if !dir.is_dir() {
            return Err(RegistryError::PluginDirNotFound {
                path: dir.to_path_buf(),
            });
        }

        let mut modules = 0;
        for path in find_libraries(dir)? {
            match self.load_plugin(&path) {
                Ok(_) => modules += 1,
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Failed to load module");
                }
            }
        }
        Ok(modules)
    }

    /// Load every module found in `dirs`, skipping directories that do not
    /// exist. Returns the number of modules loaded.
    pub fn register_plugins(&mut self, dirs: &[PathBuf]) -> Result<usize, RegistryError> {
        let mut modules = 0;
        for dir in dirs {
            match self.load_dir(dir) {
                Ok(loaded) => modules += loaded,
                Err(RegistryError::PluginDirNotFound { path }) => {
                    tracing::debug!(dir = %path.display(), "Plugin directory does not exist");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(modules)
    }

    fn add(
        &mut self,
        plugin: Box<dyn Plugin>,
        origin: PluginOrigin,
        version: Option<(u32, u32)>,
    ) -> PluginRef {
        let handle = Arc::new(PluginHandle::new(plugin));
        if !self.query_by_name(handle.name()).is_empty() {
            tracing::warn!(plugin = %handle.name(), "Another plugin already uses this name");
        }

        match handle.invoke(|p| p.post_load()) {
            Ok(()) => {
                if let Err(e) = handle.transition(LifecycleState::PostLoaded) {
                    tracing::error!(plugin = %handle.name(), error = %e, "Invalid state after load");
                }
            }
            Err(e) => {
                tracing::warn!(plugin = %handle.name(), error = %e, "Plugin disabled itself on load");
                if let Err(e) = handle.reject(BringUpStage::PostLoad, e.to_string()) {
                    tracing::error!(plugin = %handle.name(), error = %e, "Invalid state after load");
                }
            }
        }

        tracing::debug!(plugin = %handle.name(), origin = %origin, "Plugin added");
        write(&self.plugins.plugins).push(handle.clone());
        self.entries.push(PluginEntry {
            handle: handle.clone(),
            origin,
            version,
        });
        handle
    }

    // ─── Bring-up ────────────────────────────────────────────────────

    /// Run `check_deps` on every plugin that has not been through it yet.
    ///
    /// Safe to call again after loading more plugins: earlier results are
    /// kept and earlier plugins are not called a second time.
    pub fn check_deps(&mut self) {
        let handles = self.handles();
        let requires = std::mem::take(&mut self.requires);
        self.requires = DepResolver::new(&handles, requires).resolve_all();
    }

    /// Run `post_check_deps` on every plugin that passed `check_deps`, then
    /// mark the survivors runnable.
    pub fn post_check_deps(&self) {
        let handles = self.handles();

        for handle in handles
            .iter()
            .filter(|h| h.state() == LifecycleState::DepsChecked)
        {
            let outcome = match handle.invoke(|p| p.post_check_deps(self)) {
                Ok(()) => handle.transition(LifecycleState::DepsFinalized),
                Err(e) => {
                    tracing::warn!(plugin = %handle.name(), error = %e, "Plugin rejected after dependency check");
                    handle.reject(BringUpStage::PostCheckDeps, e.to_string())
                }
            };
            if let Err(e) = outcome {
                tracing::error!(plugin = %handle.name(), error = %e, "Unexpected plugin state");
            }
        }

        // A late rejection still takes its dependents down with it.
        loop {
            let mut changed = false;
            for (index, handle) in handles.iter().enumerate() {
                if handle.state() != LifecycleState::DepsFinalized {
                    continue;
                }
                let requires = self.requires.get(index).map(Vec::as_slice).unwrap_or(&[]);
                let Some(group) = failed_requirement(requires, |j| handles[j].is_rejected())
                else {
                    continue;
                };
                let names: Vec<&str> = group.iter().map(|&j| handles[j].name()).collect();
                let reason = format!("Dependency rejected: {}", names.join(", "));
                tracing::warn!(plugin = %handle.name(), reason = %reason, "Plugin rejected after dependency check");
                if let Err(e) = handle.reject(BringUpStage::PostCheckDeps, reason) {
                    tracing::error!(plugin = %handle.name(), error = %e, "Unexpected plugin state");
                }
                changed = true;
            }
            if !changed {
                break;
            }
        }

        for handle in handles
            .iter()
            .filter(|h| h.state() == LifecycleState::DepsFinalized)
        {
            match handle.transition(LifecycleState::Runnable) {
                Ok(()) => tracing::info!(plugin = %handle.name(), "Plugin ready"),
                Err(e) => {
                    tracing::error!(plugin = %handle.name(), error = %e, "Unexpected plugin state")
                }
            }
        }
    }

    /// Both dependency phases. Returns the number of runnable plugins.
    pub fn bring_up(&mut self) -> usize {
        self.check_deps();
        self.post_check_deps();
        let runnable = self.entries.iter().filter(|e| e.handle.is_runnable()).count();
        tracing::info!(
            plugins = self.entries.len(),
            runnable,
            "Plugin bring-up complete"
        );
        runnable
    }

    // ─── Queries ─────────────────────────────────────────────────────

    fn handles(&self) -> Vec<PluginRef> {
        read(&self.plugins.plugins).clone()
    }

    /// First runnable plugin called `name`
    pub fn runnable_by_name(&self, name: &str) -> Result<PluginRef, RegistryError> {
        let matches = self.query_by_name(name);
        if matches.is_empty() {
            return Err(RegistryError::NotFound {
                name: name.to_string(),
            });
        }
        let first = matches[0].clone();
        Ok(matches
            .into_iter()
            .find(|p| p.is_runnable())
            .unwrap_or(first))
    }

    /// Build an empty chain bound to this registry and to `dict_name`,
    /// creating the dict if needed
    pub fn new_chain(&self, name: &str, dict_name: &str) -> PluginChain {
        self.dicts.new_dict(dict_name);
        let mut chain = PluginChain::new(name, dict_name, self.dicts.clone());
        let lookup: SharedLookup = self.plugins.clone();
        chain.bind_registry(Arc::downgrade(&lookup));
        chain
    }

    /// Get information about every plugin, in load order
    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        self.entries
            .iter()
            .map(|e| PluginInfo {
                name: e.handle.name().to_string(),
                attributes: e.handle.attributes().to_vec(),
                version: e.version.map(|(major, minor)| format!("{major}.{minor}")),
                origin: e.origin.clone(),
                state: e.handle.state(),
                error: e.handle.error_string(),
            })
            .collect()
    }

    // ─── Dict items ──────────────────────────────────────────────────

    /// Blank item of `item_type`: built-ins first, then each module's
    /// factory in load order
    pub fn create_dict_item(&self, item_type: &str) -> Option<Box<dyn DictItem>> {
        self.items.create_item(item_type)
    }

    /// Release an item. Items created by a module are returned to that
    /// module's destroy function by their owning wrapper.
    pub fn delete_dict_item(&self, item: Box<dyn DictItem>) {
        tracing::trace!(item_type = %item.item_type(), "Deleting dict item");
        drop(item);
    }
}

impl PluginLookup for PluginRegistry {
    fn query(&self, pred: &dyn Fn(&PluginHandle) -> bool) -> Vec<PluginRef> {
        self.plugins.query(pred)
    }

    fn query_by_index(&self, index: usize) -> Option<PluginRef> {
        self.plugins.query_by_index(index)
    }
}

impl Drop for PluginRegistry {
    fn drop(&mut self) {
        // Instances first, then the code that defines them.
        write(&self.plugins.plugins).clear();
        self.entries.clear();
        self.requires.clear();
        self.items.clear();
        while let Some(module) = self.modules.pop() {
            tracing::debug!(remaining = self.modules.len(), "Closing module");
            drop(module);
        }
    }
}

/// Shared library files directly inside `dir`, sorted by path
fn find_libraries(dir: &Path) -> Result<Vec<PathBuf>, RegistryError> {
    let extensions: &[&str] = if cfg!(target_os = "macos") {
        &["dylib", "so"]
    } else if cfg!(target_os = "windows") {
        &["dll"]
    } else {
        &["so"]
    };

    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_library = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.contains(&ext));
        if path.is_file() && is_library {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}
