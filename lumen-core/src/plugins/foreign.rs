//! Owners for objects allocated inside a dynamically loaded module.
//!
//! A plugin or item created by a module must be destroyed by the same
//! module, and the module's code must stay mapped for as long as any such
//! object is alive. [`ForeignPlugin`] and [`ForeignItem`] carry the origin
//! module's destroy function and a reference to its [`Library`] so both
//! hold without any bookkeeping by the caller.

use std::any::Any;
use std::ffi::CString;
use std::sync::Arc;

use libloading::Library;

use lumen_plugin_api::descriptor::{CreateItemFn, DestroyItemFn, DestroyPluginFn};
use lumen_plugin_api::xml::XmlElement;
use lumen_plugin_api::{
    Ddc, Dependencies, DictError, DictItem, ItemFactory, Plugin, PluginChain, PluginError,
    PluginLookup, Sensor, Ui,
};

/// A plugin instance living in a module's heap
pub struct ForeignPlugin {
    inner: *mut dyn Plugin,
    destroy: DestroyPluginFn,
    // Dropped after `destroy` has run.
    _library: Arc<Library>,
}

// The pointee is `dyn Plugin`, which is `Send`.
unsafe impl Send for ForeignPlugin {}

impl ForeignPlugin {
    /// # Safety
    ///
    /// `inner` must be non-null, created by the module loaded as `library`,
    /// and `destroy` must be that module's matching destroy function.
    pub unsafe fn from_raw(
        inner: *mut dyn Plugin,
        destroy: DestroyPluginFn,
        library: Arc<Library>,
    ) -> Self {
        Self {
            inner,
            destroy,
            _library: library,
        }
    }

    fn plugin(&self) -> &dyn Plugin {
        unsafe { &*self.inner }
    }

    fn plugin_mut(&mut self) -> &mut dyn Plugin {
        unsafe { &mut *self.inner }
    }
}

impl Drop for ForeignPlugin {
    fn drop(&mut self) {
        (self.destroy)(self.inner);
    }
}

impl Plugin for ForeignPlugin {
    fn name(&self) -> &str {
        self.plugin().name()
    }

    fn attributes(&self) -> Vec<String> {
        self.plugin().attributes()
    }

    fn post_load(&mut self) -> Result<(), PluginError> {
        self.plugin_mut().post_load()
    }

    fn check_deps(&mut self, deps: &mut dyn Dependencies) -> Result<(), PluginError> {
        self.plugin_mut().check_deps(deps)
    }

    fn post_check_deps(&mut self, lookup: &dyn PluginLookup) -> Result<(), PluginError> {
        self.plugin_mut().post_check_deps(lookup)
    }

    fn pre_run(&mut self, chain: &PluginChain) -> Result<(), PluginError> {
        self.plugin_mut().pre_run(chain)
    }

    fn run(&mut self, chain: &PluginChain) -> Result<(), PluginError> {
        self.plugin_mut().run(chain)
    }

    fn post_run(&mut self, chain: &PluginChain) -> Result<(), PluginError> {
        self.plugin_mut().post_run(chain)
    }

    fn as_ui(&mut self) -> Option<&mut dyn Ui> {
        self.plugin_mut().as_ui()
    }

    fn as_sensor(&mut self) -> Option<&mut dyn Sensor> {
        self.plugin_mut().as_sensor()
    }

    fn as_ddc(&mut self) -> Option<&mut dyn Ddc> {
        self.plugin_mut().as_ddc()
    }
}

/// A dict item living in a module's heap.
///
/// Downcasting sees through the wrapper to the module's own type.
pub struct ForeignItem {
    inner: *mut dyn DictItem,
    destroy: DestroyItemFn,
    library: Arc<Library>,
}

// The pointee is `dyn DictItem`, which is `Send + Sync`.
unsafe impl Send for ForeignItem {}
unsafe impl Sync for ForeignItem {}

impl ForeignItem {
    /// # Safety
    ///
    /// Same contract as [`ForeignPlugin::from_raw`], for items.
    pub unsafe fn from_raw(
        inner: *mut dyn DictItem,
        destroy: DestroyItemFn,
        library: Arc<Library>,
    ) -> Self {
        Self {
            inner,
            destroy,
            library,
        }
    }

    fn item(&self) -> &dyn DictItem {
        unsafe { &*self.inner }
    }

    fn item_mut(&mut self) -> &mut dyn DictItem {
        unsafe { &mut *self.inner }
    }
}

impl Drop for ForeignItem {
    fn drop(&mut self) {
        (self.destroy)(self.inner);
    }
}

impl DictItem for ForeignItem {
    fn item_type(&self) -> &str {
        self.item().item_type()
    }

    fn serializable(&self) -> bool {
        self.item().serializable()
    }

    fn serialize(&self, parent: &mut XmlElement) -> Result<(), DictError> {
        self.item().serialize(parent)
    }

    fn unserialize(&mut self, node: &XmlElement) -> Result<(), DictError> {
        self.item_mut().unserialize(node)
    }

    fn clone_item(&self) -> Box<dyn DictItem> {
        // The copy is allocated by the module too, so it gets the same owner.
        let copy = Box::into_raw(self.item().clone_item());
        Box::new(unsafe { ForeignItem::from_raw(copy, self.destroy, self.library.clone()) })
    }

    fn as_any(&self) -> &dyn Any {
        self.item().as_any()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self.item_mut().as_any_mut()
    }
}

/// Item factory exported by one module
pub struct ModuleItems {
    create: CreateItemFn,
    destroy: DestroyItemFn,
    library: Arc<Library>,
}

impl ModuleItems {
    pub fn new(create: CreateItemFn, destroy: DestroyItemFn, library: Arc<Library>) -> Self {
        Self {
            create,
            destroy,
            library,
        }
    }

    pub fn create_fn(&self) -> CreateItemFn {
        self.create
    }
}

impl ItemFactory for ModuleItems {
    fn create_item(&self, item_type: &str) -> Option<Box<dyn DictItem>> {
        let tag = CString::new(item_type).ok()?;
        let raw = (self.create)(tag.as_ptr());
        if raw.is_null() {
            return None;
        }
        let item = unsafe { ForeignItem::from_raw(raw, self.destroy, self.library.clone()) };
        Some(Box::new(item))
    }
}
