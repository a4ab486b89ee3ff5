//! C ABI shared between the registry and dynamically loaded modules.
//!
//! A module exports two symbols, both generated by
//! [`export_plugins!`](crate::export_plugins):
//!
//! - `_lumen_plugin_api_version() -> u32`
//! - `_lumen_register_plugins(count: *mut usize) -> *const PluginDescriptor`
//!
//! Everything a descriptor creates must be released through the same
//! descriptor's destroy functions, so allocation and deallocation happen in
//! the module that owns the code.

use std::ffi::{CStr, c_char};

use crate::Plugin;
use crate::item::{BoolItem, DictItem};

pub const API_VERSION_SYMBOL: &[u8] = b"_lumen_plugin_api_version";
pub const REGISTER_SYMBOL: &[u8] = b"_lumen_register_plugins";

pub type CreatePluginFn = extern "C" fn() -> *mut dyn Plugin;
pub type DestroyPluginFn = extern "C" fn(*mut dyn Plugin);
/// Returns a null pointer for type tags the module does not define
pub type CreateItemFn = extern "C" fn(*const c_char) -> *mut dyn DictItem;
pub type DestroyItemFn = extern "C" fn(*mut dyn DictItem);

pub type ApiVersionFn = extern "C" fn() -> u32;
pub type RegisterFn = extern "C" fn(*mut usize) -> *const PluginDescriptor;

/// One plugin type exported by a module
#[repr(C)]
pub struct PluginDescriptor {
    pub name: *const c_char,
    pub major_version: u32,
    pub minor_version: u32,
    pub create: CreatePluginFn,
    pub destroy: DestroyPluginFn,
    pub item_create: Option<CreateItemFn>,
    pub item_destroy: Option<DestroyItemFn>,
}

// Descriptors only hold pointers to static strings and functions.
unsafe impl Sync for PluginDescriptor {}

impl PluginDescriptor {
    pub const fn new<P: Plugin + Default + 'static>(
        name: &'static CStr,
        major_version: u32,
        minor_version: u32,
    ) -> Self {
        Self {
            name: name.as_ptr(),
            major_version,
            minor_version,
            create: create_plugin::<P>,
            destroy: destroy_plugin,
            item_create: None,
            item_destroy: None,
        }
    }

    /// Attach a factory for the module's own item types
    pub const fn with_items(mut self, create: CreateItemFn, destroy: DestroyItemFn) -> Self {
        self.item_create = Some(create);
        self.item_destroy = Some(destroy);
        self
    }

    /// Descriptor name as UTF-8
    ///
    /// # Safety
    ///
    /// `name` must point to a valid NUL-terminated string.
    pub unsafe fn name_str(&self) -> String {
        if self.name.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(self.name) }
            .to_string_lossy()
            .into_owned()
    }
}

pub extern "C" fn create_plugin<P: Plugin + Default + 'static>() -> *mut dyn Plugin {
    let plugin: Box<dyn Plugin> = Box::new(P::default());
    Box::into_raw(plugin)
}

pub extern "C" fn destroy_plugin(ptr: *mut dyn Plugin) {
    if !ptr.is_null() {
        unsafe {
            drop(Box::from_raw(ptr));
        }
    }
}

/// Hand an item created inside a module to the host
pub fn export_item(item: Box<dyn DictItem>) -> *mut dyn DictItem {
    Box::into_raw(item)
}

/// The null item pointer returned for unknown type tags
pub fn null_item() -> *mut dyn DictItem {
    std::ptr::null_mut::<BoolItem>() as *mut dyn DictItem
}

pub extern "C" fn destroy_item(ptr: *mut dyn DictItem) {
    if !ptr.is_null() {
        unsafe {
            drop(Box::from_raw(ptr));
        }
    }
}

/// Parse a decimal version component such as `env!("CARGO_PKG_VERSION_MAJOR")`
pub const fn parse_version(text: &str) -> u32 {
    let bytes = text.as_bytes();
    let mut value = 0u32;
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        value = value * 10 + (bytes[i] - b'0') as u32;
        i += 1;
    }
    value
}

/// Read the type tag passed to a [`CreateItemFn`]
///
/// # Safety
///
/// `ptr` must be null or point to a valid NUL-terminated string.
pub unsafe fn item_type_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}
