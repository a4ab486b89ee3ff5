//! Item factory table shared by every dict the registry hands out

use std::sync::{Arc, RwLock};

use lumen_plugin_api::item::builtin_item;
use lumen_plugin_api::sync::{read, write};
use lumen_plugin_api::{DictItem, ItemFactory};

/// Factories for plugin-defined item types, asked in registration order
#[derive(Default)]
pub struct ItemTypes {
    factories: RwLock<Vec<(String, Arc<dyn ItemFactory>)>>,
}

impl ItemTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory. `origin` names its module or plugin in diagnostics.
    pub fn register(&self, origin: impl Into<String>, factory: Arc<dyn ItemFactory>) {
        let origin = origin.into();
        tracing::debug!(origin = %origin, "Registered dict item factory");
        write(&self.factories).push((origin, factory));
    }

    pub fn len(&self) -> usize {
        read(&self.factories).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.factories).is_empty()
    }

    pub fn clear(&self) {
        write(&self.factories).clear();
    }
}

impl ItemFactory for ItemTypes {
    /// Built-in types first, then each registered factory; the first hit wins
    fn create_item(&self, item_type: &str) -> Option<Box<dyn DictItem>> {
        if let Some(item) = builtin_item(item_type) {
            return Some(item);
        }
        read(&self.factories).iter().find_map(|(origin, factory)| {
            let item = factory.create_item(item_type)?;
            tracing::trace!(origin = %origin, item_type, "Created plugin item");
            Some(item)
        })
    }
}
