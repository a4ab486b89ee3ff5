//! DictHash - named collection of dicts shared by chains

use std::sync::{Arc, RwLock};

use crate::capability::ATTR_DICT_HASH;
use crate::chain::PluginChain;
use crate::dict::{Dict, ItemFactory};
use crate::error::PluginError;
use crate::sync::{read, write};
use crate::Plugin;

/// A dict shared between chains and plugins
pub type SharedDict = Arc<RwLock<Dict>>;

/// Chain dict key naming the dict that receives copied entries
pub const TARGET_DICT_KEY: &str = "DictHash::targetDict";
/// Chain dict key listing the entries to copy
pub const COPY_KEYS_KEY: &str = "DictHash::copyKeys";

/// Mapping from dict name to dict.
///
/// Entries are created and removed explicitly and never pruned. Callers
/// should fetch a dict by name when they need it rather than holding on to
/// it across operations that may clear it.
#[derive(Default)]
pub struct DictHash {
    dicts: RwLock<Vec<(String, SharedDict)>>,
    factory: Option<Arc<dyn ItemFactory>>,
}

impl DictHash {
    pub fn new() -> Self {
        Self::default()
    }

    /// New dicts are bound to `factory` for reading plugin-defined item types
    pub fn with_factory(factory: Arc<dyn ItemFactory>) -> Self {
        Self {
            dicts: RwLock::new(Vec::new()),
            factory: Some(factory),
        }
    }

    /// Return the dict called `name`, creating it if needed.
    ///
    /// An existing dict is returned as is, never replaced.
    pub fn new_dict(&self, name: &str) -> SharedDict {
        if let Some(existing) = self.get_dict(name) {
            return existing;
        }

        let mut dicts = write(&self.dicts);
        // Another caller may have created it between the two locks.
        if let Some((_, existing)) = dicts.iter().find(|(n, _)| n == name) {
            return existing.clone();
        }

        let mut dict = Dict::new();
        dict.set_factory(self.factory.clone());
        let dict = Arc::new(RwLock::new(dict));
        dicts.push((name.to_string(), dict.clone()));
        tracing::debug!(dict = %name, "Created dict");
        dict
    }

    pub fn get_dict(&self, name: &str) -> Option<SharedDict> {
        read(&self.dicts)
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.clone())
    }

    /// Remove the dict called `name`. Returns false if there was none.
    pub fn clear_dict(&self, name: &str) -> bool {
        let mut dicts = write(&self.dicts);
        match dicts.iter().position(|(n, _)| n == name) {
            Some(index) => {
                dicts.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> Vec<String> {
        read(&self.dicts).iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn len(&self) -> usize {
        read(&self.dicts).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.dicts).is_empty()
    }

    /// Copy `keys` from `source` into the dict called `target`.
    ///
    /// Returns the number of entries copied; missing keys are skipped.
    pub fn copy_into(&self, source: &SharedDict, target: &str, keys: &[String]) -> usize {
        let target_dict = self.new_dict(target);
        if Arc::ptr_eq(source, &target_dict) {
            return 0;
        }

        let src = read(source);
        let mut dst = write(&target_dict);
        let mut copied = 0;
        for key in keys {
            match src.get(key) {
                Some(item) => {
                    dst.set(key.clone(), item.clone_item());
                    copied += 1;
                }
                None => tracing::warn!(key = %key, target = %target, "Key to copy is not set"),
            }
        }
        copied
    }
}

/// Exposes a [`DictHash`] as a plugin.
///
/// When run, reads [`TARGET_DICT_KEY`] and [`COPY_KEYS_KEY`] from the chain's
/// dict and copies the listed entries into the target dict. This is how
/// plugins hand data to each other without holding references.
pub struct DictHashPlugin {
    dicts: Arc<DictHash>,
}

impl DictHashPlugin {
    pub const NAME: &'static str = "DictHash";

    pub fn new(dicts: Arc<DictHash>) -> Self {
        Self { dicts }
    }

    pub fn dicts(&self) -> &Arc<DictHash> {
        &self.dicts
    }
}

impl Plugin for DictHashPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn attributes(&self) -> Vec<String> {
        vec![ATTR_DICT_HASH.to_string()]
    }

    fn run(&mut self, chain: &PluginChain) -> Result<(), PluginError> {
        let source = chain
            .dict()
            .ok_or_else(|| PluginError::config(format!("no dict '{}'", chain.dict_name())))?;

        let (target, keys) = {
            let dict = read(&source);
            (
                dict.get_string(TARGET_DICT_KEY).map(str::to_owned),
                dict.get_string_array(COPY_KEYS_KEY)
                    .map(<[String]>::to_vec)
                    .unwrap_or_default(),
            )
        };

        let Some(target) = target else {
            return Ok(());
        };
        let copied = self.dicts.copy_into(&source, &target, &keys);
        tracing::debug!(chain = %chain.name(), target = %target, copied, "Copied dict entries");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_dict_appends_instead_of_replacing() {
        let hash = DictHash::new();

        let first = hash.new_dict("X");
        write(&first).set_int("a", 1);

        let second = hash.new_dict("X");
        write(&second).set_int("b", 2);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(hash.len(), 1);
        let dict = read(&first);
        assert_eq!(dict.get_int("a"), Some(1));
        assert_eq!(dict.get_int("b"), Some(2));
    }

    #[test]
    fn test_get_and_clear() {
        let hash = DictHash::new();
        assert!(hash.get_dict("missing").is_none());

        hash.new_dict("calibrate");
        assert!(hash.get_dict("calibrate").is_some());
        assert!(hash.clear_dict("calibrate"));
        assert!(!hash.clear_dict("calibrate"));
        assert!(hash.get_dict("calibrate").is_none());
    }

    #[test]
    fn test_copy_into_skips_missing_keys() {
        let hash = DictHash::new();
        let source = hash.new_dict("src");
        {
            let mut dict = write(&source);
            dict.set_double("Sensor::Y", 120.5);
            dict.set_string("Sensor::mode", "lcd");
        }

        let copied = hash.copy_into(
            &source,
            "shared",
            &["Sensor::Y".to_string(), "Sensor::nope".to_string()],
        );
        assert_eq!(copied, 1);

        let shared = hash.get_dict("shared").unwrap();
        assert_eq!(read(&shared).get_double("Sensor::Y"), Some(120.5));
        assert!(read(&shared).get("Sensor::mode").is_none());
        // The source keeps its own copy.
        assert_eq!(read(&source).get_double("Sensor::Y"), Some(120.5));
    }

    #[test]
    fn test_copy_into_self_is_noop() {
        let hash = DictHash::new();
        let source = hash.new_dict("same");
        write(&source).set_int("k", 1);
        assert_eq!(hash.copy_into(&source, "same", &["k".to_string()]), 0);
    }
}
