//! DataSavior - saves and loads dicts as XML, and snapshots calibration
//! records

use std::any::Any;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};

use lumen_plugin_api::capability::ATTR_PERSISTENCE;
use lumen_plugin_api::dict::DICT_TAG;
use lumen_plugin_api::sync::{read, write};
use lumen_plugin_api::xml::XmlElement;
use lumen_plugin_api::{
    Dict, DictError, DictHash, DictItem, ItemFactory, Plugin, PluginChain, PluginError,
};

pub const CALIB_RECORD_TYPE: &str = "CalibRecord";
const RECORD_TAG: &str = "record";
const NAME_ATTR: &str = "name";
const TIMESTAMP_ATTR: &str = "timestamp";

/// Chain dict key: store a record under this name
pub const RECORD_NAME_KEY: &str = "DataSavior::recordName";
/// Chain dict key: keys copied into the record
pub const RECORD_KEYS_KEY: &str = "DataSavior::recordKeys";
/// Chain dict key: write a dict to this file
pub const SAVE_FILE_KEY: &str = "DataSavior::saveFile";
/// Chain dict key: dict to write instead of the chain's own
pub const SOURCE_DICT_KEY: &str = "DataSavior::sourceDict";
/// Chain dict key: merge this file into the chain's dict
pub const LOAD_FILE_KEY: &str = "DataSavior::loadFile";

/// A named, timestamped snapshot of dict entries.
///
/// Serialized as a `<record>` element carrying the name and an RFC 3339
/// timestamp, with the snapshot as a nested `<dict>`. The nested dict
/// resolves item types through the factory bound to `data`.
#[derive(Debug, Clone, Default)]
pub struct CalibRecordItem {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub data: Dict,
}

impl CalibRecordItem {
    pub fn new(name: impl Into<String>, data: Dict) -> Self {
        Self {
            name: name.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

impl DictItem for CalibRecordItem {
    fn item_type(&self) -> &str {
        CALIB_RECORD_TYPE
    }

    fn serialize(&self, parent: &mut XmlElement) -> Result<(), DictError> {
        let record = parent.push_child(
            XmlElement::new(RECORD_TAG)
                .with_attr(NAME_ATTR, self.name.as_str())
                .with_attr(TIMESTAMP_ATTR, self.timestamp.to_rfc3339()),
        );
        self.data.serialize(record)
    }

    fn unserialize(&mut self, node: &XmlElement) -> Result<(), DictError> {
        let record = node
            .elements()
            .find(|el| el.name == RECORD_TAG)
            .ok_or_else(|| DictError::UnexpectedElement {
                expected: RECORD_TAG.to_string(),
                found: node.name.clone(),
            })?;

        let name = record
            .attr(NAME_ATTR)
            .ok_or_else(|| DictError::invalid(CALIB_RECORD_TYPE, "missing name"))?;
        let stamp = record
            .attr(TIMESTAMP_ATTR)
            .ok_or_else(|| DictError::invalid(CALIB_RECORD_TYPE, "missing timestamp"))?;
        let timestamp = DateTime::parse_from_rfc3339(stamp)
            .map_err(|_| DictError::invalid(CALIB_RECORD_TYPE, stamp))?
            .with_timezone(&Utc);

        let mut data = Dict::new();
        data.set_factory(self.data.factory().cloned());
        if let Some(nested) = record.elements().find(|el| el.name == DICT_TAG) {
            data.unserialize(nested)?;
        }

        self.name = name.to_string();
        self.timestamp = timestamp;
        self.data = data;
        Ok(())
    }

    fn clone_item(&self) -> Box<dyn DictItem> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Item factory registered alongside [`DataSavior`].
///
/// Records it creates bind their nested dict to `items`, so a snapshot keeps
/// plugin-defined item types across a save and load. Without `items` only
/// built-in types survive.
#[derive(Default)]
pub struct CalibRecordFactory {
    items: Option<Weak<dyn ItemFactory>>,
}

impl CalibRecordFactory {
    pub fn new(items: Weak<dyn ItemFactory>) -> Self {
        Self { items: Some(items) }
    }
}

impl ItemFactory for CalibRecordFactory {
    fn create_item(&self, item_type: &str) -> Option<Box<dyn DictItem>> {
        if item_type != CALIB_RECORD_TYPE {
            return None;
        }
        let data = match self.items.as_ref().and_then(Weak::upgrade) {
            Some(items) => Dict::with_factory(items),
            None => Dict::new(),
        };
        Some(Box::new(CalibRecordItem {
            data,
            ..Default::default()
        }))
    }
}

/// Persistence plugin driven by `DataSavior::*` keys in the chain's dict.
///
/// Each run loads, then records, then saves, skipping any step whose key is
/// not set.
pub struct DataSavior {
    dicts: Arc<DictHash>,
}

#[derive(Default)]
struct Commands {
    load_file: Option<PathBuf>,
    record_name: Option<String>,
    record_keys: Vec<String>,
    save_file: Option<PathBuf>,
    source_dict: Option<String>,
}

impl DataSavior {
    pub const NAME: &'static str = "DataSavior";

    pub fn new(dicts: Arc<DictHash>) -> Self {
        Self { dicts }
    }

    fn commands(dict: &Dict) -> Commands {
        Commands {
            load_file: dict.get_string(LOAD_FILE_KEY).map(PathBuf::from),
            record_name: dict.get_string(RECORD_NAME_KEY).map(str::to_owned),
            record_keys: dict
                .get_string_array(RECORD_KEYS_KEY)
                .map(<[String]>::to_vec)
                .unwrap_or_default(),
            save_file: dict.get_string(SAVE_FILE_KEY).map(PathBuf::from),
            source_dict: dict.get_string(SOURCE_DICT_KEY).map(str::to_owned),
        }
    }
}

impl Plugin for DataSavior {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn attributes(&self) -> Vec<String> {
        vec![ATTR_PERSISTENCE.to_string()]
    }

    fn run(&mut self, chain: &PluginChain) -> Result<(), PluginError> {
        let dict = chain
            .dict()
            .ok_or_else(|| PluginError::config(format!("no dict '{}'", chain.dict_name())))?;
        let commands = Self::commands(&read(&dict));

        if let Some(path) = &commands.load_file {
            write(&dict).load_from_file(path)?;
            tracing::info!(chain = %chain.name(), path = %path.display(), "Loaded dict");
        }

        if chain.was_cancelled() {
            return Err(PluginError::Cancelled);
        }

        if let Some(name) = &commands.record_name {
            let mut snapshot = Dict::new();
            {
                let source = read(&dict);
                snapshot.set_factory(source.factory().cloned());
                for key in &commands.record_keys {
                    match source.get(key) {
                        Some(item) => snapshot.set(key.clone(), item.clone_item()),
                        None => tracing::warn!(key = %key, record = %name, "Record key is not set"),
                    }
                }
            }
            write(&dict).set(name.clone(), Box::new(CalibRecordItem::new(name.clone(), snapshot)));
            tracing::debug!(chain = %chain.name(), record = %name, "Stored calibration record");
        }

        if chain.was_cancelled() {
            return Err(PluginError::Cancelled);
        }

        if let Some(path) = &commands.save_file {
            let source = match &commands.source_dict {
                Some(name) => self
                    .dicts
                    .get_dict(name)
                    .ok_or_else(|| PluginError::config(format!("no dict '{name}'")))?,
                None => dict.clone(),
            };
            read(&source).save_to_file(path)?;
            tracing::info!(chain = %chain.name(), path = %path.display(), "Saved dict");
        }

        Ok(())
    }
}
