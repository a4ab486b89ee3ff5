//! End-to-end registry scenarios: bring-up, chain assembly and persistence

use std::any::Any;
use std::sync::Arc;

use lumen_core::builtins::{LOAD_FILE_KEY, RECORD_KEYS_KEY, RECORD_NAME_KEY, SAVE_FILE_KEY};
use lumen_core::{CalibRecordItem, ChainConfig, LumenConfig, PluginRegistry};
use lumen_plugin_api::capability::{ATTR_SENSOR, ATTR_UI};
use lumen_plugin_api::dict_hash::{COPY_KEYS_KEY, TARGET_DICT_KEY};
use lumen_plugin_api::item::StringItem;
use lumen_plugin_api::sync::{read, write};
use lumen_plugin_api::xml::XmlElement;
use lumen_plugin_api::{
    CancellationToken, Dependencies, DictError, DictItem, ItemFactory, LifecycleState, Measurement, Plugin, PluginChain,
    PluginError, PluginLookup, Sensor, Ui,
};
use tempfile::TempDir;

/// Sensor reporting a fixed white point
#[derive(Default)]
struct FixedSensor;

impl Sensor for FixedSensor {
    fn measure(&mut self, _cancel: &CancellationToken) -> Result<Measurement, PluginError> {
        Ok(Measurement {
            x: 95.047,
            y: 100.0,
            z: 108.883,
        })
    }
}

impl Plugin for FixedSensor {
    fn name(&self) -> &str {
        "FixedSensor"
    }

    fn attributes(&self) -> Vec<String> {
        vec![ATTR_SENSOR.to_string()]
    }

    fn as_sensor(&mut self) -> Option<&mut dyn Sensor> {
        Some(self)
    }
}

/// Reads the sensor it resolved during bring-up and stores the luminance
#[derive(Default)]
struct Luminance {
    sensor: Option<String>,
}

impl Plugin for Luminance {
    fn name(&self) -> &str {
        "Luminance"
    }

    fn check_deps(&mut self, deps: &mut dyn Dependencies) -> Result<(), PluginError> {
        let sensors = deps.require_attributes(&[ATTR_SENSOR])?;
        self.sensor = sensors.first().map(|s| s.name().to_string());
        Ok(())
    }

    fn run(&mut self, chain: &PluginChain) -> Result<(), PluginError> {
        let name = self
            .sensor
            .as_deref()
            .ok_or_else(|| PluginError::missing_dependency(ATTR_SENSOR))?;
        let sensor = chain
            .registry()
            .and_then(|registry| registry.first_runnable(name))
            .ok_or_else(|| PluginError::missing_dependency(name))?;
        let cancel = chain.cancel_token();
        let measurement = sensor.invoke(|p| match p.as_sensor() {
            Some(s) => s.measure(&cancel),
            None => Err(PluginError::missing_dependency(ATTR_SENSOR)),
        })?;

        let dict = chain
            .dict()
            .ok_or_else(|| PluginError::config("chain has no dict"))?;
        write(&dict).set_double("Luminance::Y", measurement.y);
        chain.set_ui_double("Luminance::Y", measurement.y);
        Ok(())
    }
}

/// Collects UI updates
#[derive(Default)]
struct Panel {
    updates: Vec<String>,
}

impl Ui for Panel {
    fn set_item(&mut self, key: &str, _item: Box<dyn DictItem>) -> Result<(), PluginError> {
        self.updates.push(key.to_string());
        Ok(())
    }
}

impl Plugin for Panel {
    fn name(&self) -> &str {
        "Panel"
    }

    fn attributes(&self) -> Vec<String> {
        vec![ATTR_UI.to_string()]
    }

    fn as_ui(&mut self) -> Option<&mut dyn Ui> {
        Some(self)
    }
}

fn registry_with_sensor() -> PluginRegistry {
    let mut registry = PluginRegistry::with_builtins();
    registry.load_static(Box::new(Luminance::default()), None);
    registry.load_static(Box::new(FixedSensor), None);
    registry.load_static(Box::new(Panel::default()), None);
    registry
}

#[test]
fn dependency_loaded_after_dependent_is_resolved() {
    let mut registry = registry_with_sensor();
    assert_eq!(registry.bring_up(), 5);

    assert_eq!(registry.query_by_attribute(ATTR_SENSOR).len(), 1);
    let luminance = registry.runnable_by_name("Luminance").unwrap();
    assert_eq!(luminance.state(), LifecycleState::Runnable);
}

#[test]
fn configured_chain_measures_and_archives() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("archive.xml");

    let mut registry = registry_with_sensor();
    registry.bring_up();

    let mut measure = ChainConfig::new("measure", "calibrate");
    measure.plugins = vec![
        "Panel".to_string(),
        "Luminance".to_string(),
        "DataSavior".to_string(),
    ];
    let config = LumenConfig {
        chains: vec![measure],
        ..Default::default()
    };
    let chains = config.build_chains(&registry).unwrap();
    let chain = &chains[0];

    {
        let dict = chain.dict().unwrap();
        let mut dict = write(&dict);
        dict.set_string(RECORD_NAME_KEY, "white");
        dict.set_string_array(RECORD_KEYS_KEY, vec!["Luminance::Y".to_string()]);
        dict.set_string(SAVE_FILE_KEY, archive.to_string_lossy());
    }
    chain.run().unwrap();
    assert!(archive.exists());

    // A second registry reads the archive back, record type included.
    let mut restored = PluginRegistry::with_builtins();
    restored.bring_up();
    let load = ChainConfig {
        plugins: vec!["DataSavior".to_string()],
        ..ChainConfig::new("restore", "restored")
    };
    let chain = load.build(&restored).unwrap();
    write(&chain.dict().unwrap()).set_string(LOAD_FILE_KEY, archive.to_string_lossy());
    chain.run().unwrap();

    let dict = chain.dict().unwrap();
    let dict = read(&dict);
    assert_eq!(dict.get_double("Luminance::Y"), Some(100.0));
    let record = dict.get_as::<CalibRecordItem>("white").unwrap();
    assert_eq!(record.data.get_double("Luminance::Y"), Some(100.0));
}

/// Plugin-defined item type, registered with the plugin that owns it
#[derive(Debug, Clone, Default)]
struct Tint(StringItem);

impl DictItem for Tint {
    fn item_type(&self) -> &str {
        "Tint"
    }

    fn serialize(&self, parent: &mut XmlElement) -> Result<(), DictError> {
        self.0.serialize(parent)
    }

    fn unserialize(&mut self, node: &XmlElement) -> Result<(), DictError> {
        self.0.unserialize(node)
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

struct TintFactory;

impl ItemFactory for TintFactory {
    fn create_item(&self, item_type: &str) -> Option<Box<dyn DictItem>> {
        (item_type == "Tint").then(|| Box::new(Tint::default()) as Box<dyn DictItem>)
    }
}

struct Tinter;

impl Plugin for Tinter {
    fn name(&self) -> &str {
        "Tinter"
    }
}

fn registry_with_tint() -> PluginRegistry {
    let mut registry = PluginRegistry::with_builtins();
    registry.load_static(Box::new(Tinter), Some(Arc::new(TintFactory)));
    registry.bring_up();
    registry
}

#[test]
fn record_keeps_plugin_item_types_across_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tinted.xml");

    let registry = registry_with_tint();
    let save = ChainConfig {
        plugins: vec!["DataSavior".to_string()],
        ..ChainConfig::new("save", "calibrate")
    };
    let chain = save.build(&registry).unwrap();
    {
        let dict = chain.dict().unwrap();
        let mut dict = write(&dict);
        dict.set("Tint::hue", Box::new(Tint(StringItem::from("warm"))));
        dict.set_string(RECORD_NAME_KEY, "rec");
        dict.set_string_array(RECORD_KEYS_KEY, vec!["Tint::hue".to_string()]);
        dict.set_string(SAVE_FILE_KEY, path.to_string_lossy());
    }
    chain.run().unwrap();

    let restored = registry_with_tint();
    let load = ChainConfig {
        plugins: vec!["DataSavior".to_string()],
        ..ChainConfig::new("load", "restored")
    };
    let chain = load.build(&restored).unwrap();
    write(&chain.dict().unwrap()).set_string(LOAD_FILE_KEY, path.to_string_lossy());
    chain.run().unwrap();

    let dict = chain.dict().unwrap();
    let dict = read(&dict);
    assert_eq!(dict.get_as::<Tint>("Tint::hue").unwrap().0.value, "warm");
    let record = dict.get_as::<CalibRecordItem>("rec").unwrap();
    assert_eq!(record.data.len(), 1);
    assert_eq!(record.data.get_as::<Tint>("Tint::hue").unwrap().0.value, "warm");
}

#[test]
fn dict_hash_copies_between_chains() {
    let mut registry = PluginRegistry::with_builtins();
    registry.bring_up();

    let mut chain = registry.new_chain("copy", "calibrate");
    chain
        .append(registry.runnable_by_name("DictHash").unwrap())
        .unwrap();
    {
        let dict = chain.dict().unwrap();
        let mut dict = write(&dict);
        dict.set_double("Gamma::value", 2.2);
        dict.set_string(TARGET_DICT_KEY, "profile");
        dict.set_string_array(COPY_KEYS_KEY, vec!["Gamma::value".to_string()]);
    }
    chain.run().unwrap();

    let profile = registry.dict_hash().get_dict("profile").unwrap();
    assert_eq!(read(&profile).get_double("Gamma::value"), Some(2.2));
    assert!(Arc::ptr_eq(
        &registry.dict_hash().new_dict("profile"),
        &profile
    ));
}
