//! White point of the display, read through whichever sensor is available

use lumen_plugin_api::capability::ATTR_SENSOR;
use lumen_plugin_api::sync::write;
use lumen_plugin_api::{Dependencies, Plugin, PluginChain, PluginError, PluginLookup};

use crate::xyz::XyzItem;

/// Chain dict key: measured white as an `Xyz` item
pub const XYZ_KEY: &str = "WhitePoint::xyz";
/// Chain dict key: measured white as `[x, y]` chromaticity
pub const CHROMATICITY_KEY: &str = "WhitePoint::xy";

#[derive(Default)]
pub struct WhitePoint {
    /// Sensor chosen at bring-up, looked up again on every run
    sensor: Option<String>,
}

impl Plugin for WhitePoint {
    fn name(&self) -> &str {
        "WhitePoint"
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
        let reading = sensor.invoke(|p| match p.as_sensor() {
            Some(s) => s.measure(&cancel),
            None => Err(PluginError::missing_dependency(ATTR_SENSOR)),
        })?;
        let (x, y) = reading
            .chromaticity()
            .ok_or_else(|| PluginError::Hardware("no light on the sensor".into()))?;

        tracing::info!(chain = %chain.name(), sensor = %sensor.name(), x, y, "Measured white point");
        chain.set_ui_string("WhitePoint::status", &format!("x={x:.4} y={y:.4}"));

        let dict = chain
            .dict()
            .ok_or_else(|| PluginError::config(format!("no dict '{}'", chain.dict_name())))?;
        let mut dict = write(&dict);
        dict.set(XYZ_KEY, Box::new(XyzItem::new(reading)));
        dict.set(
            CHROMATICITY_KEY,
            Box::new(lumen_plugin_api::item::DoubleArrayItem::new(vec![x, y])),
        );
        Ok(())
    }
}
