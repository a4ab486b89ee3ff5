//! Simulated colorimeter

use std::thread;
use std::time::Duration;

use lumen_plugin_api::capability::ATTR_SENSOR;
use lumen_plugin_api::sync::{read, write};
use lumen_plugin_api::{CancellationToken, Measurement, Plugin, PluginChain, PluginError, Sensor};

use crate::xyz::XyzItem;

/// Chain dict key: luminance the simulated display emits, in cd/m²
pub const LUMINANCE_KEY: &str = "SimSensor::luminance";
/// Chain dict key: last reading
pub const READING_KEY: &str = "SimSensor::reading";

const D65: (f64, f64) = (0.3127, 0.3290);
const INTEGRATION_STEPS: u32 = 4;

/// Reports a D65 white at a configurable luminance
pub struct SimSensor {
    luminance: f64,
    integration: Duration,
}

impl Default for SimSensor {
    fn default() -> Self {
        Self {
            luminance: 120.0,
            integration: Duration::from_millis(20),
        }
    }
}

impl SimSensor {
    pub fn with_integration(integration: Duration) -> Self {
        Self {
            integration,
            ..Self::default()
        }
    }
}

impl Sensor for SimSensor {
    fn measure(&mut self, cancel: &CancellationToken) -> Result<Measurement, PluginError> {
        let step = self.integration / INTEGRATION_STEPS;
        for _ in 0..INTEGRATION_STEPS {
            if cancel.is_cancelled() {
                return Err(PluginError::Cancelled);
            }
            thread::sleep(step);
        }

        let (x, y) = D65;
        let big_y = self.luminance;
        Ok(Measurement {
            x: x * big_y / y,
            y: big_y,
            z: (1.0 - x - y) * big_y / y,
        })
    }
}

impl Plugin for SimSensor {
    fn name(&self) -> &str {
        "SimSensor"
    }

    fn attributes(&self) -> Vec<String> {
        vec![ATTR_SENSOR.to_string()]
    }

    fn pre_run(&mut self, chain: &PluginChain) -> Result<(), PluginError> {
        if let Some(dict) = chain.dict()
            && let Some(luminance) = read(&dict).get_double(LUMINANCE_KEY)
        {
            if luminance < 0.0 {
                return Err(PluginError::config(format!(
                    "{LUMINANCE_KEY} must not be negative"
                )));
            }
            self.luminance = luminance;
        }
        Ok(())
    }

    fn run(&mut self, chain: &PluginChain) -> Result<(), PluginError> {
        let reading = self.measure(&chain.cancel_token())?;
        tracing::debug!(chain = %chain.name(), y = reading.y, "Simulated reading");

        if let Some(dict) = chain.dict() {
            write(&dict).set(READING_KEY, Box::new(XyzItem::new(reading)));
        }
        Ok(())
    }

    fn as_sensor(&mut self) -> Option<&mut dyn Sensor> {
        Some(self)
    }
}
