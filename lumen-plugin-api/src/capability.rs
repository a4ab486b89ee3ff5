//! Capability attributes and the typed interfaces behind them.
//!
//! Plugins advertise capabilities as string attributes for discovery. Some
//! capabilities also come with a typed interface, reached through the
//! `as_*` accessors on [`Plugin`](crate::Plugin) after a query has found the
//! plugin. The device protocols behind [`Sensor`] and [`Ddc`] live in
//! external modules.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::PluginError;
use crate::item::DictItem;

/// Shows progress and values to the user
pub const ATTR_UI: &str = "Ui";
/// Measures light from the display
pub const ATTR_SENSOR: &str = "Sensor";
/// Controls the display over DDC/CI
pub const ATTR_DDC: &str = "Ddc";
/// Owns the named dict collection
pub const ATTR_DICT_HASH: &str = "DictHash";
/// Persists dicts to disk
pub const ATTR_PERSISTENCE: &str = "Persistence";

/// Receives typed key/value updates forwarded by a chain
pub trait Ui {
    fn set_item(&mut self, key: &str, item: Box<dyn DictItem>) -> Result<(), PluginError>;
}

/// CIE XYZ tristimulus reading
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Measurement {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Measurement {
    /// CIE xy chromaticity, `None` for a black reading
    pub fn chromaticity(&self) -> Option<(f64, f64)> {
        let sum = self.x + self.y + self.z;
        (sum > 0.0).then(|| (self.x / sum, self.y / sum))
    }
}

/// A colorimeter or spectrometer
pub trait Sensor {
    /// Take one reading. Long integrations should poll `cancel` and return
    /// [`PluginError::Cancelled`] once it fires.
    fn measure(&mut self, cancel: &CancellationToken) -> Result<Measurement, PluginError>;
}

/// Display control through VCP codes
pub trait Ddc {
    fn get_vcp(&mut self, code: u8) -> Result<u16, PluginError>;

    fn set_vcp(&mut self, code: u8, value: u16) -> Result<(), PluginError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chromaticity_of_d65_white() {
        let white = Measurement {
            x: 95.047,
            y: 100.0,
            z: 108.883,
        };
        let (x, y) = white.chromaticity().unwrap();
        assert!((x - 0.3127).abs() < 1e-3);
        assert!((y - 0.3290).abs() < 1e-3);
    }

    #[test]
    fn test_black_has_no_chromaticity() {
        assert!(Measurement::default().chromaticity().is_none());
    }
}
