//! Demo lumen module
//!
//! Exports a simulated colorimeter, a white point plugin that depends on any
//! `Sensor`, and the `Xyz` dict item type they exchange.

mod sensor;
mod white_point;
mod xyz;

pub use sensor::{LUMINANCE_KEY, READING_KEY, SimSensor};
pub use white_point::{CHROMATICITY_KEY, WhitePoint, XYZ_KEY};
pub use xyz::{XYZ_TYPE, XyzItem, create_item};

lumen_plugin_api::export_plugins!(
    items = (create_item, lumen_plugin_api::descriptor::destroy_item);
    c"SimSensor" => SimSensor,
    c"WhitePoint" => WhitePoint,
);
