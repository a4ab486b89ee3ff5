//! `Xyz` dict item

use std::any::Any;
use std::ffi::c_char;

use lumen_plugin_api::capability::Measurement;
use lumen_plugin_api::descriptor::{export_item, item_type_arg, null_item};
use lumen_plugin_api::xml::XmlElement;
use lumen_plugin_api::{DictError, DictItem};

pub const XYZ_TYPE: &str = "Xyz";

const AXES: [&str; 3] = ["x", "y", "z"];

/// One tristimulus reading stored in a dict
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct XyzItem {
    pub value: Measurement,
}

impl XyzItem {
    pub fn new(value: Measurement) -> Self {
        Self { value }
    }

    fn axes(&self) -> [f64; 3] {
        [self.value.x, self.value.y, self.value.z]
    }
}

impl DictItem for XyzItem {
    fn item_type(&self) -> &str {
        XYZ_TYPE
    }

    fn serialize(&self, parent: &mut XmlElement) -> Result<(), DictError> {
        for (axis, value) in AXES.iter().zip(self.axes()) {
            parent
                .push_child(XmlElement::new(*axis))
                .push_text(value.to_string());
        }
        Ok(())
    }

    fn unserialize(&mut self, node: &XmlElement) -> Result<(), DictError> {
        let mut values = [0.0; 3];
        for (slot, axis) in values.iter_mut().zip(AXES) {
            let text = node
                .elements()
                .find(|el| el.name == axis)
                .map(|el| el.text().into_owned())
                .ok_or_else(|| DictError::invalid(XYZ_TYPE, format!("missing <{axis}>")))?;
            *slot = text
                .trim()
                .parse()
                .map_err(|_| DictError::invalid(XYZ_TYPE, text.clone()))?;
        }
        let [x, y, z] = values;
        self.value = Measurement { x, y, z };
        Ok(())
    }

    fn clone_item(&self) -> Box<dyn DictItem> {
        Box::new(*self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Item factory exported to the host
pub extern "C" fn create_item(item_type: *const c_char) -> *mut dyn DictItem {
    match unsafe { item_type_arg(item_type) } {
        Some(XYZ_TYPE) => export_item(Box::new(XyzItem::default())),
        _ => null_item(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_plugin_api::Dict;
    use lumen_plugin_api::descriptor::destroy_item;
    use lumen_plugin_api::dict::ItemFactory;
    use std::ffi::CString;
    use std::sync::Arc;

    struct Local;

    impl ItemFactory for Local {
        fn create_item(&self, item_type: &str) -> Option<Box<dyn DictItem>> {
            (item_type == XYZ_TYPE).then(|| Box::new(XyzItem::default()) as Box<dyn DictItem>)
        }
    }

    #[test]
    fn test_xyz_survives_dict_file_format() {
        let mut dict = Dict::new();
        dict.set(
            "WhitePoint::xyz",
            Box::new(XyzItem::new(Measurement {
                x: 95.047,
                y: 100.0,
                z: 108.883,
            })),
        );
        let xml = dict.to_xml_string().unwrap();

        let restored = Dict::from_xml_str(&xml, Some(Arc::new(Local))).unwrap();
        let item = restored.get_as::<XyzItem>("WhitePoint::xyz").unwrap();
        assert_eq!(item.value.z, 108.883);
    }

    #[test]
    fn test_unserialize_rejects_missing_axis() {
        let node = XmlElement::parse("<item><x>1</x><y>2</y></item>").unwrap();
        let mut item = XyzItem::default();
        assert!(item.unserialize(&node).is_err());
    }

    #[test]
    fn test_exported_factory() {
        let tag = CString::new(XYZ_TYPE).unwrap();
        let raw = create_item(tag.as_ptr());
        assert!(!raw.is_null());
        assert_eq!(unsafe { &*raw }.item_type(), XYZ_TYPE);
        destroy_item(raw);

        let other = CString::new("double").unwrap();
        assert!(create_item(other.as_ptr()).is_null());
        assert!(create_item(std::ptr::null()).is_null());
    }
}
