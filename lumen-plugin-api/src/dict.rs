//! Dict - insertion-ordered, string-keyed store of owned [`DictItem`]s

use std::path::Path;
use std::sync::Arc;

use crate::error::{DictError, PluginError};
use crate::item::{
    BoolItem, DictItem, DoubleArrayItem, DoubleItem, IntArrayItem, IntItem, StringArrayItem,
    StringItem, builtin_item,
};
use crate::xml::XmlElement;

pub const DICT_TAG: &str = "dict";
pub const ITEM_TAG: &str = "item";
pub const KEY_ATTR: &str = "key";
pub const TYPE_ATTR: &str = "type";

/// Builds blank items by type tag during deserialization.
///
/// The registry implements this over every loaded module's factory.
pub trait ItemFactory: Send + Sync {
    fn create_item(&self, item_type: &str) -> Option<Box<dyn DictItem>>;
}

/// Insertion-ordered mapping from key to an owned item.
///
/// Keys follow the `PluginName::settingName` convention when plugins publish
/// values for each other, but nothing enforces it.
#[derive(Default)]
pub struct Dict {
    entries: Vec<(String, Box<dyn DictItem>)>,
    factory: Option<Arc<dyn ItemFactory>>,
}

impl std::fmt::Debug for Dict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, v.item_type())))
            .finish()
    }
}

impl Clone for Dict {
    /// Deep copy through [`DictItem::clone_item`]
    fn clone(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone_item()))
                .collect(),
            factory: self.factory.clone(),
        }
    }
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dict that resolves unknown item types through `factory`
    pub fn with_factory(factory: Arc<dyn ItemFactory>) -> Self {
        Self {
            entries: Vec::new(),
            factory: Some(factory),
        }
    }

    pub fn set_factory(&mut self, factory: Option<Arc<dyn ItemFactory>>) {
        self.factory = factory;
    }

    pub fn factory(&self) -> Option<&Arc<dyn ItemFactory>> {
        self.factory.as_ref()
    }

    /// Store `item` under `key`, dropping any previous item at that key.
    ///
    /// An existing key keeps its position.
    pub fn set(&mut self, key: impl Into<String>, item: Box<dyn DictItem>) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = item,
            None => self.entries.push((key, item)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&dyn DictItem> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_ref())
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut (dyn DictItem + 'static)> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_mut())
    }

    /// Look up `key` and downcast it to `T`
    pub fn get_as<T: DictItem>(&self, key: &str) -> Option<&T> {
        self.get(key).and_then(|item| item.downcast_ref::<T>())
    }

    /// Like [`Dict::get_as`] but distinguishes a missing key from a wrong type
    pub fn require<T: DictItem + Default>(&self, key: &str) -> Result<&T, PluginError> {
        let item = self
            .get(key)
            .ok_or_else(|| PluginError::MissingKey(key.to_string()))?;
        item.downcast_ref::<T>()
            .ok_or_else(|| PluginError::TypeMismatch {
                key: key.to_string(),
                expected: T::default().item_type().to_string(),
                found: item.item_type().to_string(),
            })
    }

    /// Remove and drop the item at `key`. Returns false if absent.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.iter().position(|(k, _)| k == key) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove the item at `key` and hand ownership to the caller
    pub fn take(&mut self, key: &str) -> Option<Box<dyn DictItem>> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn DictItem)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    // ─── Typed accessors ─────────────────────────────────────────────

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_as::<BoolItem>(key).map(|i| i.value)
    }

    pub fn get_int(&self, key: &str) -> Option<i32> {
        self.get_as::<IntItem>(key).map(|i| i.value)
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        self.get_as::<DoubleItem>(key).map(|i| i.value)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get_as::<StringItem>(key).map(|i| i.value.as_str())
    }

    pub fn get_int_array(&self, key: &str) -> Option<&[i32]> {
        self.get_as::<IntArrayItem>(key).map(|i| i.values.as_slice())
    }

    pub fn get_double_array(&self, key: &str) -> Option<&[f64]> {
        self.get_as::<DoubleArrayItem>(key)
            .map(|i| i.values.as_slice())
    }

    pub fn get_string_array(&self, key: &str) -> Option<&[String]> {
        self.get_as::<StringArrayItem>(key)
            .map(|i| i.values.as_slice())
    }

    pub fn set_bool(&mut self, key: impl Into<String>, value: bool) {
        self.set(key, Box::new(BoolItem::new(value)));
    }

    pub fn set_int(&mut self, key: impl Into<String>, value: i32) {
        self.set(key, Box::new(IntItem::new(value)));
    }

    pub fn set_double(&mut self, key: impl Into<String>, value: f64) {
        self.set(key, Box::new(DoubleItem::new(value)));
    }

    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.set(key, Box::new(StringItem::new(value.into())));
    }

    pub fn set_string_array(&mut self, key: impl Into<String>, values: Vec<String>) {
        self.set(key, Box::new(StringArrayItem::new(values)));
    }

    // ─── Serialization ───────────────────────────────────────────────

    /// Build a blank item for `item_type`: built-ins first, then the bound factory
    pub fn create_item(&self, item_type: &str) -> Option<Box<dyn DictItem>> {
        builtin_item(item_type)
            .or_else(|| self.factory.as_ref().and_then(|f| f.create_item(item_type)))
    }

    /// Like [`Dict::create_item`], but an unresolvable type is an error
    pub fn new_item(&self, item_type: &str) -> Result<Box<dyn DictItem>, DictError> {
        self.create_item(item_type)
            .ok_or_else(|| DictError::UnknownType(item_type.to_string()))
    }

    /// Append a `<dict>` element holding every serializable entry to `parent`
    pub fn serialize(&self, parent: &mut XmlElement) -> Result<(), DictError> {
        let node = parent.push_child(XmlElement::new(DICT_TAG));
        self.serialize_entries(node)
    }

    /// Write every serializable entry as an `<item>` child of `node`
    pub fn serialize_entries(&self, node: &mut XmlElement) -> Result<(), DictError> {
        for (key, item) in self.entries.iter().filter(|(_, v)| v.serializable()) {
            let child = node.push_child(
                XmlElement::new(ITEM_TAG)
                    .with_attr(KEY_ATTR, key.as_str())
                    .with_attr(TYPE_ATTR, item.item_type()),
            );
            item.serialize(child)?;
        }
        Ok(())
    }

    /// Read the entries of a `<dict>` element into this dict.
    ///
    /// Entries are merged over existing keys. Entries with an unknown type,
    /// a missing key, or a value that does not parse are skipped with a
    /// warning and do not fail the load.
    pub fn unserialize(&mut self, node: &XmlElement) -> Result<(), DictError> {
        if node.name != DICT_TAG {
            return Err(DictError::UnexpectedElement {
                expected: DICT_TAG.to_string(),
                found: node.name.clone(),
            });
        }

        for child in node.elements().filter(|el| el.name == ITEM_TAG) {
            let (Some(key), Some(item_type)) = (child.attr(KEY_ATTR), child.attr(TYPE_ATTR))
            else {
                tracing::warn!(element = ?child.attributes, "Dict entry without key or type, skipping");
                continue;
            };

            let mut item = match self.new_item(item_type) {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!(key, error = %e, "Dict entry cannot be read, skipping");
                    continue;
                }
            };

            match item.unserialize(child) {
                Ok(()) => self.set(key, item),
                Err(e) => {
                    tracing::warn!(key, item_type, error = %e, "Invalid dict entry, skipping");
                }
            }
        }
        Ok(())
    }

    pub fn to_xml_string(&self) -> Result<String, DictError> {
        let mut root = XmlElement::new(DICT_TAG);
        self.serialize_entries(&mut root)?;
        root.to_xml_string()
    }

    /// Merge the entries of an XML document into this dict
    pub fn merge_xml_str(&mut self, xml: &str) -> Result<(), DictError> {
        let root = XmlElement::parse(xml)?;
        self.unserialize(&root)
    }

    /// Parse a standalone dict document
    pub fn from_xml_str(
        xml: &str,
        factory: Option<Arc<dyn ItemFactory>>,
    ) -> Result<Self, DictError> {
        let mut dict = Self::new();
        dict.set_factory(factory);
        dict.merge_xml_str(xml)?;
        Ok(dict)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), DictError> {
        let content = self.to_xml_string()?;

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty() && !p.exists()) {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn load_from_file(&mut self, path: &Path) -> Result<(), DictError> {
        let content = std::fs::read_to_string(path)?;
        self.merge_xml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{BlobItem, DoubleArrayItem};
    use crate::xml::XmlNode;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Item that counts how many times it is dropped
    #[derive(Clone)]
    struct Counted {
        drops: Arc<AtomicUsize>,
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl DictItem for Counted {
        fn item_type(&self) -> &str {
            "counted"
        }

        fn serialize(&self, _parent: &mut XmlElement) -> Result<(), DictError> {
            Ok(())
        }

        fn unserialize(&mut self, _node: &XmlElement) -> Result<(), DictError> {
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

    #[test]
    fn test_set_then_get_returns_same_item() {
        let mut dict = Dict::new();
        let item: Box<dyn DictItem> = Box::new(IntItem::new(7));
        let addr = std::ptr::from_ref(item.as_ref()).cast::<u8>();
        dict.set("Lut::size", item);

        let got = dict.get("Lut::size").unwrap();
        assert_eq!(std::ptr::from_ref(got).cast::<u8>(), addr);
        assert_eq!(dict.get_int("Lut::size"), Some(7));
    }

    #[test]
    fn test_overwrite_drops_previous_exactly_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut dict = Dict::new();

        dict.set("k", Box::new(Counted { drops: drops.clone() }));
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        dict.set("k", Box::new(Counted { drops: drops.clone() }));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(dict.len(), 1);

        assert!(dict.remove("k"));
        assert_eq!(drops.load(Ordering::SeqCst), 2);

        dict.set("a", Box::new(Counted { drops: drops.clone() }));
        dict.set("b", Box::new(Counted { drops: drops.clone() }));
        drop(dict);
        assert_eq!(drops.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_clone_is_deep() {
        let mut dict = Dict::new();
        dict.set_string("Lut::mode", "srgb");
        dict.set_double("Lut::gamma", 2.2);

        let mut copy = dict.clone();
        copy.set_double("Lut::gamma", 2.4);

        assert_eq!(dict.get_double("Lut::gamma"), Some(2.2));
        assert_eq!(copy.get_double("Lut::gamma"), Some(2.4));
        assert_eq!(copy.get_string("Lut::mode"), Some("srgb"));
    }

    #[test]
    fn test_remove_missing_key() {
        let mut dict = Dict::new();
        assert!(!dict.remove("nope"));
    }

    #[test]
    fn test_insertion_order_is_kept() {
        let mut dict = Dict::new();
        dict.set_int("c", 1);
        dict.set_int("a", 2);
        dict.set_int("b", 3);
        dict.set_int("a", 4);
        assert_eq!(dict.keys().collect::<Vec<_>>(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_require_reports_type_mismatch() {
        let mut dict = Dict::new();
        dict.set_string("Sensor::port", "usb0");

        assert!(matches!(
            dict.require::<IntItem>("Sensor::port"),
            Err(PluginError::TypeMismatch { .. })
        ));
        assert!(matches!(
            dict.require::<IntItem>("Sensor::missing"),
            Err(PluginError::MissingKey(_))
        ));
        assert_eq!(dict.require::<StringItem>("Sensor::port").unwrap().value, "usb0");
    }

    #[test]
    fn test_xml_round_trip_all_builtins() {
        let mut dict = Dict::new();
        dict.set_bool("b", true);
        dict.set_int("i", -3);
        dict.set_double("d", 2.2);
        dict.set_string("s", "hello");
        dict.set("blob", Box::new(BlobItem::new(b"\x00\xffabc")));
        dict.set("ia", Box::new(IntArrayItem::new(vec![1, 2])));
        dict.set("da", Box::new(DoubleArrayItem::new(vec![0.5, 1e-9])));
        dict.set_string_array("sa", vec!["x".into(), "y".into()]);

        let xml = dict.to_xml_string().unwrap();
        let mut back = Dict::new();
        back.merge_xml_str(&xml).unwrap();

        assert_eq!(back.keys().collect::<Vec<_>>(), dict.keys().collect::<Vec<_>>());
        assert_eq!(back.get_bool("b"), Some(true));
        assert_eq!(back.get_int("i"), Some(-3));
        assert_eq!(back.get_double("d"), Some(2.2));
        assert_eq!(back.get_string("s"), Some("hello"));
        assert_eq!(back.get_as::<BlobItem>("blob").unwrap().data(), b"\x00\xffabc");
        assert_eq!(back.get_int_array("ia"), Some(&[1, 2][..]));
        assert_eq!(back.get_double_array("da"), Some(&[0.5, 1e-9][..]));
        assert_eq!(
            back.get_string_array("sa"),
            Some(&["x".to_string(), "y".to_string()][..])
        );
    }

    #[test]
    fn test_transient_entries_not_written() {
        let mut dict = Dict::new();
        dict.set("kept", Box::new(IntItem::new(1)));
        dict.set("scratch", Box::new(IntItem::transient(2)));

        let xml = dict.to_xml_string().unwrap();
        assert!(xml.contains("kept"));
        assert!(!xml.contains("scratch"));
    }

    #[test]
    fn test_unknown_type_is_skipped() {
        let xml = r#"<dict>
            <item key="good" type="int">5</item>
            <item key="alien" type="Xyz"><x>1</x></item>
            <item key="bad" type="bool">maybe</item>
            <item type="int">9</item>
            <item key="after" type="string">ok</item>
        </dict>"#;

        let dict = Dict::from_xml_str(xml, None).unwrap();

        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get_int("good"), Some(5));
        assert_eq!(dict.get_string("after"), Some("ok"));
        assert!(dict.get("alien").is_none());
        assert!(dict.get("bad").is_none());
    }

    #[test]
    fn test_new_item_reports_unknown_type() {
        let dict = Dict::new();
        assert_eq!(dict.new_item("double").unwrap().item_type(), "double");
        let err = dict.new_item("Xyz").err().unwrap();
        assert!(matches!(&err, DictError::UnknownType(t) if t == "Xyz"));
        assert_eq!(err.to_string(), "Unknown item type: Xyz");
    }

    #[test]
    fn test_factory_resolves_user_types() {
        struct CountedFactory(Arc<AtomicUsize>);

        impl ItemFactory for CountedFactory {
            fn create_item(&self, item_type: &str) -> Option<Box<dyn DictItem>> {
                (item_type == "counted").then(|| {
                    Box::new(Counted {
                        drops: self.0.clone(),
                    }) as Box<dyn DictItem>
                })
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let mut dict = Dict::with_factory(Arc::new(CountedFactory(drops.clone())));
        dict.merge_xml_str(r#"<dict><item key="c" type="counted"/></dict>"#)
            .unwrap();

        assert_eq!(dict.get("c").unwrap().item_type(), "counted");
    }

    #[test]
    fn test_unserialize_rejects_wrong_root() {
        let mut dict = Dict::new();
        let node = XmlElement {
            name: "list".into(),
            attributes: vec![],
            children: vec![XmlNode::Text("x".into())],
        };
        assert!(matches!(
            dict.unserialize(&node),
            Err(DictError::UnexpectedElement { .. })
        ));
    }

    #[test]
    fn test_serialize_appends_dict_child() {
        let mut dict = Dict::new();
        dict.set_int("n", 1);
        let mut parent = XmlElement::new("record");
        dict.serialize(&mut parent).unwrap();

        let child = parent.elements().next().unwrap();
        assert_eq!(child.name, DICT_TAG);
        let item = child.elements().next().unwrap();
        assert_eq!(item.attr(KEY_ATTR), Some("n"));
        assert_eq!(item.attr(TYPE_ATTR), Some("int"));
    }

    #[test]
    fn test_file_save_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/profile.xml");

        let mut dict = Dict::new();
        dict.set_double("Lut::gamma", 2.4);
        dict.save_to_file(&path).unwrap();

        let mut loaded = Dict::new();
        loaded.load_from_file(&path).unwrap();
        assert_eq!(loaded.get_double("Lut::gamma"), Some(2.4));
    }
}
