//! Typed value cells stored in a [`Dict`](crate::Dict)
//!
//! Every item reports a stable type tag through [`DictItem::item_type`]. The
//! tag is written next to the value when a dict is serialized and is used to
//! pick a factory when it is read back, so it must never change for a type.

use std::any::Any;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::DictError;
use crate::xml::XmlElement;

pub const BOOL_TYPE: &str = "bool";
pub const INT_TYPE: &str = "int";
pub const DOUBLE_TYPE: &str = "double";
pub const STRING_TYPE: &str = "string";
pub const BLOB_TYPE: &str = "blob";
pub const INT_ARRAY_TYPE: &str = "intArray";
pub const DOUBLE_ARRAY_TYPE: &str = "doubleArray";
pub const STRING_ARRAY_TYPE: &str = "stringArray";

/// Element name used for each value of an array item
const VALUE_TAG: &str = "value";

/// A typed, optionally serializable value cell.
///
/// `serialize` appends this item's value to `parent` and fails only when the
/// value cannot be written. `unserialize` reads a node produced by
/// `serialize`; on error the item's value is unspecified and the caller
/// should discard it.
pub trait DictItem: Send + Sync + 'static {
    /// Stable type tag, also the key into the item factory table
    fn item_type(&self) -> &str;

    /// Whether this item is written when its dict is serialized
    fn serializable(&self) -> bool {
        true
    }

    fn serialize(&self, parent: &mut XmlElement) -> Result<(), DictError>;

    fn unserialize(&mut self, node: &XmlElement) -> Result<(), DictError>;

    /// Deep copy, allocated by the code that defines the item type
    fn clone_item(&self) -> Box<dyn DictItem>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<'a> dyn DictItem + 'a {
    /// Downcast to a concrete item type
    pub fn downcast_ref<T: DictItem>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: DictItem>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// Create a blank built-in item for a type tag
pub fn builtin_item(item_type: &str) -> Option<Box<dyn DictItem>> {
    let item: Box<dyn DictItem> = match item_type {
        BOOL_TYPE => Box::new(BoolItem::default()),
        INT_TYPE => Box::new(IntItem::default()),
        DOUBLE_TYPE => Box::new(DoubleItem::default()),
        STRING_TYPE => Box::new(StringItem::default()),
        BLOB_TYPE => Box::new(BlobItem::default()),
        INT_ARRAY_TYPE => Box::new(IntArrayItem::default()),
        DOUBLE_ARRAY_TYPE => Box::new(DoubleArrayItem::default()),
        STRING_ARRAY_TYPE => Box::new(StringArrayItem::default()),
        _ => return None,
    };
    Some(item)
}

macro_rules! item_boilerplate {
    () => {
        fn clone_item(&self) -> Box<dyn DictItem> {
            Box::new(self.clone())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    };
}

macro_rules! scalar_item {
    ($(#[$meta:meta])* $name:ident, $ty:ty, $tag:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $name {
            pub value: $ty,
            pub transient: bool,
        }

        impl $name {
            pub fn new(value: $ty) -> Self {
                Self {
                    value,
                    transient: false,
                }
            }

            /// An item that is kept in memory but never serialized
            pub fn transient(value: $ty) -> Self {
                Self {
                    value,
                    transient: true,
                }
            }
        }

        impl From<$ty> for $name {
            fn from(value: $ty) -> Self {
                Self::new(value)
            }
        }

        impl DictItem for $name {
            fn item_type(&self) -> &str {
                $tag
            }

            fn serializable(&self) -> bool {
                !self.transient
            }

            fn serialize(&self, parent: &mut XmlElement) -> Result<(), DictError> {
                parent.push_text(format_scalar(&self.value));
                Ok(())
            }

            fn unserialize(&mut self, node: &XmlElement) -> Result<(), DictError> {
                self.value = parse_scalar(&node.text(), $tag)?;
                Ok(())
            }

            item_boilerplate!();
        }
    };
}

macro_rules! array_item {
    ($(#[$meta:meta])* $name:ident, $ty:ty, $tag:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $name {
            pub values: Vec<$ty>,
        }

        impl $name {
            pub fn new(values: Vec<$ty>) -> Self {
                Self { values }
            }
        }

        impl From<Vec<$ty>> for $name {
            fn from(values: Vec<$ty>) -> Self {
                Self::new(values)
            }
        }

        impl DictItem for $name {
            fn item_type(&self) -> &str {
                $tag
            }

            fn serialize(&self, parent: &mut XmlElement) -> Result<(), DictError> {
                for value in &self.values {
                    parent
                        .push_child(XmlElement::new(VALUE_TAG))
                        .push_text(format_scalar(value));
                }
                Ok(())
            }

            fn unserialize(&mut self, node: &XmlElement) -> Result<(), DictError> {
                self.values = node
                    .elements()
                    .filter(|el| el.name == VALUE_TAG)
                    .map(|el| parse_scalar(&el.text(), $tag))
                    .collect::<Result<Vec<$ty>, DictError>>()?;
                Ok(())
            }

            item_boilerplate!();
        }
    };
}

/// Conversion between scalar values and their text form
trait Scalar: Sized {
    fn to_text(&self) -> String;
    fn from_text(text: &str) -> Option<Self>;
}

impl Scalar for bool {
    fn to_text(&self) -> String {
        (if *self { "1" } else { "0" }).to_string()
    }

    fn from_text(text: &str) -> Option<Self> {
        match text.trim() {
            "1" => Some(true),
            "0" => Some(false),
            _ => None,
        }
    }
}

impl Scalar for i32 {
    fn to_text(&self) -> String {
        self.to_string()
    }

    fn from_text(text: &str) -> Option<Self> {
        text.trim().parse().ok()
    }
}

// `Display` for f64 prints the shortest string that parses back to the same bits.
impl Scalar for f64 {
    fn to_text(&self) -> String {
        self.to_string()
    }

    fn from_text(text: &str) -> Option<Self> {
        text.trim().parse().ok()
    }
}

impl Scalar for String {
    fn to_text(&self) -> String {
        self.clone()
    }

    fn from_text(text: &str) -> Option<Self> {
        Some(text.to_string())
    }
}

fn format_scalar<T: Scalar>(value: &T) -> String {
    value.to_text()
}

fn parse_scalar<T: Scalar>(text: &str, item_type: &str) -> Result<T, DictError> {
    T::from_text(text).ok_or_else(|| DictError::invalid(item_type, text))
}

scalar_item!(
    /// Boolean, written as `0` or `1`
    BoolItem,
    bool,
    BOOL_TYPE
);
scalar_item!(
    /// 32-bit signed integer
    IntItem,
    i32,
    INT_TYPE
);
scalar_item!(
    /// Double precision float
    DoubleItem,
    f64,
    DOUBLE_TYPE
);
scalar_item!(StringItem, String, STRING_TYPE);

array_item!(IntArrayItem, i32, INT_ARRAY_TYPE);
array_item!(DoubleArrayItem, f64, DOUBLE_ARRAY_TYPE);
array_item!(StringArrayItem, String, STRING_ARRAY_TYPE);

impl From<&str> for StringItem {
    fn from(value: &str) -> Self {
        Self::new(value.to_string())
    }
}

/// Opaque byte buffer, written as base64 text.
///
/// `set` copies the caller's bytes into a buffer owned by the item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlobItem {
    data: Vec<u8>,
}

impl BlobItem {
    pub fn new(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    pub fn set(&mut self, data: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(data);
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl DictItem for BlobItem {
    fn item_type(&self) -> &str {
        BLOB_TYPE
    }

    fn serialize(&self, parent: &mut XmlElement) -> Result<(), DictError> {
        parent.push_text(BASE64.encode(&self.data));
        Ok(())
    }

    fn unserialize(&mut self, node: &XmlElement) -> Result<(), DictError> {
        let text = node.text();
        self.data = BASE64
            .decode(text.trim())
            .map_err(|_| DictError::invalid(BLOB_TYPE, text.as_ref()))?;
        Ok(())
    }

    item_boilerplate!();
}
