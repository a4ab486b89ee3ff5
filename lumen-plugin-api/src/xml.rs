//! Minimal XML element tree used as the serialization medium for dicts.
//!
//! Items append their value to a parent [`XmlElement`] and read it back from
//! the same node, so the tree plays the role of the document handed to
//! `serialize`/`unserialize`. Reading and writing go through `quick-xml`.

use std::borrow::Cow;
use std::io::Write;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::DictError;

/// A node inside an element: either a child element or character data
#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// An XML element with ordered attributes and children
#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

fn xml_err(e: impl std::fmt::Display) -> DictError {
    DictError::Xml(e.to_string())
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Set an attribute, replacing an existing one with the same key
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.children.push(XmlNode::Text(text));
        }
    }

    /// Append a child element and return a mutable reference to it
    pub fn push_child(&mut self, child: XmlElement) -> &mut XmlElement {
        self.children.push(XmlNode::Element(child));
        match self.children.last_mut() {
            Some(XmlNode::Element(el)) => el,
            _ => unreachable!("element was just pushed"),
        }
    }

    /// Concatenated character data of the direct text children
    pub fn text(&self) -> Cow<'_, str> {
        let mut texts = self.children.iter().filter_map(|c| match c {
            XmlNode::Text(t) => Some(t.as_str()),
            XmlNode::Element(_) => None,
        });
        match (texts.next(), texts.next()) {
            (None, _) => Cow::Borrowed(""),
            (Some(first), None) => Cow::Borrowed(first),
            (Some(first), Some(second)) => {
                let mut joined = format!("{first}{second}");
                joined.extend(texts);
                Cow::Owned(joined)
            }
        }
    }

    /// Iterate over the direct child elements
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|c| match c {
            XmlNode::Element(el) => Some(el),
            XmlNode::Text(_) => None,
        })
    }

    /// Parse a document and return its root element
    pub fn parse(xml: &str) -> Result<Self, DictError> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader.read_event().map_err(xml_err)? {
                Event::Start(e) => stack.push(element_from_start(&e)?),
                Event::Empty(e) => {
                    let el = element_from_start(&e)?;
                    attach(&mut stack, &mut root, el)?;
                }
                Event::End(_) => {
                    let mut el = stack
                        .pop()
                        .ok_or_else(|| DictError::Xml("unbalanced end tag".into()))?;
                    drop_layout_whitespace(&mut el);
                    attach(&mut stack, &mut root, el)?;
                }
                Event::Text(t) => {
                    if let Some(top) = stack.last_mut() {
                        let text = t.unescape().map_err(xml_err)?;
                        top.push_text(text.into_owned());
                    }
                }
                Event::CData(c) => {
                    if let Some(top) = stack.last_mut() {
                        top.push_text(String::from_utf8_lossy(&c.into_inner()).into_owned());
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(DictError::Xml("unexpected end of document".into()));
        }
        root.ok_or_else(|| DictError::Xml("document has no root element".into()))
    }

    /// Render this element as an indented document with an XML declaration
    pub fn to_xml_string(&self) -> Result<String, DictError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_err)?;
        write_element(&mut writer, self)?;
        String::from_utf8(writer.into_inner()).map_err(xml_err)
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<XmlElement, DictError> {
    let mut el = XmlElement::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attr in start.attributes() {
        let attr = attr.map_err(xml_err)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(xml_err)?.into_owned();
        el.attributes.push((key, value));
    }
    Ok(el)
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    el: XmlElement,
) -> Result<(), DictError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(XmlNode::Element(el));
        Ok(())
    } else if root.is_none() {
        *root = Some(el);
        Ok(())
    } else {
        Err(DictError::Xml("document has more than one root element".into()))
    }
}

// Indentation between child elements is not content.
fn drop_layout_whitespace(el: &mut XmlElement) {
    let has_elements = el.children.iter().any(|c| matches!(c, XmlNode::Element(_)));
    if has_elements {
        el.children
            .retain(|c| !matches!(c, XmlNode::Text(t) if t.trim().is_empty()));
    }
}

fn write_element<W: Write>(writer: &mut Writer<W>, el: &XmlElement) -> Result<(), DictError> {
    let mut start = BytesStart::new(el.name.as_str());
    for (key, value) in &el.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if el.children.is_empty() {
        writer.write_event(Event::Empty(start)).map_err(xml_err)?;
        return Ok(());
    }

    writer.write_event(Event::Start(start)).map_err(xml_err)?;
    for child in &el.children {
        match child {
            XmlNode::Element(c) => write_element(writer, c)?,
            XmlNode::Text(t) => writer
                .write_event(Event::Text(BytesText::new(t)))
                .map_err(xml_err)?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(el.name.as_str())))
        .map_err(xml_err)?;
    Ok(())
}
