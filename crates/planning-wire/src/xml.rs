//! Minimal XML element tree on top of quick-xml.
//!
//! Messages are small, so the payload is read into a tree of elements and
//! their text; attributes are not part of the format and are ignored.

use crate::error::{WireError, WireResult};
use chrono::{DateTime, Utc};
use planning_model::{parse_timestamp, Capacity};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct XmlNode {
    pub name: String,
    text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    /// Trimmed text content of this element.
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn has_child(&self, name: &str) -> bool {
        self.child(name).is_some()
    }

    /// Text of a child element, `None` when the element is absent.
    pub fn optional_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(XmlNode::text)
    }

    /// Text of a required child element; absent or blank is a schema violation.
    pub fn required_text(&self, name: &str) -> WireResult<&str> {
        match self.optional_text(name) {
            Some(text) if !text.is_empty() => Ok(text),
            _ => Err(WireError::missing(name)),
        }
    }

    pub fn required_timestamp(&self, name: &str) -> WireResult<DateTime<Utc>> {
        let text = self.required_text(name)?;
        parse_timestamp(text).map_err(|e| WireError::invalid(name, e))
    }

    pub fn required_capacity(&self, name: &str) -> WireResult<Capacity> {
        let text = self.required_text(name)?;
        Capacity::parse(text).map_err(|e| WireError::invalid(name, e))
    }

    /// Collects `<item><key>value</key></item>` children as a set.
    ///
    /// An item without a `key` child contributes its own text. Blank values
    /// are dropped and duplicates collapse.
    pub fn collect_set(&self, item: &str, key: &str) -> BTreeSet<String> {
        self.children
            .iter()
            .filter(|c| c.name == item)
            .map(|c| c.optional_text(key).unwrap_or_else(|| c.text()))
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn element_name(start: &BytesStart<'_>) -> WireResult<String> {
    std::str::from_utf8(start.name().as_ref())
        .map(str::to_string)
        .map_err(WireError::malformed)
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) -> WireResult<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
        return Ok(());
    }
    if root.is_some() {
        return Err(WireError::MalformedXml(
            "document has more than one root element".to_string(),
        ));
    }
    *root = Some(node);
    Ok(())
}

/// Parses a document into its root element.
pub(crate) fn parse(xml: &str) -> WireResult<XmlNode> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(XmlNode::new(element_name(&start)?)),
            Ok(Event::Empty(start)) => {
                let node = XmlNode::new(element_name(&start)?);
                attach(&mut stack, &mut root, node)?;
            }
            Ok(Event::Text(text)) => {
                let value = text.unescape().map_err(WireError::malformed)?;
                match stack.last_mut() {
                    Some(node) => node.text.push_str(&value),
                    None if value.trim().is_empty() => {}
                    None => {
                        return Err(WireError::MalformedXml(
                            "text outside of the root element".to_string(),
                        ))
                    }
                }
            }
            Ok(Event::CData(data)) => {
                let value =
                    String::from_utf8(data.into_inner().into_owned()).map_err(WireError::malformed)?;
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&value);
                }
            }
            Ok(Event::End(_)) => {
                let node = stack.pop().ok_or_else(|| {
                    WireError::MalformedXml("unexpected closing tag".to_string())
                })?;
                attach(&mut stack, &mut root, node)?;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(WireError::malformed(e)),
        }
    }

    if let Some(open) = stack.last() {
        return Err(WireError::MalformedXml(format!(
            "element <{}> is never closed",
            open.name
        )));
    }
    root.ok_or_else(|| WireError::MalformedXml("document is empty".to_string()))
}

/// Append-only XML writer producing indentation-free output.
pub(crate) struct XmlBuilder {
    out: String,
    open: Vec<&'static str>,
}

impl XmlBuilder {
    pub fn new(root: &'static str) -> Self {
        let mut builder = Self {
            out: String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#),
            open: Vec::new(),
        };
        builder.open(root);
        builder
    }

    pub fn open(&mut self, name: &'static str) -> &mut Self {
        self.out.push('<');
        self.out.push_str(name);
        self.out.push('>');
        self.open.push(name);
        self
    }

    pub fn close(&mut self) -> &mut Self {
        if let Some(name) = self.open.pop() {
            self.out.push_str("</");
            self.out.push_str(name);
            self.out.push('>');
        }
        self
    }

    pub fn leaf(&mut self, name: &'static str, value: &str) -> &mut Self {
        self.open(name);
        self.out.push_str(&escape(value));
        self.close()
    }

    /// Writes `<block><item><key>v</key></item>...</block>`.
    pub fn set(
        &mut self,
        block: &'static str,
        item: &'static str,
        key: &'static str,
        values: &BTreeSet<String>,
    ) -> &mut Self {
        self.open(block);
        for value in values {
            self.open(item).leaf(key, value).close();
        }
        self.close()
    }

    /// Closes every open element, the root included.
    pub fn finish(mut self) -> String {
        while !self.open.is_empty() {
            self.close();
        }
        self.out
    }
}
