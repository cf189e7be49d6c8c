//! Stateless XML node factory and document rendering.
//!
//! Contract documents are assembled as plain [`Element`] trees and rendered
//! in one pass with quick-xml: two-space indentation, CRLF line endings.

use std::borrow::Cow;

use quick_xml::escape::escape;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::dialect::ns;
use crate::error::{Result, XRoadError};

/// Namespace-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    pub namespace: String,
    pub local: String,
}

impl QName {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }

    /// Name in the XML Schema namespace.
    pub fn xsd(local: impl Into<String>) -> Self {
        Self::new(ns::XSD, local)
    }
}

/// Child of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An element with a prefixed name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn attr_opt(self, key: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.attr(key, value),
            None => self,
        }
    }

    /// Sets an attribute, replacing an existing one of the same name.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn get_attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(mut self, child: Element) -> Self {
        self.push(child);
        self
    }

    pub fn children<I>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = Element>,
    {
        self.children
            .extend(children.into_iter().map(Node::Element));
        self
    }

    pub fn child_opt(self, child: Option<Element>) -> Self {
        match child {
            Some(child) => self.child(child),
            None => self,
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Element children, skipping text.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    fn write<W: std::io::Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            let escaped = escape_multiline(value);
            start.push_attribute(Attribute {
                key: quick_xml::name::QName(key.as_bytes()),
                value: Cow::Borrowed(escaped.as_bytes()),
            });
        }

        if self.children.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }

        writer.write_event(Event::Start(start))?;
        for child in &self.children {
            match child {
                Node::Element(e) => e.write(writer)?,
                Node::Text(t) => {
                    let escaped = escape_multiline(t);
                    writer.write_event(Event::Text(BytesText::from_escaped(&*escaped)))?;
                }
            }
        }
        writer.write_event(Event::End(BytesEnd::new(self.name.as_str())))?;
        Ok(())
    }
}

/// Escapes markup characters and line breaks so rendering stays line stable.
fn escape_multiline(s: &str) -> Cow<'_, str> {
    let escaped = escape(s);
    if escaped.contains(['\n', '\r']) {
        Cow::Owned(escaped.replace('\r', "&#xD;").replace('\n', "&#xA;"))
    } else {
        escaped
    }
}

/// Renders a document: declaration, leading comments, then the root element.
pub fn render(comments: &[String], root: &Element) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    for comment in comments {
        let text = format!(" {} ", comment.replace("--", "- -"));
        writer.write_event(Event::Comment(BytesText::from_escaped(text.as_str())))?;
    }

    root.write(&mut writer)?;

    let rendered = String::from_utf8(writer.into_inner())
        .map_err(|e| XRoadError::XmlParse(format!("Invalid UTF-8 output: {}", e)))?;
    Ok(rendered.replace('\n', "\r\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_indent_and_crlf() {
        let root = Element::new("a:root")
            .attr("xmlns:a", "urn:a")
            .child(Element::new("a:leaf").attr("name", "x"))
            .child(Element::new("a:text").text("hello"));
        let out = render(&["generated".to_string()], &root).unwrap();

        assert!(out.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>\r\n<!-- generated -->\r\n"));
        assert!(out.contains("\r\n  <a:leaf name=\"x\"/>\r\n"));
        assert!(out.contains("<a:text>hello</a:text>"));
        assert!(!out.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn test_text_newlines_escaped() {
        let root = Element::new("t").text("a<b\nc").attr("v", "1&2");
        let out = render(&[], &root).unwrap();
        assert!(out.contains("<t v=\"1&amp;2\">a&lt;b&#xA;c</t>"));
    }

    #[test]
    fn test_set_attr_replaces() {
        let mut e = Element::new("e").attr("k", "1");
        e.set_attr("k", "2");
        assert_eq!(e.attributes.len(), 1);
        assert_eq!(e.get_attr("k"), Some("2"));
    }
}
