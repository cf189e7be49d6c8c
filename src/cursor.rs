//! Forward-only reader over an inbound SOAP message.
//!
//! The cursor tracks element depth (`Envelope` is depth 0, `Body` depth 1,
//! the operation wrapper depth 2) and only ever moves forward. Small
//! subtrees such as one request element are materialized as [`Fragment`]s.

use std::io::Write;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use quick_xml::Writer;

use crate::dialect::ns;
use crate::error::{Result, XRoadError};

/// Attribute of a read element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    /// Qualified name as written
    pub name: String,
    pub local_name: String,
    pub namespace: Option<String>,
    pub value: String,
}

impl XmlAttribute {
    fn is_namespace_declaration(&self) -> bool {
        self.name == "xmlns" || self.name.starts_with("xmlns:")
    }

    fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(p, _)| p)
    }
}

/// Start tag of an element as seen by the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementInfo {
    pub local_name: String,
    pub prefix: Option<String>,
    pub namespace: Option<String>,
    pub attributes: Vec<XmlAttribute>,
}

impl ElementInfo {
    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace.as_deref() == Some(namespace)
    }

    /// Whether this is the given element of the SOAP envelope namespace.
    pub fn is_soap(&self, local_name: &str) -> bool {
        self.is(ns::SOAP_ENV, local_name)
    }

    pub fn attribute(&self, namespace: &str, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.local_name == local_name && a.namespace.as_deref() == Some(namespace))
            .map(|a| a.value.as_str())
    }

    /// Prefixed namespace declarations made on this element.
    pub fn namespace_declarations(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .filter_map(|a| a.name.strip_prefix("xmlns:").map(|p| (p, a.value.as_str())))
    }

    fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{}:{}", p, self.local_name),
            None => self.local_name.clone(),
        }
    }
}

/// A fully read element subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub element: ElementInfo,
    /// Concatenated direct text content.
    pub text: String,
    pub children: Vec<Fragment>,
}

impl Fragment {
    fn new(element: ElementInfo) -> Self {
        Self {
            element,
            text: String::new(),
            children: Vec::new(),
        }
    }

    pub fn local_name(&self) -> &str {
        &self.element.local_name
    }

    pub fn child(&self, local_name: &str) -> Option<&Fragment> {
        self.children.iter().find(|c| c.local_name() == local_name)
    }

    /// Whether the element carries `xsi:nil="true"`.
    pub fn is_nil(&self) -> bool {
        matches!(self.element.attribute(ns::XSI, "nil"), Some("true" | "1"))
    }

    /// Text content, `None` when the element is empty.
    pub fn content(&self) -> Option<&str> {
        (!self.text.is_empty()).then_some(self.text.as_str())
    }

    /// Writes the subtree under its own name.
    pub fn write_to<W: Write>(&self, writer: &mut Writer<W>, scope: &mut NamespaceScope) -> Result<()> {
        self.write_as(writer, &self.element.qualified_name(), true, &[], scope)
    }

    /// Writes the subtree under another, unprefixed name, keeping its
    /// attributes and children.
    ///
    /// `inherited` holds the prefixed declarations of the subtree's ancestors
    /// in the source document. Those not bound in `scope` are redeclared on
    /// the renamed element so prefixes in attribute values stay resolvable.
    pub fn write_renamed<W: Write>(
        &self,
        writer: &mut Writer<W>,
        name: &str,
        inherited: &[(String, String)],
        scope: &mut NamespaceScope,
    ) -> Result<()> {
        self.write_as(writer, name, false, inherited, scope)
    }

    fn write_as<W: Write>(
        &self,
        writer: &mut Writer<W>,
        name: &str,
        keep_name: bool,
        inherited: &[(String, String)],
        scope: &mut NamespaceScope,
    ) -> Result<()> {
        let mark = scope.mark();
        let mut start = BytesStart::new(name);

        for attr in &self.element.attributes {
            if attr.is_namespace_declaration() {
                let prefix = attr.name.strip_prefix("xmlns:").map(str::to_string);
                scope.declare(prefix, &attr.value);
            }
        }

        for (prefix, namespace) in inherited {
            let own = self.element.namespace_declarations().any(|(p, _)| p == prefix);
            if !own && !scope.is_declared(Some(prefix), namespace) {
                push_declaration(&mut start, Some(prefix), namespace);
                scope.declare(Some(prefix.clone()), namespace);
            }
        }

        if keep_name {
            if let Some(ns) = &self.element.namespace {
                let prefix = self.element.prefix.clone();
                if !scope.is_declared(prefix.as_deref(), ns) {
                    push_declaration(&mut start, prefix.as_deref(), ns);
                    scope.declare(prefix, ns);
                }
            }
        }

        for attr in &self.element.attributes {
            if let (Some(prefix), Some(ns)) = (attr.prefix(), &attr.namespace) {
                if !attr.is_namespace_declaration() && !scope.is_declared(Some(prefix), ns) {
                    push_declaration(&mut start, Some(prefix), ns);
                    scope.declare(Some(prefix.to_string()), ns);
                }
            }
            start.push_attribute((attr.name.as_str(), attr.value.as_str()));
        }

        if self.children.is_empty() && self.text.is_empty() {
            writer.write_event(Event::Empty(start))?;
        } else {
            writer.write_event(Event::Start(start))?;
            if !self.text.is_empty() {
                writer.write_event(Event::Text(BytesText::new(&self.text)))?;
            }
            for child in &self.children {
                child.write_to(writer, scope)?;
            }
            writer.write_event(Event::End(BytesEnd::new(name)))?;
        }

        scope.reset(mark);
        Ok(())
    }
}

fn push_declaration(start: &mut BytesStart<'_>, prefix: Option<&str>, namespace: &str) {
    match prefix {
        Some(p) => start.push_attribute((format!("xmlns:{}", p).as_str(), namespace)),
        None => start.push_attribute(("xmlns", namespace)),
    }
}

/// Namespace declarations in effect at the current output position.
#[derive(Debug, Clone, Default)]
pub struct NamespaceScope {
    bindings: Vec<(Option<String>, String)>,
}

impl NamespaceScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, prefix: Option<String>, namespace: &str) {
        self.bindings.push((prefix, namespace.to_string()));
    }

    pub fn is_declared(&self, prefix: Option<&str>, namespace: &str) -> bool {
        self.bindings
            .iter()
            .rev()
            .find(|(p, _)| p.as_deref() == prefix)
            .is_some_and(|(_, ns)| ns == namespace)
    }

    fn mark(&self) -> usize {
        self.bindings.len()
    }

    fn reset(&mut self, mark: usize) {
        self.bindings.truncate(mark);
    }
}

#[derive(Debug)]
struct Pending {
    element: ElementInfo,
    depth: usize,
    empty: bool,
}

/// Forward-only, depth-aware element cursor.
pub struct XmlCursor<'a> {
    reader: NsReader<&'a [u8]>,
    /// Open elements, including a pending one.
    open: usize,
    pending: Option<Pending>,
    eof: bool,
}

impl<'a> XmlCursor<'a> {
    pub fn new(xml: &'a str) -> Self {
        Self {
            reader: NsReader::from_str(xml),
            open: 0,
            pending: None,
            eof: false,
        }
    }

    pub fn from_bytes(xml: &'a [u8]) -> Result<Self> {
        let text = std::str::from_utf8(xml)
            .map_err(|e| XRoadError::XmlParse(format!("Invalid UTF-8: {}", e)))?;
        Ok(Self::new(text))
    }

    /// The start element the cursor stands on, if any.
    pub fn current(&self) -> Option<&ElementInfo> {
        self.pending.as_ref().map(|p| &p.element)
    }

    /// Advances to the next element at `depth` accepted by `accept`.
    ///
    /// Deeper content and rejected siblings are skipped. Returns `false` when
    /// the enclosing element of `depth` ends or the document ends.
    pub fn move_to_element<F>(&mut self, depth: usize, accept: F) -> Result<bool>
    where
        F: Fn(&ElementInfo) -> bool,
    {
        loop {
            if let Some(pending) = self.pending.take() {
                if pending.depth == depth && accept(&pending.element) {
                    self.pending = Some(pending);
                    return Ok(true);
                }

                if pending.depth < depth {
                    // Step inside.
                    if pending.empty {
                        self.open -= 1;
                        if self.open < depth {
                            return Ok(false);
                        }
                    }
                } else {
                    self.skip(pending)?;
                }
                continue;
            }

            if self.eof || !self.advance(depth)? {
                return Ok(false);
            }
        }
    }

    /// Reads the pending element with its whole subtree.
    pub fn read_subtree(&mut self) -> Result<Fragment> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| XRoadError::XmlParse("No element to read".to_string()))?;

        if pending.empty {
            self.open -= 1;
            return Ok(Fragment::new(pending.element));
        }

        let mut stack = vec![Fragment::new(pending.element)];
        loop {
            match self.reader.read_event()? {
                Event::Start(e) => {
                    self.open += 1;
                    stack.push(Fragment::new(self.element_info(&e)?));
                }
                Event::Empty(e) => {
                    let fragment = Fragment::new(self.element_info(&e)?);
                    if let Some(top) = stack.last_mut() {
                        top.children.push(fragment);
                    }
                }
                Event::Text(t) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&t.unescape()?);
                    }
                }
                Event::CData(c) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&c));
                    }
                }
                Event::End(_) => {
                    self.open -= 1;
                    let Some(done) = stack.pop() else {
                        return Err(XRoadError::XmlParse("Unbalanced end tag".to_string()));
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(done),
                        None => return Ok(trim_mixed(done)),
                    }
                }
                Event::Eof => {
                    self.eof = true;
                    return Err(XRoadError::XmlParse("Unexpected end of document".to_string()));
                }
                _ => {}
            }
        }
    }

    /// Reads one event. Returns `false` once an element enclosing `depth`
    /// has closed.
    fn advance(&mut self, depth: usize) -> Result<bool> {
        match self.reader.read_event()? {
            Event::Start(e) => {
                let element = self.element_info(&e)?;
                self.pending = Some(Pending {
                    element,
                    depth: self.open,
                    empty: false,
                });
                self.open += 1;
            }
            Event::Empty(e) => {
                let element = self.element_info(&e)?;
                self.pending = Some(Pending {
                    element,
                    depth: self.open,
                    empty: true,
                });
                self.open += 1;
            }
            Event::End(_) => {
                self.open = self.open.saturating_sub(1);
                if self.open < depth {
                    return Ok(false);
                }
            }
            Event::Eof => {
                self.eof = true;
                return Ok(false);
            }
            _ => {}
        }
        Ok(true)
    }

    fn skip(&mut self, pending: Pending) -> Result<()> {
        if pending.empty {
            self.open -= 1;
            return Ok(());
        }

        let target = pending.depth;
        loop {
            match self.reader.read_event()? {
                Event::Start(_) => self.open += 1,
                Event::End(_) => {
                    self.open -= 1;
                    if self.open == target {
                        return Ok(());
                    }
                }
                Event::Eof => {
                    self.eof = true;
                    return Ok(());
                }
                _ => {}
            }
        }
    }

    fn element_info(&self, e: &BytesStart<'_>) -> Result<ElementInfo> {
        let (resolved, local) = self.reader.resolve_element(e.name());
        let namespace = bound_namespace(resolved);
        let local_name = String::from_utf8_lossy(local.as_ref()).into_owned();
        let prefix = e
            .name()
            .prefix()
            .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned());

        let mut attributes = Vec::new();
        for attr in e.attributes() {
            let attr = attr?;
            let name = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let (resolved, local) = self.reader.resolve_attribute(attr.key);
            attributes.push(XmlAttribute {
                namespace: bound_namespace(resolved),
                local_name: String::from_utf8_lossy(local.as_ref()).into_owned(),
                value: attr.unescape_value()?.into_owned(),
                name,
            });
        }

        Ok(ElementInfo {
            local_name,
            prefix,
            namespace,
            attributes,
        })
    }
}

fn bound_namespace(resolved: ResolveResult<'_>) -> Option<String> {
    match resolved {
        ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
        _ => None,
    }
}

/// Drops indentation whitespace of elements that have element children.
fn trim_mixed(mut fragment: Fragment) -> Fragment {
    if !fragment.children.is_empty() && fragment.text.trim().is_empty() {
        fragment.text.clear();
    }
    fragment.children = fragment.children.into_iter().map(trim_mixed).collect();
    fragment
}
