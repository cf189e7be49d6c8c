//! SOAP envelope inspection and writing.
//!
//! Inbound documents carrying DTD declarations are rejected before parsing.

use std::io::Write;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tracing::debug;

use crate::cursor::{NamespaceScope, XmlCursor};
use crate::dialect::{ns, prefix, DialectConfig, ProtocolVersion};
use crate::error::{Result, XRoadError};
use crate::header::HeaderField;

/// What the dispatcher needs to know about an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeInfo {
    /// Protocol version detected from the header namespace
    pub protocol: Option<ProtocolVersion>,
    /// Header elements as (local name, namespace)
    pub headers: Vec<(String, Option<String>)>,
    /// First body element local name
    pub operation: String,
    /// First body element namespace
    pub operation_namespace: Option<String>,
}

/// Inspect raw bytes as a SOAP 1.1 envelope.
pub fn inspect(data: &[u8]) -> Result<EnvelopeInfo> {
    let xml = std::str::from_utf8(data)
        .map_err(|e| XRoadError::XmlParse(format!("Invalid UTF-8: {}", e)))?;

    check_xxe_patterns(xml)?;

    let mut cursor = XmlCursor::new(xml);
    if !cursor.move_to_element(0, |e| e.is_soap("Envelope"))? {
        return Err(XRoadError::XmlParse(
            "No SOAP 1.1 Envelope found".to_string(),
        ));
    }

    let mut protocol = None;
    let mut headers = Vec::new();

    if !cursor.move_to_element(1, |e| e.is_soap("Header") || e.is_soap("Body"))? {
        return Err(XRoadError::invalid_query("SOAP Body not found"));
    }

    if cursor.current().is_some_and(|e| e.is_soap("Header")) {
        while cursor.move_to_element(2, |_| true)? {
            let header = cursor.read_subtree()?;
            let namespace = header.element.namespace.clone();
            if protocol.is_none() {
                protocol = namespace.as_deref().and_then(protocol_of_namespace);
            }
            headers.push((header.element.local_name, namespace));
        }
        if !cursor.move_to_element(1, |e| e.is_soap("Body"))? {
            return Err(XRoadError::invalid_query("SOAP Body not found"));
        }
    }

    if !cursor.move_to_element(2, |_| true)? {
        return Err(XRoadError::invalid_query("SOAP Body is empty"));
    }

    let operation = cursor
        .current()
        .cloned()
        .ok_or_else(|| XRoadError::invalid_query("SOAP Body is empty"))?;

    debug!(
        operation = %operation.local_name,
        protocol = ?protocol,
        headers = headers.len(),
        "Inspected SOAP envelope"
    );

    Ok(EnvelopeInfo {
        protocol,
        headers,
        operation: operation.local_name,
        operation_namespace: operation.namespace,
    })
}

fn protocol_of_namespace(namespace: &str) -> Option<ProtocolVersion> {
    match namespace {
        ns::XTEE => Some(ProtocolVersion::V20),
        ns::XROAD => Some(ProtocolVersion::V31),
        ns::XROAD_V4 => Some(ProtocolVersion::V40),
        _ => None,
    }
}

/// Rejects DOCTYPE and entity declarations.
fn check_xxe_patterns(xml: &str) -> Result<()> {
    // DOCTYPE detection
    if xml.contains("<!DOCTYPE") || xml.contains("<!doctype") {
        return Err(XRoadError::XmlParse(
            "DOCTYPE declarations are not allowed".to_string(),
        ));
    }

    // External entity patterns
    if xml.contains("<!ENTITY") || xml.contains("<!entity") {
        return Err(XRoadError::XmlParse(
            "Entity declarations are not allowed".to_string(),
        ));
    }

    Ok(())
}

/// Start tag of an envelope declaring the namespaces used by the dialect.
pub(crate) fn envelope_start(dialect: &DialectConfig, scope: &mut NamespaceScope) -> BytesStart<'static> {
    let mut start = BytesStart::new("SOAP-ENV:Envelope");
    let mut declarations = vec![
        (prefix::SOAP_ENV, ns::SOAP_ENV),
        (prefix::XSD, ns::XSD),
        (prefix::XSI, ns::XSI),
        (dialect.prefix, dialect.namespace),
    ];
    if dialect.is_encoded() {
        declarations.push((prefix::SOAP_ENC, ns::SOAP_ENC));
    }

    for (p, uri) in declarations {
        start.push_attribute((format!("xmlns:{}", p).as_str(), uri));
        scope.declare(Some(p.to_string()), uri);
    }

    if let Some(encoding) = dialect.body_encoding() {
        start.push_attribute(("SOAP-ENV:encodingStyle", encoding));
    }
    start
}

/// Writes a complete SOAP envelope. Header values are written as simple
/// elements of the dialect namespace; `body` writes the Body content.
pub fn write_envelope<W, F>(
    writer: &mut Writer<W>,
    dialect: &DialectConfig,
    headers: &[(HeaderField, &str)],
    body: F,
) -> Result<()>
where
    W: Write,
    F: FnOnce(&mut Writer<W>) -> Result<()>,
{
    let mut scope = NamespaceScope::new();
    writer.write_event(Event::Start(envelope_start(dialect, &mut scope)))?;

    if !headers.is_empty() {
        writer.write_event(Event::Start(BytesStart::new("SOAP-ENV:Header")))?;
        for (field, value) in headers {
            if !field.applies_to(dialect) {
                return Err(XRoadError::Config(format!(
                    "Header field `{}` is not defined in protocol version {}",
                    field, dialect.version
                )));
            }
            let name = format!("{}:{}", dialect.prefix, field.element_name());
            writer.write_event(Event::Start(BytesStart::new(name.as_str())))?;
            writer.write_event(Event::Text(BytesText::new(value)))?;
            writer.write_event(Event::End(BytesEnd::new(name.as_str())))?;
        }
        writer.write_event(Event::End(BytesEnd::new("SOAP-ENV:Header")))?;
    }

    writer.write_event(Event::Start(BytesStart::new("SOAP-ENV:Body")))?;
    body(writer)?;
    writer.write_event(Event::End(BytesEnd::new("SOAP-ENV:Body")))?;
    writer.write_event(Event::End(BytesEnd::new("SOAP-ENV:Envelope")))?;
    Ok(())
}
