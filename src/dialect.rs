//! Protocol dialect strategy.
//!
//! Everything that differs between X-Road protocol versions 2.0, 3.1 and 4.0
//! lives in one immutable [`DialectConfig`] table per version. Other modules
//! never branch on [`ProtocolVersion`] directly; they ask the dialect.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, XRoadError};

/// Namespace URIs shared by all dialects.
pub mod ns {
    pub const SOAP_ENV: &str = "http://schemas.xmlsoap.org/soap/envelope/";
    pub const SOAP_ENC: &str = "http://schemas.xmlsoap.org/soap/encoding/";
    pub const SOAP: &str = "http://schemas.xmlsoap.org/wsdl/soap/";
    pub const SOAP_HTTP: &str = "http://schemas.xmlsoap.org/soap/http";
    pub const WSDL: &str = "http://schemas.xmlsoap.org/wsdl/";
    pub const MIME: &str = "http://schemas.xmlsoap.org/wsdl/mime/";
    pub const XMIME: &str = "http://www.w3.org/2005/05/xmlmime";
    pub const XSD: &str = "http://www.w3.org/2001/XMLSchema";
    pub const XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
    pub const XTEE: &str = "http://x-tee.riik.ee/xsd/xtee.xsd";
    pub const XROAD: &str = "http://x-road.ee/xsd/x-road.xsd";
    pub const XROAD_V4: &str = "http://x-road.eu/xsd/xroad.xsd";
}

/// Prefixes bound to the shared namespaces.
pub mod prefix {
    pub const SOAP_ENV: &str = "SOAP-ENV";
    pub const SOAP_ENC: &str = "SOAP-ENC";
    pub const SOAP: &str = "soap";
    pub const WSDL: &str = "wsdl";
    pub const MIME: &str = "mime";
    pub const XMIME: &str = "xmime";
    pub const XSD: &str = "xsd";
    pub const XSI: &str = "xsi";
}

/// Supported X-Road protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "2.0", alias = "V20", alias = "v20")]
    V20,
    #[serde(rename = "3.1", alias = "V31", alias = "v31")]
    V31,
    #[serde(rename = "4.0", alias = "V40", alias = "v40")]
    V40,
}

impl ProtocolVersion {
    /// Dialect table for this version.
    pub fn dialect(self) -> &'static DialectConfig {
        match self {
            Self::V20 => &V20,
            Self::V31 => &V31,
            Self::V40 => &V40,
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = XRoadError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "2.0" | "V20" | "v20" => Ok(Self::V20),
            "3.1" | "V31" | "v31" => Ok(Self::V31),
            "4.0" | "V40" | "v40" => Ok(Self::V40),
            other => Err(XRoadError::UnsupportedDialect(other.to_string())),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dialect().label)
    }
}

/// SOAP binding style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoapStyle {
    Rpc,
    Document,
}

impl SoapStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rpc => "rpc",
            Self::Document => "document",
        }
    }
}

/// SOAP body/header use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyUse {
    Encoded,
    Literal,
}

impl BodyUse {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Encoded => "encoded",
            Self::Literal => "literal",
        }
    }
}

/// How arrays are represented in schema and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayMode {
    /// `SOAP-ENC:Array` restriction with an `arrayType` attribute.
    SoapEncoded,
    /// Plain nested sequence of `item` elements.
    ItemSequence,
}

/// How binary content is typed in schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentMode {
    /// `SOAP-ENC:base64Binary`, no content type hint.
    SoapEncoded,
    /// `xsd:base64Binary` with `xmime:expectedContentTypes`.
    Xmime,
}

/// Immutable description of one wire dialect.
pub struct DialectConfig {
    pub version: ProtocolVersion,
    /// Version label used in imported schema paths.
    pub label: &'static str,
    /// X-Road namespace of header and fault types.
    pub namespace: &'static str,
    pub prefix: &'static str,
    pub style: SoapStyle,
    pub body_use: BodyUse,
    pub header_use: BodyUse,
    /// Element carrying request parameters.
    pub request_element: &'static str,
    /// Element echoing the request inside a response.
    pub request_echo_element: &'static str,
    /// Element carrying the response payload.
    pub response_element: &'static str,
    /// Element wrapping a successful result inside the response element.
    pub result_element: Option<&'static str>,
    pub array_mode: ArrayMode,
    pub attachment_mode: AttachmentMode,
    /// Write `xsi:type` on every simple value.
    pub explicit_type_attributes: bool,
    /// MIME multipart bindings for operations with attachments.
    pub supports_multipart: bool,
    /// Parameter element-name aliases are honored.
    pub parameter_aliases: bool,
    /// A single parameter is typed directly onto the request element.
    pub single_parameter_root: bool,
    producer_namespace: fn(&str) -> String,
}

static V20: DialectConfig = DialectConfig {
    version: ProtocolVersion::V20,
    label: "2.0",
    namespace: ns::XTEE,
    prefix: "xtee",
    style: SoapStyle::Rpc,
    body_use: BodyUse::Encoded,
    header_use: BodyUse::Encoded,
    request_element: "keha",
    request_echo_element: "paring",
    response_element: "keha",
    result_element: None,
    array_mode: ArrayMode::SoapEncoded,
    attachment_mode: AttachmentMode::SoapEncoded,
    explicit_type_attributes: true,
    supports_multipart: true,
    parameter_aliases: false,
    single_parameter_root: false,
    producer_namespace: xtee_namespace,
};

static V31: DialectConfig = DialectConfig {
    version: ProtocolVersion::V31,
    label: "3.1",
    namespace: ns::XROAD,
    prefix: "xrd",
    style: SoapStyle::Document,
    body_use: BodyUse::Literal,
    header_use: BodyUse::Literal,
    request_element: "request",
    request_echo_element: "request",
    response_element: "response",
    result_element: Some("value"),
    array_mode: ArrayMode::ItemSequence,
    attachment_mode: AttachmentMode::Xmime,
    explicit_type_attributes: false,
    supports_multipart: false,
    parameter_aliases: true,
    single_parameter_root: true,
    producer_namespace: xroad_namespace,
};

static V40: DialectConfig = DialectConfig {
    version: ProtocolVersion::V40,
    label: "4.0",
    namespace: ns::XROAD_V4,
    prefix: "xrd",
    style: SoapStyle::Document,
    body_use: BodyUse::Literal,
    header_use: BodyUse::Literal,
    request_element: "request",
    request_echo_element: "request",
    response_element: "response",
    result_element: Some("value"),
    array_mode: ArrayMode::ItemSequence,
    attachment_mode: AttachmentMode::Xmime,
    explicit_type_attributes: false,
    supports_multipart: false,
    parameter_aliases: true,
    single_parameter_root: true,
    producer_namespace: xroad_v4_namespace,
};

fn xtee_namespace(p: &str) -> String {
    format!("http://producers.{p}.xtee.riik.ee/producer/{p}")
}

fn xroad_namespace(p: &str) -> String {
    format!("http://{p}.x-road.ee/producer/")
}

fn xroad_v4_namespace(p: &str) -> String {
    format!("http://{p}.x-road.eu")
}

/// Resolve a dialect from an external version identifier.
pub fn resolve(version_id: &str) -> Result<&'static DialectConfig> {
    version_id.parse::<ProtocolVersion>().map(ProtocolVersion::dialect)
}

impl fmt::Debug for DialectConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialectConfig")
            .field("version", &self.version)
            .field("style", &self.style)
            .field("body_use", &self.body_use)
            .finish_non_exhaustive()
    }
}

impl DialectConfig {
    pub fn is_encoded(&self) -> bool {
        self.body_use == BodyUse::Encoded
    }

    /// Target namespace of a producer's contract.
    pub fn producer_namespace(&self, producer_name: &str) -> String {
        (self.producer_namespace)(producer_name)
    }

    /// Namespace and prefix of binary content types.
    pub fn binary_namespace(&self) -> (&'static str, &'static str) {
        match self.attachment_mode {
            AttachmentMode::SoapEncoded => (ns::SOAP_ENC, prefix::SOAP_ENC),
            AttachmentMode::Xmime => (ns::XSD, prefix::XSD),
        }
    }

    /// Content type hint added to binary elements, if any.
    pub fn expected_content_type(&self) -> Option<&'static str> {
        match self.attachment_mode {
            AttachmentMode::SoapEncoded => None,
            AttachmentMode::Xmime => Some("application/octet-stream"),
        }
    }

    /// Encoding style URI of encoded bodies.
    pub fn body_encoding(&self) -> Option<&'static str> {
        self.is_encoded().then_some(ns::SOAP_ENC)
    }

    /// Namespace and encoding style attached to header bindings.
    pub fn header_binding(&self) -> (Option<&'static str>, Option<&'static str>) {
        match self.header_use {
            BodyUse::Encoded => (Some(self.namespace), Some(ns::SOAP_ENC)),
            BodyUse::Literal => (None, None),
        }
    }

    /// Namespace imported next to the X-Road namespace in the embedded schema.
    pub fn support_schema(&self) -> &'static str {
        match self.attachment_mode {
            AttachmentMode::SoapEncoded => ns::SOAP_ENC,
            AttachmentMode::Xmime => ns::XMIME,
        }
    }

    /// Location of an externally managed operation schema.
    pub fn imported_schema_path(&self, base: &str, operation: &str) -> String {
        format!("{}/{}/{}.xsd", base.trim_end_matches('/'), self.label, operation)
    }

    /// Whether a named parameter alias applies under this dialect.
    pub fn parameter_name<'a>(&self, name: &'a str, alias: Option<&'a str>) -> &'a str {
        match alias {
            Some(alias) if self.parameter_aliases && !alias.trim().is_empty() => alias,
            _ => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_versions() {
        assert_eq!(resolve("2.0").unwrap().version, ProtocolVersion::V20);
        assert_eq!(resolve("V31").unwrap().version, ProtocolVersion::V31);
        assert_eq!(resolve("v40").unwrap().version, ProtocolVersion::V40);
    }

    #[test]
    fn test_resolve_unknown_version() {
        let err = resolve("5.0").unwrap_err();
        assert!(matches!(err, XRoadError::UnsupportedDialect(ref v) if v == "5.0"));
    }

    #[test]
    fn test_wire_shape_per_dialect() {
        let v20 = resolve("2.0").unwrap();
        assert_eq!(v20.request_element, "keha");
        assert_eq!(v20.request_echo_element, "paring");
        assert_eq!(v20.style, SoapStyle::Rpc);
        assert!(v20.is_encoded());

        for id in ["3.1", "4.0"] {
            let d = resolve(id).unwrap();
            assert_eq!(d.request_element, "request");
            assert_eq!(d.response_element, "response");
            assert_eq!(d.body_use, BodyUse::Literal);
            assert_eq!(d.header_use, BodyUse::Literal);
            assert_eq!(d.array_mode, ArrayMode::ItemSequence);
        }
    }

    #[test]
    fn test_producer_namespaces() {
        assert_eq!(
            ProtocolVersion::V20.dialect().producer_namespace("calc"),
            "http://producers.calc.xtee.riik.ee/producer/calc"
        );
        assert_eq!(
            ProtocolVersion::V31.dialect().producer_namespace("calc"),
            "http://calc.x-road.ee/producer/"
        );
        assert_eq!(
            ProtocolVersion::V40.dialect().producer_namespace("calc"),
            "http://calc.x-road.eu"
        );
    }

    #[test]
    fn test_binary_and_header_conventions() {
        let v20 = ProtocolVersion::V20.dialect();
        assert_eq!(v20.binary_namespace().0, ns::SOAP_ENC);
        assert_eq!(v20.expected_content_type(), None);
        assert_eq!(v20.header_binding(), (Some(ns::XTEE), Some(ns::SOAP_ENC)));

        let v40 = ProtocolVersion::V40.dialect();
        assert_eq!(v40.binary_namespace().0, ns::XSD);
        assert_eq!(v40.expected_content_type(), Some("application/octet-stream"));
        assert_eq!(v40.header_binding(), (None, None));
    }

    #[test]
    fn test_imported_schema_path() {
        let d = ProtocolVersion::V31.dialect();
        assert_eq!(
            d.imported_schema_path("http://example.org/xsd/", "GetPerson"),
            "http://example.org/xsd/3.1/GetPerson.xsd"
        );
    }

    #[test]
    fn test_parameter_alias_ignored_under_v20() {
        assert_eq!(ProtocolVersion::V20.dialect().parameter_name("x", Some("a")), "x");
        assert_eq!(ProtocolVersion::V40.dialect().parameter_name("x", Some("a")), "a");
        assert_eq!(ProtocolVersion::V40.dialect().parameter_name("x", None), "x");
    }

    #[test]
    fn test_version_serde_names() {
        let v: ProtocolVersion = serde_yaml::from_str("\"4.0\"").unwrap();
        assert_eq!(v, ProtocolVersion::V40);
        let v: ProtocolVersion = serde_yaml::from_str("V20").unwrap();
        assert_eq!(v, ProtocolVersion::V20);
    }
}
