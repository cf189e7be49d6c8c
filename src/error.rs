//! Error types for contract generation and message (de)serialization.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::Fault;

/// Errors raised by the X-Road contract generator and message codec.
#[derive(Error, Debug)]
pub enum XRoadError {
    #[error("Multiple definitions for the same name `{0}`")]
    DuplicateName(String),

    #[error("Unrecognized type `{0}`")]
    UnknownType(String),

    #[error("Unsupported array shape for `{0}`: multi-dimensional arrays are not supported")]
    UnsupportedArrayShape(String),

    #[error("Unsupported X-Road protocol version `{0}`")]
    UnsupportedDialect(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("No service handler for operation `{0}`")]
    UnknownOperation(String),

    #[error("Required parameter `{0}` is missing")]
    MissingRequiredParameter(String),

    #[error("Invalid value `{value}` for element `{element}`")]
    FormatError { element: String, value: String },

    #[error("Element `{element}` expects a value of type {expected}")]
    TypeMismatch { element: String, expected: String },

    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<quick_xml::Error> for XRoadError {
    fn from(err: quick_xml::Error) -> Self {
        Self::XmlParse(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for XRoadError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::XmlParse(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, XRoadError>;

impl XRoadError {
    pub(crate) fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }

    pub(crate) fn format(element: &str, value: impl Into<String>) -> Self {
        Self::FormatError {
            element: element.to_string(),
            value: value.into(),
        }
    }

    pub(crate) fn mismatch(element: &str, expected: impl Into<String>) -> Self {
        Self::TypeMismatch {
            element: element.to_string(),
            expected: expected.into(),
        }
    }

    /// Whether the error happened while reading or writing a live message.
    pub fn is_wire_format(&self) -> bool {
        matches!(
            self,
            Self::InvalidQuery(_)
                | Self::MissingRequiredParameter(_)
                | Self::FormatError { .. }
                | Self::TypeMismatch { .. }
                | Self::XmlParse(_)
        )
    }

    /// Fault code reported to the client for this error.
    pub fn fault_code(&self) -> FaultCode {
        match self {
            Self::DuplicateName(_) | Self::UnknownType(_) | Self::UnsupportedArrayShape(_) => {
                FaultCode::InvalidContract
            }
            Self::UnsupportedDialect(_) => FaultCode::UnsupportedProtocol,
            Self::InvalidQuery(_) => FaultCode::InvalidQuery,
            Self::UnknownOperation(_) => FaultCode::UnknownOperation,
            Self::MissingRequiredParameter(_) => FaultCode::MissingRequiredParameter,
            Self::FormatError { .. } | Self::TypeMismatch { .. } => FaultCode::InvalidFormat,
            Self::XmlParse(_) => FaultCode::InvalidXml,
            Self::Config(_) | Self::Io(_) => FaultCode::ServerError,
        }
    }

    /// Converts the error into the fault value returned to the client.
    pub fn to_fault(&self) -> Fault {
        Fault::new(self.fault_code().as_str(), self.to_string())
    }
}

/// Fault codes reported in SOAP faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultCode {
    /// Malformed XML
    InvalidXml,
    /// Missing or unexpected element in the query
    InvalidQuery,
    /// Template-mandated parameter absent
    MissingRequiredParameter,
    /// Value could not be parsed
    InvalidFormat,
    /// Unknown protocol version
    UnsupportedProtocol,
    /// Operation has no registered handler
    UnknownOperation,
    /// Contract could not be built
    InvalidContract,
    /// Anything else
    ServerError,
}

impl FaultCode {
    /// Get the string code for this fault.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidXml => "INVALID_XML",
            Self::InvalidQuery => "INVALID_QUERY",
            Self::MissingRequiredParameter => "MISSING_REQUIRED_PARAMETER",
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::UnsupportedProtocol => "UNSUPPORTED_PROTOCOL",
            Self::UnknownOperation => "UNKNOWN_OPERATION",
            Self::InvalidContract => "INVALID_CONTRACT",
            Self::ServerError => "SERVER_ERROR",
        }
    }

    /// SOAP 1.1 fault code class: client errors vs server errors.
    pub fn soap_class(&self) -> &'static str {
        match self {
            Self::ServerError | Self::InvalidContract => "SOAP-ENV:Server",
            _ => "SOAP-ENV:Client",
        }
    }
}

/// Generate a SOAP 1.1 fault envelope for a failed request.
pub fn soap_fault_response(code: FaultCode, message: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/">
  <SOAP-ENV:Body>
    <SOAP-ENV:Fault>
      <faultcode>{}</faultcode>
      <faultstring>[{}] {}</faultstring>
    </SOAP-ENV:Fault>
  </SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#,
        code.soap_class(),
        code.as_str(),
        xml_escape(message)
    )
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_code_as_str() {
        assert_eq!(FaultCode::InvalidXml.as_str(), "INVALID_XML");
        assert_eq!(
            FaultCode::MissingRequiredParameter.as_str(),
            "MISSING_REQUIRED_PARAMETER"
        );
    }

    #[test]
    fn test_error_fault_code_mapping() {
        let err = XRoadError::MissingRequiredParameter("x".to_string());
        assert_eq!(err.fault_code(), FaultCode::MissingRequiredParameter);
        assert!(err.is_wire_format());

        let err = XRoadError::DuplicateName("Person".to_string());
        assert_eq!(err.fault_code(), FaultCode::InvalidContract);
        assert!(!err.is_wire_format());
    }

    #[test]
    fn test_soap_fault_response() {
        let fault = soap_fault_response(FaultCode::InvalidQuery, "Missing <request> element");
        assert!(fault.contains("http://schemas.xmlsoap.org/soap/envelope/"));
        assert!(fault.contains("<faultcode>SOAP-ENV:Client</faultcode>"));
        assert!(fault.contains("INVALID_QUERY"));
        assert!(fault.contains("&lt;request&gt;"));
    }

    #[test]
    fn test_server_fault_class() {
        let fault = soap_fault_response(FaultCode::ServerError, "boom");
        assert!(fault.contains("SOAP-ENV:Server"));
    }
}
