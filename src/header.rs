//! X-Road message header fields.
//!
//! Required headers are declared from this fixed list rather than as free
//! strings, so a header that does not exist in the producer's protocol
//! version is caught when the configuration is loaded.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dialect::{DialectConfig, ProtocolVersion};
use crate::error::{Result, XRoadError};

use crate::dialect::ProtocolVersion::{V20, V31, V40};

/// A header element of the X-Road SOAP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeaderField {
    /// Unique message id
    #[serde(rename = "id")]
    Id,

    // Encoded (2.0) header
    #[serde(rename = "asutus")]
    Asutus,
    #[serde(rename = "andmekogu")]
    Andmekogu,
    #[serde(rename = "isikukood")]
    Isikukood,
    #[serde(rename = "nimi")]
    Nimi,
    #[serde(rename = "toimik")]
    Toimik,
    #[serde(rename = "allasutus")]
    Allasutus,
    #[serde(rename = "amet")]
    Amet,
    #[serde(rename = "ametniknimi")]
    Ametniknimi,
    #[serde(rename = "autentija")]
    Autentija,
    #[serde(rename = "makstud")]
    Makstud,

    // Literal (3.1) header
    #[serde(rename = "consumer")]
    Consumer,
    #[serde(rename = "producer")]
    Producer,
    #[serde(rename = "unit")]
    Unit,
    #[serde(rename = "position")]
    Position,
    #[serde(rename = "userName")]
    UserName,
    #[serde(rename = "authenticator")]
    Authenticator,
    #[serde(rename = "paid")]
    Paid,

    // Shared by the literal headers
    #[serde(rename = "userId")]
    UserId,
    #[serde(rename = "service")]
    Service,
    #[serde(rename = "issue")]
    Issue,

    // 4.0 header
    #[serde(rename = "client")]
    Client,
    #[serde(rename = "centralService")]
    CentralService,
    #[serde(rename = "protocolVersion")]
    ProtocolVersion,
    #[serde(rename = "requestHash")]
    RequestHash,
}

impl HeaderField {
    pub const ALL: [HeaderField; 25] = [
        Self::Id,
        Self::Asutus,
        Self::Andmekogu,
        Self::Isikukood,
        Self::Nimi,
        Self::Toimik,
        Self::Allasutus,
        Self::Amet,
        Self::Ametniknimi,
        Self::Autentija,
        Self::Makstud,
        Self::Consumer,
        Self::Producer,
        Self::Unit,
        Self::Position,
        Self::UserName,
        Self::Authenticator,
        Self::Paid,
        Self::UserId,
        Self::Service,
        Self::Issue,
        Self::Client,
        Self::CentralService,
        Self::ProtocolVersion,
        Self::RequestHash,
    ];

    /// Local name of the header element.
    pub fn element_name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Asutus => "asutus",
            Self::Andmekogu => "andmekogu",
            Self::Isikukood => "isikukood",
            Self::Nimi => "nimi",
            Self::Toimik => "toimik",
            Self::Allasutus => "allasutus",
            Self::Amet => "amet",
            Self::Ametniknimi => "ametniknimi",
            Self::Autentija => "autentija",
            Self::Makstud => "makstud",
            Self::Consumer => "consumer",
            Self::Producer => "producer",
            Self::Unit => "unit",
            Self::Position => "position",
            Self::UserName => "userName",
            Self::Authenticator => "authenticator",
            Self::Paid => "paid",
            Self::UserId => "userId",
            Self::Service => "service",
            Self::Issue => "issue",
            Self::Client => "client",
            Self::CentralService => "centralService",
            Self::ProtocolVersion => "protocolVersion",
            Self::RequestHash => "requestHash",
        }
    }

    /// Protocol versions whose header defines this field.
    pub fn versions(self) -> &'static [ProtocolVersion] {
        match self {
            Self::Id => &[V20, V31, V40],
            Self::Asutus
            | Self::Andmekogu
            | Self::Isikukood
            | Self::Nimi
            | Self::Toimik
            | Self::Allasutus
            | Self::Amet
            | Self::Ametniknimi
            | Self::Autentija
            | Self::Makstud => &[V20],
            Self::Consumer
            | Self::Producer
            | Self::Unit
            | Self::Position
            | Self::UserName
            | Self::Authenticator
            | Self::Paid => &[V31],
            Self::UserId | Self::Service | Self::Issue => &[V31, V40],
            Self::Client | Self::CentralService | Self::ProtocolVersion | Self::RequestHash => {
                &[V40]
            }
        }
    }

    pub fn applies_to(self, dialect: &DialectConfig) -> bool {
        self.versions().contains(&dialect.version)
    }
}

impl fmt::Display for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.element_name())
    }
}

impl FromStr for HeaderField {
    type Err = XRoadError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|h| h.element_name() == s)
            .ok_or_else(|| XRoadError::Config(format!("Unknown header field `{}`", s)))
    }
}

impl PartialOrd for HeaderField {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeaderField {
    fn cmp(&self, other: &Self) -> Ordering {
        self.element_name().cmp(other.element_name())
    }
}

/// Validates required headers against the dialect and returns them sorted by
/// element name, without duplicates.
pub fn required_headers(fields: &[HeaderField], dialect: &DialectConfig) -> Result<Vec<HeaderField>> {
    if let Some(field) = fields.iter().find(|f| !f.applies_to(dialect)) {
        return Err(XRoadError::Config(format!(
            "Header field `{}` is not defined in protocol version {}",
            field, dialect.version
        )));
    }

    let mut sorted = fields.to_vec();
    sorted.sort();
    sorted.dedup();
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_headers_sorted_and_deduplicated() {
        let fields = [
            HeaderField::Service,
            HeaderField::Client,
            HeaderField::Id,
            HeaderField::Client,
        ];
        let sorted = required_headers(&fields, V40.dialect()).unwrap();
        assert_eq!(
            sorted,
            vec![HeaderField::Client, HeaderField::Id, HeaderField::Service]
        );
    }

    #[test]
    fn test_header_rejected_for_wrong_dialect() {
        let err = required_headers(&[HeaderField::Asutus], V31.dialect()).unwrap_err();
        assert!(matches!(err, XRoadError::Config(_)));
        assert!(required_headers(&[HeaderField::Asutus], V20.dialect()).is_ok());
    }

    #[test]
    fn test_header_names_round_trip() {
        for field in HeaderField::ALL {
            assert_eq!(field.element_name().parse::<HeaderField>().unwrap(), field);
        }
        assert!("bogus".parse::<HeaderField>().is_err());
    }

    #[test]
    fn test_header_serde_uses_element_names() {
        let fields: Vec<HeaderField> = serde_yaml::from_str("[userId, centralService]").unwrap();
        assert_eq!(fields, vec![HeaderField::UserId, HeaderField::CentralService]);
    }
}
