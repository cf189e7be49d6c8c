//! Service and type descriptors.
//!
//! Descriptors are the reflected view of a producer's contract: DTO type
//! definitions and service operations, each tagged with the range of
//! service versions it exists in. They load from YAML so a contract can be
//! described without code.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, XRoadError};
use crate::mapping::SimpleType;

/// Shape of a parameter, property or return type.
///
/// Text form: `int`, `string?`, `Person[]`, `int[][]`, `decimal?[]`,
/// `int[,]` (rank 2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeDescriptor {
    Simple(SimpleType),
    Array { item: Box<TypeDescriptor>, rank: u8 },
    Nullable(Box<TypeDescriptor>),
    /// Reference to a DTO registered in the type catalog.
    Complex(String),
}

impl TypeDescriptor {
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }

    pub fn array_of(item: TypeDescriptor) -> Self {
        Self::Array {
            item: Box::new(item),
            rank: 1,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array { .. })
    }

    /// Strips nullable wrappers.
    pub fn unwrap_nullable(&self) -> &TypeDescriptor {
        match self {
            Self::Nullable(inner) => inner.unwrap_nullable(),
            other => other,
        }
    }
}

impl FromStr for TypeDescriptor {
    type Err = XRoadError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(XRoadError::UnknownType(String::new()));
        }

        if let Some(inner) = s.strip_suffix('?') {
            return Ok(Self::Nullable(Box::new(inner.parse()?)));
        }

        if s.ends_with(']') {
            let open = s
                .rfind('[')
                .ok_or_else(|| XRoadError::UnknownType(s.to_string()))?;
            let dims = &s[open + 1..s.len() - 1];
            if !dims.chars().all(|c| c == ',') {
                return Err(XRoadError::UnknownType(s.to_string()));
            }
            let rank = u8::try_from(dims.len() + 1)
                .map_err(|_| XRoadError::UnsupportedArrayShape(s.to_string()))?;
            return Ok(Self::Array {
                item: Box::new(s[..open].parse()?),
                rank,
            });
        }

        Ok(match SimpleType::from_name(s) {
            Some(simple) => Self::Simple(simple),
            None => Self::Complex(s.to_string()),
        })
    }
}

impl TryFrom<String> for TypeDescriptor {
    type Error = XRoadError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TypeDescriptor> for String {
    fn from(t: TypeDescriptor) -> Self {
        t.to_string()
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(s) => f.write_str(s.name()),
            Self::Array { item, rank } => {
                write!(f, "{}[{}]", item, ",".repeat(rank.saturating_sub(1) as usize))
            }
            Self::Nullable(inner) => write!(f, "{}?", inner),
            Self::Complex(name) => f.write_str(name),
        }
    }
}

/// Service versions an item exists in: `added <= v < removed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionRange {
    pub added: Option<u32>,
    pub removed: Option<u32>,
}

impl VersionRange {
    pub fn contains(&self, version: u32) -> bool {
        self.added.map_or(true, |a| version >= a) && self.removed.map_or(true, |r| version < r)
    }
}

/// Documentation titles keyed by language code (empty key = no language).
pub type Titles = BTreeMap<String, String>;

/// A DTO member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeDescriptor,
    #[serde(default)]
    pub optional: bool,
    /// Overrides the schema data type (`base64` means `base64Binary`).
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub titles: Titles,
    #[serde(default)]
    pub versions: VersionRange,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: false,
            data_type: None,
            titles: Titles::new(),
            versions: VersionRange::default(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn versions(mut self, versions: VersionRange) -> Self {
        self.versions = versions;
        self
    }
}

/// An operation parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeDescriptor,
    #[serde(default)]
    pub optional: bool,
    /// Element name used instead of `name` by dialects honoring aliases.
    #[serde(default)]
    pub element_name: Option<String>,
    #[serde(default)]
    pub titles: Titles,
    #[serde(default)]
    pub versions: VersionRange,
}

impl ParameterDescriptor {
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: false,
            element_name: None,
            titles: Titles::new(),
            versions: VersionRange::default(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn element_name(mut self, name: impl Into<String>) -> Self {
        self.element_name = Some(name.into());
        self
    }

    pub fn versions(mut self, versions: VersionRange) -> Self {
        self.versions = versions;
        self
    }
}

/// Direction of an extra message part on an imported operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartDirection {
    Input,
    Output,
}

/// Additional typed message part of an imported RPC/encoded operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraPart {
    pub name: String,
    pub type_name: String,
    pub direction: PartDirection,
}

/// One service operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceContractDescriptor {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDescriptor>,
    /// Return type; `None` means void.
    #[serde(default)]
    pub returns: Option<TypeDescriptor>,
    /// Messages are published but the operation is not bound.
    #[serde(default)]
    pub exported: bool,
    /// Schema is owned by an external document.
    #[serde(default)]
    pub imported: bool,
    #[serde(default)]
    pub multipart_request: bool,
    #[serde(default)]
    pub multipart_response: bool,
    #[serde(default)]
    pub versions: VersionRange,
    /// Version written to the operation binding; producer version if unset.
    #[serde(default)]
    pub service_version: Option<u32>,
    #[serde(default)]
    pub titles: Titles,
    #[serde(default)]
    pub extra_parts: Vec<ExtraPart>,
}

impl ServiceContractDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            returns: None,
            exported: false,
            imported: false,
            multipart_request: false,
            multipart_response: false,
            versions: VersionRange::default(),
            service_version: None,
            titles: Titles::new(),
            extra_parts: Vec::new(),
        }
    }

    pub fn parameter(mut self, parameter: ParameterDescriptor) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn returns(mut self, ty: TypeDescriptor) -> Self {
        self.returns = Some(ty);
        self
    }

    pub fn title(mut self, lang: impl Into<String>, text: impl Into<String>) -> Self {
        self.titles.insert(lang.into(), text.into());
        self
    }

    /// Parameters that exist in the given service version.
    pub fn parameters_in(&self, version: u32) -> impl Iterator<Item = &ParameterDescriptor> {
        self.parameters
            .iter()
            .filter(move |p| p.versions.contains(version))
    }
}

/// A DTO type definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub name: String,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default)]
    pub properties: Vec<PropertyDescriptor>,
    #[serde(default)]
    pub versions: VersionRange,
}

impl TypeDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: None,
            is_abstract: false,
            properties: Vec::new(),
            versions: VersionRange::default(),
        }
    }

    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    pub fn base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }
}

/// Complete reflected contract of a producer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractDefinition {
    pub types: Vec<TypeDefinition>,
    pub operations: Vec<ServiceContractDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_descriptors() {
        assert_eq!(
            TypeDescriptor::parse("int").unwrap(),
            TypeDescriptor::Simple(SimpleType::Int)
        );
        assert_eq!(
            TypeDescriptor::parse("Person").unwrap(),
            TypeDescriptor::Complex("Person".to_string())
        );
        assert_eq!(
            TypeDescriptor::parse("long?").unwrap(),
            TypeDescriptor::Nullable(Box::new(TypeDescriptor::Simple(SimpleType::Long)))
        );
        assert_eq!(
            TypeDescriptor::parse("string[]").unwrap(),
            TypeDescriptor::array_of(TypeDescriptor::Simple(SimpleType::String))
        );
    }

    #[test]
    fn test_parse_rank_and_jagged_arrays() {
        match TypeDescriptor::parse("int[,]").unwrap() {
            TypeDescriptor::Array { rank, .. } => assert_eq!(rank, 2),
            other => panic!("unexpected {:?}", other),
        }
        match TypeDescriptor::parse("int[][]").unwrap() {
            TypeDescriptor::Array { item, rank } => {
                assert_eq!(rank, 1);
                assert!(item.is_array());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_rank_limit() {
        let widest = format!("int[{}]", ",".repeat(254));
        match TypeDescriptor::parse(&widest).unwrap() {
            TypeDescriptor::Array { rank, .. } => assert_eq!(rank, 255),
            other => panic!("unexpected {:?}", other),
        }
        for commas in [255, 256] {
            let text = format!("int[{}]", ",".repeat(commas));
            assert!(matches!(
                TypeDescriptor::parse(&text),
                Err(XRoadError::UnsupportedArrayShape(_))
            ));
        }
    }

    #[test]
    fn test_type_descriptor_display_round_trip() {
        for text in ["int", "decimal?", "Person[]", "int[,]", "dateTime?[]"] {
            assert_eq!(TypeDescriptor::parse(text).unwrap().to_string(), text);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(TypeDescriptor::parse("").is_err());
        assert!(TypeDescriptor::parse("int[x]").is_err());
    }

    #[test]
    fn test_version_range() {
        let range = VersionRange {
            added: Some(2),
            removed: Some(4),
        };
        assert!(!range.contains(1));
        assert!(range.contains(2));
        assert!(range.contains(3));
        assert!(!range.contains(4));
        assert!(VersionRange::default().contains(100));
    }

    #[test]
    fn test_contract_from_yaml() {
        let yaml = r#"
types:
  - name: Person
    properties:
      - name: name
        type: string
      - name: birthDate
        type: dateTime?
        optional: true
        versions:
          added: 2
operations:
  - name: FindPersons
    parameters:
      - name: query
        type: string
    returns: Person[]
    titles:
      et: Isikute otsing
"#;
        let contract: ContractDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(contract.types.len(), 1);
        assert_eq!(contract.types[0].properties[1].versions.added, Some(2));
        let op = &contract.operations[0];
        assert_eq!(op.returns, Some(TypeDescriptor::parse("Person[]").unwrap()));
        assert_eq!(op.titles["et"], "Isikute otsing");
        assert!(!op.exported);
    }
}
