//! Type mapping registry.
//!
//! Maps simple semantic types to canonical schema names and to the lexical
//! codecs that turn [`Value`]s into element text and back. DTO types are not
//! handled here; they resolve through the contract's [`TypeCatalog`].
//!
//! [`TypeCatalog`]: crate::catalog::TypeCatalog

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::codec::SerializationContext;
use crate::dialect::{prefix, DialectConfig};
use crate::error::{Result, XRoadError};
use crate::value::Value;
use crate::xml::QName;

const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Primitive types with a fixed schema mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SimpleType {
    Boolean,
    DateTime,
    Decimal,
    Int,
    Long,
    String,
    /// Binary content, carried as base64 or as an attachment.
    Stream,
}

impl SimpleType {
    pub const ALL: [SimpleType; 7] = [
        Self::Boolean,
        Self::DateTime,
        Self::Decimal,
        Self::Int,
        Self::Long,
        Self::String,
        Self::Stream,
    ];

    /// Name used in type descriptors.
    pub fn name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::DateTime => "dateTime",
            Self::Decimal => "decimal",
            Self::Int => "int",
            Self::Long => "long",
            Self::String => "string",
            Self::Stream => "stream",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "boolean" | "bool" => Some(Self::Boolean),
            "dateTime" => Some(Self::DateTime),
            "decimal" => Some(Self::Decimal),
            "int" => Some(Self::Int),
            "long" => Some(Self::Long),
            "string" => Some(Self::String),
            "stream" | "base64Binary" => Some(Self::Stream),
            _ => None,
        }
    }

    /// Local name of the canonical schema type.
    pub fn schema_local_name(self) -> &'static str {
        match self {
            Self::Stream => "base64Binary",
            other => other.name(),
        }
    }
}

/// Lexical codec of one simple type.
pub trait ValueCodec: Send + Sync {
    fn simple_type(&self) -> SimpleType;

    /// Converts a value into element text.
    fn encode(&self, value: &Value, element: &str, ctx: &SerializationContext<'_>) -> Result<String>;

    /// Converts element text into a value. `None` or empty text yields the
    /// type's default value.
    fn decode(&self, text: Option<&str>, element: &str, ctx: &SerializationContext<'_>) -> Result<Value>;
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|t| !t.is_empty())
}

struct BooleanCodec;

impl ValueCodec for BooleanCodec {
    fn simple_type(&self) -> SimpleType {
        SimpleType::Boolean
    }

    fn encode(&self, value: &Value, element: &str, _ctx: &SerializationContext<'_>) -> Result<String> {
        match value {
            Value::Boolean(b) => Ok(b.to_string()),
            _ => Err(XRoadError::mismatch(element, "boolean")),
        }
    }

    fn decode(&self, text: Option<&str>, element: &str, _ctx: &SerializationContext<'_>) -> Result<Value> {
        match non_empty(text) {
            None => Ok(Value::Boolean(false)),
            Some("true" | "1") => Ok(Value::Boolean(true)),
            Some("false" | "0") => Ok(Value::Boolean(false)),
            Some(other) => Err(XRoadError::format(element, other)),
        }
    }
}

struct IntCodec;

impl ValueCodec for IntCodec {
    fn simple_type(&self) -> SimpleType {
        SimpleType::Int
    }

    fn encode(&self, value: &Value, element: &str, _ctx: &SerializationContext<'_>) -> Result<String> {
        match value {
            Value::Int(v) => Ok(v.to_string()),
            _ => Err(XRoadError::mismatch(element, "int")),
        }
    }

    fn decode(&self, text: Option<&str>, element: &str, _ctx: &SerializationContext<'_>) -> Result<Value> {
        match non_empty(text) {
            None => Ok(Value::Int(0)),
            Some(t) => t
                .parse()
                .map(Value::Int)
                .map_err(|_| XRoadError::format(element, t)),
        }
    }
}

struct LongCodec;

impl ValueCodec for LongCodec {
    fn simple_type(&self) -> SimpleType {
        SimpleType::Long
    }

    fn encode(&self, value: &Value, element: &str, _ctx: &SerializationContext<'_>) -> Result<String> {
        match value {
            Value::Long(v) => Ok(v.to_string()),
            Value::Int(v) => Ok(v.to_string()),
            _ => Err(XRoadError::mismatch(element, "long")),
        }
    }

    fn decode(&self, text: Option<&str>, element: &str, _ctx: &SerializationContext<'_>) -> Result<Value> {
        match non_empty(text) {
            None => Ok(Value::Long(0)),
            Some(t) => t
                .parse()
                .map(Value::Long)
                .map_err(|_| XRoadError::format(element, t)),
        }
    }
}

struct DecimalCodec;

impl ValueCodec for DecimalCodec {
    fn simple_type(&self) -> SimpleType {
        SimpleType::Decimal
    }

    fn encode(&self, value: &Value, element: &str, _ctx: &SerializationContext<'_>) -> Result<String> {
        match value {
            Value::Decimal(d) => Ok(d.to_string()),
            Value::Int(v) => Ok(v.to_string()),
            Value::Long(v) => Ok(v.to_string()),
            _ => Err(XRoadError::mismatch(element, "decimal")),
        }
    }

    fn decode(&self, text: Option<&str>, element: &str, _ctx: &SerializationContext<'_>) -> Result<Value> {
        match non_empty(text) {
            None => Ok(Value::Decimal(Decimal::ZERO)),
            Some(t) => Decimal::from_str(t)
                .map(Value::Decimal)
                .map_err(|_| XRoadError::format(element, t)),
        }
    }
}

struct StringCodec;

impl ValueCodec for StringCodec {
    fn simple_type(&self) -> SimpleType {
        SimpleType::String
    }

    fn encode(&self, value: &Value, element: &str, _ctx: &SerializationContext<'_>) -> Result<String> {
        match value {
            Value::String(s) => Ok(s.clone()),
            _ => Err(XRoadError::mismatch(element, "string")),
        }
    }

    fn decode(&self, text: Option<&str>, _element: &str, _ctx: &SerializationContext<'_>) -> Result<Value> {
        Ok(Value::String(text.unwrap_or_default().to_string()))
    }
}

struct DateTimeCodec;

impl ValueCodec for DateTimeCodec {
    fn simple_type(&self) -> SimpleType {
        SimpleType::DateTime
    }

    fn encode(&self, value: &Value, element: &str, _ctx: &SerializationContext<'_>) -> Result<String> {
        match value {
            Value::DateTime(dt) => Ok(dt.format(DATE_TIME_FORMAT).to_string()),
            _ => Err(XRoadError::mismatch(element, "dateTime")),
        }
    }

    fn decode(&self, text: Option<&str>, element: &str, _ctx: &SerializationContext<'_>) -> Result<Value> {
        let Some(t) = non_empty(text) else {
            return Ok(Value::Null);
        };

        DateTime::parse_from_rfc3339(t)
            .map(|dt| dt.naive_local())
            .or_else(|_| NaiveDateTime::parse_from_str(t, DATE_TIME_FORMAT))
            .or_else(|_| NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S"))
            .map(Value::DateTime)
            .map_err(|_| XRoadError::format(element, t))
    }
}

struct BinaryCodec;

impl ValueCodec for BinaryCodec {
    fn simple_type(&self) -> SimpleType {
        SimpleType::Stream
    }

    fn encode(&self, value: &Value, element: &str, _ctx: &SerializationContext<'_>) -> Result<String> {
        match value {
            Value::Binary(bytes) => Ok(STANDARD.encode(bytes)),
            _ => Err(XRoadError::mismatch(element, "binary")),
        }
    }

    fn decode(&self, text: Option<&str>, element: &str, _ctx: &SerializationContext<'_>) -> Result<Value> {
        let Some(t) = non_empty(text) else {
            return Ok(Value::Binary(Vec::new()));
        };

        let compact: String = t.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD
            .decode(compact.as_bytes())
            .map(Value::Binary)
            .map_err(|_| XRoadError::format(element, t))
    }
}

/// Registry of simple type codecs.
pub struct TypeRegistry {
    codecs: HashMap<SimpleType, Box<dyn ValueCodec>>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&SimpleType> = self.codecs.keys().collect();
        types.sort();
        f.debug_struct("TypeRegistry").field("types", &types).finish()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Registry with the standard codec for every simple type.
    pub fn new() -> Self {
        let codecs: Vec<Box<dyn ValueCodec>> = vec![
            Box::new(BooleanCodec),
            Box::new(DateTimeCodec),
            Box::new(DecimalCodec),
            Box::new(IntCodec),
            Box::new(LongCodec),
            Box::new(StringCodec),
            Box::new(BinaryCodec),
        ];

        Self {
            codecs: codecs.into_iter().map(|c| (c.simple_type(), c)).collect(),
        }
    }

    /// Replaces the codec of one simple type.
    pub fn with_codec(mut self, codec: Box<dyn ValueCodec>) -> Self {
        self.codecs.insert(codec.simple_type(), codec);
        self
    }

    pub fn codec(&self, ty: SimpleType) -> &dyn ValueCodec {
        // Every simple type is registered by the constructor.
        self.codecs[&ty].as_ref()
    }

    /// Canonical schema type name under the given dialect.
    pub fn schema_name(&self, ty: SimpleType, dialect: &DialectConfig) -> QName {
        match ty {
            SimpleType::Stream => {
                let (namespace, _) = dialect.binary_namespace();
                QName::new(namespace, ty.schema_local_name())
            }
            other => QName::xsd(other.schema_local_name()),
        }
    }

    /// Reverse lookup from a schema type local name.
    pub fn from_schema_name(&self, local_name: &str) -> Option<SimpleType> {
        SimpleType::ALL
            .into_iter()
            .find(|t| t.schema_local_name() == local_name)
    }

    /// `xsi:type` value written next to a simple value, if the dialect asks
    /// for explicit type attributes.
    pub fn type_attribute(&self, ty: SimpleType, dialect: &DialectConfig) -> Option<String> {
        if !dialect.explicit_type_attributes {
            return None;
        }
        let prefix = match ty {
            SimpleType::Stream => dialect.binary_namespace().1,
            _ => prefix::XSD,
        };
        Some(format!("{}:{}", prefix, ty.schema_local_name()))
    }
}
