//! X-Road SOAP contract generator and message codec.
//!
//! Supports the X-Road protocol versions 2.0 (RPC/encoded), 3.1 and 4.0
//! (document/literal) behind one dialect strategy.
//!
//! # Features
//!
//! - WSDL 1.1 contract generation with an embedded XML Schema
//! - Request/response (de)serialization consistent with the contract
//! - Strict (positional) and non-strict (by name) parameter binding
//! - Per-call templates selecting included and required members
//! - Fault propagation as X-Road faults or SOAP faults
//!
//! # Example
//!
//! ```ignore
//! use xroad_soap::{ContractGenerator, GeneratorOptions, ProtocolVersion};
//!
//! let mut generator = ContractGenerator::new(
//!     GeneratorOptions::new("calc", 1),
//!     ProtocolVersion::V40.dialect(),
//! );
//! generator.add_operations(contract.operations);
//! let wsdl = generator.build()?.render()?;
//! ```

pub mod catalog;
pub mod codec;
pub mod config;
pub mod cursor;
pub mod descriptor;
pub mod dialect;
pub mod envelope;
pub mod error;
pub mod header;
pub mod mapping;
pub mod producer;
pub mod template;
pub mod value;
pub mod wsdl;
pub mod xml;

pub use catalog::{PropertyOrder, TypeCatalog};
pub use codec::{CodecSettings, ContentLayout, MessageCodec, SerializationContext};
pub use config::ProducerConfig;
pub use descriptor::{ContractDefinition, ServiceContractDescriptor, TypeDescriptor};
pub use dialect::{DialectConfig, ProtocolVersion};
pub use error::{FaultCode, Result, XRoadError};
pub use mapping::{SimpleType, TypeRegistry};
pub use producer::{HandlerMap, ServiceHandler, ServiceRegistry, XRoadProducer};
pub use template::{XmlTemplate, XmlTemplateNode};
pub use value::{Fault, ParameterValues, ServiceResponse, Value};
pub use wsdl::{ContractDocument, ContractGenerator, GeneratorOptions};
