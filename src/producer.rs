//! In-process X-Road producer.
//!
//! Binds an inbound SOAP request to the operation's codec, invokes the
//! registered service handler and writes the response envelope. Transport
//! stays with the host; this type only turns request bytes into response
//! bytes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use quick_xml::events::{BytesDecl, Event};
use quick_xml::Writer;
use tracing::{debug, info, warn};

use crate::catalog::TypeCatalog;
use crate::codec::{MessageCodec, SerializationContext};
use crate::config::ProducerConfig;
use crate::cursor::XmlCursor;
use crate::descriptor::ContractDefinition;
use crate::dialect::DialectConfig;
use crate::envelope;
use crate::error::{soap_fault_response, Result, XRoadError};
use crate::template::XmlTemplate;
use crate::value::{ParameterValues, ServiceResponse};

/// Service implementation callable by the producer.
pub type ServiceFn = dyn Fn(&ParameterValues) -> ServiceResponse + Send + Sync;

/// What a registry offers for an operation.
#[derive(Clone)]
pub enum ServiceHandler {
    /// Call the function with the bound parameters
    Invoke(Arc<ServiceFn>),
    /// Operation is published but has no implementation
    Unimplemented,
}

impl ServiceHandler {
    pub fn invoke<F>(f: F) -> Self
    where
        F: Fn(&ParameterValues) -> ServiceResponse + Send + Sync + 'static,
    {
        Self::Invoke(Arc::new(f))
    }
}

impl std::fmt::Debug for ServiceHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invoke(_) => f.write_str("Invoke(..)"),
            Self::Unimplemented => f.write_str("Unimplemented"),
        }
    }
}

/// Host supplied lookup of service handlers.
pub trait ServiceRegistry: Send + Sync {
    fn resolve(&self, operation: &str) -> Option<ServiceHandler>;
}

/// Registry backed by a map of operation names.
#[derive(Debug, Clone, Default)]
pub struct HandlerMap {
    handlers: HashMap<String, ServiceHandler>,
}

impl HandlerMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, operation: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ParameterValues) -> ServiceResponse + Send + Sync + 'static,
    {
        self.handlers
            .insert(operation.into(), ServiceHandler::invoke(f));
        self
    }

    pub fn unimplemented(mut self, operation: impl Into<String>) -> Self {
        self.handlers
            .insert(operation.into(), ServiceHandler::Unimplemented);
        self
    }
}

impl ServiceRegistry for HandlerMap {
    fn resolve(&self, operation: &str) -> Option<ServiceHandler> {
        self.handlers.get(operation).cloned()
    }
}

/// Request counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerStats {
    pub requests_processed: u64,
    pub requests_failed: u64,
}

/// Producer serving one protocol version and one service version.
pub struct XRoadProducer {
    dialect: &'static DialectConfig,
    codecs: HashMap<String, Arc<MessageCodec>>,
    registry: Box<dyn ServiceRegistry>,
    /// Metrics tracking
    requests_processed: AtomicU64,
    requests_failed: AtomicU64,
}

impl XRoadProducer {
    /// Builds one codec per published operation of the contract.
    pub fn new<R>(config: &ProducerConfig, contract: &ContractDefinition, registry: R) -> Result<Self>
    where
        R: ServiceRegistry + 'static,
    {
        config.validate()?;
        let filter = config.operations.filter()?;
        let version = config.producer.version;

        let catalog = Arc::new(TypeCatalog::from_definitions(
            version,
            config.serialization.property_order,
            contract.types.iter().cloned(),
        )?);
        let settings = config.codec_settings(catalog)?;

        let mut codecs = HashMap::new();
        for operation in &contract.operations {
            if !operation.versions.contains(version) || !filter.is_published(&operation.name) {
                continue;
            }
            if operation.imported || operation.exported {
                debug!(operation = %operation.name, "Operation is not served by this producer");
                continue;
            }
            if codecs.contains_key(&operation.name) {
                return Err(XRoadError::DuplicateName(operation.name.clone()));
            }
            let codec = MessageCodec::new(operation, &settings)?;
            codecs.insert(operation.name.clone(), Arc::new(codec));
        }

        info!(
            producer = %config.producer.name,
            dialect = %settings.dialect.version,
            version,
            operations = codecs.len(),
            "Producer initialized"
        );

        Ok(Self {
            dialect: settings.dialect,
            codecs,
            registry: Box::new(registry),
            requests_processed: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
        })
    }

    pub fn dialect(&self) -> &'static DialectConfig {
        self.dialect
    }

    /// Codec of a served operation.
    pub fn codec(&self, operation: &str) -> Option<&Arc<MessageCodec>> {
        self.codecs.get(operation)
    }

    pub fn stats(&self) -> ProducerStats {
        ProducerStats {
            requests_processed: self.requests_processed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
        }
    }

    /// Handles one request. Errors are returned as SOAP fault envelopes.
    pub fn handle(&self, body: &[u8], template: Option<&XmlTemplate>) -> Vec<u8> {
        self.requests_processed.fetch_add(1, Ordering::Relaxed);

        match self.process(body, template) {
            Ok(response) => response,
            Err(err) => {
                self.requests_failed.fetch_add(1, Ordering::Relaxed);
                let code = err.fault_code();
                warn!(fault_code = code.as_str(), error = %err, "Request failed");
                soap_fault_response(code, &err.to_string()).into_bytes()
            }
        }
    }

    fn process(&self, body: &[u8], template: Option<&XmlTemplate>) -> Result<Vec<u8>> {
        let info = envelope::inspect(body)?;
        if let Some(protocol) = info.protocol {
            if protocol != self.dialect.version {
                return Err(XRoadError::UnsupportedDialect(protocol.to_string()));
            }
        }

        let codec = self
            .codecs
            .get(&info.operation)
            .ok_or_else(|| XRoadError::UnknownOperation(info.operation.clone()))?;

        let handler = match self.registry.resolve(&info.operation) {
            Some(ServiceHandler::Invoke(handler)) => handler,
            Some(ServiceHandler::Unimplemented) | None => {
                return Err(XRoadError::UnknownOperation(info.operation));
            }
        };

        let mut ctx = SerializationContext::new(self.dialect);
        if let Some(template) = template {
            ctx = ctx.with_template(template);
        }

        let values = codec.deserialize_request(&mut XmlCursor::from_bytes(body)?, &ctx)?;
        debug!(operation = %info.operation, parameters = values.len(), "Invoking service");
        let response = handler(&values);

        let mut writer = Writer::new(Vec::new());
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
        codec.serialize_response(
            &mut writer,
            &response,
            &ctx,
            Some(&mut XmlCursor::from_bytes(body)?),
            None,
        )?;

        Ok(writer.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ParameterDescriptor, ServiceContractDescriptor, TypeDescriptor};
    use crate::value::{Fault, Value};

    fn config() -> ProducerConfig {
        ProducerConfig::from_yaml("producer:\n  name: calc\n").unwrap()
    }

    fn contract() -> ContractDefinition {
        ContractDefinition {
            types: Vec::new(),
            operations: vec![ServiceContractDescriptor::new("Divide")
                .parameter(ParameterDescriptor::new("x", TypeDescriptor::parse("int").unwrap()))
                .parameter(ParameterDescriptor::new("y", TypeDescriptor::parse("int").unwrap()))
                .returns(TypeDescriptor::parse("int").unwrap())],
        }
    }

    fn divide(values: &ParameterValues) -> ServiceResponse {
        let x = values["x"].as_i32().unwrap_or_default();
        match values["y"].as_i32().unwrap_or_default() {
            0 => Fault::new("101", "Division by zero").into(),
            y => Value::Int(x / y).into(),
        }
    }

    fn request(x: i32, y: i32) -> String {
        format!(
            r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/" xmlns:xrd="http://x-road.eu/xsd/xroad.xsd"><SOAP-ENV:Header><xrd:id>1</xrd:id></SOAP-ENV:Header><SOAP-ENV:Body><tns:Divide xmlns:tns="http://calc.x-road.eu"><request><x>{}</x><y>{}</y></request></tns:Divide></SOAP-ENV:Body></SOAP-ENV:Envelope>"#,
            x, y
        )
    }

    #[test]
    fn test_handle_result() {
        let producer =
            XRoadProducer::new(&config(), &contract(), HandlerMap::new().with("Divide", divide))
                .unwrap();
        let out = String::from_utf8(producer.handle(request(6, 3).as_bytes(), None)).unwrap();

        assert!(out.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(out.contains("<request><x>6</x><y>3</y></request>"));
        assert!(out.contains("<response><value>2</value></response>"));
        assert_eq!(producer.stats().requests_failed, 0);
    }

    #[test]
    fn test_handler_fault_stays_in_response() {
        let producer =
            XRoadProducer::new(&config(), &contract(), HandlerMap::new().with("Divide", divide))
                .unwrap();
        let out = String::from_utf8(producer.handle(request(1, 0).as_bytes(), None)).unwrap();
        assert!(out.contains("<response><faultCode>101</faultCode><faultString>Division by zero</faultString></response>"));
        assert!(!out.contains("SOAP-ENV:Fault"));
    }

    #[test]
    fn test_unimplemented_operation_fault() {
        let producer =
            XRoadProducer::new(&config(), &contract(), HandlerMap::new().unimplemented("Divide"))
                .unwrap();
        let out = String::from_utf8(producer.handle(request(1, 1).as_bytes(), None)).unwrap();
        assert!(out.contains("<SOAP-ENV:Fault>"));
        assert!(out.contains("UNKNOWN_OPERATION"));

        let stats = producer.stats();
        assert_eq!(stats.requests_processed, 1);
        assert_eq!(stats.requests_failed, 1);
    }

    #[test]
    fn test_malformed_request_fault() {
        let producer = XRoadProducer::new(&config(), &contract(), HandlerMap::new()).unwrap();
        let out = String::from_utf8(producer.handle(b"<not-soap/>", None)).unwrap();
        assert!(out.contains("INVALID_XML"));
    }

    #[test]
    fn test_protocol_mismatch_fault() {
        let producer =
            XRoadProducer::new(&config(), &contract(), HandlerMap::new().with("Divide", divide))
                .unwrap();
        let body = request(1, 1).replace("http://x-road.eu/xsd/xroad.xsd", "http://x-road.ee/xsd/x-road.xsd");
        let out = String::from_utf8(producer.handle(body.as_bytes(), None)).unwrap();
        assert!(out.contains("UNSUPPORTED_PROTOCOL"));
    }
}
