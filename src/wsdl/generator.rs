//! WSDL 1.1 contract generator.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::{debug, info};

use crate::catalog::{PropertyOrder, TypeCatalog};
use crate::descriptor::{PartDirection, ServiceContractDescriptor, Titles, TypeDescriptor};
use crate::dialect::{ns, prefix, DialectConfig, SoapStyle};
use crate::error::{Result, XRoadError};
use crate::header::{self, HeaderField};
use crate::mapping::{SimpleType, TypeRegistry};
use crate::xml::{self, Element};

use super::schema::SchemaBuilder;

/// Name of the message holding the required header parts.
const STANDARD_HEADER: &str = "stdhdr";

/// Producer level settings of a generated contract.
#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    pub producer_name: String,
    /// Producer name written to the `address` element; defaults to
    /// `producer_name`.
    pub environment_name: Option<String>,
    pub service_version: u32,
    pub location: Option<String>,
    pub imported_schema_path: Option<String>,
    pub header_message: Option<String>,
    pub titles: Titles,
    pub required_headers: Vec<HeaderField>,
    /// Identity written in the leading comment.
    pub generator_name: String,
}

impl GeneratorOptions {
    pub fn new(producer_name: impl Into<String>, service_version: u32) -> Self {
        Self {
            producer_name: producer_name.into(),
            environment_name: None,
            service_version,
            location: None,
            imported_schema_path: None,
            header_message: None,
            titles: Titles::new(),
            required_headers: Vec::new(),
            generator_name: concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
                .to_string(),
        }
    }
}

/// Collects types and operations, then builds the contract in one pass.
///
/// The generator is consumed by [`ContractGenerator::build`]; nothing is
/// rendered until every name and type reference has been checked.
pub struct ContractGenerator {
    options: GeneratorOptions,
    dialect: &'static DialectConfig,
    registry: Arc<TypeRegistry>,
    catalog: Option<Arc<TypeCatalog>>,
    operations: Vec<ServiceContractDescriptor>,
}

impl ContractGenerator {
    pub fn new(options: GeneratorOptions, dialect: &'static DialectConfig) -> Self {
        Self {
            options,
            dialect,
            registry: Arc::new(TypeRegistry::new()),
            catalog: None,
            operations: Vec::new(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<TypeRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the DTO catalog. Its version must be the published service
    /// version.
    pub fn add_types(&mut self, catalog: Arc<TypeCatalog>) -> Result<()> {
        if catalog.version() != self.options.service_version {
            return Err(XRoadError::Config(format!(
                "Type catalog is built for version {}, contract publishes version {}",
                catalog.version(),
                self.options.service_version
            )));
        }
        if self.catalog.is_some() {
            return Err(XRoadError::Config("Types are already added".to_string()));
        }
        self.catalog = Some(catalog);
        Ok(())
    }

    pub fn add_operation(&mut self, operation: ServiceContractDescriptor) {
        self.operations.push(operation);
    }

    pub fn add_operations<I>(&mut self, operations: I)
    where
        I: IntoIterator<Item = ServiceContractDescriptor>,
    {
        self.operations.extend(operations);
    }

    /// Builds the contract document.
    pub fn build(self) -> Result<ContractDocument> {
        let version = self.options.service_version;
        let catalog = self
            .catalog
            .clone()
            .unwrap_or_else(|| Arc::new(TypeCatalog::new(version, PropertyOrder::default())));

        let mut operations: Vec<_> = self
            .operations
            .iter()
            .filter(|op| {
                let published = op.versions.contains(version);
                if !published {
                    debug!(operation = %op.name, version, "Operation outside service version, skipped");
                }
                published
            })
            .collect();
        operations.sort_by(|a, b| a.name.cmp(&b.name));

        let mut build = Build::new(&self, &catalog)?;
        for definition in catalog.types() {
            build.add_type_name(&definition.name)?;
            build.schema_types.push(build.schema.dto_type(definition)?);
        }
        for operation in &operations {
            build.add_operation(operation)?;
        }

        let root = build.finish();
        info!(
            producer = %self.options.producer_name,
            dialect = %self.dialect.version,
            version,
            types = catalog.types().len(),
            operations = operations.len(),
            "Contract built"
        );

        Ok(ContractDocument {
            generator_name: self.options.generator_name.clone(),
            header_message: self.options.header_message.clone(),
            root,
        })
    }
}

/// Working state of one [`ContractGenerator::build`] call.
struct Build<'a> {
    options: &'a GeneratorOptions,
    dialect: &'static DialectConfig,
    schema: SchemaBuilder<'a>,
    target_namespace: String,
    headers: Vec<HeaderField>,
    names: BTreeSet<String>,
    imports: Vec<Element>,
    import_prefixes: Vec<(String, String)>,
    schema_types: Vec<Element>,
    operation_types: Vec<Element>,
    elements: BTreeMap<String, Element>,
    messages: Vec<Element>,
    port_operations: Vec<Element>,
    binding_operations: Vec<Element>,
}

impl<'a> Build<'a> {
    fn new(generator: &'a ContractGenerator, catalog: &'a TypeCatalog) -> Result<Self> {
        let dialect = generator.dialect;
        let options = &generator.options;
        Ok(Self {
            options,
            dialect,
            schema: SchemaBuilder::new(dialect, &generator.registry, catalog),
            target_namespace: dialect.producer_namespace(&options.producer_name),
            headers: header::required_headers(&options.required_headers, dialect)?,
            names: BTreeSet::new(),
            imports: Vec::new(),
            import_prefixes: Vec::new(),
            schema_types: Vec::new(),
            operation_types: Vec::new(),
            elements: BTreeMap::new(),
            messages: Vec::new(),
            port_operations: Vec::new(),
            binding_operations: Vec::new(),
        })
    }

    fn add_type_name(&mut self, name: &str) -> Result<()> {
        if !self.names.insert(name.to_string()) {
            return Err(XRoadError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    fn is_rpc(&self) -> bool {
        self.dialect.style == SoapStyle::Rpc
    }

    fn add_operation(&mut self, operation: &ServiceContractDescriptor) -> Result<()> {
        let version = self.options.service_version;
        let parameters: Vec<_> = operation.parameters_in(version).collect();

        let response_name = format!("{}Response", operation.name);
        self.add_type_name(&operation.name)?;
        self.add_type_name(&response_name)?;

        if operation.imported {
            self.add_imported_operation(operation)?;
        } else {
            self.operation_types
                .push(self.schema.request_type(&operation.name, &parameters)?);
            if let Some(response_type) =
                self.schema
                    .response_type(&operation.name, &parameters, operation.returns.as_ref())?
            {
                self.operation_types.push(response_type);
            }

            if !self.is_rpc() {
                for name in [&operation.name, &response_name] {
                    self.elements.insert(
                        name.clone(),
                        Element::new("xsd:element").attr("name", name).attr("type", name),
                    );
                }
            }

            let (input, output) = self.operation_messages(operation)?;
            self.messages.push(input);
            self.messages.push(output);
        }

        if operation.exported {
            debug!(operation = %operation.name, "Exported operation, binding skipped");
            return Ok(());
        }

        self.port_operations.push(
            Element::new("wsdl:operation")
                .attr("name", &operation.name)
                .child_opt(self.documentation(&operation.titles))
                .child(Element::new("wsdl:input").attr("message", &operation.name))
                .child(
                    Element::new("wsdl:output")
                        .attr("message", format!("{}Response", operation.name)),
                ),
        );
        self.binding_operations.push(self.operation_binding(operation));

        debug!(
            operation = %operation.name,
            parameters = parameters.len(),
            imported = operation.imported,
            "Operation added to contract"
        );
        Ok(())
    }

    fn part(name: &str) -> Element {
        Element::new("wsdl:part").attr("name", name)
    }

    fn operation_messages(&self, operation: &ServiceContractDescriptor) -> Result<(Element, Element)> {
        let name = &operation.name;
        let response_name = format!("{}Response", name);
        let mut input = Element::new("wsdl:message").attr("name", name);
        let mut output = Element::new("wsdl:message").attr("name", &response_name);

        if !self.is_rpc() {
            input.push(Self::part("body").attr("element", name));
            output.push(Self::part("body").attr("element", &response_name));
            return Ok((input, output));
        }

        input.push(Self::part(self.dialect.request_element).attr("type", name));
        output.push(Self::part(self.dialect.request_echo_element).attr("type", name));

        if let Some(returns) = &operation.returns {
            let keha = match returns.unwrap_nullable() {
                TypeDescriptor::Array { .. } => response_name.clone(),
                other => self.schema.type_name(other)?,
            };
            output.push(Self::part(self.dialect.response_element).attr("type", keha));
        }

        let binary = self
            .schema
            .type_name(&TypeDescriptor::Simple(SimpleType::Stream))?;
        if self.is_multipart(operation.multipart_request) {
            input.push(Self::part("p1").attr("type", &binary));
        }
        if self.is_multipart(operation.multipart_response) {
            output.push(Self::part("p2").attr("type", &binary));
        }

        Ok((input, output))
    }

    fn add_imported_operation(&mut self, operation: &ServiceContractDescriptor) -> Result<()> {
        let base = self.options.imported_schema_path.as_deref().ok_or_else(|| {
            XRoadError::Config(format!(
                "Operation `{}` is imported but no imported schema path is configured",
                operation.name
            ))
        })?;

        let namespace = format!("{}/{}", self.target_namespace.trim_end_matches('/'), operation.name);
        let import_prefix = format!("imp{}", self.import_prefixes.len() + 1);
        self.imports.push(
            Element::new("xsd:import")
                .attr("namespace", &namespace)
                .attr(
                    "schemaLocation",
                    self.dialect.imported_schema_path(base, &operation.name),
                ),
        );
        self.import_prefixes.push((import_prefix.clone(), namespace));

        let request = format!("{}:{}", import_prefix, operation.name);
        let response = format!("{}:{}Response", import_prefix, operation.name);
        let mut input = Element::new("wsdl:message").attr("name", &operation.name);
        let mut output =
            Element::new("wsdl:message").attr("name", format!("{}Response", operation.name));

        if self.is_rpc() {
            input.push(Self::part(self.dialect.request_element).attr("type", &request));
            output.push(Self::part(self.dialect.request_echo_element).attr("type", &request));
            output.push(Self::part(self.dialect.response_element).attr("type", &response));

            for part in &operation.extra_parts {
                let typed = Self::part(&part.name)
                    .attr("type", format!("{}:{}", import_prefix, part.type_name));
                match part.direction {
                    PartDirection::Input => input.push(typed),
                    PartDirection::Output => output.push(typed),
                }
            }
        } else {
            input.push(Self::part("body").attr("element", &request));
            output.push(Self::part("body").attr("element", &response));
        }

        self.messages.push(input);
        self.messages.push(output);
        Ok(())
    }

    fn is_multipart(&self, flag: bool) -> bool {
        flag && self.dialect.supports_multipart
    }

    fn documentation(&self, titles: &Titles) -> Option<Element> {
        let nodes = self.schema.titles(titles);
        (!nodes.is_empty()).then(|| Element::new("wsdl:documentation").children(nodes))
    }

    fn soap_body(&self) -> Element {
        let encoded = self.dialect.body_encoding();
        Element::new("soap:body")
            .attr("use", self.dialect.body_use.as_str())
            .attr_opt("namespace", encoded.map(|_| self.target_namespace.clone()))
            .attr_opt("encodingStyle", encoded)
    }

    fn soap_headers(&self) -> Vec<Element> {
        let (namespace, encoding) = self.dialect.header_binding();
        self.headers
            .iter()
            .map(|h| {
                Element::new("soap:header")
                    .attr("message", STANDARD_HEADER)
                    .attr("part", h.element_name())
                    .attr("use", self.dialect.header_use.as_str())
                    .attr_opt("namespace", namespace)
                    .attr_opt("encodingStyle", encoding)
            })
            .collect()
    }

    fn message_binding(&self, name: &str, multipart: bool, binary_part: &str) -> Element {
        let binding = Element::new(name);
        if !multipart {
            return binding.child(self.soap_body()).children(self.soap_headers());
        }

        binding.child(
            Element::new("mime:multipartRelated")
                .child(
                    Element::new("mime:part")
                        .child(self.soap_body())
                        .children(self.soap_headers()),
                )
                .child(
                    Element::new("mime:part").child(
                        Element::new("mime:content")
                            .attr("part", binary_part)
                            .attr("type", "application/binary"),
                    ),
                ),
        )
    }

    fn operation_binding(&self, operation: &ServiceContractDescriptor) -> Element {
        let version = operation
            .service_version
            .unwrap_or(self.options.service_version);

        Element::new("wsdl:operation")
            .attr("name", &operation.name)
            .child(Element::new(format!("{}:version", self.dialect.prefix)).text(format!("v{}", version)))
            .child(
                Element::new("soap:operation")
                    .attr("soapAction", "")
                    .attr("style", self.dialect.style.as_str()),
            )
            .child(self.message_binding(
                "wsdl:input",
                self.is_multipart(operation.multipart_request),
                "p1",
            ))
            .child(self.message_binding(
                "wsdl:output",
                self.is_multipart(operation.multipart_response),
                "p2",
            ))
    }

    fn definitions(&self) -> Element {
        let dialect = self.dialect;
        let mut root = Element::new("wsdl:definitions")
            .attr(format!("xmlns:{}", prefix::MIME), ns::MIME)
            .attr(format!("xmlns:{}", prefix::SOAP), ns::SOAP)
            .attr(format!("xmlns:{}", prefix::SOAP_ENV), ns::SOAP_ENV)
            .attr(format!("xmlns:{}", prefix::WSDL), ns::WSDL)
            .attr(format!("xmlns:{}", prefix::XMIME), ns::XMIME)
            .attr(format!("xmlns:{}", dialect.prefix), dialect.namespace)
            .attr(format!("xmlns:{}", prefix::XSD), ns::XSD)
            .attr("xmlns", &self.target_namespace);

        if dialect.is_encoded() {
            root.set_attr(format!("xmlns:{}", prefix::SOAP_ENC), ns::SOAP_ENC);
        }
        for (p, namespace) in &self.import_prefixes {
            root.set_attr(format!("xmlns:{}", p), namespace);
        }
        root.attr("targetNamespace", &self.target_namespace)
    }

    fn finish(self) -> Element {
        let dialect = self.dialect;
        let options = self.options;

        let schema = Element::new("xsd:schema")
            .attr("targetNamespace", &self.target_namespace)
            .child(
                Element::new("xsd:import")
                    .attr("namespace", dialect.namespace)
                    .attr("schemaLocation", dialect.namespace),
            )
            .child(
                Element::new("xsd:import")
                    .attr("namespace", dialect.support_schema())
                    .attr("schemaLocation", dialect.support_schema()),
            )
            .children(self.imports.iter().cloned())
            .children(self.schema_types.iter().cloned())
            .children(self.operation_types.iter().cloned())
            .children(self.elements.values().cloned());

        let header_message = (!self.headers.is_empty()).then(|| {
            Element::new("wsdl:message")
                .attr("name", STANDARD_HEADER)
                .children(self.headers.iter().map(|h| {
                    Self::part(h.element_name())
                        .attr("element", format!("{}:{}", dialect.prefix, h.element_name()))
                }))
        });

        let producer = &options.producer_name;
        let port_type = Element::new("wsdl:portType")
            .attr("name", format!("{}PortType", producer))
            .children(self.port_operations.iter().cloned());

        let binding = Element::new("wsdl:binding")
            .attr("name", format!("{}Binding", producer))
            .attr("type", format!("{}PortType", producer))
            .child(
                Element::new("soap:binding")
                    .attr("style", dialect.style.as_str())
                    .attr("transport", ns::SOAP_HTTP),
            )
            .children(self.binding_operations.iter().cloned());

        let environment = options
            .environment_name
            .clone()
            .unwrap_or_else(|| producer.clone());
        let service = Element::new("wsdl:service")
            .attr("name", format!("{}Service", producer))
            .child(
                Element::new("wsdl:port")
                    .attr("name", format!("{}Port", producer))
                    .attr("binding", format!("{}Binding", producer))
                    .child(
                        Element::new(format!("{}:address", dialect.prefix))
                            .attr("producer", environment),
                    )
                    .children(self.schema.titles(&options.titles))
                    .child(
                        Element::new("soap:address")
                            .attr("location", options.location.clone().unwrap_or_default()),
                    ),
            );

        self.definitions()
            .child(Element::new("wsdl:types").child(schema))
            .child_opt(header_message)
            .children(self.messages.iter().cloned())
            .child(port_type)
            .child(binding)
            .child(service)
    }
}

/// A built contract, ready to render.
#[derive(Debug, Clone)]
pub struct ContractDocument {
    generator_name: String,
    header_message: Option<String>,
    root: Element,
}

impl ContractDocument {
    /// The `wsdl:definitions` element.
    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Renders the document stamped with the given generation time.
    pub fn render_at(&self, generated_at: DateTime<Local>) -> Result<String> {
        let mut comments = vec![
            format!("WSDL document generated by {}", self.generator_name),
            format!(
                "WSDL document generated at {}",
                generated_at.format("%d.%m.%Y %H:%M:%S")
            ),
        ];
        if let Some(message) = self.header_message.as_deref().filter(|m| !m.trim().is_empty()) {
            comments.push(message.to_string());
        }
        xml::render(&comments, &self.root)
    }

    /// Renders the document stamped with the current local time.
    pub fn render(&self) -> Result<String> {
        self.render_at(Local::now())
    }
}
