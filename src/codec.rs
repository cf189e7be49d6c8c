//! Per-operation message codec.
//!
//! A [`MessageCodec`] is built once per operation from its descriptor and is
//! immutable afterwards, so one instance serves concurrent calls. Per-call
//! state lives in a [`SerializationContext`]; the document cursors are passed
//! next to it.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::TypeCatalog;
use crate::cursor::{Fragment, NamespaceScope, XmlCursor};
use crate::descriptor::{ServiceContractDescriptor, TypeDescriptor};
use crate::dialect::{ns, prefix, ArrayMode, DialectConfig};
use crate::envelope;
use crate::error::{Result, XRoadError};
use crate::header::HeaderField;
use crate::mapping::{SimpleType, TypeRegistry};
use crate::template::{XmlTemplate, XmlTemplateNode};
use crate::value::{Fault, ParameterValues, ServiceResponse, Value};

/// Prefix bound to the producer namespace in written messages.
const TNS: &str = "tns";

/// Parameter binding policy of inbound requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentLayout {
    /// Positional binding, element names validated
    Strict,
    /// Binding by element name, any order
    #[default]
    NonStrict,
}

/// Per-call state shared by the codec and the value codecs.
#[derive(Debug, Clone, Copy)]
pub struct SerializationContext<'a> {
    pub dialect: &'static DialectConfig,
    pub template: Option<&'a XmlTemplate>,
}

impl<'a> SerializationContext<'a> {
    pub fn new(dialect: &'static DialectConfig) -> Self {
        Self {
            dialect,
            template: None,
        }
    }

    pub fn with_template(mut self, template: &'a XmlTemplate) -> Self {
        self.template = Some(template);
        self
    }

    fn parameter_node(&self, name: &str) -> Option<&'a XmlTemplateNode> {
        self.template.and_then(|t| t.parameter_node(name))
    }

    fn response_node(&self) -> Option<&'a XmlTemplateNode> {
        self.template.and_then(|t| t.response_node())
    }
}

/// Shared inputs of every codec of one producer.
#[derive(Debug, Clone)]
pub struct CodecSettings {
    pub dialect: &'static DialectConfig,
    pub producer_namespace: String,
    pub layout: ContentLayout,
    /// Header elements echoed into responses
    pub required_headers: Vec<HeaderField>,
    pub catalog: Arc<TypeCatalog>,
    pub registry: Arc<TypeRegistry>,
}

impl CodecSettings {
    pub fn new(dialect: &'static DialectConfig, producer_name: &str, catalog: Arc<TypeCatalog>) -> Self {
        Self {
            dialect,
            producer_namespace: dialect.producer_namespace(producer_name),
            layout: ContentLayout::default(),
            required_headers: Vec::new(),
            catalog,
            registry: Arc::new(TypeRegistry::new()),
        }
    }
}

#[derive(Debug, Clone)]
struct Parameter {
    name: String,
    /// Element name on the wire
    element: String,
    ty: TypeDescriptor,
    optional: bool,
}

/// Parts of an inbound message copied into its response.
#[derive(Debug, Default)]
struct RequestEcho {
    headers: Vec<Fragment>,
    request: Option<Fragment>,
    /// Prefixed declarations in scope at the request element, by prefix.
    declarations: Vec<(String, String)>,
}

impl RequestEcho {
    /// Takes over the declarations of the element the cursor stands on.
    /// Inner declarations shadow outer ones of the same prefix.
    fn inherit(&mut self, cursor: &XmlCursor<'_>) {
        let Some(element) = cursor.current() else {
            return;
        };
        for (prefix, namespace) in element.namespace_declarations() {
            match self.declarations.iter_mut().find(|(p, _)| p == prefix) {
                Some(binding) => binding.1 = namespace.to_string(),
                None => self
                    .declarations
                    .push((prefix.to_string(), namespace.to_string())),
            }
        }
    }
}

/// Serializer and deserializer of one operation's messages.
pub struct MessageCodec {
    operation: String,
    dialect: &'static DialectConfig,
    namespace: String,
    layout: ContentLayout,
    parameters: Vec<Parameter>,
    result: Option<TypeDescriptor>,
    multipart_request: bool,
    multipart_response: bool,
    required_headers: Vec<HeaderField>,
    catalog: Arc<TypeCatalog>,
    registry: Arc<TypeRegistry>,
}

impl MessageCodec {
    pub fn new(operation: &ServiceContractDescriptor, settings: &CodecSettings) -> Result<Self> {
        let version = settings.catalog.version();
        if !operation.versions.contains(version) {
            return Err(XRoadError::invalid_query(format!(
                "Operation `{}` is not available in service version {}",
                operation.name, version
            )));
        }

        let dialect = settings.dialect;
        let parameters = operation
            .parameters_in(version)
            .map(|p| Parameter {
                name: p.name.clone(),
                element: dialect
                    .parameter_name(&p.name, p.element_name.as_deref())
                    .to_string(),
                ty: p.ty.clone(),
                optional: p.optional,
            })
            .collect::<Vec<_>>();

        for parameter in &parameters {
            validate_type(&parameter.ty, &settings.catalog)?;
        }
        if let Some(result) = &operation.returns {
            validate_type(result, &settings.catalog)?;
        }

        debug!(
            operation = %operation.name,
            dialect = %dialect.version,
            parameters = parameters.len(),
            "Built message codec"
        );

        Ok(Self {
            operation: operation.name.clone(),
            dialect,
            namespace: settings.producer_namespace.clone(),
            layout: settings.layout,
            parameters,
            result: operation.returns.clone(),
            multipart_request: operation.multipart_request && dialect.supports_multipart,
            multipart_response: operation.multipart_response && dialect.supports_multipart,
            required_headers: settings.required_headers.clone(),
            catalog: settings.catalog.clone(),
            registry: settings.registry.clone(),
        })
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn is_multipart_request(&self) -> bool {
        self.multipart_request
    }

    pub fn is_multipart_response(&self) -> bool {
        self.multipart_response
    }

    /// A single parameter is typed directly onto the request element.
    fn is_root_layout(&self) -> bool {
        self.dialect.single_parameter_root && self.parameters.len() == 1
    }

    fn check_dialect(&self, ctx: &SerializationContext<'_>) -> Result<()> {
        if ctx.dialect.version != self.dialect.version {
            return Err(XRoadError::Config(format!(
                "Codec of `{}` is built for protocol version {}, not {}",
                self.operation, self.dialect.version, ctx.dialect.version
            )));
        }
        Ok(())
    }

    /// Binds request parameters from an inbound envelope.
    pub fn deserialize_request(
        &self,
        cursor: &mut XmlCursor<'_>,
        ctx: &SerializationContext<'_>,
    ) -> Result<ParameterValues> {
        self.check_dialect(ctx)?;
        let request = self.locate_request(cursor)?;

        let mut values = ParameterValues::new();
        if self.is_root_layout() {
            let parameter = &self.parameters[0];
            let node = ctx.parameter_node(&parameter.name);
            if node.map_or(true, |n| n.include) {
                let value = self.read_value(&request, &parameter.ty, node, ctx)?;
                values.insert(parameter.name.clone(), value);
            }
        } else {
            match self.layout {
                ContentLayout::Strict => self.bind_positional(&request, ctx, &mut values)?,
                ContentLayout::NonStrict => self.bind_by_name(&request, ctx, &mut values)?,
            }
        }

        for parameter in &self.parameters {
            values.entry(parameter.name.clone()).or_insert(Value::Null);
        }

        if let Some(template) = ctx.template {
            // Nodes of parameters outside this service version do not apply.
            let required = template.parameter_nodes().iter().filter(|n| {
                n.required && self.parameters.iter().any(|p| p.name == n.name)
            });
            for node in required {
                if values.get(&node.name).map_or(true, Value::is_null) {
                    return Err(XRoadError::MissingRequiredParameter(node.name.clone()));
                }
            }
        }

        debug!(
            operation = %self.operation,
            layout = ?self.layout,
            bound = values.len(),
            "Deserialized request"
        );
        Ok(values)
    }

    fn locate_request(&self, cursor: &mut XmlCursor<'_>) -> Result<Fragment> {
        if !cursor.move_to_element(1, |e| e.is_soap("Body"))? {
            return Err(XRoadError::invalid_query("SOAP Body not found"));
        }
        if !cursor.move_to_element(2, |_| true)? {
            return Err(XRoadError::invalid_query("Operation element not found"));
        }
        if let Some(found) = cursor.current() {
            if found.local_name != self.operation {
                return Err(XRoadError::invalid_query(format!(
                    "Expected operation `{}`, found `{}`",
                    self.operation, found.local_name
                )));
            }
        }

        let element = self.dialect.request_element;
        if !cursor.move_to_element(3, |e| e.local_name == element)? {
            return Err(XRoadError::invalid_query(format!(
                "Missing `{}` element in `{}`",
                element, self.operation
            )));
        }
        cursor.read_subtree()
    }

    fn bind_positional(
        &self,
        request: &Fragment,
        ctx: &SerializationContext<'_>,
        values: &mut ParameterValues,
    ) -> Result<()> {
        let mut children = request.children.iter().peekable();

        for parameter in &self.parameters {
            let node = ctx.parameter_node(&parameter.name);
            if node.is_some_and(|n| !n.include) {
                continue;
            }

            match children.peek() {
                Some(child) if child.local_name() == parameter.element => {
                    let value = self.read_value(child, &parameter.ty, node, ctx)?;
                    values.insert(parameter.name.clone(), value);
                    children.next();
                }
                Some(child) if !parameter.optional => {
                    return Err(XRoadError::invalid_query(format!(
                        "Expected element `{}`, found `{}`",
                        parameter.element,
                        child.local_name()
                    )));
                }
                _ => {}
            }
        }

        match children.next() {
            Some(extra) => Err(XRoadError::invalid_query(format!(
                "Unexpected element `{}` in `{}`",
                extra.local_name(),
                request.local_name()
            ))),
            None => Ok(()),
        }
    }

    fn bind_by_name(
        &self,
        request: &Fragment,
        ctx: &SerializationContext<'_>,
        values: &mut ParameterValues,
    ) -> Result<()> {
        for child in &request.children {
            let parameter = self
                .parameters
                .iter()
                .find(|p| p.element == child.local_name())
                .ok_or_else(|| {
                    XRoadError::invalid_query(format!(
                        "Unexpected element `{}` in `{}`",
                        child.local_name(),
                        request.local_name()
                    ))
                })?;

            let node = ctx.parameter_node(&parameter.name);
            if node.is_some_and(|n| !n.include) {
                continue;
            }
            if values.contains_key(&parameter.name) {
                return Err(XRoadError::invalid_query(format!(
                    "Duplicate element `{}`",
                    parameter.element
                )));
            }

            let value = self.read_value(child, &parameter.ty, node, ctx)?;
            values.insert(parameter.name.clone(), value);
        }
        Ok(())
    }

    fn read_value(
        &self,
        fragment: &Fragment,
        ty: &TypeDescriptor,
        node: Option<&XmlTemplateNode>,
        ctx: &SerializationContext<'_>,
    ) -> Result<Value> {
        if fragment.is_nil() {
            return Ok(Value::Null);
        }

        match ty {
            TypeDescriptor::Nullable(inner) => self.read_value(fragment, inner, node, ctx),
            TypeDescriptor::Simple(simple) => {
                if !fragment.children.is_empty() {
                    return Err(XRoadError::mismatch(fragment.local_name(), simple.name()));
                }
                self.registry
                    .codec(*simple)
                    .decode(fragment.content(), fragment.local_name(), ctx)
            }
            TypeDescriptor::Array { rank, .. } if *rank > 1 => Err(
                XRoadError::UnsupportedArrayShape(fragment.local_name().to_string()),
            ),
            TypeDescriptor::Array { item, .. } => fragment
                .children
                .iter()
                .map(|c| self.read_value(c, item, node, ctx))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            TypeDescriptor::Complex(type_name) => self.read_struct(fragment, type_name, node, ctx),
        }
    }

    fn read_struct(
        &self,
        fragment: &Fragment,
        type_name: &str,
        node: Option<&XmlTemplateNode>,
        ctx: &SerializationContext<'_>,
    ) -> Result<Value> {
        let properties = self.catalog.properties_of(type_name)?;
        let mut members = BTreeMap::new();

        for child in &fragment.children {
            let property = properties
                .iter()
                .find(|p| p.name == child.local_name())
                .ok_or_else(|| {
                    XRoadError::invalid_query(format!(
                        "Unexpected element `{}` in `{}`",
                        child.local_name(),
                        type_name
                    ))
                })?;

            let member_node = node.and_then(|n| n.get(&property.name));
            if member_node.is_some_and(|n| !n.include) {
                continue;
            }
            let value = self.read_value(child, &property.ty, member_node, ctx)?;
            members.insert(property.name.clone(), value);
        }

        for property in &properties {
            let value = members.entry(property.name.clone()).or_insert(Value::Null);
            let required = node
                .and_then(|n| n.get(&property.name))
                .is_some_and(|n| n.required);
            if required && value.is_null() {
                return Err(XRoadError::MissingRequiredParameter(property.name.clone()));
            }
        }

        Ok(Value::Struct(members))
    }

    /// Reads the operation result, or the fault carried in its place.
    pub fn deserialize_response(
        &self,
        cursor: &mut XmlCursor<'_>,
        ctx: &SerializationContext<'_>,
    ) -> Result<ServiceResponse> {
        self.check_dialect(ctx)?;

        if !cursor.move_to_element(1, |e| e.is_soap("Body"))? {
            return Err(XRoadError::invalid_query("SOAP Body not found"));
        }
        if !cursor.move_to_element(2, |_| true)? {
            return Err(XRoadError::invalid_query("Response payload not found"));
        }

        let response_name = format!("{}Response", self.operation);
        let payload = cursor
            .current()
            .cloned()
            .ok_or_else(|| XRoadError::invalid_query("Response payload not found"))?;

        if payload.is_soap("Fault") {
            let fault = cursor.read_subtree()?;
            debug!(operation = %self.operation, "Response carries a SOAP fault");
            return Ok(ServiceResponse::Fault(soap_fault(&fault)));
        }

        if !payload.is(&self.namespace, &response_name) {
            return Err(XRoadError::invalid_query(format!(
                "Expected `{{{}}}{}`, found `{{{}}}{}`",
                self.namespace,
                response_name,
                payload.namespace.as_deref().unwrap_or(""),
                payload.local_name
            )));
        }

        let element = self.dialect.response_element;
        if !cursor.move_to_element(3, |e| e.local_name == element)? {
            return match self.result {
                None => Ok(ServiceResponse::Result(Value::Null)),
                Some(_) => Err(XRoadError::invalid_query(format!(
                    "Missing `{}` element in `{}`",
                    element, response_name
                ))),
            };
        }

        let response = cursor.read_subtree()?;
        if self.response_may_be_fault() {
            if let Some(fault) = xroad_fault(&response) {
                return Ok(ServiceResponse::Fault(fault));
            }
        }

        let Some(ty) = &self.result else {
            return Ok(ServiceResponse::Result(Value::Null));
        };

        let node = ctx.response_node();
        let value = match ctx.dialect.result_element {
            Some(name) => match response.child(name) {
                Some(value) => self.read_value(value, ty, node, ctx)?,
                None => Value::Null,
            },
            None => self.read_value(&response, ty, node, ctx)?,
        };
        Ok(ServiceResponse::Result(value))
    }

    /// Whether `faultCode`/`faultString` children of the response element
    /// denote a fault. Without a result element, a DTO result with members of
    /// those names is always read as the result.
    fn response_may_be_fault(&self) -> bool {
        if self.dialect.result_element.is_some() {
            return true;
        }
        let Some(TypeDescriptor::Complex(name)) =
            self.result.as_ref().map(TypeDescriptor::unwrap_nullable)
        else {
            return true;
        };
        self.catalog.properties_of(name).map_or(true, |properties| {
            !properties
                .iter()
                .any(|p| p.name == "faultCode" || p.name == "faultString")
        })
    }

    /// Writes the operation wrapper with the request parameters.
    pub fn serialize_request<W: Write>(
        &self,
        writer: &mut Writer<W>,
        values: &ParameterValues,
        ctx: &SerializationContext<'_>,
    ) -> Result<()> {
        self.check_dialect(ctx)?;

        if let Some(unknown) = values
            .keys()
            .find(|k| !self.parameters.iter().any(|p| &p.name == *k))
        {
            return Err(XRoadError::invalid_query(format!(
                "Unknown parameter `{}` for `{}`",
                unknown, self.operation
            )));
        }

        let wrapper = format!("{}:{}", TNS, self.operation);
        writer.write_event(Event::Start(self.wrapper_start(&wrapper, ctx)))?;

        let request = ctx.dialect.request_element;
        if self.is_root_layout() {
            let parameter = &self.parameters[0];
            let value = values.get(&parameter.name).unwrap_or(&Value::Null);
            let node = ctx.parameter_node(&parameter.name);
            self.write_value(writer, request, value, &parameter.ty, false, node, ctx)?;
        } else {
            writer.write_event(Event::Start(BytesStart::new(request)))?;
            for parameter in &self.parameters {
                if let Some(value) = values.get(&parameter.name) {
                    let node = ctx.parameter_node(&parameter.name);
                    self.write_value(
                        writer,
                        &parameter.element,
                        value,
                        &parameter.ty,
                        parameter.optional,
                        node,
                        ctx,
                    )?;
                }
            }
            writer.write_event(Event::End(BytesEnd::new(request)))?;
        }

        writer.write_event(Event::End(BytesEnd::new(wrapper)))?;
        Ok(())
    }

    /// Writes the response envelope.
    ///
    /// When `request` is given, required header elements and the request
    /// body are echoed from it. The trailer hook runs right before the
    /// response wrapper closes.
    pub fn serialize_response<W: Write>(
        &self,
        writer: &mut Writer<W>,
        response: &ServiceResponse,
        ctx: &SerializationContext<'_>,
        request: Option<&mut XmlCursor<'_>>,
        trailer: Option<&dyn Fn(&mut Writer<W>) -> Result<()>>,
    ) -> Result<()> {
        self.check_dialect(ctx)?;

        let RequestEcho {
            headers,
            request: echo,
            declarations,
        } = match request {
            Some(cursor) => self.read_echo(cursor)?,
            None => RequestEcho::default(),
        };

        let mut scope = NamespaceScope::new();
        writer.write_event(Event::Start(envelope::envelope_start(ctx.dialect, &mut scope)))?;

        if !headers.is_empty() {
            writer.write_event(Event::Start(BytesStart::new("SOAP-ENV:Header")))?;
            for header in &headers {
                header.write_to(writer, &mut scope)?;
            }
            writer.write_event(Event::End(BytesEnd::new("SOAP-ENV:Header")))?;
        }

        writer.write_event(Event::Start(BytesStart::new("SOAP-ENV:Body")))?;

        let wrapper = format!("{}:{}Response", TNS, self.operation);
        let mut start = BytesStart::new(wrapper.as_str());
        start.push_attribute((format!("xmlns:{}", TNS).as_str(), self.namespace.as_str()));
        scope.declare(Some(TNS.to_string()), &self.namespace);
        writer.write_event(Event::Start(start))?;

        if let Some(echo) = &echo {
            echo.write_renamed(
                writer,
                ctx.dialect.request_echo_element,
                &declarations,
                &mut scope,
            )?;
        }

        let element = ctx.dialect.response_element;
        match response {
            ServiceResponse::Fault(fault) => {
                writer.write_event(Event::Start(BytesStart::new(element)))?;
                self.write_fault_field(writer, "faultCode", &fault.code, ctx)?;
                self.write_fault_field(writer, "faultString", &fault.string, ctx)?;
                writer.write_event(Event::End(BytesEnd::new(element)))?;
            }
            ServiceResponse::Result(value) => {
                let node = ctx.response_node();
                match (&self.result, ctx.dialect.result_element) {
                    (None, Some(_)) => {
                        writer.write_event(Event::Empty(BytesStart::new(element)))?;
                    }
                    (None, None) => {}
                    (Some(ty), Some(result)) => {
                        writer.write_event(Event::Start(BytesStart::new(element)))?;
                        self.write_value(writer, result, value, ty, false, node, ctx)?;
                        writer.write_event(Event::End(BytesEnd::new(element)))?;
                    }
                    (Some(ty), None) => {
                        self.write_value(writer, element, value, ty, false, node, ctx)?;
                    }
                }
            }
        }

        if let Some(trailer) = trailer {
            trailer(writer)?;
        }

        writer.write_event(Event::End(BytesEnd::new(wrapper)))?;
        writer.write_event(Event::End(BytesEnd::new("SOAP-ENV:Body")))?;
        writer.write_event(Event::End(BytesEnd::new("SOAP-ENV:Envelope")))?;

        debug!(
            operation = %self.operation,
            fault = response.is_fault(),
            echoed_headers = headers.len(),
            "Serialized response"
        );
        Ok(())
    }

    /// Reads required header elements and the request element from a second
    /// cursor over the inbound message.
    fn read_echo(&self, cursor: &mut XmlCursor<'_>) -> Result<RequestEcho> {
        let mut echo = RequestEcho::default();
        let namespace = self.dialect.namespace;

        if !cursor.move_to_element(0, |e| e.is_soap("Envelope"))? {
            return Ok(echo);
        }
        echo.inherit(cursor);

        if !cursor.move_to_element(1, |e| e.is_soap("Header") || e.is_soap("Body"))? {
            return Ok(echo);
        }

        if cursor.current().is_some_and(|e| e.is_soap("Header")) {
            while cursor.move_to_element(2, |_| true)? {
                let header = cursor.read_subtree()?;
                let required = header.element.namespace.as_deref() == Some(namespace)
                    && self
                        .required_headers
                        .iter()
                        .any(|h| h.element_name() == header.local_name());
                if required {
                    echo.headers.push(header);
                }
            }
        }

        if !cursor.move_to_element(1, |e| e.is_soap("Body"))? {
            return Ok(echo);
        }
        echo.inherit(cursor);
        if !cursor.move_to_element(2, |_| true)? {
            return Ok(echo);
        }
        echo.inherit(cursor);

        let request = self.dialect.request_element;
        if cursor.move_to_element(3, |e| e.local_name == request)? {
            echo.request = Some(cursor.read_subtree()?);
        }
        Ok(echo)
    }

    fn wrapper_start(&self, name: &str, ctx: &SerializationContext<'_>) -> BytesStart<'static> {
        let mut start = BytesStart::new(name.to_string());
        start.push_attribute((format!("xmlns:{}", TNS).as_str(), self.namespace.as_str()));
        start.push_attribute((format!("xmlns:{}", prefix::XSI).as_str(), ns::XSI));
        if ctx.dialect.explicit_type_attributes {
            start.push_attribute((format!("xmlns:{}", prefix::XSD).as_str(), ns::XSD));
        }
        if ctx.dialect.is_encoded() {
            start.push_attribute((format!("xmlns:{}", prefix::SOAP_ENC).as_str(), ns::SOAP_ENC));
        }
        start
    }

    fn write_fault_field<W: Write>(
        &self,
        writer: &mut Writer<W>,
        name: &str,
        text: &str,
        ctx: &SerializationContext<'_>,
    ) -> Result<()> {
        let mut start = BytesStart::new(name);
        if let Some(xsi_type) = self.registry.type_attribute(SimpleType::String, ctx.dialect) {
            start.push_attribute(("xsi:type", xsi_type.as_str()));
        }
        writer.write_event(Event::Start(start))?;
        writer.write_event(Event::Text(BytesText::new(text)))?;
        writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_value<W: Write>(
        &self,
        writer: &mut Writer<W>,
        name: &str,
        value: &Value,
        ty: &TypeDescriptor,
        optional: bool,
        node: Option<&XmlTemplateNode>,
        ctx: &SerializationContext<'_>,
    ) -> Result<()> {
        if node.is_some_and(|n| !n.include) {
            return Ok(());
        }

        if value.is_null() {
            if !optional {
                let mut start = BytesStart::new(name);
                start.push_attribute(("xsi:nil", "true"));
                writer.write_event(Event::Empty(start))?;
            }
            return Ok(());
        }

        match ty {
            TypeDescriptor::Nullable(inner) => {
                self.write_value(writer, name, value, inner, optional, node, ctx)
            }
            TypeDescriptor::Simple(simple) => {
                let text = self.registry.codec(*simple).encode(value, name, ctx)?;
                let mut start = BytesStart::new(name);
                if let Some(xsi_type) = self.registry.type_attribute(*simple, ctx.dialect) {
                    start.push_attribute(("xsi:type", xsi_type.as_str()));
                }
                writer.write_event(Event::Start(start))?;
                writer.write_event(Event::Text(BytesText::new(&text)))?;
                writer.write_event(Event::End(BytesEnd::new(name)))?;
                Ok(())
            }
            TypeDescriptor::Array { rank, .. } if *rank > 1 => {
                Err(XRoadError::UnsupportedArrayShape(name.to_string()))
            }
            TypeDescriptor::Array { item, .. } => {
                let Value::Array(items) = value else {
                    return Err(XRoadError::mismatch(name, "array"));
                };

                let mut start = BytesStart::new(name);
                if ctx.dialect.array_mode == ArrayMode::SoapEncoded {
                    let array_type = format!("{}[{}]", self.wire_type_name(item, ctx), items.len());
                    start.push_attribute(("SOAP-ENC:arrayType", array_type.as_str()));
                }
                writer.write_event(Event::Start(start))?;
                for entry in items {
                    self.write_value(writer, "item", entry, item, false, node, ctx)?;
                }
                writer.write_event(Event::End(BytesEnd::new(name)))?;
                Ok(())
            }
            TypeDescriptor::Complex(type_name) => {
                let Value::Struct(members) = value else {
                    return Err(XRoadError::mismatch(name, type_name.as_str()));
                };

                let properties = self.catalog.properties_of(type_name)?;
                if let Some(unknown) = members
                    .keys()
                    .find(|k| !properties.iter().any(|p| &p.name == *k))
                {
                    return Err(XRoadError::invalid_query(format!(
                        "Unknown member `{}` of `{}`",
                        unknown, type_name
                    )));
                }

                let mut start = BytesStart::new(name);
                if ctx.dialect.explicit_type_attributes {
                    start.push_attribute(("xsi:type", format!("{}:{}", TNS, type_name).as_str()));
                }
                writer.write_event(Event::Start(start))?;
                for property in properties {
                    let member = members.get(&property.name).unwrap_or(&Value::Null);
                    let member_node = node.and_then(|n| n.get(&property.name));
                    self.write_value(
                        writer,
                        &property.name,
                        member,
                        &property.ty,
                        property.optional,
                        member_node,
                        ctx,
                    )?;
                }
                writer.write_event(Event::End(BytesEnd::new(name)))?;
                Ok(())
            }
        }
    }

    /// Prefixed type name used in `SOAP-ENC:arrayType` attributes.
    fn wire_type_name(&self, ty: &TypeDescriptor, ctx: &SerializationContext<'_>) -> String {
        match ty {
            TypeDescriptor::Nullable(inner) => self.wire_type_name(inner, ctx),
            TypeDescriptor::Simple(simple) => {
                let prefix = match simple {
                    SimpleType::Stream => ctx.dialect.binary_namespace().1,
                    _ => prefix::XSD,
                };
                format!("{}:{}", prefix, simple.schema_local_name())
            }
            TypeDescriptor::Array { item, .. } => format!("{}[]", self.wire_type_name(item, ctx)),
            TypeDescriptor::Complex(name) => format!("{}:{}", TNS, name),
        }
    }
}

/// Rejects type shapes no message can carry.
fn validate_type(ty: &TypeDescriptor, catalog: &TypeCatalog) -> Result<()> {
    match ty {
        TypeDescriptor::Simple(_) => Ok(()),
        TypeDescriptor::Nullable(inner) => validate_type(inner, catalog),
        TypeDescriptor::Array { rank, .. } if *rank > 1 => {
            Err(XRoadError::UnsupportedArrayShape(ty.to_string()))
        }
        TypeDescriptor::Array { item, .. } => validate_type(item, catalog),
        TypeDescriptor::Complex(name) => catalog.resolve(name).map(|_| ()),
    }
}

fn soap_fault(fragment: &Fragment) -> Fault {
    let text = |name: &str| {
        fragment
            .child(name)
            .map(|c| c.text.trim().to_string())
            .unwrap_or_default()
    };
    Fault::new(text("faultcode"), text("faultstring"))
}

fn xroad_fault(response: &Fragment) -> Option<Fault> {
    let code = response.child("faultCode").and_then(Fragment::content);
    let string = response.child("faultString").and_then(Fragment::content);
    if code.is_none() && string.is_none() {
        return None;
    }
    Some(Fault::new(
        code.unwrap_or_default().trim(),
        string.unwrap_or_default().trim(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PropertyOrder;
    use crate::descriptor::{ParameterDescriptor, PropertyDescriptor, TypeDefinition, VersionRange};
    use crate::dialect::ProtocolVersion;

    fn catalog() -> Arc<TypeCatalog> {
        let person = TypeDefinition::new("Person")
            .property(PropertyDescriptor::new("name", TypeDescriptor::parse("string").unwrap()))
            .property(
                PropertyDescriptor::new("email", TypeDescriptor::parse("string").unwrap())
                    .optional(),
            );
        Arc::new(TypeCatalog::from_definitions(1, PropertyOrder::Name, [person]).unwrap())
    }

    fn add() -> ServiceContractDescriptor {
        ServiceContractDescriptor::new("Add")
            .parameter(ParameterDescriptor::new("x", TypeDescriptor::parse("int").unwrap()))
            .parameter(ParameterDescriptor::new("y", TypeDescriptor::parse("int").unwrap()))
            .returns(TypeDescriptor::parse("int").unwrap())
    }

    fn codec(version: ProtocolVersion, op: &ServiceContractDescriptor) -> MessageCodec {
        let settings = CodecSettings::new(version.dialect(), "calc", catalog());
        MessageCodec::new(op, &settings).unwrap()
    }

    fn envelope(body: &str) -> String {
        format!(
            r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"><SOAP-ENV:Body>{}</SOAP-ENV:Body></SOAP-ENV:Envelope>"#,
            body
        )
    }

    #[test]
    fn test_deserialize_add_request() {
        let codec = codec(ProtocolVersion::V40, &add());
        let ctx = SerializationContext::new(ProtocolVersion::V40.dialect());
        let xml = envelope(
            r#"<tns:Add xmlns:tns="http://calc.x-road.eu"><request><x>2</x><y>3</y></request></tns:Add>"#,
        );
        let values = codec
            .deserialize_request(&mut XmlCursor::new(&xml), &ctx)
            .unwrap();
        assert_eq!(values["x"], Value::Int(2));
        assert_eq!(values["y"], Value::Int(3));
    }

    #[test]
    fn test_missing_request_element() {
        let codec = codec(ProtocolVersion::V31, &add());
        let ctx = SerializationContext::new(ProtocolVersion::V31.dialect());
        let xml = envelope(r#"<Add><keha><x>2</x></keha></Add>"#);
        let err = codec
            .deserialize_request(&mut XmlCursor::new(&xml), &ctx)
            .unwrap_err();
        assert!(matches!(err, XRoadError::InvalidQuery(_)));
    }

    #[test]
    fn test_strict_rejects_swapped_names() {
        let settings = CodecSettings {
            layout: ContentLayout::Strict,
            ..CodecSettings::new(ProtocolVersion::V40.dialect(), "calc", catalog())
        };
        let codec = MessageCodec::new(&add(), &settings).unwrap();
        let ctx = SerializationContext::new(ProtocolVersion::V40.dialect());
        let xml = envelope(r#"<Add><request><y>3</y><x>2</x></request></Add>"#);
        let err = codec
            .deserialize_request(&mut XmlCursor::new(&xml), &ctx)
            .unwrap_err();
        assert!(matches!(err, XRoadError::InvalidQuery(ref m) if m.contains("Expected element `x`")));
    }

    #[test]
    fn test_nonstrict_rejects_unknown_element() {
        let codec = codec(ProtocolVersion::V40, &add());
        let ctx = SerializationContext::new(ProtocolVersion::V40.dialect());
        let xml = envelope(r#"<Add><request><x>2</x><z>3</z></request></Add>"#);
        let err = codec
            .deserialize_request(&mut XmlCursor::new(&xml), &ctx)
            .unwrap_err();
        assert!(matches!(err, XRoadError::InvalidQuery(_)));
    }

    #[test]
    fn test_template_required_parameter() {
        let op = add();
        let codec = codec(ProtocolVersion::V40, &op);
        let template = XmlTemplate::from_contract(&op, 1);
        let ctx = SerializationContext::new(ProtocolVersion::V40.dialect()).with_template(&template);
        let xml = envelope(r#"<Add><request><x>2</x></request></Add>"#);
        let err = codec
            .deserialize_request(&mut XmlCursor::new(&xml), &ctx)
            .unwrap_err();
        assert!(matches!(err, XRoadError::MissingRequiredParameter(ref n) if n == "y"));

        let no_template = SerializationContext::new(ProtocolVersion::V40.dialect());
        let values = codec
            .deserialize_request(&mut XmlCursor::new(&xml), &no_template)
            .unwrap();
        assert_eq!(values["y"], Value::Null);
    }

    #[test]
    fn test_template_ignores_parameters_of_later_versions() {
        let op = ServiceContractDescriptor::new("Find")
            .parameter(ParameterDescriptor::new("code", TypeDescriptor::parse("string").unwrap()))
            .parameter(
                ParameterDescriptor::new("country", TypeDescriptor::parse("string").unwrap())
                    .versions(VersionRange {
                        added: Some(2),
                        removed: None,
                    }),
            )
            .returns(TypeDescriptor::parse("string").unwrap());
        let codec = codec(ProtocolVersion::V40, &op);
        let xml = envelope(r#"<Find><request>A</request></Find>"#);

        let template = XmlTemplate::from_contract(&op, 1);
        let ctx = SerializationContext::new(ProtocolVersion::V40.dialect()).with_template(&template);
        let values = codec
            .deserialize_request(&mut XmlCursor::new(&xml), &ctx)
            .unwrap();
        assert_eq!(values["code"], Value::from("A"));
        assert!(!values.contains_key("country"));

        // A template built for a later version still binds the v1 request.
        let later = XmlTemplate::from_contract(&op, 2);
        let ctx = SerializationContext::new(ProtocolVersion::V40.dialect()).with_template(&later);
        assert!(codec.deserialize_request(&mut XmlCursor::new(&xml), &ctx).is_ok());
    }

    #[test]
    fn test_single_parameter_root_layout() {
        let op = ServiceContractDescriptor::new("GetPerson")
            .parameter(ParameterDescriptor::new("person", TypeDescriptor::parse("Person").unwrap()))
            .returns(TypeDescriptor::parse("string").unwrap());
        let codec = codec(ProtocolVersion::V40, &op);
        let ctx = SerializationContext::new(ProtocolVersion::V40.dialect());

        let mut values = ParameterValues::new();
        values.insert(
            "person".to_string(),
            Value::structure([("name", Value::from("Mari"))]),
        );
        let mut writer = Writer::new(Vec::new());
        codec.serialize_request(&mut writer, &values, &ctx).unwrap();
        let body = String::from_utf8(writer.into_inner()).unwrap();
        assert!(body.contains("<request><name>Mari</name></request>"));

        let decoded = codec
            .deserialize_request(&mut XmlCursor::new(&envelope(&body)), &ctx)
            .unwrap();
        assert_eq!(
            decoded["person"],
            Value::structure([("email", Value::Null), ("name", Value::from("Mari"))])
        );
    }

    #[test]
    fn test_serialize_response_literal() {
        let codec = codec(ProtocolVersion::V40, &add());
        let ctx = SerializationContext::new(ProtocolVersion::V40.dialect());
        let mut writer = Writer::new(Vec::new());
        codec
            .serialize_response(&mut writer, &Value::Int(5).into(), &ctx, None, None)
            .unwrap();
        let out = String::from_utf8(writer.into_inner()).unwrap();
        assert!(out.contains(
            r#"<tns:AddResponse xmlns:tns="http://calc.x-road.eu"><response><value>5</value></response></tns:AddResponse>"#
        ));
    }

    #[test]
    fn test_request_echo_keeps_wrapper_prefixes() {
        let op = ServiceContractDescriptor::new("Register")
            .parameter(ParameterDescriptor::new("person", TypeDescriptor::parse("Person").unwrap()))
            .returns(TypeDescriptor::parse("string").unwrap());
        let codec = codec(ProtocolVersion::V20, &op);
        let ctx = SerializationContext::new(ProtocolVersion::V20.dialect());
        let xml = envelope(
            r#"<ns1:Register xmlns:ns1="http://producers.calc.xtee.riik.ee/producer/calc"><keha><person xsi:type="ns1:Person"><name>Mari</name></person></keha></ns1:Register>"#,
        );

        let mut writer = Writer::new(Vec::new());
        codec
            .serialize_response(
                &mut writer,
                &Value::from("ok").into(),
                &ctx,
                Some(&mut XmlCursor::new(&xml)),
                None,
            )
            .unwrap();
        let out = String::from_utf8(writer.into_inner()).unwrap();
        assert!(out.contains(
            r#"<paring xmlns:ns1="http://producers.calc.xtee.riik.ee/producer/calc"><person xsi:type="ns1:Person"><name>Mari</name></person></paring>"#
        ));
    }

    #[test]
    fn test_encoded_dto_with_fault_code_member_is_a_result() {
        let status = TypeDefinition::new("Status")
            .property(PropertyDescriptor::new("faultCode", TypeDescriptor::parse("string").unwrap()))
            .property(PropertyDescriptor::new("message", TypeDescriptor::parse("string").unwrap()));
        let catalog = TypeCatalog::from_definitions(1, PropertyOrder::Name, [status]).unwrap();
        let settings = CodecSettings::new(ProtocolVersion::V20.dialect(), "calc", Arc::new(catalog));
        let op = ServiceContractDescriptor::new("Check").returns(TypeDescriptor::parse("Status").unwrap());
        let status_codec = MessageCodec::new(&op, &settings).unwrap();
        let ctx = SerializationContext::new(ProtocolVersion::V20.dialect());

        let value = Value::structure([
            ("faultCode", Value::from("E1")),
            ("message", Value::from("Queued")),
        ]);
        let mut writer = Writer::new(Vec::new());
        status_codec
            .serialize_response(&mut writer, &value.clone().into(), &ctx, None, None)
            .unwrap();
        let out = String::from_utf8(writer.into_inner()).unwrap();

        let decoded = status_codec
            .deserialize_response(&mut XmlCursor::new(&out), &ctx)
            .unwrap();
        assert_eq!(decoded, ServiceResponse::Result(value));

        // A plain result type keeps fault detection.
        let codec = codec(ProtocolVersion::V20, &add());
        let mut writer = Writer::new(Vec::new());
        let fault = ServiceResponse::Fault(Fault::new("101", "Division by zero"));
        codec
            .serialize_response(&mut writer, &fault, &ctx, None, None)
            .unwrap();
        let out = String::from_utf8(writer.into_inner()).unwrap();
        let decoded = codec
            .deserialize_response(&mut XmlCursor::new(&out), &ctx)
            .unwrap();
        assert_eq!(decoded, fault);
    }

    #[test]
    fn test_serialize_fault_encoded() {
        let codec = codec(ProtocolVersion::V20, &add());
        let ctx = SerializationContext::new(ProtocolVersion::V20.dialect());
        let mut writer = Writer::new(Vec::new());
        let fault = ServiceResponse::Fault(Fault::new("101", "Division by zero"));
        codec
            .serialize_response(&mut writer, &fault, &ctx, None, None)
            .unwrap();
        let out = String::from_utf8(writer.into_inner()).unwrap();
        assert!(out.contains(r#"<keha><faultCode xsi:type="xsd:string">101</faultCode>"#));
        assert!(out.contains(r#"SOAP-ENV:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/""#));
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        let codec = codec(ProtocolVersion::V40, &add());
        let ctx = SerializationContext::new(ProtocolVersion::V40.dialect());
        let mut values = ParameterValues::new();
        values.insert("z".to_string(), Value::Int(1));
        let mut writer = Writer::new(Vec::new());
        assert!(codec.serialize_request(&mut writer, &values, &ctx).is_err());
    }

    #[test]
    fn test_context_dialect_must_match() {
        let codec = codec(ProtocolVersion::V40, &add());
        let ctx = SerializationContext::new(ProtocolVersion::V31.dialect());
        let xml = envelope("<Add><request/></Add>");
        assert!(matches!(
            codec.deserialize_request(&mut XmlCursor::new(&xml), &ctx),
            Err(XRoadError::Config(_))
        ));
    }

    #[test]
    fn test_codec_rejects_unknown_type_and_rank() {
        let settings = CodecSettings::new(ProtocolVersion::V40.dialect(), "calc", catalog());
        let op = ServiceContractDescriptor::new("Bad")
            .parameter(ParameterDescriptor::new("m", TypeDescriptor::parse("int[,]").unwrap()));
        assert!(matches!(
            MessageCodec::new(&op, &settings),
            Err(XRoadError::UnsupportedArrayShape(_))
        ));

        let op = ServiceContractDescriptor::new("Bad")
            .returns(TypeDescriptor::parse("Company").unwrap());
        assert!(matches!(
            MessageCodec::new(&op, &settings),
            Err(XRoadError::UnknownType(_))
        ));
    }
}
