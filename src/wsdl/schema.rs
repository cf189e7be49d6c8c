//! XML Schema fragments of the embedded contract schema.

use crate::catalog::TypeCatalog;
use crate::descriptor::{ParameterDescriptor, Titles, TypeDefinition, TypeDescriptor};
use crate::dialect::{ns, prefix, ArrayMode, DialectConfig, SoapStyle};
use crate::error::{Result, XRoadError};
use crate::mapping::{SimpleType, TypeRegistry};
use crate::xml::{Element, QName};

/// Element shape collected while unwrapping arrays and nullables.
#[derive(Default)]
struct Shape {
    nillable: bool,
    type_name: Option<String>,
    content_type: Option<&'static str>,
    content: Option<Element>,
}

/// Builds schema elements for one dialect over one type catalog.
pub(crate) struct SchemaBuilder<'a> {
    dialect: &'static DialectConfig,
    registry: &'a TypeRegistry,
    catalog: &'a TypeCatalog,
}

impl<'a> SchemaBuilder<'a> {
    pub fn new(
        dialect: &'static DialectConfig,
        registry: &'a TypeRegistry,
        catalog: &'a TypeCatalog,
    ) -> Self {
        Self {
            dialect,
            registry,
            catalog,
        }
    }

    /// Prefixed form of a schema name. Producer names use the default
    /// namespace and stay unprefixed.
    pub fn prefixed(&self, name: &QName) -> String {
        let prefix = match name.namespace.as_str() {
            ns::XSD => Some(prefix::XSD),
            ns::SOAP_ENC => Some(prefix::SOAP_ENC),
            ns::XMIME => Some(prefix::XMIME),
            other if other == self.dialect.namespace => Some(self.dialect.prefix),
            _ => None,
        };
        match prefix {
            Some(p) => format!("{}:{}", p, name.local),
            None => name.local.clone(),
        }
    }

    fn simple_name(&self, simple: SimpleType) -> String {
        self.prefixed(&self.registry.schema_name(simple, self.dialect))
    }

    fn complex_name(&self, name: &str) -> Result<String> {
        self.catalog.resolve(name)?;
        Ok(name.to_string())
    }

    /// Schema type name of a non-array type.
    pub fn type_name(&self, ty: &TypeDescriptor) -> Result<String> {
        match ty {
            TypeDescriptor::Simple(simple) => Ok(self.simple_name(*simple)),
            TypeDescriptor::Nullable(inner) => self.type_name(inner),
            TypeDescriptor::Complex(name) => self.complex_name(name),
            TypeDescriptor::Array { .. } => Err(XRoadError::UnknownType(ty.to_string())),
        }
    }

    /// `xrd:title` element.
    pub fn title(&self, lang: &str, text: &str) -> Element {
        let lang = (!lang.trim().is_empty()).then_some(lang);
        Element::new(format!("{}:title", self.dialect.prefix))
            .attr_opt("xml:lang", lang)
            .text(text)
    }

    /// Title elements with non-blank text, in language order.
    pub fn titles(&self, titles: &Titles) -> Vec<Element> {
        titles
            .iter()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(lang, text)| self.title(lang, text))
            .collect()
    }

    fn annotation(&self, titles: &Titles) -> Option<Element> {
        let nodes = self.titles(titles);
        (!nodes.is_empty()).then(|| {
            Element::new("xsd:annotation").child(Element::new("xsd:appinfo").children(nodes))
        })
    }

    /// Element declaration of a value of type `ty`.
    pub fn element(
        &self,
        name: &str,
        ty: &TypeDescriptor,
        optional: bool,
        data_type: Option<&str>,
        titles: &Titles,
    ) -> Result<Element> {
        let mut shape = Shape::default();
        self.shape(&mut shape, name, ty, data_type)?;

        Ok(Element::new("xsd:element")
            .attr("name", name)
            .attr_opt("minOccurs", optional.then_some("0"))
            .attr_opt("nillable", shape.nillable.then_some("true"))
            .attr_opt("type", shape.type_name)
            .attr_opt("xmime:expectedContentTypes", shape.content_type)
            .child_opt(self.annotation(titles))
            .child_opt(shape.content))
    }

    fn item_element(&self, ty: &TypeDescriptor, data_type: Option<&str>) -> Result<Element> {
        let mut shape = Shape::default();
        self.shape(&mut shape, "item", ty, data_type)?;

        Ok(Element::new("xsd:element")
            .attr("name", "item")
            .attr("minOccurs", "0")
            .attr("maxOccurs", "unbounded")
            .attr_opt("nillable", shape.nillable.then_some("true"))
            .attr_opt("type", shape.type_name)
            .attr_opt("xmime:expectedContentTypes", shape.content_type)
            .child_opt(shape.content))
    }

    fn shape(
        &self,
        shape: &mut Shape,
        name: &str,
        ty: &TypeDescriptor,
        data_type: Option<&str>,
    ) -> Result<()> {
        match ty {
            TypeDescriptor::Array { rank, .. } if *rank > 1 => {
                Err(XRoadError::UnsupportedArrayShape(name.to_string()))
            }
            TypeDescriptor::Array { item, .. } => {
                shape.nillable = true;
                shape.content = Some(self.array_type(item, data_type)?);
                Ok(())
            }
            TypeDescriptor::Nullable(inner) => {
                shape.nillable = true;
                self.shape(shape, name, inner, data_type)
            }
            TypeDescriptor::Simple(simple) => {
                if *simple == SimpleType::Stream {
                    shape.content_type = self.dialect.expected_content_type();
                }
                shape.type_name = Some(match data_type.filter(|d| !d.trim().is_empty()) {
                    Some("base64") => self.prefixed(&QName::xsd("base64Binary")),
                    Some(other) => self.prefixed(&QName::xsd(other)),
                    None => self.simple_name(*simple),
                });
                Ok(())
            }
            TypeDescriptor::Complex(type_name) => {
                shape.nillable = true;
                shape.type_name = Some(self.complex_name(type_name)?);
                Ok(())
            }
        }
    }

    /// Anonymous complex type describing an array of `item`.
    pub fn array_type(&self, item: &TypeDescriptor, data_type: Option<&str>) -> Result<Element> {
        let item_element = self.item_element(item, data_type)?;
        let sequence = Element::new("xsd:sequence").child(item_element);

        match self.dialect.array_mode {
            ArrayMode::ItemSequence => Ok(Element::new("xsd:complexType").child(sequence)),
            ArrayMode::SoapEncoded => {
                let array_type = format!("{}[]", self.array_item_name(item)?);
                let restriction = Element::new("xsd:restriction")
                    .attr("base", format!("{}:Array", prefix::SOAP_ENC))
                    .child(sequence)
                    .child(
                        Element::new("xsd:attribute")
                            .attr("ref", format!("{}:arrayType", prefix::SOAP_ENC))
                            .attr(format!("{}:arrayType", prefix::WSDL), array_type),
                    );
                Ok(Element::new("xsd:complexType")
                    .child(Element::new("xsd:complexContent").child(restriction)))
            }
        }
    }

    fn array_item_name(&self, item: &TypeDescriptor) -> Result<String> {
        match item {
            TypeDescriptor::Array { item, .. } => Ok(format!("{}[]", self.array_item_name(item)?)),
            other => self.type_name(other),
        }
    }

    /// Named complex type of a DTO.
    pub fn dto_type(&self, definition: &TypeDefinition) -> Result<Element> {
        let mut sequence = Element::new("xsd:sequence");
        for property in self.catalog.own_properties(&definition.name)? {
            sequence.push(self.element(
                &property.name,
                &property.ty,
                property.optional,
                property.data_type.as_deref(),
                &property.titles,
            )?);
        }

        let content = match &definition.base {
            Some(base) => Element::new("xsd:complexContent").child(
                Element::new("xsd:extension")
                    .attr("base", self.complex_name(base)?)
                    .child(sequence),
            ),
            None => sequence,
        };

        Ok(Element::new("xsd:complexType")
            .attr("name", &definition.name)
            .attr_opt("abstract", definition.is_abstract.then_some("true"))
            .child(content))
    }

    fn parameter_elements(&self, parameters: &[&ParameterDescriptor]) -> Result<Vec<Element>> {
        parameters
            .iter()
            .map(|p| {
                let name = self
                    .dialect
                    .parameter_name(&p.name, p.element_name.as_deref());
                self.element(name, &p.ty, p.optional, None, &p.titles)
            })
            .collect()
    }

    /// The `request` element of document style operations.
    pub fn request_element(&self, parameters: &[&ParameterDescriptor]) -> Result<Element> {
        let request = self.dialect.request_element;
        match parameters {
            [single] if self.dialect.single_parameter_root => {
                self.element(request, &single.ty, false, None, &Titles::new())
            }
            [] => Ok(Element::new("xsd:element")
                .attr("name", request)
                .child(Element::new("xsd:complexType"))),
            _ => Ok(Element::new("xsd:element").attr("name", request).child(
                Element::new("xsd:complexType").child(
                    Element::new("xsd:sequence").children(self.parameter_elements(parameters)?),
                ),
            )),
        }
    }

    /// Named request type of an operation.
    pub fn request_type(&self, operation: &str, parameters: &[&ParameterDescriptor]) -> Result<Element> {
        let sequence = match self.dialect.style {
            SoapStyle::Rpc => {
                Element::new("xsd:sequence").children(self.parameter_elements(parameters)?)
            }
            SoapStyle::Document => {
                Element::new("xsd:sequence").child(self.request_element(parameters)?)
            }
        };
        Ok(Element::new("xsd:complexType")
            .attr("name", operation)
            .child(sequence))
    }

    /// Named response type of an operation, if the dialect publishes one.
    ///
    /// RPC operations only get a response type for array results; other
    /// results are typed directly on the message part.
    pub fn response_type(
        &self,
        operation: &str,
        parameters: &[&ParameterDescriptor],
        returns: Option<&TypeDescriptor>,
    ) -> Result<Option<Element>> {
        let name = format!("{}Response", operation);

        if self.dialect.style == SoapStyle::Rpc {
            return match returns.map(TypeDescriptor::unwrap_nullable) {
                Some(TypeDescriptor::Array { rank, .. }) if *rank > 1 => {
                    Err(XRoadError::UnsupportedArrayShape(name))
                }
                Some(TypeDescriptor::Array { item, .. }) => {
                    let mut array = self.array_type(item, None)?;
                    array.set_attr("name", name);
                    Ok(Some(array))
                }
                _ => Ok(None),
            };
        }

        let content = match returns {
            Some(ty) => {
                let value = self.element(
                    self.dialect.result_element.unwrap_or("value"),
                    ty,
                    false,
                    None,
                    &Titles::new(),
                )?;
                Element::new("xsd:choice")
                    .child(self.fault_sequence(false))
                    .child(value)
            }
            None => self.fault_sequence(true),
        };

        let response = Element::new("xsd:element")
            .attr("name", self.dialect.response_element)
            .child(Element::new("xsd:complexType").child(Element::new("xsd:sequence").child(content)));

        Ok(Some(
            Element::new("xsd:complexType").attr("name", name).child(
                Element::new("xsd:sequence")
                    .child(self.request_element(parameters)?)
                    .child(response),
            ),
        ))
    }

    fn fault_sequence(&self, optional: bool) -> Element {
        let field = |name: &str| {
            Element::new("xsd:element")
                .attr("name", name)
                .attr("type", format!("{}:{}", self.dialect.prefix, name))
        };
        Element::new("xsd:sequence")
            .attr_opt("minOccurs", optional.then_some("0"))
            .child(field("faultCode"))
            .child(field("faultString"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PropertyOrder;
    use crate::descriptor::PropertyDescriptor;
    use crate::dialect::ProtocolVersion;

    fn ty(s: &str) -> TypeDescriptor {
        TypeDescriptor::parse(s).unwrap()
    }

    fn catalog() -> TypeCatalog {
        TypeCatalog::from_definitions(
            1,
            PropertyOrder::Name,
            [TypeDefinition::new("Person")
                .property(PropertyDescriptor::new("name", ty("string")))],
        )
        .unwrap()
    }

    #[test]
    fn test_literal_array_element() {
        let registry = TypeRegistry::new();
        let catalog = catalog();
        let schema = SchemaBuilder::new(ProtocolVersion::V31.dialect(), &registry, &catalog);
        let e = schema
            .element("codes", &ty("int[]"), true, None, &Titles::new())
            .unwrap();

        assert_eq!(e.get_attr("minOccurs"), Some("0"));
        assert_eq!(e.get_attr("nillable"), Some("true"));
        assert_eq!(e.get_attr("type"), None);
        let complex = e.elements().next().unwrap();
        let item = complex.elements().next().unwrap().elements().next().unwrap();
        assert_eq!(item.get_attr("name"), Some("item"));
        assert_eq!(item.get_attr("maxOccurs"), Some("unbounded"));
        assert_eq!(item.get_attr("type"), Some("xsd:int"));
    }

    #[test]
    fn test_encoded_array_restriction() {
        let registry = TypeRegistry::new();
        let catalog = catalog();
        let schema = SchemaBuilder::new(ProtocolVersion::V20.dialect(), &registry, &catalog);
        let complex = schema.array_type(&ty("Person"), None).unwrap();

        let restriction = complex.elements().next().unwrap().elements().next().unwrap();
        assert_eq!(restriction.name, "xsd:restriction");
        assert_eq!(restriction.get_attr("base"), Some("SOAP-ENC:Array"));
        let attribute = restriction.elements().nth(1).unwrap();
        assert_eq!(attribute.get_attr("ref"), Some("SOAP-ENC:arrayType"));
        assert_eq!(attribute.get_attr("wsdl:arrayType"), Some("Person[]"));
    }

    #[test]
    fn test_stream_element_per_dialect() {
        let registry = TypeRegistry::new();
        let catalog = catalog();

        let v40 = SchemaBuilder::new(ProtocolVersion::V40.dialect(), &registry, &catalog);
        let e = v40.element("file", &ty("stream"), false, None, &Titles::new()).unwrap();
        assert_eq!(e.get_attr("type"), Some("xsd:base64Binary"));
        assert_eq!(
            e.get_attr("xmime:expectedContentTypes"),
            Some("application/octet-stream")
        );

        let v20 = SchemaBuilder::new(ProtocolVersion::V20.dialect(), &registry, &catalog);
        let e = v20.element("file", &ty("stream"), false, None, &Titles::new()).unwrap();
        assert_eq!(e.get_attr("type"), Some("SOAP-ENC:base64Binary"));
        assert_eq!(e.get_attr("xmime:expectedContentTypes"), None);
    }

    #[test]
    fn test_data_type_override() {
        let registry = TypeRegistry::new();
        let catalog = catalog();
        let schema = SchemaBuilder::new(ProtocolVersion::V31.dialect(), &registry, &catalog);
        let e = schema
            .element("photo", &ty("string"), false, Some("base64"), &Titles::new())
            .unwrap();
        assert_eq!(e.get_attr("type"), Some("xsd:base64Binary"));
    }

    #[test]
    fn test_rejects_rank_and_unknown_types() {
        let registry = TypeRegistry::new();
        let catalog = catalog();
        let schema = SchemaBuilder::new(ProtocolVersion::V40.dialect(), &registry, &catalog);

        assert!(matches!(
            schema.element("m", &ty("int[,]"), false, None, &Titles::new()),
            Err(XRoadError::UnsupportedArrayShape(_))
        ));
        assert!(matches!(
            schema.element("c", &ty("Company"), false, None, &Titles::new()),
            Err(XRoadError::UnknownType(ref n)) if n == "Company"
        ));
    }

    #[test]
    fn test_annotation_titles() {
        let registry = TypeRegistry::new();
        let catalog = catalog();
        let schema = SchemaBuilder::new(ProtocolVersion::V40.dialect(), &registry, &catalog);
        let mut titles = Titles::new();
        titles.insert("et".to_string(), "Nimi".to_string());
        titles.insert("en".to_string(), " ".to_string());

        let e = schema.element("name", &ty("string"), false, None, &titles).unwrap();
        let appinfo = e.elements().next().unwrap().elements().next().unwrap();
        let title: Vec<_> = appinfo.elements().collect();
        assert_eq!(title.len(), 1);
        assert_eq!(title[0].name, "xrd:title");
        assert_eq!(title[0].get_attr("xml:lang"), Some("et"));
    }
}
