//! Per-call request/response templates.
//!
//! A template selects which parameters and response members take part in a
//! call and which of them are mandatory. A missing node means the contract
//! default applies: included, not required.

use serde::{Deserialize, Serialize};

use crate::descriptor::ServiceContractDescriptor;

fn default_include() -> bool {
    true
}

/// One parameter or member node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XmlTemplateNode {
    pub name: String,
    #[serde(default = "default_include")]
    pub include: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub children: Vec<XmlTemplateNode>,
}

impl XmlTemplateNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            include: true,
            required: false,
            children: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn excluded(mut self) -> Self {
        self.include = false;
        self
    }

    pub fn child(mut self, node: XmlTemplateNode) -> Self {
        self.children.push(node);
        self
    }

    /// Child node by member name.
    pub fn get(&self, name: &str) -> Option<&XmlTemplateNode> {
        self.children.iter().find(|c| c.name == name)
    }
}

/// Template of one operation call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XmlTemplate {
    pub parameters: Vec<XmlTemplateNode>,
    pub response: Option<XmlTemplateNode>,
}

impl XmlTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks every non-optional parameter of the operation as required.
    /// Parameters outside the given service version are left out.
    pub fn from_contract(operation: &ServiceContractDescriptor, version: u32) -> Self {
        Self {
            parameters: operation
                .parameters_in(version)
                .map(|p| XmlTemplateNode {
                    required: !p.optional,
                    ..XmlTemplateNode::new(p.name.clone())
                })
                .collect(),
            response: None,
        }
    }

    pub fn parameter(mut self, node: XmlTemplateNode) -> Self {
        self.parameters.push(node);
        self
    }

    pub fn with_response(mut self, node: XmlTemplateNode) -> Self {
        self.response = Some(node);
        self
    }

    pub fn parameter_node(&self, name: &str) -> Option<&XmlTemplateNode> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn parameter_nodes(&self) -> &[XmlTemplateNode] {
        &self.parameters
    }

    pub fn response_node(&self) -> Option<&XmlTemplateNode> {
        self.response.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ParameterDescriptor, TypeDescriptor, VersionRange};

    #[test]
    fn test_from_contract_marks_required() {
        let op = ServiceContractDescriptor::new("Find")
            .parameter(ParameterDescriptor::new("code", TypeDescriptor::parse("string").unwrap()))
            .parameter(
                ParameterDescriptor::new("limit", TypeDescriptor::parse("int").unwrap()).optional(),
            );
        let template = XmlTemplate::from_contract(&op, 1);
        assert!(template.parameter_node("code").unwrap().required);
        assert!(!template.parameter_node("limit").unwrap().required);
        assert!(template.parameter_node("other").is_none());
    }

    #[test]
    fn test_from_contract_follows_service_version() {
        let op = ServiceContractDescriptor::new("Find")
            .parameter(ParameterDescriptor::new("code", TypeDescriptor::parse("string").unwrap()))
            .parameter(
                ParameterDescriptor::new("country", TypeDescriptor::parse("string").unwrap())
                    .versions(VersionRange {
                        added: Some(2),
                        removed: None,
                    }),
            );
        let v1 = XmlTemplate::from_contract(&op, 1);
        assert!(v1.parameter_node("code").unwrap().required);
        assert!(v1.parameter_node("country").is_none());

        let v2 = XmlTemplate::from_contract(&op, 2);
        assert!(v2.parameter_node("country").unwrap().required);
    }

    #[test]
    fn test_template_from_yaml_defaults() {
        let yaml = r#"
parameters:
  - name: person
    children:
      - name: email
        include: false
      - name: name
        required: true
"#;
        let template: XmlTemplate = serde_yaml::from_str(yaml).unwrap();
        let person = template.parameter_node("person").unwrap();
        assert!(person.include);
        assert!(!person.required);
        assert!(!person.get("email").unwrap().include);
        assert!(person.get("name").unwrap().required);
        assert!(template.response_node().is_none());
    }
}
