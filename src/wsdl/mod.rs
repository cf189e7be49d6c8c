//! Service contract (WSDL 1.1 with embedded XSD) generation.

mod generator;
mod schema;

use std::sync::Arc;

use tracing::debug;

pub use generator::{ContractDocument, ContractGenerator, GeneratorOptions};

use crate::catalog::TypeCatalog;
use crate::config::ProducerConfig;
use crate::descriptor::ContractDefinition;
use crate::error::Result;

/// Builds the contract of a configured producer, publishing only the
/// operations the configured filter lets through.
pub fn generate(config: &ProducerConfig, contract: &ContractDefinition) -> Result<ContractDocument> {
    config.validate()?;
    let filter = config.operations.filter()?;

    let catalog = TypeCatalog::from_definitions(
        config.producer.version,
        config.serialization.property_order,
        contract.types.iter().cloned(),
    )?;

    let mut generator = ContractGenerator::new(config.generator_options(), config.dialect());
    generator.add_types(Arc::new(catalog))?;

    for operation in &contract.operations {
        if filter.is_published(&operation.name) {
            generator.add_operation(operation.clone());
        } else {
            debug!(operation = %operation.name, "Operation filtered out of contract");
        }
    }

    generator.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperationMode;
    use crate::descriptor::{ParameterDescriptor, ServiceContractDescriptor, TypeDescriptor};

    fn contract() -> ContractDefinition {
        let op = |name: &str| {
            ServiceContractDescriptor::new(name)
                .parameter(ParameterDescriptor::new("x", TypeDescriptor::parse("int").unwrap()))
        };
        ContractDefinition {
            types: Vec::new(),
            operations: vec![op("Add"), op("InternalReset")],
        }
    }

    #[test]
    fn test_generate_with_denylist() {
        let mut config = ProducerConfig::default();
        config.producer.name = "calc".to_string();
        config.operations.enabled = true;
        config.operations.mode = OperationMode::Denylist;
        config.operations.patterns = vec!["Internal*".to_string()];

        let document = generate(&config, &contract()).unwrap();
        let rendered = document.render().unwrap();
        assert!(rendered.contains("<wsdl:operation name=\"Add\">"));
        assert!(!rendered.contains("InternalReset"));
    }

    #[test]
    fn test_generate_rejects_invalid_config() {
        let config = ProducerConfig::default();
        assert!(generate(&config, &contract()).is_err());
    }
}
