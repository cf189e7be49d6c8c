//! Version-filtered catalog of DTO types.
//!
//! The catalog is the single place complex type references resolve. It is
//! built once per contract and shared (`Arc`) by the contract generator and
//! every message codec of that contract.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::descriptor::{PropertyDescriptor, TypeDefinition};
use crate::error::{Result, XRoadError};

/// Ordering policy applied to DTO properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PropertyOrder {
    /// Case-insensitive property name order
    #[default]
    Name,
    /// Declaration order
    Declared,
}

/// DTO definitions visible in one service version.
#[derive(Debug, Clone)]
pub struct TypeCatalog {
    version: u32,
    ordering: PropertyOrder,
    types: HashMap<String, TypeDefinition>,
    seen: HashSet<String>,
}

impl TypeCatalog {
    pub fn new(version: u32, ordering: PropertyOrder) -> Self {
        Self {
            version,
            ordering,
            types: HashMap::new(),
            seen: HashSet::new(),
        }
    }

    /// Builds a catalog from a list of definitions.
    pub fn from_definitions<I>(version: u32, ordering: PropertyOrder, definitions: I) -> Result<Self>
    where
        I: IntoIterator<Item = TypeDefinition>,
    {
        let mut catalog = Self::new(version, ordering);
        for definition in definitions {
            catalog.register(definition)?;
        }
        Ok(catalog)
    }

    /// Registers a definition. Definitions outside the catalog version are
    /// remembered for collision checks but are not resolvable.
    pub fn register(&mut self, definition: TypeDefinition) -> Result<()> {
        if !self.seen.insert(definition.name.clone()) {
            return Err(XRoadError::DuplicateName(definition.name));
        }

        if !definition.versions.contains(self.version) {
            debug!(
                type_name = %definition.name,
                version = self.version,
                "Type outside service version, skipped"
            );
            return Ok(());
        }

        self.types.insert(definition.name.clone(), definition);
        Ok(())
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn ordering(&self) -> PropertyOrder {
        self.ordering
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn resolve(&self, name: &str) -> Result<&TypeDefinition> {
        self.types
            .get(name)
            .ok_or_else(|| XRoadError::UnknownType(name.to_string()))
    }

    /// Visible definitions sorted by name.
    pub fn types(&self) -> Vec<&TypeDefinition> {
        let mut types: Vec<_> = self.types.values().collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        types
    }

    /// Properties declared on the type itself, version-filtered and ordered.
    pub fn own_properties(&self, name: &str) -> Result<Vec<&PropertyDescriptor>> {
        let definition = self.resolve(name)?;
        let mut properties: Vec<_> = definition
            .properties
            .iter()
            .filter(|p| p.versions.contains(self.version))
            .collect();

        if self.ordering == PropertyOrder::Name {
            properties.sort_by(|a, b| {
                a.name
                    .to_lowercase()
                    .cmp(&b.name.to_lowercase())
                    .then_with(|| a.name.cmp(&b.name))
            });
        }

        Ok(properties)
    }

    /// All properties of a type including its base chain, base members first.
    pub fn properties_of(&self, name: &str) -> Result<Vec<&PropertyDescriptor>> {
        let mut chain = Vec::new();
        let mut current = Some(name);
        while let Some(type_name) = current {
            if chain.contains(&type_name) {
                return Err(XRoadError::UnknownType(format!(
                    "{} (cyclic base type)",
                    type_name
                )));
            }
            chain.push(type_name);
            current = self.resolve(type_name)?.base.as_deref();
        }

        let mut properties = Vec::new();
        for type_name in chain.into_iter().rev() {
            properties.extend(self.own_properties(type_name)?);
        }
        Ok(properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{TypeDescriptor, VersionRange};

    fn person() -> TypeDefinition {
        TypeDefinition::new("Person")
            .property(PropertyDescriptor::new("name", TypeDescriptor::parse("string").unwrap()))
            .property(PropertyDescriptor::new("Age", TypeDescriptor::parse("int").unwrap()))
            .property(
                PropertyDescriptor::new("email", TypeDescriptor::parse("string").unwrap())
                    .versions(VersionRange {
                        added: Some(2),
                        removed: None,
                    }),
            )
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut catalog = TypeCatalog::new(1, PropertyOrder::Name);
        catalog.register(person()).unwrap();
        let err = catalog.register(TypeDefinition::new("Person")).unwrap_err();
        assert!(matches!(err, XRoadError::DuplicateName(ref n) if n == "Person"));
    }

    #[test]
    fn test_duplicate_detected_across_versions() {
        let mut catalog = TypeCatalog::new(1, PropertyOrder::Name);
        let mut later = TypeDefinition::new("Person");
        later.versions.added = Some(5);
        catalog.register(later).unwrap();
        assert!(!catalog.contains("Person"));
        assert!(catalog.register(person()).is_err());
    }

    #[test]
    fn test_properties_sorted_case_insensitive() {
        let catalog = TypeCatalog::from_definitions(1, PropertyOrder::Name, [person()]).unwrap();
        let names: Vec<_> = catalog
            .own_properties("Person")
            .unwrap()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["Age", "name"]);
    }

    #[test]
    fn test_declared_order_and_version_filter() {
        let catalog = TypeCatalog::from_definitions(2, PropertyOrder::Declared, [person()]).unwrap();
        let names: Vec<_> = catalog
            .own_properties("Person")
            .unwrap()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["name", "Age", "email"]);
    }

    #[test]
    fn test_base_chain_properties() {
        let employee = TypeDefinition::new("Employee")
            .base("Person")
            .property(PropertyDescriptor::new("badge", TypeDescriptor::parse("long").unwrap()));
        let catalog =
            TypeCatalog::from_definitions(1, PropertyOrder::Name, [employee, person()]).unwrap();
        let names: Vec<_> = catalog
            .properties_of("Employee")
            .unwrap()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["Age", "name", "badge"]);
    }

    #[test]
    fn test_unknown_type() {
        let catalog = TypeCatalog::new(1, PropertyOrder::Name);
        assert!(matches!(
            catalog.resolve("Missing"),
            Err(XRoadError::UnknownType(_))
        ));
    }
}
