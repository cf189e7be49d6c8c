//! Configuration types for an X-Road producer.

use std::sync::Arc;

use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::catalog::{PropertyOrder, TypeCatalog};
use crate::codec::{CodecSettings, ContentLayout};
use crate::descriptor::Titles;
use crate::dialect::{DialectConfig, ProtocolVersion};
use crate::error::{Result, XRoadError};
use crate::header::{self, HeaderField};
use crate::wsdl::GeneratorOptions;

/// Main configuration of a producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Config version
    pub version: String,

    /// Producer identity and contract publishing settings
    pub producer: ProducerSettings,

    /// Message binding settings
    pub serialization: SerializationConfig,

    /// Operation publishing filter
    pub operations: OperationsConfig,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            producer: ProducerSettings::default(),
            serialization: SerializationConfig::default(),
            operations: OperationsConfig::default(),
        }
    }
}

impl ProducerConfig {
    /// Parses and validates a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| XRoadError::Config(format!("Invalid producer config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks settings that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.producer.name.trim().is_empty() {
            return Err(XRoadError::Config("Producer name is required".to_string()));
        }
        header::required_headers(&self.producer.required_headers, self.dialect())?;
        self.operations.filter()?;
        Ok(())
    }

    pub fn dialect(&self) -> &'static DialectConfig {
        self.producer.protocol.dialect()
    }

    /// Options of the contract generator.
    pub fn generator_options(&self) -> GeneratorOptions {
        let producer = &self.producer;
        GeneratorOptions {
            environment_name: producer.environment_name.clone(),
            location: producer.location.clone(),
            imported_schema_path: producer.imported_schema_path.clone(),
            header_message: producer.header_message.clone(),
            titles: producer.titles.clone(),
            required_headers: producer.required_headers.clone(),
            ..GeneratorOptions::new(producer.name.clone(), producer.version)
        }
    }

    /// Settings shared by every message codec of the producer.
    pub fn codec_settings(&self, catalog: Arc<TypeCatalog>) -> Result<CodecSettings> {
        let dialect = self.dialect();
        if catalog.version() != self.producer.version {
            return Err(XRoadError::Config(format!(
                "Type catalog is built for version {}, producer publishes version {}",
                catalog.version(),
                self.producer.version
            )));
        }
        Ok(CodecSettings {
            layout: self.serialization.content_layout,
            required_headers: header::required_headers(&self.producer.required_headers, dialect)?,
            ..CodecSettings::new(dialect, &self.producer.name, catalog)
        })
    }
}

/// Producer identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerSettings {
    /// Producer short name, used in the target namespace
    pub name: String,

    /// Producer name registered in the environment, if different
    pub environment_name: Option<String>,

    /// X-Road protocol version: "2.0", "3.1" or "4.0"
    pub protocol: ProtocolVersion,

    /// Published service version
    pub version: u32,

    /// Endpoint address written to the service port
    pub location: Option<String>,

    /// Base URL of externally managed operation schemas
    pub imported_schema_path: Option<String>,

    /// Free text comment written at the top of the contract
    pub header_message: Option<String>,

    /// Producer titles by language code
    pub titles: Titles,

    /// Header elements every operation requires
    pub required_headers: Vec<HeaderField>,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            environment_name: None,
            protocol: ProtocolVersion::V40,
            version: 1,
            location: None,
            imported_schema_path: None,
            header_message: None,
            titles: Titles::new(),
            required_headers: Vec::new(),
        }
    }
}

/// Message binding settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializationConfig {
    /// Request parameter binding: "strict" or "nonstrict"
    pub content_layout: ContentLayout,

    /// DTO member order: "name" or "declared"
    pub property_order: PropertyOrder,
}

/// Operation publishing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationsConfig {
    /// Enable the publishing filter
    pub enabled: bool,

    /// Mode: allowlist or denylist
    pub mode: OperationMode,

    /// Operation names (supports glob patterns)
    pub patterns: Vec<String>,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: OperationMode::Allowlist,
            patterns: Vec::new(),
        }
    }
}

impl OperationsConfig {
    /// Compiles the configured patterns.
    pub fn filter(&self) -> Result<OperationFilter> {
        let patterns = self
            .patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    XRoadError::Config(format!("Invalid operation pattern `{}`: {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(OperationFilter {
            enabled: self.enabled,
            mode: self.mode,
            patterns,
        })
    }
}

/// Operation filter mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    /// Only publish listed operations
    #[default]
    Allowlist,
    /// Publish everything except listed operations
    Denylist,
}

/// Compiled publishing filter.
#[derive(Debug, Clone)]
pub struct OperationFilter {
    enabled: bool,
    mode: OperationMode,
    patterns: Vec<Pattern>,
}

impl OperationFilter {
    pub fn is_published(&self, operation: &str) -> bool {
        if !self.enabled {
            return true;
        }
        let matches = self.patterns.iter().any(|p| p.matches(operation));
        match self.mode {
            OperationMode::Allowlist => matches,
            OperationMode::Denylist => !matches,
        }
    }
}
