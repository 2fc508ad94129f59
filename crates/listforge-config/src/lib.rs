//! The compilation configuration document: model, reading, validation.

mod format;

use listforge_transform::TransformId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use format::{ConfigFormat, read_config, read_config_str};

/// Configuration document errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document parsed but failed validation. `errors` lists every
    /// problem found, one line each.
    #[error("configuration is invalid: {}", errors.join("; "))]
    Invalid { errors: Vec<String> },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path} as {format}: {message}")]
    Parse {
        path: String,
        format: ConfigFormat,
        message: String,
    },
}

/// The type of a source's content, when rule classification should not be
/// inferred line by line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Adblock,
    Hosts,
}

/// One filter-list source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// URL, filesystem path, or pre-fetched key.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclusions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclusions_sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inclusions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inclusions_sources: Vec<String>,
    /// A failing optional source contributes an empty list instead of
    /// failing the compile.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

/// The whole compilation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub sources: Vec<SourceConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclusions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclusions_sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inclusions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inclusions_sources: Vec<String>,
}

impl Configuration {
    /// Check the document, collecting every problem rather than stopping at
    /// the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("name must not be empty".to_string());
        }
        if self.sources.is_empty() {
            errors.push("sources must not be empty".to_string());
        }
        check_transformations(&self.transformations, "transformations", &mut errors);

        for (index, source) in self.sources.iter().enumerate() {
            if source.source.trim().is_empty() {
                errors.push(format!("sources[{index}].source must not be empty"));
            }
            check_transformations(
                &source.transformations,
                &format!("sources[{index}].transformations"),
                &mut errors,
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { errors })
        }
    }

    /// The configuration-level transformation ids. Call after
    /// [`validate`](Self::validate).
    pub fn transformation_ids(&self) -> Result<Vec<TransformId>, ConfigError> {
        parse_ids(&self.transformations)
    }
}

impl SourceConfig {
    /// The per-source transformation ids. Call after validation.
    pub fn transformation_ids(&self) -> Result<Vec<TransformId>, ConfigError> {
        parse_ids(&self.transformations)
    }

    /// Display name for events and banners.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.source)
    }
}

fn parse_ids(names: &[String]) -> Result<Vec<TransformId>, ConfigError> {
    let mut ids = Vec::with_capacity(names.len());
    let mut errors = Vec::new();
    for name in names {
        match name.parse::<TransformId>() {
            Ok(id) => ids.push(id),
            Err(err) => errors.push(err.to_string()),
        }
    }
    if errors.is_empty() {
        Ok(ids)
    } else {
        Err(ConfigError::Invalid { errors })
    }
}

fn check_transformations(names: &[String], field: &str, errors: &mut Vec<String>) {
    for name in names {
        if name.parse::<TransformId>().is_err() {
            errors.push(format!("{field}: unknown transformation '{name}'"));
        }
    }
}
