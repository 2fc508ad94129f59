//! Multi-format configuration reading with extension detection.

use std::fmt;
use std::path::Path;

use tracing::debug;

use crate::{ConfigError, Configuration};

/// Supported configuration document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
    Toml,
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("JSON"),
            Self::Yaml => f.write_str("YAML"),
            Self::Toml => f.write_str("TOML"),
        }
    }
}

impl ConfigFormat {
    /// Guess the format from a file extension; JSON when in doubt.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("yaml" | "yml") => Self::Yaml,
            Some("toml") => Self::Toml,
            _ => Self::Json,
        }
    }
}

/// Read and validate a configuration file. `format` overrides extension
/// detection.
pub fn read_config(
    path: impl AsRef<Path>,
    format: Option<ConfigFormat>,
) -> Result<Configuration, ConfigError> {
    let path = path.as_ref();
    let format = format.unwrap_or_else(|| ConfigFormat::from_path(path));
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    debug!(path = %path.display(), %format, "reading configuration");
    read_config_str(&text, format, &path.display().to_string())
}

/// Parse and validate a configuration document from a string.
pub fn read_config_str(
    text: &str,
    format: ConfigFormat,
    origin: &str,
) -> Result<Configuration, ConfigError> {
    let parse_err = |message: String| ConfigError::Parse {
        path: origin.to_string(),
        format,
        message,
    };
    let config: Configuration = match format {
        ConfigFormat::Json => serde_json::from_str(text).map_err(|e| parse_err(e.to_string()))?,
        ConfigFormat::Yaml => serde_yaml::from_str(text).map_err(|e| parse_err(e.to_string()))?,
        ConfigFormat::Toml => toml::from_str(text).map_err(|e| parse_err(e.to_string()))?,
    };
    config.validate()?;
    Ok(config)
}
