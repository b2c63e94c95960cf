//! Loading quantizer configs from YAML or JSON

use std::fs;
use std::path::Path;

use log::info;

use super::schema::QuantizerConfig;
use crate::error::{QuantizerError, Result};

impl QuantizerConfig {
    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to YAML
    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Load a quantizer config; `.json` files are JSON, anything else YAML
pub fn load_config<P: AsRef<Path>>(config_path: P) -> Result<QuantizerConfig> {
    let path = config_path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        QuantizerError::InvalidConfig(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let config = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => QuantizerConfig::from_json_str(&content)?,
        _ => QuantizerConfig::from_yaml_str(&content)?,
    };
    info!("Loaded quantizer config from {}", path.display());
    Ok(config)
}
