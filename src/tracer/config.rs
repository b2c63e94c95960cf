//! Tracer selection

use serde::{Deserialize, Serialize};

use super::custom::CustomTracer;
use super::Tracer;
use crate::error::{QuantizerError, Result};

fn default_tracer_type() -> String {
    "CustomTracer".to_string()
}

/// Which tracer to build, e.g. `{type: mmrazor.CustomTracer}`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TracerConfig {
    #[serde(rename = "type", default = "default_tracer_type")]
    pub type_name: String,
    /// Containers traced as a single opaque module call
    #[serde(default)]
    pub skipped_module_names: Vec<String>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            type_name: default_tracer_type(),
            skipped_module_names: Vec::new(),
        }
    }
}

impl TracerConfig {
    /// Instantiate the configured tracer
    pub fn build(&self) -> Result<Box<dyn Tracer>> {
        match self.type_name.rsplit('.').next().unwrap_or(&self.type_name) {
            "CustomTracer" => Ok(Box::new(CustomTracer::new(
                self.skipped_module_names.clone(),
            ))),
            _ => Err(QuantizerError::UnknownTracer(self.type_name.clone())),
        }
    }
}
