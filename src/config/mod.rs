//! Declarative quantizer configuration
//!
//! A [`QuantizerConfig`] carries every construction-time option of the
//! native quantizer and can be loaded from YAML or JSON.

mod loader;
mod schema;

#[cfg(test)]
mod tests;

pub use loader::load_config;
pub use schema::{ExtraRedundantFakeQuants, QuantizerConfig};
