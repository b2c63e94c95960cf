//! Quantization configuration: resolver and global-to-module mapping

mod handler;
mod mapping;


pub use handler::{
    FakeQuantKind, FakeQuantSpec, GlobalQConfig, QConfig, QConfigHandler, QScheme, QSchemeConfig,
    TypeSpec,
};
pub use mapping::QConfigMapping;
