//! Quantization primitives for QAT
//!
//! - Fake quantization with observers and STE
//! - QConfig resolution from raw scheme descriptions
//! - Module-kind to qconfig mapping

mod fake_quantize;
mod qconfig;

pub use fake_quantize::{
    fake_quantize_per_channel, fake_quantize_per_tensor, ste_backward, FakeQuantConfig,
    FakeQuantize, Observer, ObserverKind, QuantDtype, QuantGranularity,
};
pub use qconfig::{
    FakeQuantKind, FakeQuantSpec, GlobalQConfig, QConfig, QConfigHandler, QConfigMapping, QScheme,
    QSchemeConfig, TypeSpec,
};
