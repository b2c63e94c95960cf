//! Fake Quantization for Quantization-Aware Training (QAT)
//!
//! Fake quantization simulates the effects of quantization during training:
//! - Forward: quantize → dequantize (simulates quantization noise)
//! - Backward: Straight-Through Estimator (STE) passes gradients unchanged
//!
//! Scale and zero-point come from an [`Observer`] that tracks tensor ranges
//! per tensor or per channel.

mod config;
mod observer;
mod ops;
mod quantize;

#[cfg(test)]
mod tests;

pub use config::{FakeQuantConfig, QuantDtype, QuantGranularity};
pub use observer::{Observer, ObserverKind};
pub use ops::{fake_quantize_per_channel, fake_quantize_per_tensor, ste_backward};
pub use quantize::FakeQuantize;
