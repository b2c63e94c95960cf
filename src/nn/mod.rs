//! Neural-network modules the QAT pipeline rewrites
//!
//! - Float layers: convolution (1d/2d/3d), linear, batch norm, activations
//! - Float fused chains produced by fusion (`ConvBnReLU2d`, `LinearBn1d`, ...)
//! - QAT modules that fake-quantize their weight on every forward pass
//! - Batch-norm folding used when QAT modules are converted for deployment

mod batch_norm;
mod conv;
mod fold;
pub mod functional;
mod fused;
mod kind;
mod linear;
mod module;
mod qat;

#[cfg(test)]
mod tests;

pub use batch_norm::BatchNorm;
pub use conv::Conv;
pub use fold::fuse_bn_weights;
pub use fused::{FusedModule, Layer};
pub use kind::{ConvDim, FusedKind, ModuleKind, QatKind};
pub use linear::Linear;
pub use module::{
    disable_fake_quant, disable_observer, enable_fake_quant, enable_observer, Module, Sequential,
};
pub use qat::QatModule;
