//! Native QAT quantizer
//!
//! Converts a traced model into a quantization-aware-training graph and folds
//! the trained result back into deployable modules.
//!
//! # Pipeline
//!
//! 1. **Trace** the model into a [`GraphModule`](graph::GraphModule)
//! 2. **Prepare**: fuse conv/linear + batch norm + ReLU chains, insert
//!    fake-quants per the qconfig mapping, prune redundant fake-quants
//! 3. Train the observed graph
//! 4. **Post-process**: bake weight fake-quant into the weights and fold
//!    batch norm into the preceding layer
//!
//! ```ignore
//! use native_quantizer::{NativeQuantizer, QuantizerConfig};
//!
//! let mut quantizer = NativeQuantizer::new(QuantizerConfig::from_yaml_str(yaml)?)?;
//! let traced = quantizer.trace(&model)?;
//! let mut observed = quantizer.prepare(&model, traced)?;
//! // train ...
//! quantizer.post_process_weight_fakequant(&mut observed, false)?;
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod graph;
pub mod nn;
pub mod quant;
pub mod quantizer;
pub mod tracer;

/// Dense float tensor used throughout the crate
pub type Tensor = ndarray::ArrayD<f32>;

pub use config::{load_config, ExtraRedundantFakeQuants, QuantizerConfig};
pub use error::{QuantizerError, Result};
pub use graph::{Graph, GraphModule};
pub use nn::{Module, ModuleKind, Sequential};
pub use quantizer::{NativeBackend, NativeQuantizer, QuantizerBackend};
