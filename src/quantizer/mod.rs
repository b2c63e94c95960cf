//! QAT conversion pipeline
//!
//! - **Fusion**: `conv/linear → batch norm → ReLU` chains become trainable
//!   fused modules
//! - **Observer insertion**: QAT module swap and activation fake-quants at
//!   every quantizable boundary
//! - **Redundant fake-quant pruning**: eight passes over module, function,
//!   method and operator calls, before and after
//! - **Deployment**: weight fake-quant baked in, batch norm folded back
//!
//! # Example
//!
//! ```ignore
//! use native_quantizer::{NativeQuantizer, QuantizerConfig};
//!
//! let config = QuantizerConfig::from_yaml_str(yaml)?;
//! let mut quantizer = NativeQuantizer::new(config)?;
//! let traced = quantizer.trace(&model)?;
//! let mut observed = quantizer.prepare(&model, traced)?;
//! quantizer.post_process_weight_fakequant(&mut observed, false)?;
//! ```

mod deploy;
mod fuse;
mod native;
mod observe;
mod redundant;
mod traits;


pub use deploy::post_process_weight_fakequant;
pub use fuse::fuse_fx;
pub use native::NativeQuantizer;
pub use observe::ACTIVATION_POST_PROCESS_PREFIX;
pub use redundant::{
    del_fakequant_after_function, del_fakequant_after_method, del_fakequant_after_module,
    del_fakequant_after_op, del_fakequant_before_function, del_fakequant_before_method,
    del_fakequant_before_module, del_fakequant_before_op,
};
pub use traits::{NativeBackend, QuantizerBackend};
