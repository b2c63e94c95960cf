//! Backend capabilities of a quantizer
//!
//! The native quantizer is parameterized by a [`QuantizerBackend`] that
//! names the rule table, declares the supported quantization modes and
//! supplies the base redundant fake-quant lists. All eight lists default to
//! empty; backends that know which fake-quants their runtime drops override
//! them.

use std::fmt;
use std::path::Path;

use crate::backend::{BackendConfig, BackendConfigs};
use crate::error::{QuantizerError, Result};
use crate::graph::{Function, GraphModule, Operator};
use crate::nn::{Module, ModuleKind};
use crate::quant::QuantGranularity;
use crate::Tensor;

/// Backend-specific behavior of a quantizer
pub trait QuantizerBackend: fmt::Debug {
    /// Rule table identifier
    fn backend(&self) -> &'static str;

    /// Supported weight quantization modes
    fn support_w_modes(&self) -> Vec<QuantGranularity>;

    /// Supported activation quantization modes
    fn support_a_modes(&self) -> Vec<QuantGranularity>;

    /// Fusion and observation rules, looked up by [`QuantizerBackend::backend`]
    fn backend_config(&self) -> Result<BackendConfig> {
        BackendConfigs::get(self.backend())
    }

    /// Module kinds whose input needs no fake-quant
    fn module_prev_wo_fakequant(&self) -> Vec<ModuleKind> {
        Vec::new()
    }

    /// Module kinds whose output needs no fake-quant
    fn module_next_wo_fakequant(&self) -> Vec<ModuleKind> {
        Vec::new()
    }

    fn function_prev_wo_fakequant(&self) -> Vec<Function> {
        Vec::new()
    }

    fn function_next_wo_fakequant(&self) -> Vec<Function> {
        Vec::new()
    }

    fn method_prev_wo_fakequant(&self) -> Vec<String> {
        Vec::new()
    }

    fn method_next_wo_fakequant(&self) -> Vec<String> {
        Vec::new()
    }

    fn op_prev_wo_fakequant(&self) -> Vec<Operator> {
        Vec::new()
    }

    fn op_next_wo_fakequant(&self) -> Vec<Operator> {
        Vec::new()
    }

    /// Prepare a model for deployment export.
    ///
    /// Has no generic implementation; backends that export must override it.
    fn prepare_for_mmdeploy(
        &self,
        _model: &Module,
        _dummy_input: &[Tensor],
        _checkpoint: Option<&Path>,
    ) -> Result<GraphModule> {
        Err(QuantizerError::NotImplemented(format!(
            "prepare_for_mmdeploy is not available for the '{}' backend",
            self.backend()
        )))
    }
}

/// PyTorch-native backend: per-tensor or per-channel weights, per-tensor
/// activations, no redundant fake-quants known in advance
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NativeBackend;

impl QuantizerBackend for NativeBackend {
    fn backend(&self) -> &'static str {
        "native"
    }

    fn support_w_modes(&self) -> Vec<QuantGranularity> {
        vec![QuantGranularity::PerTensor, QuantGranularity::PerChannel]
    }

    fn support_a_modes(&self) -> Vec<QuantGranularity> {
        vec![QuantGranularity::PerTensor]
    }
}
