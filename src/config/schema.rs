//! Construction-time quantizer options

use serde::{Deserialize, Serialize};

use crate::graph::{Function, Operator};
use crate::nn::ModuleKind;
use crate::quant::GlobalQConfig;
use crate::tracer::TracerConfig;

/// Caller-supplied additions to the eight redundant fake-quant lists.
///
/// `prev` entries delete the fake-quant feeding a matching call, `next`
/// entries delete the fake-quant fed by it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtraRedundantFakeQuants {
    pub extra_module_prev_wo_fakequant: Vec<ModuleKind>,
    pub extra_module_next_wo_fakequant: Vec<ModuleKind>,
    pub extra_function_prev_wo_fakequant: Vec<Function>,
    pub extra_function_next_wo_fakequant: Vec<Function>,
    pub extra_method_prev_wo_fakequant: Vec<String>,
    pub extra_method_next_wo_fakequant: Vec<String>,
    pub extra_op_prev_wo_fakequant: Vec<Operator>,
    pub extra_op_next_wo_fakequant: Vec<Operator>,
}

impl ExtraRedundantFakeQuants {
    /// Whether every list is empty
    pub fn is_empty(&self) -> bool {
        self.extra_module_prev_wo_fakequant.is_empty()
            && self.extra_module_next_wo_fakequant.is_empty()
            && self.extra_function_prev_wo_fakequant.is_empty()
            && self.extra_function_next_wo_fakequant.is_empty()
            && self.extra_method_prev_wo_fakequant.is_empty()
            && self.extra_method_next_wo_fakequant.is_empty()
            && self.extra_op_prev_wo_fakequant.is_empty()
            && self.extra_op_next_wo_fakequant.is_empty()
    }
}

/// Everything needed to build a native quantizer
///
/// ```yaml
/// global_qconfig:
///   w_observer: {type: mmrazor.PerChannelMinMaxObserver}
///   a_observer: {type: mmrazor.MovingAverageMinMaxObserver}
///   w_fake_quant: {type: mmrazor.FakeQuantize}
///   a_fake_quant: {type: mmrazor.FakeQuantize}
///   w_qscheme: {qdtype: qint8, bit: 8, is_symmetry: true}
///   a_qscheme: {qdtype: quint8, bit: 8, is_symmetry: true}
/// no_observer_modules: [torch.nn.ReLU6]
/// extra_redundant_fakequants:
///   extra_module_prev_wo_fakequant: [torch.nn.Identity]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuantizerConfig {
    pub global_qconfig: GlobalQConfig,
    /// Module kinds that never get a fake-quant on their own behalf
    #[serde(default)]
    pub no_observer_modules: Vec<ModuleKind>,
    #[serde(default)]
    pub tracer: TracerConfig,
    #[serde(default)]
    pub extra_redundant_fakequants: ExtraRedundantFakeQuants,
}

impl QuantizerConfig {
    /// Config with defaults for everything but the qconfig
    pub fn new(global_qconfig: GlobalQConfig) -> Self {
        Self {
            global_qconfig,
            no_observer_modules: Vec::new(),
            tracer: TracerConfig::default(),
            extra_redundant_fakequants: ExtraRedundantFakeQuants::default(),
        }
    }

    pub fn with_no_observer_modules(mut self, kinds: Vec<ModuleKind>) -> Self {
        self.no_observer_modules = kinds;
        self
    }

    pub fn with_extra_redundant_fakequants(mut self, extra: ExtraRedundantFakeQuants) -> Self {
        self.extra_redundant_fakequants = extra;
        self
    }

    pub fn with_tracer(mut self, tracer: TracerConfig) -> Self {
        self.tracer = tracer;
        self
    }
}
