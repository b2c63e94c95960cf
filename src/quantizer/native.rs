//! Native quantizer: fuse → observe → prune, then fold back for deployment

use std::path::Path;

use log::info;
use rand::Rng;

use super::deploy;
use super::fuse::fuse_fx;
use super::observe::{insert_observers, ObserverContext};
use super::redundant::{
    del_fakequant_after_function, del_fakequant_after_method, del_fakequant_after_module,
    del_fakequant_after_op, del_fakequant_before_function, del_fakequant_before_method,
    del_fakequant_before_module, del_fakequant_before_op,
};
use super::traits::{NativeBackend, QuantizerBackend};
use crate::backend::BackendConfig;
use crate::config::{ExtraRedundantFakeQuants, QuantizerConfig};
use crate::error::{QuantizerError, Result};
use crate::graph::{Function, GraphModule, Operator};
use crate::nn::{Module, ModuleKind};
use crate::quant::{QConfigHandler, QConfigMapping, QuantGranularity};
use crate::tracer::Tracer;
use crate::Tensor;

/// Shape of the default example input
const EXAMPLE_INPUT_SHAPE: [usize; 4] = [1, 3, 224, 224];

/// Standard-normal example input; only informational, `prepare` never runs it
fn random_example_input() -> Tensor {
    let mut rng = rand::rng();
    Tensor::from_shape_simple_fn(EXAMPLE_INPUT_SHAPE.as_slice(), || {
        // Box-Muller transform for standard normal
        let u1: f64 = rng.random::<f64>().max(1e-10);
        let u2: f64 = rng.random::<f64>();
        ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
    })
}

/// `base ++ extra`
fn concat<T: Clone>(base: Vec<T>, extra: &[T]) -> Vec<T> {
    let mut merged = base;
    merged.extend_from_slice(extra);
    merged
}

fn check_mode(
    tensor: &'static str,
    mode: QuantGranularity,
    supported: &[QuantGranularity],
) -> Result<()> {
    if supported.contains(&mode) {
        return Ok(());
    }
    let supported: Vec<&str> = supported.iter().map(QuantGranularity::as_str).collect();
    Err(QuantizerError::UnsupportedMode {
        tensor,
        mode: mode.to_string(),
        supported: supported.join(", "),
    })
}

/// Quantizer for PyTorch-native QAT graphs
///
/// # Example
///
/// ```ignore
/// let mut quantizer = NativeQuantizer::new(QuantizerConfig::from_yaml_str(yaml)?)?;
/// let traced = quantizer.trace(&model)?;
/// let mut observed = quantizer.prepare(&model, traced)?;
/// // ... train `observed` ...
/// quantizer.post_process_weight_fakequant(&mut observed, false)?;
/// ```
#[derive(Debug)]
pub struct NativeQuantizer<B: QuantizerBackend = NativeBackend> {
    qconfig: QConfigHandler,
    qconfig_mapping: QConfigMapping,
    no_observer_modules: Vec<ModuleKind>,
    tracer: Box<dyn Tracer>,
    backend_config: BackendConfig,
    example_inputs: Vec<Tensor>,
    extra_redundant_fakequants: ExtraRedundantFakeQuants,
    variant: B,
}

impl NativeQuantizer<NativeBackend> {
    /// Native-backend quantizer
    pub fn new(config: QuantizerConfig) -> Result<Self> {
        Self::with_backend(config, NativeBackend)
    }
}

impl<B: QuantizerBackend> NativeQuantizer<B> {
    /// Build a quantizer for `variant`.
    ///
    /// Quantization modes are checked before anything else is built.
    pub fn with_backend(config: QuantizerConfig, variant: B) -> Result<Self> {
        let qconfig = QConfigHandler::new(&config.global_qconfig)?;
        check_mode(
            "weight",
            qconfig.w_qscheme.granularity(),
            &variant.support_w_modes(),
        )?;
        check_mode(
            "activation",
            qconfig.a_qscheme.granularity(),
            &variant.support_a_modes(),
        )?;

        let mut qconfig_mapping = QConfigMapping::new().set_global(qconfig.convert());
        for kind in &config.no_observer_modules {
            qconfig_mapping.set_object_type(*kind, None);
        }
        let tracer = config.tracer.build()?;
        let backend_config = variant.backend_config()?;

        info!(
            "Built {} quantizer (weight {}, activation {})",
            variant.backend(),
            qconfig.w_qscheme.granularity(),
            qconfig.a_qscheme.granularity()
        );
        Ok(Self {
            qconfig,
            qconfig_mapping,
            no_observer_modules: config.no_observer_modules,
            tracer,
            backend_config,
            example_inputs: vec![random_example_input()],
            extra_redundant_fakequants: config.extra_redundant_fakequants,
            variant,
        })
    }

    /// Rule table identifier
    pub fn backend(&self) -> &'static str {
        self.variant.backend()
    }

    pub fn support_w_modes(&self) -> Vec<QuantGranularity> {
        self.variant.support_w_modes()
    }

    pub fn support_a_modes(&self) -> Vec<QuantGranularity> {
        self.variant.support_a_modes()
    }

    pub fn module_prev_wo_fakequant(&self) -> Vec<ModuleKind> {
        self.variant.module_prev_wo_fakequant()
    }

    pub fn module_next_wo_fakequant(&self) -> Vec<ModuleKind> {
        self.variant.module_next_wo_fakequant()
    }

    pub fn function_prev_wo_fakequant(&self) -> Vec<Function> {
        self.variant.function_prev_wo_fakequant()
    }

    pub fn function_next_wo_fakequant(&self) -> Vec<Function> {
        self.variant.function_next_wo_fakequant()
    }

    pub fn method_prev_wo_fakequant(&self) -> Vec<String> {
        self.variant.method_prev_wo_fakequant()
    }

    pub fn method_next_wo_fakequant(&self) -> Vec<String> {
        self.variant.method_next_wo_fakequant()
    }

    pub fn op_prev_wo_fakequant(&self) -> Vec<Operator> {
        self.variant.op_prev_wo_fakequant()
    }

    pub fn op_next_wo_fakequant(&self) -> Vec<Operator> {
        self.variant.op_next_wo_fakequant()
    }

    /// Resolved global qconfig
    pub fn qconfig(&self) -> &QConfigHandler {
        &self.qconfig
    }

    pub fn qconfig_mapping(&self) -> &QConfigMapping {
        &self.qconfig_mapping
    }

    pub fn no_observer_modules(&self) -> &[ModuleKind] {
        &self.no_observer_modules
    }

    pub fn backend_config(&self) -> &BackendConfig {
        &self.backend_config
    }

    pub fn tracer(&self) -> &dyn Tracer {
        self.tracer.as_ref()
    }

    /// Random example inputs of shape `[1, 3, 224, 224]`, for callers that
    /// need a dummy batch
    pub fn example_inputs(&self) -> &[Tensor] {
        &self.example_inputs
    }

    pub fn extra_redundant_fakequants(&self) -> &ExtraRedundantFakeQuants {
        &self.extra_redundant_fakequants
    }

    /// Backend variant
    pub fn variant(&self) -> &B {
        &self.variant
    }

    /// Trace `model` with the configured tracer, recording node scopes
    pub fn trace(&mut self, model: &Module) -> Result<GraphModule> {
        self.tracer.trace(model)
    }

    /// Turn a traced graph module into a trainable observed one.
    ///
    /// Always fuses into trainable fused modules. `model` is only used to
    /// resolve the module kinds of recorded scopes. Re-preparing an already
    /// prepared graph is not supported.
    pub fn prepare(&self, model: &Module, graph_module: GraphModule) -> Result<GraphModule> {
        let mut prepared = graph_module;
        fuse_fx(&mut prepared, &self.backend_config)?;

        let ctx = ObserverContext {
            mapping: &self.qconfig_mapping,
            backend_config: &self.backend_config,
            node_name_to_scope: self.tracer.node_name_to_scope(),
            model,
        };
        insert_observers(&mut prepared, &ctx)?;
        self.del_redundant_fakequant(&mut prepared)?;
        prepared.graph.lint()?;
        Ok(prepared)
    }

    /// Run the eight redundant fake-quant passes, each with its base list
    /// followed by the caller's extra entries. Returns the number of
    /// deleted nodes.
    pub fn del_redundant_fakequant(&self, prepared: &mut GraphModule) -> Result<usize> {
        let extra = &self.extra_redundant_fakequants;
        let mut deleted = 0;

        deleted += del_fakequant_before_module(
            prepared,
            &concat(self.module_prev_wo_fakequant(), &extra.extra_module_prev_wo_fakequant),
        )?;
        deleted += del_fakequant_after_module(
            prepared,
            &concat(self.module_next_wo_fakequant(), &extra.extra_module_next_wo_fakequant),
        )?;
        deleted += del_fakequant_before_function(
            prepared,
            &concat(self.function_prev_wo_fakequant(), &extra.extra_function_prev_wo_fakequant),
        )?;
        deleted += del_fakequant_after_function(
            prepared,
            &concat(self.function_next_wo_fakequant(), &extra.extra_function_next_wo_fakequant),
        )?;
        deleted += del_fakequant_before_method(
            prepared,
            &concat(self.method_prev_wo_fakequant(), &extra.extra_method_prev_wo_fakequant),
        )?;
        deleted += del_fakequant_after_method(
            prepared,
            &concat(self.method_next_wo_fakequant(), &extra.extra_method_next_wo_fakequant),
        )?;
        deleted += del_fakequant_before_op(
            prepared,
            &concat(self.op_prev_wo_fakequant(), &extra.extra_op_prev_wo_fakequant),
        )?;
        deleted += del_fakequant_after_op(
            prepared,
            &concat(self.op_next_wo_fakequant(), &extra.extra_op_next_wo_fakequant),
        )?;

        info!("Deleted {deleted} redundant fake quant nodes");
        Ok(deleted)
    }

    /// Fold trained QAT modules into deployable ones, in place.
    ///
    /// With `keep_fake_quant` the result keeps batch-norm-free QAT modules
    /// carrying a fresh copy of the global qconfig.
    pub fn post_process_weight_fakequant(
        &self,
        observed: &mut GraphModule,
        keep_fake_quant: bool,
    ) -> Result<usize> {
        let qconfig = self.qconfig.convert();
        deploy::post_process_weight_fakequant(&mut observed.root, &qconfig, keep_fake_quant)
    }

    /// Prepare a model for deployment export; backend specific
    pub fn prepare_for_mmdeploy(
        &self,
        model: &Module,
        dummy_input: &[Tensor],
        checkpoint: Option<&Path>,
    ) -> Result<GraphModule> {
        self.variant
            .prepare_for_mmdeploy(model, dummy_input, checkpoint)
    }
}
