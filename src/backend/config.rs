//! Backend rule table keyed by backend name

use std::collections::HashMap;

use crate::error::{QuantizerError, Result};
use crate::graph::{Function, NodeOp, Operator};
use crate::nn::{ConvDim, FusedKind, ModuleKind};

/// How a quantizable op's output is observed relative to its input
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObservationType {
    /// Output gets its own fake-quant (conv, linear, add, ...)
    OutputUseDifferentObserverAsInput,
    /// Output reuses the input fake-quant (relu, flatten, ...), since the
    /// op cannot widen the value range
    OutputShareObserverWithInput,
}

/// `layer [→ bn] [→ relu]` collapsed into one fused module
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FusionRule {
    pub layer: ModuleKind,
    pub bn: Option<ModuleKind>,
    pub relu: bool,
    pub fused: FusedKind,
}

impl FusionRule {
    pub fn new(layer: ModuleKind, bn: Option<ModuleKind>, relu: bool, fused: FusedKind) -> Self {
        Self {
            layer,
            bn,
            relu,
            fused,
        }
    }

    /// Number of nodes the rule consumes
    pub fn pattern_len(&self) -> usize {
        1 + usize::from(self.bn.is_some()) + usize::from(self.relu)
    }
}

/// Fusion patterns and observation rules for one backend
#[derive(Clone, Debug, PartialEq)]
pub struct BackendConfig {
    pub name: String,
    /// Longest patterns first
    fusion_rules: Vec<FusionRule>,
    modules: HashMap<ModuleKind, ObservationType>,
    functions: HashMap<Function, ObservationType>,
    methods: HashMap<String, ObservationType>,
    operators: HashMap<Operator, ObservationType>,
    relu_functions: Vec<Function>,
    relu_methods: Vec<String>,
}

impl BackendConfig {
    /// PyTorch-native fusion and observation rules
    pub fn native() -> Self {
        use ObservationType::OutputShareObserverWithInput as Share;
        use ObservationType::OutputUseDifferentObserverAsInput as Own;

        let mut fusion_rules = Vec::new();
        let mut modules = HashMap::new();
        for d in [ConvDim::D1, ConvDim::D2, ConvDim::D3] {
            let conv = ModuleKind::Conv(d);
            let bn = ModuleKind::BatchNorm(d);
            fusion_rules.extend([
                FusionRule::new(conv, Some(bn), true, FusedKind::ConvBnReLU(d)),
                FusionRule::new(conv, Some(bn), false, FusedKind::ConvBn(d)),
                FusionRule::new(conv, None, true, FusedKind::ConvReLU(d)),
            ]);
            modules.insert(conv, Own);
            modules.insert(bn, Own);
            for rule in &fusion_rules[fusion_rules.len() - 3..] {
                modules.insert(ModuleKind::Fused(rule.fused), Own);
            }
        }
        let bn1d = ModuleKind::BatchNorm(ConvDim::D1);
        fusion_rules.extend([
            FusionRule::new(ModuleKind::Linear, Some(bn1d), false, FusedKind::LinearBn1d),
            FusionRule::new(ModuleKind::Linear, None, true, FusedKind::LinearReLU),
        ]);
        modules.insert(ModuleKind::Linear, Own);
        modules.insert(ModuleKind::Fused(FusedKind::LinearBn1d), Own);
        modules.insert(ModuleKind::Fused(FusedKind::LinearReLU), Own);
        for kind in [
            ModuleKind::ReLU,
            ModuleKind::ReLU6,
            ModuleKind::Identity,
            ModuleKind::Flatten,
        ] {
            modules.insert(kind, Share);
        }

        let functions = HashMap::from([
            (Function::Relu, Share),
            (Function::Relu6, Share),
            (Function::Flatten, Share),
            (Function::Add, Own),
            (Function::Mul, Own),
            (Function::Cat, Own),
        ]);
        let methods = HashMap::from([
            ("relu".to_string(), Share),
            ("flatten".to_string(), Share),
            ("contiguous".to_string(), Share),
            ("add".to_string(), Own),
            ("mul".to_string(), Own),
        ]);
        let operators = HashMap::from([
            (Operator::Add, Own),
            (Operator::Sub, Own),
            (Operator::Mul, Own),
        ]);

        Self {
            name: "native".to_string(),
            fusion_rules,
            modules,
            functions,
            methods,
            operators,
            relu_functions: vec![Function::Relu],
            relu_methods: vec!["relu".to_string()],
        }
    }

    /// Fusion patterns, longest first
    pub fn fusion_rules(&self) -> &[FusionRule] {
        &self.fusion_rules
    }

    /// Observation rule for a node; `None` means the op is not quantized.
    ///
    /// Module calls are looked up by the kind of the called module. A QAT
    /// module follows the rule of its layer, so later calls of a module
    /// already swapped to QAT are still observed.
    pub fn observation_type(
        &self,
        op: &NodeOp,
        module_kind: Option<ModuleKind>,
    ) -> Option<ObservationType> {
        match op {
            NodeOp::CallModule(_) => {
                let kind = match module_kind? {
                    ModuleKind::Qat(qat) => qat.layer_kind(),
                    kind => kind,
                };
                self.modules.get(&kind).copied()
            }
            NodeOp::CallFunction(function) => self.functions.get(function).copied(),
            NodeOp::CallMethod(method) => self.methods.get(method).copied(),
            NodeOp::CallOperator(op) => self.operators.get(op).copied(),
            NodeOp::Placeholder | NodeOp::Output => None,
        }
    }

    /// Whether a non-module node is a ReLU a fusion pattern may absorb
    pub fn is_fusable_relu(&self, op: &NodeOp) -> bool {
        match op {
            NodeOp::CallFunction(function) => self.relu_functions.contains(function),
            NodeOp::CallMethod(method) => self.relu_methods.contains(method),
            _ => false,
        }
    }
}

/// Registry of backend rule tables
pub struct BackendConfigs;

impl BackendConfigs {
    /// Rule table for `name`
    pub fn get(name: &str) -> Result<BackendConfig> {
        match name {
            "native" => Ok(BackendConfig::native()),
            _ => Err(QuantizerError::UnknownBackend(name.to_string())),
        }
    }
}
