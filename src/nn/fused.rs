//! Float fused modules: conv/linear followed by batch norm and/or ReLU

use ndarray::Array1;

use super::batch_norm::BatchNorm;
use super::conv::Conv;
use super::fold::fuse_bn_weights;
use super::functional::relu;
use super::kind::{ConvDim, FusedKind, ModuleKind};
use super::linear::Linear;
use super::Module;
use crate::error::{QuantizerError, Result};
use crate::quant::QConfig;
use crate::Tensor;

/// The weighted layer at the head of a fused chain
#[derive(Clone, Debug, PartialEq)]
pub enum Layer {
    Conv(Conv),
    Linear(Linear),
}

impl Layer {
    /// Module kind of the layer
    pub fn kind(&self) -> ModuleKind {
        match self {
            Layer::Conv(conv) => ModuleKind::Conv(conv.dim),
            Layer::Linear(_) => ModuleKind::Linear,
        }
    }

    /// Batch-norm dimensionality this layer fuses with
    pub fn bn_dim(&self) -> ConvDim {
        match self {
            Layer::Conv(conv) => conv.dim,
            Layer::Linear(_) => ConvDim::D1,
        }
    }

    pub fn weight(&self) -> &Tensor {
        match self {
            Layer::Conv(conv) => &conv.weight,
            Layer::Linear(linear) => &linear.weight,
        }
    }

    pub fn set_weight(&mut self, weight: Tensor) {
        match self {
            Layer::Conv(conv) => conv.weight = weight,
            Layer::Linear(linear) => linear.weight = weight,
        }
    }

    pub fn bias(&self) -> Option<&Array1<f32>> {
        match self {
            Layer::Conv(conv) => conv.bias.as_ref(),
            Layer::Linear(linear) => linear.bias.as_ref(),
        }
    }

    pub fn set_bias(&mut self, bias: Option<Array1<f32>>) {
        match self {
            Layer::Conv(conv) => conv.bias = bias,
            Layer::Linear(linear) => linear.bias = bias,
        }
    }

    pub fn qconfig(&self) -> Option<&QConfig> {
        match self {
            Layer::Conv(conv) => conv.qconfig.as_ref(),
            Layer::Linear(linear) => linear.qconfig.as_ref(),
        }
    }

    pub fn set_qconfig(&mut self, qconfig: Option<QConfig>) {
        match self {
            Layer::Conv(conv) => conv.qconfig = qconfig,
            Layer::Linear(linear) => linear.qconfig = qconfig,
        }
    }

    /// Forward with a substitute weight
    pub fn forward_with_weight(&self, input: &Tensor, weight: &Tensor) -> Result<Tensor> {
        match self {
            Layer::Conv(conv) => conv.forward_with_weight(input, weight),
            Layer::Linear(linear) => linear.forward_with_weight(input, weight),
        }
    }

    /// Copy of this layer with `bn` folded into weight and bias
    pub fn fold_bn(&self, bn: &BatchNorm) -> Result<Layer> {
        let (weight, bias) = fuse_bn_weights(self.weight(), self.bias(), bn)?;
        let mut folded = self.clone();
        folded.set_weight(weight);
        folded.set_bias(Some(bias));
        Ok(folded)
    }

    /// Split a conv/linear module into a layer
    pub fn from_module(module: Module) -> Option<Layer> {
        match module {
            Module::Conv(conv) => Some(Layer::Conv(conv)),
            Module::Linear(linear) => Some(Layer::Linear(linear)),
            _ => None,
        }
    }

    /// Wrap back into a plain module
    pub fn into_module(self) -> Module {
        match self {
            Layer::Conv(conv) => Module::Conv(conv),
            Layer::Linear(linear) => Module::Linear(linear),
        }
    }
}

/// Float fused chain; trainable weight and batch-norm statistics are kept
#[derive(Clone, Debug, PartialEq)]
pub struct FusedModule {
    pub kind: FusedKind,
    pub layer: Layer,
    pub bn: Option<BatchNorm>,
}

impl FusedModule {
    /// Assemble a fused module, checking the parts match `kind`
    pub fn new(kind: FusedKind, layer: Layer, bn: Option<BatchNorm>) -> Result<Self> {
        if layer.kind() != kind.layer_kind() {
            return Err(QuantizerError::InvalidConfig(format!(
                "{} cannot head a {} module",
                layer.kind(),
                kind.name()
            )));
        }
        match (&bn, kind.has_bn()) {
            (Some(bn), true) if bn.dim == layer.bn_dim() => {}
            (None, false) => {}
            _ => {
                return Err(QuantizerError::InvalidConfig(format!(
                    "batch norm does not match fused kind {}",
                    kind.name()
                )))
            }
        }
        Ok(Self { kind, layer, bn })
    }

    /// layer → batch norm → ReLU
    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let mut x = self.layer.forward_with_weight(input, self.layer.weight())?;
        if let Some(bn) = self.bn.as_mut() {
            x = bn.forward(&x)?;
        }
        if self.kind.has_relu() {
            x = relu(&x);
        }
        Ok(x)
    }
}
