//! QAT modules: fused or plain conv/linear with a weight fake-quant

use log::debug;

use super::batch_norm::BatchNorm;
use super::functional::relu;
use super::fused::{FusedModule, Layer};
use super::kind::{FusedKind, ModuleKind, QatKind};
use super::Module;
use crate::error::{QuantizerError, Result};
use crate::quant::{FakeQuantize, QConfig};
use crate::Tensor;

/// Trainable module whose forward pass sees a fake-quantized weight
#[derive(Clone, Debug, PartialEq)]
pub struct QatModule {
    pub kind: QatKind,
    pub layer: Layer,
    pub bn: Option<BatchNorm>,
    pub weight_fake_quant: FakeQuantize,
    pub qconfig: QConfig,
}

impl QatModule {
    /// Convert a float conv/linear/fused module carrying a qconfig.
    ///
    /// The QAT kind is derived from the float module's kind.
    pub fn from_float(module: Module) -> Result<Self> {
        let kind = QatKind::from_float(module.kind()).ok_or_else(|| {
            QuantizerError::InvalidConfig(format!("{} has no QAT counterpart", module.kind()))
        })?;
        Self::from_float_as(module, kind)
    }

    /// Convert a float module into a QAT module of a given kind.
    ///
    /// `kind` must describe the float module once any batch norm is gone,
    /// which lets a folded `ConvReLU` float module become a `ConvReLU` QAT
    /// module even though it started life as `ConvBnReLU`.
    pub fn from_float_as(module: Module, kind: QatKind) -> Result<Self> {
        let module_kind = module.kind();
        let plain = !kind.has_relu() && !kind.has_bn();
        let (layer, bn) = match module {
            Module::Conv(conv) if plain => (Layer::Conv(conv), None),
            Module::Linear(linear) if plain => (Layer::Linear(linear), None),
            Module::Fused(fused) if QatKind::from_fused(fused.kind) == kind => {
                (fused.layer, fused.bn)
            }
            _ => {
                return Err(QuantizerError::InvalidConfig(format!(
                    "cannot convert {module_kind} into qat.{}",
                    kind.name()
                )))
            }
        };
        if layer.kind() != kind.layer_kind() {
            return Err(QuantizerError::InvalidConfig(format!(
                "cannot convert {module_kind} into qat.{}",
                kind.name()
            )));
        }

        let qconfig = layer.qconfig().cloned().ok_or_else(|| {
            QuantizerError::InvalidConfig(format!(
                "{module_kind} must have a qconfig before QAT conversion"
            ))
        })?;
        let weight_fake_quant = qconfig.weight.build();
        debug!("Converted {module_kind} into qat.{}", kind.name());

        Ok(Self {
            kind,
            layer,
            bn,
            weight_fake_quant,
            qconfig,
        })
    }

    /// Stored float weight
    pub fn weight(&self) -> &Tensor {
        self.layer.weight()
    }

    /// Run the weight fake-quant once and overwrite the stored weight
    pub fn apply_weight_fake_quant(&mut self) {
        let quantized = self.weight_fake_quant.forward(self.layer.weight());
        self.layer.set_weight(quantized);
    }

    /// Run the weight fake-quant on the stored weight without writing it back,
    /// refreshing the observed statistics
    pub fn observe_weight(&mut self) -> Tensor {
        self.weight_fake_quant.forward(self.layer.weight())
    }

    /// fake-quant(weight) → layer → batch norm → ReLU
    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let weight = self.weight_fake_quant.forward(self.layer.weight());
        let mut x = self.layer.forward_with_weight(input, &weight)?;
        if let Some(bn) = self.bn.as_mut() {
            x = bn.forward(&x)?;
        }
        if self.kind.has_relu() {
            x = relu(&x);
        }
        Ok(x)
    }

    /// Float equivalent with batch norm folded into the layer.
    ///
    /// `ConvBn` → `Conv`, `ConvBnReLU` → fused `ConvReLU`, `LinearBn1d` →
    /// `Linear`; kinds without a batch norm keep their float shape.
    pub fn to_float(&self) -> Result<Module> {
        let mut layer = match &self.bn {
            Some(bn) => self.layer.fold_bn(bn)?,
            None => self.layer.clone(),
        };
        layer.set_qconfig(None);

        let module = match self.kind.float_kind() {
            ModuleKind::Fused(kind @ (FusedKind::ConvReLU(_) | FusedKind::LinearReLU)) => {
                Module::Fused(FusedModule::new(kind, layer, None)?)
            }
            _ => layer.into_module(),
        };
        Ok(module)
    }
}
