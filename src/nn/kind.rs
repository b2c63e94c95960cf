//! Closed set of module kinds
//!
//! Every registry the pipeline consults (qconfig mapping, fusion rules,
//! merge-bn mapping, redundant fake-quant lists) is keyed by these enums, so
//! the mappings are exhaustive and checked at compile time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QuantizerError;

/// Number of spatial dimensions of a convolution or batch norm
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConvDim {
    D1,
    D2,
    D3,
}

impl ConvDim {
    /// Number of spatial dimensions
    pub fn spatial_dims(&self) -> usize {
        match self {
            ConvDim::D1 => 1,
            ConvDim::D2 => 2,
            ConvDim::D3 => 3,
        }
    }

    /// Inverse of [`ConvDim::spatial_dims`]
    pub fn from_spatial_dims(dims: usize) -> Option<Self> {
        match dims {
            1 => Some(ConvDim::D1),
            2 => Some(ConvDim::D2),
            3 => Some(ConvDim::D3),
            _ => None,
        }
    }

    fn parse_suffix(s: &str) -> Option<Self> {
        match s {
            "1d" => Some(ConvDim::D1),
            "2d" => Some(ConvDim::D2),
            "3d" => Some(ConvDim::D3),
            _ => None,
        }
    }
}

impl fmt::Display for ConvDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d", self.spatial_dims())
    }
}

/// Float fused modules produced by the fusion pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FusedKind {
    ConvBn(ConvDim),
    ConvBnReLU(ConvDim),
    ConvReLU(ConvDim),
    LinearBn1d,
    LinearReLU,
}

impl FusedKind {
    /// Whether the fused chain contains a batch norm
    pub fn has_bn(&self) -> bool {
        matches!(
            self,
            FusedKind::ConvBn(_) | FusedKind::ConvBnReLU(_) | FusedKind::LinearBn1d
        )
    }

    /// Whether the fused chain ends in a ReLU
    pub fn has_relu(&self) -> bool {
        matches!(
            self,
            FusedKind::ConvBnReLU(_) | FusedKind::ConvReLU(_) | FusedKind::LinearReLU
        )
    }

    /// Kind of the leading conv/linear layer
    pub fn layer_kind(&self) -> ModuleKind {
        match self {
            FusedKind::ConvBn(d) | FusedKind::ConvBnReLU(d) | FusedKind::ConvReLU(d) => {
                ModuleKind::Conv(*d)
            }
            FusedKind::LinearBn1d | FusedKind::LinearReLU => ModuleKind::Linear,
        }
    }

    /// Fused type name, e.g. `ConvBnReLU2d`
    pub fn name(&self) -> String {
        match self {
            FusedKind::ConvBn(d) => format!("ConvBn{d}"),
            FusedKind::ConvBnReLU(d) => format!("ConvBnReLU{d}"),
            FusedKind::ConvReLU(d) => format!("ConvReLU{d}"),
            FusedKind::LinearBn1d => "LinearBn1d".to_string(),
            FusedKind::LinearReLU => "LinearReLU".to_string(),
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "LinearBn1d" => return Some(FusedKind::LinearBn1d),
            "LinearReLU" => return Some(FusedKind::LinearReLU),
            _ => {}
        }
        if let Some(rest) = name.strip_prefix("ConvBnReLU") {
            return ConvDim::parse_suffix(rest).map(FusedKind::ConvBnReLU);
        }
        if let Some(rest) = name.strip_prefix("ConvBn") {
            return ConvDim::parse_suffix(rest).map(FusedKind::ConvBn);
        }
        if let Some(rest) = name.strip_prefix("ConvReLU") {
            return ConvDim::parse_suffix(rest).map(FusedKind::ConvReLU);
        }
        None
    }
}

/// Trainable QAT modules carrying a weight fake-quant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QatKind {
    ConvBn(ConvDim),
    ConvBnReLU(ConvDim),
    ConvReLU(ConvDim),
    LinearBn1d,
    LinearReLU,
    Conv(ConvDim),
    Linear,
}

impl QatKind {
    /// QAT counterpart of a float fused kind
    pub fn from_fused(kind: FusedKind) -> Self {
        match kind {
            FusedKind::ConvBn(d) => QatKind::ConvBn(d),
            FusedKind::ConvBnReLU(d) => QatKind::ConvBnReLU(d),
            FusedKind::ConvReLU(d) => QatKind::ConvReLU(d),
            FusedKind::LinearBn1d => QatKind::LinearBn1d,
            FusedKind::LinearReLU => QatKind::LinearReLU,
        }
    }

    /// QAT kind that a float module converts into, if it is swappable
    pub fn from_float(kind: ModuleKind) -> Option<Self> {
        match kind {
            ModuleKind::Conv(d) => Some(QatKind::Conv(d)),
            ModuleKind::Linear => Some(QatKind::Linear),
            ModuleKind::Fused(fused) => Some(QatKind::from_fused(fused)),
            _ => None,
        }
    }

    /// Batch-norm-free counterpart once the norm is folded into the weight.
    ///
    /// Kinds without a batch norm map to themselves.
    pub fn merge_bn(&self) -> Self {
        match self {
            QatKind::ConvBn(d) => QatKind::Conv(*d),
            QatKind::ConvBnReLU(d) => QatKind::ConvReLU(*d),
            QatKind::LinearBn1d => QatKind::Linear,
            QatKind::ConvReLU(_) | QatKind::LinearReLU | QatKind::Conv(_) | QatKind::Linear => {
                *self
            }
        }
    }

    /// Whether the module carries a batch norm
    pub fn has_bn(&self) -> bool {
        matches!(
            self,
            QatKind::ConvBn(_) | QatKind::ConvBnReLU(_) | QatKind::LinearBn1d
        )
    }

    /// Whether the module ends in a ReLU
    pub fn has_relu(&self) -> bool {
        matches!(
            self,
            QatKind::ConvBnReLU(_) | QatKind::ConvReLU(_) | QatKind::LinearReLU
        )
    }

    /// Kind of the leading conv/linear layer
    pub fn layer_kind(&self) -> ModuleKind {
        match self {
            QatKind::ConvBn(d) | QatKind::ConvBnReLU(d) | QatKind::ConvReLU(d) | QatKind::Conv(d) => {
                ModuleKind::Conv(*d)
            }
            QatKind::LinearBn1d | QatKind::LinearReLU | QatKind::Linear => ModuleKind::Linear,
        }
    }

    /// Float module kind produced by folding this QAT module
    pub fn float_kind(&self) -> ModuleKind {
        match self.merge_bn() {
            QatKind::ConvReLU(d) => ModuleKind::Fused(FusedKind::ConvReLU(d)),
            QatKind::LinearReLU => ModuleKind::Fused(FusedKind::LinearReLU),
            other => other.layer_kind(),
        }
    }

    /// Type name, e.g. `ConvBnReLU2d`
    pub fn name(&self) -> String {
        match self {
            QatKind::ConvBn(d) => FusedKind::ConvBn(*d).name(),
            QatKind::ConvBnReLU(d) => FusedKind::ConvBnReLU(*d).name(),
            QatKind::ConvReLU(d) => FusedKind::ConvReLU(*d).name(),
            QatKind::LinearBn1d => FusedKind::LinearBn1d.name(),
            QatKind::LinearReLU => FusedKind::LinearReLU.name(),
            QatKind::Conv(d) => format!("Conv{d}"),
            QatKind::Linear => "Linear".to_string(),
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        if let Some(fused) = FusedKind::from_name(name) {
            return Some(QatKind::from_fused(fused));
        }
        if name == "Linear" {
            return Some(QatKind::Linear);
        }
        name.strip_prefix("Conv")
            .and_then(ConvDim::parse_suffix)
            .map(QatKind::Conv)
    }
}

/// Identity of a module type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ModuleKind {
    Conv(ConvDim),
    Linear,
    BatchNorm(ConvDim),
    ReLU,
    ReLU6,
    Identity,
    Flatten,
    Fused(FusedKind),
    Qat(QatKind),
    FakeQuantize,
    Sequential,
}

impl ModuleKind {
    /// Whether this is a ReLU-family activation that fusion may absorb
    pub fn is_relu(&self) -> bool {
        matches!(self, ModuleKind::ReLU)
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleKind::Conv(d) => write!(f, "Conv{d}"),
            ModuleKind::Linear => f.write_str("Linear"),
            ModuleKind::BatchNorm(d) => write!(f, "BatchNorm{d}"),
            ModuleKind::ReLU => f.write_str("ReLU"),
            ModuleKind::ReLU6 => f.write_str("ReLU6"),
            ModuleKind::Identity => f.write_str("Identity"),
            ModuleKind::Flatten => f.write_str("Flatten"),
            ModuleKind::Fused(kind) => write!(f, "intrinsic.{}", kind.name()),
            ModuleKind::Qat(kind) => write!(f, "qat.{}", kind.name()),
            ModuleKind::FakeQuantize => f.write_str("FakeQuantize"),
            ModuleKind::Sequential => f.write_str("Sequential"),
        }
    }
}

impl FromStr for ModuleKind {
    type Err = QuantizerError;

    /// Accepts bare names (`ReLU6`) or dotted type paths (`torch.nn.ReLU6`).
    /// A `qat` scope selects the QAT kind, e.g. `torch.nn.intrinsic.qat.ConvBn2d`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scope, name) = s.rsplit_once('.').unwrap_or(("", s));
        let unknown = || QuantizerError::InvalidConfig(format!("unknown module type: {s}"));

        if scope == "qat" || scope.ends_with(".qat") {
            return QatKind::from_name(name)
                .map(ModuleKind::Qat)
                .ok_or_else(unknown);
        }
        if let Some(fused) = FusedKind::from_name(name) {
            return Ok(ModuleKind::Fused(fused));
        }

        match name {
            "Linear" => Ok(ModuleKind::Linear),
            "ReLU" => Ok(ModuleKind::ReLU),
            "ReLU6" => Ok(ModuleKind::ReLU6),
            "Identity" => Ok(ModuleKind::Identity),
            "Flatten" => Ok(ModuleKind::Flatten),
            "FakeQuantize" => Ok(ModuleKind::FakeQuantize),
            "Sequential" => Ok(ModuleKind::Sequential),
            _ => {
                if let Some(d) = name.strip_prefix("Conv").and_then(ConvDim::parse_suffix) {
                    return Ok(ModuleKind::Conv(d));
                }
                if let Some(d) = name.strip_prefix("BatchNorm").and_then(ConvDim::parse_suffix) {
                    return Ok(ModuleKind::BatchNorm(d));
                }
                Err(unknown())
            }
        }
    }
}

impl TryFrom<String> for ModuleKind {
    type Error = QuantizerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModuleKind> for String {
    fn from(kind: ModuleKind) -> Self {
        kind.to_string()
    }
}
