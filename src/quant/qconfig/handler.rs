//! Resolves a raw global qconfig into weight/activation fake-quant factories.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{QuantizerError, Result};
use crate::quant::fake_quantize::{
    FakeQuantConfig, FakeQuantize, ObserverKind, QuantDtype, QuantGranularity,
};

/// Registry-style type reference, e.g. `{type: mmrazor.PerChannelMinMaxObserver}`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSpec {
    #[serde(rename = "type")]
    pub type_name: String,
}

impl TypeSpec {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }
}

fn default_bit() -> u8 {
    8
}

fn default_true() -> bool {
    true
}

fn default_averaging_constant() -> f32 {
    0.1
}

/// Raw quantization scheme for one tensor kind
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QSchemeConfig {
    #[serde(default)]
    pub qdtype: QuantDtype,
    #[serde(default = "default_bit")]
    pub bit: u8,
    #[serde(default = "default_true")]
    pub is_symmetry: bool,
    /// Must agree with the observer when given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_per_channel: Option<bool>,
    #[serde(default)]
    pub is_symmetric_range: bool,
    #[serde(default = "default_averaging_constant")]
    pub averaging_constant: f32,
}

impl Default for QSchemeConfig {
    fn default() -> Self {
        Self {
            qdtype: QuantDtype::default(),
            bit: default_bit(),
            is_symmetry: true,
            is_per_channel: None,
            is_symmetric_range: false,
            averaging_constant: default_averaging_constant(),
        }
    }
}

/// Raw global qconfig as written in a config file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalQConfig {
    pub w_observer: TypeSpec,
    pub a_observer: TypeSpec,
    pub w_fake_quant: TypeSpec,
    pub a_fake_quant: TypeSpec,
    #[serde(default)]
    pub w_qscheme: QSchemeConfig,
    #[serde(default)]
    pub a_qscheme: QSchemeConfig,
}

/// Fake-quantize algorithm
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FakeQuantKind {
    /// Observer-driven quantize → dequantize
    FakeQuantize,
}

impl FromStr for FakeQuantKind {
    type Err = QuantizerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.rsplit('.').next().unwrap_or(s) {
            "FakeQuantize" => Ok(FakeQuantKind::FakeQuantize),
            _ => Err(QuantizerError::InvalidConfig(format!(
                "unknown fake quant type: {s}"
            ))),
        }
    }
}

/// Resolved quantization scheme; per-channel follows the observer type
#[derive(Clone, Debug, PartialEq)]
pub struct QScheme {
    pub dtype: QuantDtype,
    pub bit: u8,
    pub is_symmetry: bool,
    pub is_per_channel: bool,
    pub is_symmetric_range: bool,
    pub averaging_constant: f32,
}

impl QScheme {
    fn resolve(raw: &QSchemeConfig, observer: ObserverKind, tensor: &str) -> Result<Self> {
        if !(2..=16).contains(&raw.bit) {
            return Err(QuantizerError::InvalidConfig(format!(
                "{tensor} bit width must be in 2..=16, got {}",
                raw.bit
            )));
        }
        if raw.is_symmetric_range && !raw.qdtype.is_signed() {
            return Err(QuantizerError::InvalidConfig(format!(
                "{tensor} symmetric range requires a signed dtype"
            )));
        }
        if !(raw.averaging_constant > 0.0 && raw.averaging_constant <= 1.0) {
            return Err(QuantizerError::InvalidConfig(format!(
                "{tensor} averaging constant must be in (0, 1], got {}",
                raw.averaging_constant
            )));
        }
        if let Some(per_channel) = raw.is_per_channel {
            if per_channel != observer.is_per_channel() {
                return Err(QuantizerError::InvalidConfig(format!(
                    "{tensor} is_per_channel={per_channel} conflicts with observer {observer}"
                )));
            }
        }
        Ok(Self {
            dtype: raw.qdtype,
            bit: raw.bit,
            is_symmetry: raw.is_symmetry,
            is_per_channel: observer.is_per_channel(),
            is_symmetric_range: raw.is_symmetric_range,
            averaging_constant: raw.averaging_constant,
        })
    }

    /// Per-tensor or per-channel
    pub fn granularity(&self) -> QuantGranularity {
        if self.is_per_channel {
            QuantGranularity::PerChannel
        } else {
            QuantGranularity::PerTensor
        }
    }

    /// Fake-quant range config; per-channel parameters live on `ch_axis`
    pub fn fake_quant_config(&self, ch_axis: usize) -> FakeQuantConfig {
        let config = FakeQuantConfig::new(
            self.dtype,
            self.bit,
            self.is_symmetry,
            self.is_symmetric_range,
            QuantGranularity::PerTensor,
        );
        if self.is_per_channel {
            config.per_channel(ch_axis)
        } else {
            config
        }
    }
}

/// Factory for identically configured fake-quant nodes
#[derive(Clone, Debug, PartialEq)]
pub struct FakeQuantSpec {
    pub kind: FakeQuantKind,
    pub observer: ObserverKind,
    pub config: FakeQuantConfig,
    pub averaging_constant: f32,
}

impl FakeQuantSpec {
    /// Fresh, uncalibrated fake-quant node
    pub fn build(&self) -> FakeQuantize {
        match self.kind {
            FakeQuantKind::FakeQuantize => {
                FakeQuantize::new(self.config.clone(), self.observer, self.averaging_constant)
            }
        }
    }
}

/// Backend-native qconfig: how to fake-quantize weights and activations
#[derive(Clone, Debug, PartialEq)]
pub struct QConfig {
    pub weight: FakeQuantSpec,
    pub activation: FakeQuantSpec,
}

/// Weight channels are the output channels
const WEIGHT_CH_AXIS: usize = 0;
/// Activation channels follow the batch axis
const ACTIVATION_CH_AXIS: usize = 1;

/// Structured view over a [`GlobalQConfig`]
#[derive(Clone, Debug, PartialEq)]
pub struct QConfigHandler {
    pub w_qscheme: QScheme,
    pub a_qscheme: QScheme,
    w_observer: ObserverKind,
    a_observer: ObserverKind,
    w_fake_quant: FakeQuantKind,
    a_fake_quant: FakeQuantKind,
}

impl QConfigHandler {
    /// Resolve observer/fake-quant types and quantization schemes
    pub fn new(raw: &GlobalQConfig) -> Result<Self> {
        let w_observer: ObserverKind = raw.w_observer.type_name.parse()?;
        let a_observer: ObserverKind = raw.a_observer.type_name.parse()?;
        let w_fake_quant: FakeQuantKind = raw.w_fake_quant.type_name.parse()?;
        let a_fake_quant: FakeQuantKind = raw.a_fake_quant.type_name.parse()?;

        Ok(Self {
            w_qscheme: QScheme::resolve(&raw.w_qscheme, w_observer, "weight")?,
            a_qscheme: QScheme::resolve(&raw.a_qscheme, a_observer, "activation")?,
            w_observer,
            a_observer,
            w_fake_quant,
            a_fake_quant,
        })
    }

    /// Backend-native qconfig consumed by the qconfig mapping
    pub fn convert(&self) -> QConfig {
        QConfig {
            weight: FakeQuantSpec {
                kind: self.w_fake_quant,
                observer: self.w_observer,
                config: self.w_qscheme.fake_quant_config(WEIGHT_CH_AXIS),
                averaging_constant: self.w_qscheme.averaging_constant,
            },
            activation: FakeQuantSpec {
                kind: self.a_fake_quant,
                observer: self.a_observer,
                config: self.a_qscheme.fake_quant_config(ACTIVATION_CH_AXIS),
                averaging_constant: self.a_qscheme.averaging_constant,
            },
        }
    }
}
