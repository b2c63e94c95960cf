//! Fake quantization configuration types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Quantization granularity options
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuantGranularity {
    /// Single scale/zero-point for entire tensor
    #[default]
    PerTensor,
    /// Separate scale/zero-point per channel (axis 0 for weights)
    PerChannel,
}

impl QuantGranularity {
    /// Mode name as used in backend support tables
    pub fn as_str(&self) -> &'static str {
        match self {
            QuantGranularity::PerTensor => "per_tensor",
            QuantGranularity::PerChannel => "per_channel",
        }
    }
}

impl fmt::Display for QuantGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Integer storage type of the simulated quantized tensor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum QuantDtype {
    /// Signed integers
    #[default]
    #[serde(rename = "qint8")]
    QInt8,
    /// Unsigned integers
    #[serde(rename = "quint8")]
    QUInt8,
}

impl QuantDtype {
    /// Whether the integer range is signed
    pub fn is_signed(&self) -> bool {
        matches!(self, QuantDtype::QInt8)
    }
}

/// Fake quantization configuration
#[derive(Clone, Debug, PartialEq)]
pub struct FakeQuantConfig {
    /// Integer storage type
    pub dtype: QuantDtype,
    /// Number of bits for quantization (e.g., 4, 8)
    pub bits: u8,
    /// Whether quantization is symmetric (centered at 0)
    pub symmetric: bool,
    /// Per-tensor or per-channel parameters
    pub granularity: QuantGranularity,
    /// Channel axis for per-channel quantization
    pub ch_axis: usize,
    /// Quantization range: min value
    pub qmin: i32,
    /// Quantization range: max value
    pub qmax: i32,
}

impl FakeQuantConfig {
    /// Build a config, deriving `[qmin, qmax]` from dtype and bit width.
    ///
    /// Signed ranges are `[-2^(b-1), 2^(b-1) - 1]`, or the restricted
    /// `[-(2^(b-1) - 1), 2^(b-1) - 1]` when `symmetric_range` is set.
    /// Unsigned ranges are `[0, 2^b - 1]`.
    pub fn new(
        dtype: QuantDtype,
        bits: u8,
        symmetric: bool,
        symmetric_range: bool,
        granularity: QuantGranularity,
    ) -> Self {
        let (qmin, qmax) = match dtype {
            QuantDtype::QInt8 => {
                let qmax = (1i32 << (bits - 1)) - 1;
                let qmin = if symmetric_range { -qmax } else { -qmax - 1 };
                (qmin, qmax)
            }
            QuantDtype::QUInt8 => (0, (1i32 << bits) - 1),
        };
        Self {
            dtype,
            bits,
            symmetric,
            granularity,
            ch_axis: 0,
            qmin,
            qmax,
        }
    }

    /// Create symmetric per-tensor config on the restricted signed range
    ///
    /// # Arguments
    /// * `bits` - Number of bits (4-bit: qmin=-7, qmax=7; 8-bit: qmin=-127, qmax=127)
    pub fn symmetric(bits: u8) -> Self {
        Self::new(QuantDtype::QInt8, bits, true, true, QuantGranularity::PerTensor)
    }

    /// Create asymmetric per-tensor config on the unsigned range
    ///
    /// # Arguments
    /// * `bits` - Number of bits (4-bit: qmin=0, qmax=15; 8-bit: qmin=0, qmax=255)
    pub fn asymmetric(bits: u8) -> Self {
        Self::new(QuantDtype::QUInt8, bits, false, false, QuantGranularity::PerTensor)
    }

    /// Switch to per-channel parameters along `ch_axis`
    pub fn per_channel(mut self, ch_axis: usize) -> Self {
        self.granularity = QuantGranularity::PerChannel;
        self.ch_axis = ch_axis;
        self
    }

    /// 8-bit symmetric quantization
    pub fn q8_symmetric() -> Self {
        Self::symmetric(8)
    }

    /// Number of quantization levels
    pub fn num_levels(&self) -> usize {
        (self.qmax - self.qmin + 1) as usize
    }
}

impl Default for FakeQuantConfig {
    fn default() -> Self {
        Self::q8_symmetric()
    }
}
