//! Fully connected layer

use ndarray::{Array1, Array2};
use rand::Rng;

use super::functional::linear;
use crate::error::{QuantizerError, Result};
use crate::quant::QConfig;
use crate::Tensor;

/// Affine layer `y = x @ W^T + b`
#[derive(Clone, Debug, PartialEq)]
pub struct Linear {
    /// Weight `[out_features, in_features]`
    pub weight: Tensor,
    pub bias: Option<Array1<f32>>,
    /// Attached quantization config, set before QAT conversion
    pub qconfig: Option<QConfig>,
}

impl Linear {
    /// Create with uniform(-1/sqrt(in), 1/sqrt(in)) weights and bias
    pub fn new(in_features: usize, out_features: usize) -> Self {
        let bound = 1.0 / (in_features.max(1) as f32).sqrt();
        let mut rng = rand::rng();
        let weight = Array2::from_shape_simple_fn((out_features, in_features), || {
            rng.random_range(-bound..bound)
        });
        let bias = Array1::from_shape_simple_fn(out_features, || rng.random_range(-bound..bound));
        Self {
            weight: weight.into_dyn(),
            bias: Some(bias),
            qconfig: None,
        }
    }

    /// Create from an explicit `[out, in]` weight
    pub fn from_weight(weight: Tensor, bias: Option<Array1<f32>>) -> Result<Self> {
        if weight.ndim() != 2 {
            return Err(QuantizerError::ShapeMismatch {
                expected: "[out_features, in_features]".to_string(),
                actual: format!("{:?}", weight.shape()),
            });
        }
        if let Some(b) = &bias {
            if b.len() != weight.shape()[0] {
                return Err(QuantizerError::ShapeMismatch {
                    expected: format!("bias of length {}", weight.shape()[0]),
                    actual: format!("{}", b.len()),
                });
            }
        }
        Ok(Self {
            weight,
            bias,
            qconfig: None,
        })
    }

    /// Number of output features
    pub fn out_features(&self) -> usize {
        self.weight.shape()[0]
    }

    /// Forward pass with the stored weight
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        self.forward_with_weight(input, &self.weight)
    }

    /// Forward pass with a substitute weight (e.g. fake-quantized)
    pub fn forward_with_weight(&self, input: &Tensor, weight: &Tensor) -> Result<Tensor> {
        linear(input, weight, self.bias.as_ref())
    }
}
