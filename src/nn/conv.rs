//! Convolution layer

use ndarray::{Array1, ArrayD, IxDyn};
use rand::Rng;

use super::functional::conv_nd;
use super::kind::ConvDim;
use crate::error::{QuantizerError, Result};
use crate::quant::QConfig;
use crate::Tensor;

/// 1d/2d/3d convolution with stride 1 and symmetric zero padding
#[derive(Clone, Debug, PartialEq)]
pub struct Conv {
    pub dim: ConvDim,
    /// Weight `[out, in, k1, .., kd]`
    pub weight: Tensor,
    pub bias: Option<Array1<f32>>,
    pub padding: usize,
    /// Attached quantization config, set before QAT conversion
    pub qconfig: Option<QConfig>,
}

impl Conv {
    /// Create with uniform(-1/sqrt(fan_in), 1/sqrt(fan_in)) weights and bias
    pub fn new(
        dim: ConvDim,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        padding: usize,
    ) -> Self {
        let mut shape = vec![out_channels, in_channels];
        shape.extend(std::iter::repeat(kernel_size).take(dim.spatial_dims()));
        let fan_in = (in_channels * kernel_size.pow(dim.spatial_dims() as u32)).max(1);
        let bound = 1.0 / (fan_in as f32).sqrt();

        let mut rng = rand::rng();
        let weight = ArrayD::from_shape_simple_fn(IxDyn(&shape), || rng.random_range(-bound..bound));
        let bias = Array1::from_shape_simple_fn(out_channels, || rng.random_range(-bound..bound));

        Self {
            dim,
            weight,
            bias: Some(bias),
            padding,
            qconfig: None,
        }
    }

    /// Create from an explicit weight; the dimensionality follows the weight rank
    pub fn from_weight(weight: Tensor, bias: Option<Array1<f32>>, padding: usize) -> Result<Self> {
        let dim = ConvDim::from_spatial_dims(weight.ndim().saturating_sub(2)).ok_or_else(|| {
            QuantizerError::ShapeMismatch {
                expected: "[out, in, k1, .., kd] with d in 1..=3".to_string(),
                actual: format!("{:?}", weight.shape()),
            }
        })?;
        if let Some(b) = &bias {
            if b.len() != weight.shape()[0] {
                return Err(QuantizerError::ShapeMismatch {
                    expected: format!("bias of length {}", weight.shape()[0]),
                    actual: format!("{}", b.len()),
                });
            }
        }
        Ok(Self {
            dim,
            weight,
            bias,
            padding,
            qconfig: None,
        })
    }

    /// Number of output channels
    pub fn out_channels(&self) -> usize {
        self.weight.shape()[0]
    }

    /// Forward pass with the stored weight
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        self.forward_with_weight(input, &self.weight)
    }

    /// Forward pass with a substitute weight (e.g. fake-quantized)
    pub fn forward_with_weight(&self, input: &Tensor, weight: &Tensor) -> Result<Tensor> {
        conv_nd(input, weight, self.bias.as_ref(), self.padding)
    }
}
