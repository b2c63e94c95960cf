//! Batch normalization over the channel axis

use ndarray::{Array1, Axis};

use super::kind::ConvDim;
use crate::error::{QuantizerError, Result};
use crate::quant::QConfig;
use crate::Tensor;

/// Batch norm with running statistics; channels live on axis 1
#[derive(Clone, Debug, PartialEq)]
pub struct BatchNorm {
    pub dim: ConvDim,
    /// Scale (gamma)
    pub weight: Array1<f32>,
    /// Shift (beta)
    pub bias: Array1<f32>,
    pub running_mean: Array1<f32>,
    pub running_var: Array1<f32>,
    pub eps: f32,
    pub momentum: f32,
    /// Batch statistics in training mode, running statistics otherwise
    pub training: bool,
    pub qconfig: Option<QConfig>,
}

impl BatchNorm {
    /// Identity-initialized batch norm (gamma=1, beta=0, mean=0, var=1)
    pub fn new(dim: ConvDim, num_features: usize) -> Self {
        Self {
            dim,
            weight: Array1::ones(num_features),
            bias: Array1::zeros(num_features),
            running_mean: Array1::zeros(num_features),
            running_var: Array1::ones(num_features),
            eps: 1e-5,
            momentum: 0.1,
            training: false,
            qconfig: None,
        }
    }

    /// Replace the affine parameters and running statistics
    pub fn with_stats(
        mut self,
        weight: Array1<f32>,
        bias: Array1<f32>,
        running_mean: Array1<f32>,
        running_var: Array1<f32>,
    ) -> Self {
        self.weight = weight;
        self.bias = bias;
        self.running_mean = running_mean;
        self.running_var = running_var;
        self
    }

    /// Number of normalized channels
    pub fn num_features(&self) -> usize {
        self.weight.len()
    }

    /// Per-channel `gamma / sqrt(var + eps)` from running statistics
    pub fn running_scale(&self) -> Array1<f32> {
        ndarray::Zip::from(&self.weight)
            .and(&self.running_var)
            .map_collect(|&g, &v| g / (v + self.eps).sqrt())
    }

    /// Normalize; updates running statistics in training mode
    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        if input.ndim() < 2 || input.shape()[1] != self.num_features() {
            return Err(QuantizerError::ShapeMismatch {
                expected: format!("[N, {}, ..]", self.num_features()),
                actual: format!("{:?}", input.shape()),
            });
        }

        let mut output = input.clone();
        for (c, mut lane) in output.axis_iter_mut(Axis(1)).enumerate() {
            let (mean, var) = if self.training {
                let n = lane.len() as f32;
                let mean = lane.sum() / n;
                let var = lane.iter().map(|&x| (x - mean).powi(2)).sum::<f32>() / n;
                let unbiased = if n > 1.0 { var * n / (n - 1.0) } else { var };
                let m = self.momentum;
                self.running_mean[c] = (1.0 - m) * self.running_mean[c] + m * mean;
                self.running_var[c] = (1.0 - m) * self.running_var[c] + m * unbiased;
                (mean, var)
            } else {
                (self.running_mean[c], self.running_var[c])
            };
            let inv_std = 1.0 / (var + self.eps).sqrt();
            let (gamma, beta) = (self.weight[c], self.bias[c]);
            lane.mapv_inplace(|x| (x - mean) * inv_std * gamma + beta);
        }
        Ok(output)
    }
}
