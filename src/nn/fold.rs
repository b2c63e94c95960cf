//! Batch-norm folding into a preceding conv/linear weight

use ndarray::{Array1, Axis};

use super::batch_norm::BatchNorm;
use crate::error::{QuantizerError, Result};
use crate::Tensor;

/// Fold running statistics into weight and bias.
///
/// With `s = gamma / sqrt(var + eps)` per output channel:
/// `w' = w * s`, `b' = (b - mean) * s + beta`.
pub fn fuse_bn_weights(
    weight: &Tensor,
    bias: Option<&Array1<f32>>,
    bn: &BatchNorm,
) -> Result<(Tensor, Array1<f32>)> {
    let out_channels = weight.shape().first().copied().unwrap_or(0);
    if out_channels != bn.num_features() {
        return Err(QuantizerError::ShapeMismatch {
            expected: format!("{} output channels", bn.num_features()),
            actual: format!("{out_channels}"),
        });
    }

    let scale = bn.running_scale();
    let mut fused_weight = weight.clone();
    for (mut lane, &s) in fused_weight.axis_iter_mut(Axis(0)).zip(scale.iter()) {
        lane.mapv_inplace(|w| w * s);
    }

    let bias = bias.cloned().unwrap_or_else(|| Array1::zeros(out_channels));
    let fused_bias = (&bias - &bn.running_mean) * &scale + &bn.bias;
    Ok((fused_weight, fused_bias))
}
