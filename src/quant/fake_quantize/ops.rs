//! Fake quantization kernels.
//!
//! Forward is quantize → dequantize; backward is the Straight-Through
//! Estimator, which passes gradients unchanged.

use ndarray::Axis;

use crate::Tensor;

/// Fake quantize a single value
#[inline]
pub fn fake_quantize_value(x: f32, scale: f32, zero_point: i32, qmin: i32, qmax: i32) -> f32 {
    let q = ((x / scale).round() + zero_point as f32).clamp(qmin as f32, qmax as f32);
    (q - zero_point as f32) * scale
}

/// Fake quantize a tensor with a single scale/zero-point
pub fn fake_quantize_per_tensor(
    input: &Tensor,
    scale: f32,
    zero_point: i32,
    qmin: i32,
    qmax: i32,
) -> Tensor {
    input.mapv(|x| fake_quantize_value(x, scale, zero_point, qmin, qmax))
}

/// Fake quantize a tensor with one scale/zero-point per slice along `ch_axis`
///
/// Channels without a parameter entry are passed through unchanged.
pub fn fake_quantize_per_channel(
    input: &Tensor,
    scales: &[f32],
    zero_points: &[i32],
    ch_axis: usize,
    qmin: i32,
    qmax: i32,
) -> Tensor {
    let mut output = input.clone();
    for (c, mut lane) in output.axis_iter_mut(Axis(ch_axis)).enumerate() {
        let (Some(&scale), Some(&zp)) = (scales.get(c), zero_points.get(c)) else {
            continue;
        };
        lane.mapv_inplace(|x| fake_quantize_value(x, scale, zp, qmin, qmax));
    }
    output
}

/// Convenience function for STE backward pass
pub fn ste_backward(grad_output: &Tensor) -> Tensor {
    grad_output.clone()
}
