//! Stateless tensor kernels shared by modules and graph function calls.

use ndarray::{Array1, Array2, ArrayD, Axis, Ix2, IxDyn};

use crate::error::{QuantizerError, Result};
use crate::Tensor;

fn shape_error(expected: impl Into<String>, actual: &[usize]) -> QuantizerError {
    QuantizerError::ShapeMismatch {
        expected: expected.into(),
        actual: format!("{actual:?}"),
    }
}

/// N-d convolution with stride 1 and symmetric zero padding.
///
/// `input` is `[N, C, s1, .., sd]`, `weight` is `[O, C, k1, .., kd]`.
pub fn conv_nd(
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Array1<f32>>,
    padding: usize,
) -> Result<Tensor> {
    let w_shape = weight.shape();
    let x_shape = input.shape();
    let dims = w_shape.len().saturating_sub(2);
    if dims == 0 || x_shape.len() != dims + 2 {
        return Err(shape_error(format!("[N, C, {dims} spatial dims]"), x_shape));
    }
    if x_shape[1] != w_shape[1] {
        return Err(shape_error(format!("{} input channels", w_shape[1]), x_shape));
    }

    let mut out_shape = vec![x_shape[0], w_shape[0]];
    for d in 0..dims {
        let padded = x_shape[2 + d] + 2 * padding;
        if padded < w_shape[2 + d] {
            return Err(shape_error(
                format!("spatial extent >= kernel {}", w_shape[2 + d]),
                x_shape,
            ));
        }
        out_shape.push(padded - w_shape[2 + d] + 1);
    }

    let mut output = ArrayD::<f32>::zeros(IxDyn(&out_shape));
    let mut in_idx = vec![0usize; dims + 2];
    for (idx, out) in output.indexed_iter_mut() {
        let (b, oc) = (idx[0], idx[1]);
        let mut acc = bias.map_or(0.0, |bias| bias[oc]);
        'kernel: for (w_idx, &w) in weight.index_axis(Axis(0), oc).indexed_iter() {
            in_idx[0] = b;
            in_idx[1] = w_idx[0];
            for d in 0..dims {
                let pos = idx[2 + d] + w_idx[1 + d];
                if pos < padding || pos - padding >= x_shape[2 + d] {
                    continue 'kernel;
                }
                in_idx[2 + d] = pos - padding;
            }
            acc += w * input[IxDyn(&in_idx)];
        }
        *out = acc;
    }
    Ok(output)
}

/// Affine map `x @ W^T + b` for `[N, in]` inputs and `[out, in]` weights
pub fn linear(input: &Tensor, weight: &Tensor, bias: Option<&Array1<f32>>) -> Result<Tensor> {
    let x = input
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| shape_error("[N, in_features]", input.shape()))?;
    let w = weight
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| shape_error("[out_features, in_features]", weight.shape()))?;
    if x.ncols() != w.ncols() {
        return Err(shape_error(format!("[N, {}]", w.ncols()), input.shape()));
    }

    let mut y: Array2<f32> = x.dot(&w.t());
    if let Some(bias) = bias {
        y += bias;
    }
    Ok(y.into_dyn())
}

/// Rectified linear unit
pub fn relu(input: &Tensor) -> Tensor {
    input.mapv(|x| x.max(0.0))
}

/// ReLU clipped at 6
pub fn relu6(input: &Tensor) -> Tensor {
    input.mapv(|x| x.clamp(0.0, 6.0))
}

/// Collapse every axis after the batch axis
pub fn flatten(input: &Tensor) -> Result<Tensor> {
    let batch = input.shape().first().copied().unwrap_or(1);
    let rest = if batch == 0 { 0 } else { input.len() / batch };
    ArrayD::from_shape_vec(IxDyn(&[batch, rest]), input.iter().copied().collect())
        .map_err(|_| shape_error("flattenable tensor", input.shape()))
}

/// Concatenate along the channel axis
pub fn cat(inputs: &[&Tensor]) -> Result<Tensor> {
    let views: Vec<_> = inputs.iter().map(|t| t.view()).collect();
    ndarray::concatenate(Axis(1), &views).map_err(|_| {
        shape_error(
            "tensors matching on all but axis 1",
            inputs.first().map_or(&[][..], |t| t.shape()),
        )
    })
}

/// Broadcasting element-wise binary op
pub fn broadcast_binary(a: &Tensor, b: &Tensor, op: impl Fn(f32, f32) -> f32) -> Result<Tensor> {
    let shape = co_broadcast(a.shape(), b.shape())
        .ok_or_else(|| shape_error(format!("shape broadcastable with {:?}", a.shape()), b.shape()))?;
    let a = a
        .broadcast(IxDyn(&shape))
        .ok_or_else(|| shape_error(format!("{shape:?}"), a.shape()))?;
    let b = b
        .broadcast(IxDyn(&shape))
        .ok_or_else(|| shape_error(format!("{shape:?}"), b.shape()))?;
    Ok(ndarray::Zip::from(&a).and(&b).map_collect(|&x, &y| op(x, y)))
}

fn co_broadcast(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let ndim = a.len().max(b.len());
    (0..ndim)
        .map(|i| {
            let da = if i + a.len() >= ndim { a[i + a.len() - ndim] } else { 1 };
            let db = if i + b.len() >= ndim { b[i + b.len() - ndim] } else { 1 };
            match (da, db) {
                (x, y) if x == y => Some(x),
                (1, y) => Some(y),
                (x, 1) => Some(x),
                _ => None,
            }
        })
        .collect()
}
