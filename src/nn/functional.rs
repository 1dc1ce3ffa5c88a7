//! # Neural Network Functional Interface (`nn::functional`)
//!
//! Stateless convolution kernels operating on NHWC batches. Both directions
//! are expressed through `im2col`/`col2im` so each sample reduces to a couple
//! of matrix products:
//!
//! * valid `conv2d`: kernel `(kh, kw, in, out)`, `y = im2col(x) · K + b`
//! * `conv2d_transpose`: kernel `(kh, kw, out, in)`, `y = col2im(x · Kᵀ) + b`
//!
//! The transposed convolution is the adjoint of the valid convolution with the
//! same kernel, which is what makes the backward passes below reuse the
//! forward building blocks.

use crate::nn::topology::{conv_output_dim, is_legal_transpose_target};
use crate::tensor::{Batch, TensorData, TensorError};
use crate::utils::parallel::{gather, map_samples, sample, sum_in_order};
use ndarray::{
    s, Array, Array1, Array2, Array3, ArrayD, ArrayView2, ArrayView3, Axis, Dimension,
    IntoDimension, Ix4, IxDyn,
};

/// Spatial window geometry shared by the kernels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
}

/// Gradients of one convolution layer.
#[derive(Clone, Debug)]
pub struct ConvGrads {
    /// `None` when the caller did not ask for it (first layer).
    pub input: Option<Batch>,
    pub kernel: ArrayD<TensorData>,
    pub bias: ArrayD<TensorData>,
}

// --- Building blocks ---

/// Unfolds every `kh x kw` window of `x` (`[h, w, c]`) visited on an
/// `out_h x out_w` grid into one row of length `kh * kw * c`.
pub fn im2col(
    x: ArrayView3<TensorData>,
    window: Window,
    grid: (usize, usize),
) -> Array2<TensorData> {
    let (kh, kw) = window.kernel;
    let (sh, sw) = window.stride;
    let (oh, ow) = grid;
    let c = x.shape()[2];
    let mut cols = Array2::zeros((oh * ow, kh * kw * c));
    for (r, mut row) in cols.outer_iter_mut().enumerate() {
        let (i, j) = (r / ow, r % ow);
        let patch = x.slice(s![i * sh..i * sh + kh, j * sw..j * sw + kw, ..]);
        for (dst, &src) in row.iter_mut().zip(patch.iter()) {
            *dst = src;
        }
    }
    cols
}

/// Adjoint of [`im2col`]: scatters-adds every row back onto its window of an
/// `out_shape` (`[h, w, c]`) image.
pub fn col2im(
    cols: ArrayView2<TensorData>,
    window: Window,
    grid: (usize, usize),
    out_shape: (usize, usize, usize),
) -> Array3<TensorData> {
    let (kh, kw) = window.kernel;
    let (sh, sw) = window.stride;
    let (_, ow) = grid;
    let mut out = Array3::zeros(out_shape);
    for (r, row) in cols.outer_iter().enumerate() {
        let (i, j) = (r / ow, r % ow);
        let mut patch = out.slice_mut(s![i * sh..i * sh + kh, j * sw..j * sw + kw, ..]);
        for (dst, &src) in patch.iter_mut().zip(row.iter()) {
            *dst += src;
        }
    }
    out
}

/// Flattens a 4-D kernel `(a, b, c, d)` into an `(a * b * c, d)` matrix.
fn kernel_matrix(kernel: &ArrayD<TensorData>) -> Result<Array2<TensorData>, TensorError> {
    let k = kernel.view().into_dimensionality::<Ix4>()?;
    let (a, b, c, d) = k.dim();
    Ok(Array2::from_shape_vec((a * b * c, d), k.iter().cloned().collect())?)
}

/// `[h, w, c]` image as an `(h * w, c)` matrix.
fn pixel_rows(x: ArrayView3<TensorData>) -> Result<Array2<TensorData>, TensorError> {
    let (h, w, c) = x.dim();
    Ok(Array2::from_shape_vec((h * w, c), x.iter().cloned().collect())?)
}

fn bias_vector(
    bias: &ArrayD<TensorData>,
    channels: usize,
) -> Result<Array1<TensorData>, TensorError> {
    if bias.len() != channels {
        return Err(TensorError::ShapeMismatch {
            expected: vec![1, 1, 1, channels],
            got: bias.shape().to_vec(),
        });
    }
    Ok(bias.iter().cloned().collect())
}

fn kernel_dims(
    kernel: &ArrayD<TensorData>,
) -> Result<(usize, usize, usize, usize), TensorError> {
    Ok(kernel.view().into_dimensionality::<Ix4>()?.dim())
}

/// Row-major reshape. Matrix products may hand back column-major results,
/// which `into_shape` would otherwise reinterpret in column-major order.
fn reshape<D, E>(
    a: Array<TensorData, D>,
    shape: E,
) -> Result<Array<TensorData, E::Dim>, TensorError>
where
    D: Dimension,
    E: IntoDimension,
{
    let a = if a.is_standard_layout() {
        a
    } else {
        a.as_standard_layout().into_owned()
    };
    Ok(a.into_shape(shape)?)
}

fn bias_grad(parts: Vec<Array1<TensorData>>) -> Result<ArrayD<TensorData>, TensorError> {
    let total = sum_in_order(parts)?;
    let channels = total.len();
    reshape(total, IxDyn(&[1, 1, 1, channels]))
}

// --- Valid convolution ---

/// Valid (unpadded) 2-D convolution of `x` (`[n, h, w, in]`) with `kernel`
/// (`[kh, kw, in, out]`), plus `bias` (`[1, 1, 1, out]`).
pub fn conv2d(
    x: &Batch,
    kernel: &ArrayD<TensorData>,
    bias: &ArrayD<TensorData>,
    stride: (usize, usize),
) -> Result<Batch, TensorError> {
    let (kh, kw, cin, cout) = kernel_dims(kernel)?;
    let (n, h, w, c) = x.dim();
    if c != cin {
        return Err(TensorError::IncompatibleShapes {
            op: "conv2d".to_string(),
            shape1: x.shape().to_vec(),
            shape2: kernel.shape().to_vec(),
        });
    }
    let window = Window {
        kernel: (kh, kw),
        stride,
    };
    let grid = conv_grid(x.shape(), (h, w), window)?;
    let kmat = kernel_matrix(kernel)?;
    let b = bias_vector(bias, cout)?;

    let outputs = map_samples(n, |i| {
        let cols = im2col(sample(x, i), window, grid);
        let mut out = cols.dot(&kmat);
        out += &b;
        reshape(out, (grid.0, grid.1, cout))
    })?;
    gather(&outputs)
}

/// Backward pass of [`conv2d`] given the layer input and `grad_out`
/// (`∂L/∂y`, same shape as the forward output).
pub fn conv2d_backward(
    x: &Batch,
    kernel: &ArrayD<TensorData>,
    stride: (usize, usize),
    grad_out: &Batch,
    need_input_grad: bool,
) -> Result<ConvGrads, TensorError> {
    let (kh, kw, cin, cout) = kernel_dims(kernel)?;
    let (n, h, w, _) = x.dim();
    let window = Window {
        kernel: (kh, kw),
        stride,
    };
    let grid = conv_grid(x.shape(), (h, w), window)?;
    let expected = [n, grid.0, grid.1, cout];
    if grad_out.shape() != expected {
        return Err(TensorError::ShapeMismatch {
            expected: expected.to_vec(),
            got: grad_out.shape().to_vec(),
        });
    }
    let kmat = kernel_matrix(kernel)?;

    let parts = map_samples(n, |i| {
        let cols = im2col(sample(x, i), window, grid);
        let g = pixel_rows(sample(grad_out, i))?;
        let dk = cols.t().dot(&g);
        let db = g.sum_axis(Axis(0));
        let dx = if need_input_grad {
            let dcols = g.dot(&kmat.t());
            Some(col2im(dcols.view(), window, grid, (h, w, cin)))
        } else {
            None
        };
        Ok((dk, db, dx))
    })?;

    let mut dks = Vec::with_capacity(n);
    let mut dbs = Vec::with_capacity(n);
    let mut dxs = Vec::with_capacity(n);
    for (dk, db, dx) in parts {
        dks.push(dk);
        dbs.push(db);
        dxs.extend(dx);
    }
    let input = if need_input_grad { Some(gather(&dxs)?) } else { None };
    Ok(ConvGrads {
        input,
        kernel: reshape(sum_in_order(dks)?, IxDyn(kernel.shape()))?,
        bias: bias_grad(dbs)?,
    })
}

fn conv_grid(
    shape: &[usize],
    hw: (usize, usize),
    window: Window,
) -> Result<(usize, usize), TensorError> {
    let too_small = || TensorError::IncompatibleShapes {
        op: "conv2d window".to_string(),
        shape1: shape.to_vec(),
        shape2: vec![window.kernel.0, window.kernel.1],
    };
    Ok((
        conv_output_dim(hw.0, window.kernel.0, window.stride.0).ok_or_else(too_small)?,
        conv_output_dim(hw.1, window.kernel.1, window.stride.1).ok_or_else(too_small)?,
    ))
}

// --- Transposed convolution ---

fn check_transpose_target(
    x: &Batch,
    window: Window,
    output_hw: (usize, usize),
) -> Result<(), TensorError> {
    let (_, h, w, _) = x.dim();
    if !is_legal_transpose_target((h, w), output_hw, window.kernel, window.stride) {
        return Err(TensorError::IncompatibleShapes {
            op: "conv2d_transpose target".to_string(),
            shape1: x.shape().to_vec(),
            shape2: vec![output_hw.0, output_hw.1],
        });
    }
    Ok(())
}

/// Transposed convolution of `x` (`[n, h, w, in]`) with `kernel`
/// (`[kh, kw, out, in]`) onto an explicit `output_hw`, plus `bias`
/// (`[1, 1, 1, out]`). Output positions that no input tap reaches hold only
/// the bias.
pub fn conv2d_transpose(
    x: &Batch,
    kernel: &ArrayD<TensorData>,
    bias: &ArrayD<TensorData>,
    stride: (usize, usize),
    output_hw: (usize, usize),
) -> Result<Batch, TensorError> {
    let (kh, kw, cout, cin) = kernel_dims(kernel)?;
    let (n, h, w, c) = x.dim();
    if c != cin {
        return Err(TensorError::IncompatibleShapes {
            op: "conv2d_transpose".to_string(),
            shape1: x.shape().to_vec(),
            shape2: kernel.shape().to_vec(),
        });
    }
    let window = Window {
        kernel: (kh, kw),
        stride,
    };
    check_transpose_target(x, window, output_hw)?;
    let kmat = kernel_matrix(kernel)?;
    let b = bias_vector(bias, cout)?;

    let outputs = map_samples(n, |i| {
        let rows = pixel_rows(sample(x, i))?;
        let cols = rows.dot(&kmat.t());
        let mut out = col2im(cols.view(), window, (h, w), (output_hw.0, output_hw.1, cout));
        out += &b;
        Ok(out)
    })?;
    gather(&outputs)
}

/// Backward pass of [`conv2d_transpose`].
pub fn conv2d_transpose_backward(
    x: &Batch,
    kernel: &ArrayD<TensorData>,
    stride: (usize, usize),
    grad_out: &Batch,
    need_input_grad: bool,
) -> Result<ConvGrads, TensorError> {
    let (kh, kw, cout, _) = kernel_dims(kernel)?;
    let (n, h, w, _) = x.dim();
    let window = Window {
        kernel: (kh, kw),
        stride,
    };
    let (gn, gh, gw, gc) = grad_out.dim();
    if gn != n || gc != cout {
        return Err(TensorError::IncompatibleShapes {
            op: "conv2d_transpose_backward".to_string(),
            shape1: x.shape().to_vec(),
            shape2: grad_out.shape().to_vec(),
        });
    }
    check_transpose_target(x, window, (gh, gw))?;
    let kmat = kernel_matrix(kernel)?;

    let parts = map_samples(n, |i| {
        let g = sample(grad_out, i);
        // the valid convolution of ∂L/∂y visits exactly the input grid
        let gcols = im2col(g, window, (h, w));
        let rows = pixel_rows(sample(x, i))?;
        let dk = gcols.t().dot(&rows);
        let db = g.sum_axis(Axis(0)).sum_axis(Axis(0));
        let dx = if need_input_grad {
            let cin = rows.ncols();
            Some(reshape(gcols.dot(&kmat), (h, w, cin))?)
        } else {
            None
        };
        Ok((dk, db, dx))
    })?;

    let mut dks = Vec::with_capacity(n);
    let mut dbs = Vec::with_capacity(n);
    let mut dxs = Vec::with_capacity(n);
    for (dk, db, dx) in parts {
        dks.push(dk);
        dbs.push(db);
        dxs.extend(dx);
    }
    let input = if need_input_grad { Some(gather(&dxs)?) } else { None };
    Ok(ConvGrads {
        input,
        kernel: reshape(sum_in_order(dks)?, IxDyn(kernel.shape()))?,
        bias: bias_grad(dbs)?,
    })
}
