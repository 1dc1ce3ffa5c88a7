//! # Loss Functions
//!
//! Reconstruction loss, the L2 penalty on encoder kernels and the per-sample
//! scores derived from reconstruction error.

use crate::nn::registry::{Gradients, ParamRegistry, ParamRole};
use crate::tensor::{ops, Batch, TensorData, TensorError};
use ndarray::{Array1, ArrayBase, Data, Dimension};
use serde::{Deserialize, Serialize};

/// Half the sum of squares, `Σ t² / 2`.
pub fn l2_loss<S, D>(t: &ArrayBase<S, D>) -> TensorData
where
    S: Data<Elem = TensorData>,
    D: Dimension,
{
    ops::sum_squares(t) / 2.0
}

/// `Σ (x − y)² / n` with `n` the batch size, together with `∂loss/∂y`.
pub fn reconstruction_loss(x: &Batch, y: &Batch) -> Result<(TensorData, Batch), TensorError> {
    let n = x.shape()[0];
    if n == 0 {
        return Err(TensorError::Generic("Reconstruction loss of an empty batch".into()));
    }
    let n = n as TensorData;
    let diff = ops::sub(y, x)?;
    let loss = ops::sum_squares(&diff) / n;
    let grad = diff * (2.0 / n);
    Ok((loss, grad))
}

// --- Regularization ---

/// Weighted L2 penalty over every registered parameter of one role.
///
/// The penalty is `weight · 2 · l2_loss(θ) = weight · Σ θ²`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct L2Regularizer {
    pub weight: TensorData,
    pub role: ParamRole,
}

impl L2Regularizer {
    pub fn new(weight: TensorData, role: ParamRole) -> Self {
        L2Regularizer { weight, role }
    }

    /// Returns the regularization loss over the selected parameters.
    pub fn loss(&self, params: &ParamRegistry) -> TensorData {
        let total: TensorData = params
            .with_role(self.role)
            .map(|(_, p)| l2_loss(p.value()))
            .sum();
        self.weight * 2.0 * total
    }

    /// Adds `2 · weight · θ` to the gradient of every selected parameter.
    pub fn accumulate_grads(
        &self,
        params: &ParamRegistry,
        grads: &mut Gradients,
    ) -> Result<(), TensorError> {
        if self.weight == 0.0 {
            return Ok(());
        }
        for (id, p) in params.with_role(self.role) {
            grads.accumulate(id, p.value() * (2.0 * self.weight))?;
        }
        Ok(())
    }
}

// --- Scores ---

/// Per-sample `Σ (x − y)²` over height, width and channels.
pub fn pixel_error(x: &Batch, y: &Batch) -> Result<Array1<TensorData>, TensorError> {
    ops::squared_error_per_sample(x, y)
}

/// Batch-relative regularity `1 − (e_i − max e) / min e`.
///
/// Lower error gives a higher score. Fails with `NumericalDegeneracy` when the
/// smallest error is zero or any error or score is not finite.
pub fn regularity(errors: &Array1<TensorData>) -> Result<Array1<TensorData>, TensorError> {
    if errors.is_empty() {
        return Err(TensorError::Generic("Regularity of an empty batch".into()));
    }
    let min = errors.fold(TensorData::INFINITY, |m, &e| m.min(e));
    let max = errors.fold(TensorData::NEG_INFINITY, |m, &e| m.max(e));
    let degenerate = TensorError::NumericalDegeneracy {
        min_error: min,
        max_error: max,
    };
    if min == 0.0 || errors.iter().any(|e| !e.is_finite()) {
        return Err(degenerate);
    }
    let scores = errors.mapv(|e| 1.0 - (e - max) / min);
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(degenerate);
    }
    Ok(scores)
}
