//! # Adam Optimizer

use super::Optimizer;
use crate::nn::registry::{Gradients, ParamId, ParamRegistry};
use crate::tensor::{TensorData, TensorError};
use ndarray::{ArrayD, Zip};
use std::collections::HashMap;

/// Implements the Adam algorithm.
/// Reference: Adam: A Method for Stochastic Optimization - https://arxiv.org/abs/1412.6980
///
/// The bias correction is folded into the step size,
/// `lr_t = lr · sqrt(1 − β2ᵗ) / (1 − β1ᵗ)`, and `ε` is added to the
/// uncorrected `sqrt(v)`.
#[derive(Debug, Clone)]
pub struct Adam {
    lr: TensorData,
    betas: (TensorData, TensorData), // (beta1, beta2)
    eps: TensorData,

    // State stored per parameter
    state: HashMap<ParamId, AdamParamState>,
    // Number of calls to step()
    t: usize,
}

#[derive(Clone, Debug)]
struct AdamParamState {
    exp_avg: ArrayD<TensorData>,    // m_t
    exp_avg_sq: ArrayD<TensorData>, // v_t
}

impl Adam {
    /// Creates a new Adam optimizer instance.
    ///
    /// # Arguments
    /// * `lr`: Learning rate (default: 1e-4).
    /// * `betas`: Coefficients used for computing running averages of gradient and its square
    ///   (default: (0.9, 0.999)).
    /// * `eps`: Term added to the denominator to improve numerical stability (default: 1e-8).
    pub fn new(
        lr: Option<TensorData>,
        betas: Option<(TensorData, TensorData)>,
        eps: Option<TensorData>,
    ) -> Result<Self, TensorError> {
        let lr_val = lr.unwrap_or(1e-4);
        let betas_val = betas.unwrap_or((0.9, 0.999));
        let eps_val = eps.unwrap_or(1e-8);

        // --- Input Validation ---
        if !(0.0 <= lr_val) {
            return Err(TensorError::Generic("Invalid learning rate: must be >= 0".into()));
        }
        if !(0.0 <= eps_val) {
            return Err(TensorError::Generic("Invalid epsilon value: must be >= 0".into()));
        }
        if !(0.0 <= betas_val.0 && betas_val.0 < 1.0) {
            return Err(TensorError::Generic("Invalid beta parameter at index 0".into()));
        }
        if !(0.0 <= betas_val.1 && betas_val.1 < 1.0) {
            return Err(TensorError::Generic("Invalid beta parameter at index 1".into()));
        }

        Ok(Adam {
            lr: lr_val,
            betas: betas_val,
            eps: eps_val,
            state: HashMap::new(),
            t: 0,
        })
    }

    /// Number of steps taken since construction or the last reset.
    pub fn steps(&self) -> usize {
        self.t
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut ParamRegistry, grads: &Gradients) -> Result<(), TensorError> {
        self.t += 1;
        let (beta1, beta2) = self.betas;
        let t = i32::try_from(self.t).unwrap_or(i32::MAX);

        // Bias correction terms
        let bias_correction1 = 1.0 - beta1.powi(t);
        let bias_correction2 = 1.0 - beta2.powi(t);
        let step_size = self.lr * bias_correction2.sqrt() / bias_correction1;
        let eps = self.eps;

        let ids: Vec<ParamId> = params.iter().map(|(id, _)| id).collect();
        for id in ids {
            let grad = match grads.get(id) {
                Some(g) => g,
                None => continue,
            };
            let param = params.value_mut(id)?;
            if param.shape() != grad.shape() {
                return Err(TensorError::ShapeMismatch {
                    expected: param.shape().to_vec(),
                    got: grad.shape().to_vec(),
                });
            }

            // Get or initialize state for this parameter
            let state = self.state.entry(id).or_insert_with(|| AdamParamState {
                exp_avg: ArrayD::zeros(grad.raw_dim()),
                exp_avg_sq: ArrayD::zeros(grad.raw_dim()),
            });

            // m_t = beta1 * m_{t-1} + (1 - beta1) * g_t
            // v_t = beta2 * v_{t-1} + (1 - beta2) * g_t^2
            // θ_t = θ_{t-1} - lr_t * m_t / (sqrt(v_t) + eps)
            Zip::from(param)
                .and(&mut state.exp_avg)
                .and(&mut state.exp_avg_sq)
                .and(grad)
                .for_each(|p, m, v, &g| {
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    *p -= step_size * *m / (v.sqrt() + eps);
                });
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.state.clear();
        self.t = 0;
    }
}
