//! # Optimization Algorithms (`optim`)
//!
//! Update rules applied to the parameter registry after a backward pass.

use crate::nn::registry::{Gradients, ParamRegistry};
use crate::tensor::TensorError;

// --- Submodules ---
pub mod adam;

// Re-export optimizers
pub use adam::Adam;

// --- Optimizer Trait ---

/// Base trait for all optimizers.
pub trait Optimizer {
    /// Performs a single optimization step over every parameter that has a
    /// gradient. Parameters without one are left untouched.
    fn step(&mut self, params: &mut ParamRegistry, grads: &Gradients) -> Result<(), TensorError>;

    /// Drops any per-parameter state (moment estimates, step counters).
    fn reset(&mut self);
}
