//! # Tensor Module
//!
//! Element type, error type and the small set of array helpers the model is
//! built on. Storage is plain `ndarray`: parameters are `ArrayD` (their rank
//! depends on the role) and activations are NHWC `Array4`.

use ndarray::{Array4, ArrayD, IxDyn};
use ndarray_rand::rand_distr::{Distribution, Normal};
use ndarray_rand::RandomExt;
use rand::Rng;

// --- Submodules ---
pub mod ops;

// --- Error Handling ---
#[derive(thiserror::Error, Debug)]
pub enum TensorError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("Incompatible shapes for operation {op}: {shape1:?} and {shape2:?}")]
    IncompatibleShapes {
        op: String,
        shape1: Vec<usize>,
        shape2: Vec<usize>,
    },
    #[error("ndarray error: {0}")]
    NdarrayError(#[from] ndarray::ShapeError),
    #[error("Parameter '{0}' is already registered")]
    DuplicateParameter(String),
    #[error("No parameter with id {0}")]
    UnknownParameter(usize),
    #[error("Degenerate error range: min {min_error}, max {max_error}")]
    NumericalDegeneracy {
        min_error: TensorData,
        max_error: TensorData,
    },
    #[error("Invalid distribution parameters: {0}")]
    Distribution(String),
    #[error("Generic error: {0}")]
    Generic(String),
}

/// Element type of every tensor in the crate.
pub type TensorData = f32;

/// A batch of frames laid out as `(batch, height, width, channels)`.
pub type Batch = Array4<TensorData>;

// --- Initializers ---

/// Helper to create a parameter filled with zeros.
pub fn zeros(shape: &[usize]) -> ArrayD<TensorData> {
    ArrayD::zeros(IxDyn(shape))
}

/// Helper to create a parameter drawn from `N(0, stddev²)`.
pub fn randn_using<R: Rng + ?Sized>(
    shape: &[usize],
    stddev: TensorData,
    rng: &mut R,
) -> Result<ArrayD<TensorData>, TensorError> {
    let normal = Normal::new(0.0, stddev).map_err(|e| TensorError::Distribution(e.to_string()))?;
    Ok(ArrayD::random_using(IxDyn(shape), normal, rng))
}

/// Helper to create a parameter drawn from a normal distribution truncated at
/// two standard deviations (values outside are re-drawn).
pub fn truncated_randn_using<R: Rng + ?Sized>(
    shape: &[usize],
    stddev: TensorData,
    rng: &mut R,
) -> Result<ArrayD<TensorData>, TensorError> {
    let dist = TruncatedNormal::new(stddev)?;
    Ok(ArrayD::random_using(IxDyn(shape), dist, rng))
}

/// Normal distribution with rejection outside `[-2σ, 2σ]`.
#[derive(Clone, Copy, Debug)]
pub struct TruncatedNormal {
    inner: Normal<TensorData>,
    bound: TensorData,
}

impl TruncatedNormal {
    pub fn new(stddev: TensorData) -> Result<Self, TensorError> {
        let inner =
            Normal::new(0.0, stddev).map_err(|e| TensorError::Distribution(e.to_string()))?;
        Ok(TruncatedNormal {
            inner,
            bound: 2.0 * stddev,
        })
    }
}

impl Distribution<TensorData> for TruncatedNormal {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> TensorData {
        loop {
            let v = self.inner.sample(rng);
            if v.abs() <= self.bound {
                return v;
            }
        }
    }
}
