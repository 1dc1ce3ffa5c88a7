//! Crate-level error type.

use crate::nn::topology::TopologyError;
use crate::tensor::{TensorData, TensorError};
use crate::utils::serialization::SerializationError;

#[derive(thiserror::Error, Debug)]
pub enum AutoencoderError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Input shape is incompatible with the topology: {0}")]
    Topology(#[from] TopologyError),
    #[error("Batch shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("Regularity is undefined: min error {min_error}, max error {max_error}")]
    NumericalDegeneracy {
        min_error: TensorData,
        max_error: TensorData,
    },
    #[error(transparent)]
    Tensor(TensorError),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

impl AutoencoderError {
    /// `true` for errors raised while building the model (bad config or shape).
    pub fn is_config(&self) -> bool {
        matches!(self, AutoencoderError::Config(_) | AutoencoderError::Topology(_))
    }
}

impl From<TensorError> for AutoencoderError {
    fn from(err: TensorError) -> Self {
        match err {
            TensorError::NumericalDegeneracy {
                min_error,
                max_error,
            } => AutoencoderError::NumericalDegeneracy {
                min_error,
                max_error,
            },
            other => AutoencoderError::Tensor(other),
        }
    }
}

pub type Result<T, E = AutoencoderError> = std::result::Result<T, E>;
