//! # Temporal Regularity
//!
//! A convolutional autoencoder that learns to reconstruct short stacks of
//! video frames and scores each stack by how well it is reconstructed. Frames
//! that look like the training data reconstruct well and get a high
//! regularity score; unusual motion reconstructs badly and scores low.
//!
//! The network is a fixed five-layer valid-convolution encoder mirrored by a
//! six-stage transposed-convolution decoder. Everything runs on the CPU on top
//! of `ndarray`, with per-sample work spread over `rayon`.

pub mod config;
pub mod error;
pub mod model;
pub mod nn;
pub mod optim;
pub mod tensor;
pub mod utils;

pub use config::AutoencoderConfig;
pub use error::AutoencoderError;
pub use model::{ConvAutoencoder, FitReport};

pub mod prelude {
    pub use crate::config::AutoencoderConfig;
    pub use crate::error::AutoencoderError;
    pub use crate::model::{ConvAutoencoder, FitReport};
    pub use crate::nn::{Module, ParamRegistry, ParamRole, ShapePlan};
    pub use crate::tensor::{Batch, TensorData};
}
