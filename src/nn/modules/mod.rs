//! # Neural Network Layer Modules
//!
//! Contains the layer implementations used by the autoencoder.

pub mod conv;
pub use conv::{Conv2d, ConvTranspose2d};
