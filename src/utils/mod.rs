//! # Utility Functions (`utils`)
//!
//! Checkpoint serialization and the per-sample parallelism helpers.

pub mod parallel;
pub mod serialization;

pub use serialization::SerializationError;
