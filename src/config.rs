//! # Model Configuration
//!
//! Hyper-parameters of the autoencoder. Defaults are the reference values;
//! `with_*` methods override single fields.

use crate::error::AutoencoderError;
use crate::tensor::TensorData;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoencoderConfig {
    /// Weight of the L2 penalty on encoder kernels.
    pub reg_weight: TensorData,
    pub learning_rate: TensorData,
    /// Adam `(beta1, beta2)`.
    pub betas: (TensorData, TensorData),
    pub eps: TensorData,
    /// Standard deviation of the kernel initialisers.
    pub init_stddev: TensorData,
    /// Seed of the initialisation RNG.
    pub seed: u64,
    /// Every fixed channel width is divided by this (clamped to at least 1).
    pub channel_divisor: usize,
}

impl Default for AutoencoderConfig {
    fn default() -> Self {
        AutoencoderConfig {
            reg_weight: 0.01,
            learning_rate: 1e-4,
            betas: (0.9, 0.999),
            eps: 1e-8,
            init_stddev: 0.01,
            seed: 0,
            channel_divisor: 1,
        }
    }
}

impl AutoencoderConfig {
    pub fn with_reg_weight(mut self, reg_weight: TensorData) -> Self {
        self.reg_weight = reg_weight;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: TensorData) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_betas(mut self, beta1: TensorData, beta2: TensorData) -> Self {
        self.betas = (beta1, beta2);
        self
    }

    pub fn with_eps(mut self, eps: TensorData) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_init_stddev(mut self, init_stddev: TensorData) -> Self {
        self.init_stddev = init_stddev;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_channel_divisor(mut self, channel_divisor: usize) -> Self {
        self.channel_divisor = channel_divisor;
        self
    }

    /// Checks every field, returning `AutoencoderError::Config` on the first bad one.
    pub fn validate(&self) -> Result<(), AutoencoderError> {
        let invalid = |msg: String| Err(AutoencoderError::Config(msg));
        if !(self.reg_weight >= 0.0 && self.reg_weight.is_finite()) {
            return invalid(format!("reg_weight must be finite and >= 0, got {}", self.reg_weight));
        }
        if !(self.learning_rate >= 0.0 && self.learning_rate.is_finite()) {
            return invalid(format!(
                "learning_rate must be finite and >= 0, got {}",
                self.learning_rate
            ));
        }
        let (b1, b2) = self.betas;
        if !((0.0..1.0).contains(&b1) && (0.0..1.0).contains(&b2)) {
            return invalid(format!("betas must lie in [0, 1), got ({}, {})", b1, b2));
        }
        if !(self.eps >= 0.0 && self.eps.is_finite()) {
            return invalid(format!("eps must be finite and >= 0, got {}", self.eps));
        }
        if !(self.init_stddev > 0.0 && self.init_stddev.is_finite()) {
            return invalid(format!(
                "init_stddev must be finite and > 0, got {}",
                self.init_stddev
            ));
        }
        if self.channel_divisor == 0 {
            return invalid("channel_divisor must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AutoencoderConfig::default();
        assert_eq!(config.reg_weight, 0.01);
        assert_eq!(config.learning_rate, 1e-4);
        assert_eq!(config.channel_divisor, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_values_are_config_errors() {
        let bad = [
            AutoencoderConfig::default().with_reg_weight(-0.1),
            AutoencoderConfig::default().with_learning_rate(TensorData::NAN),
            AutoencoderConfig::default().with_betas(0.9, 1.0),
            AutoencoderConfig::default().with_eps(-1.0),
            AutoencoderConfig::default().with_init_stddev(0.0),
            AutoencoderConfig::default().with_channel_divisor(0),
        ];
        for config in bad.iter() {
            assert!(
                matches!(config.validate(), Err(AutoencoderError::Config(_))),
                "{:?}",
                config
            );
        }
    }

    #[test]
    fn config_round_trips_through_bincode() {
        let bytes = bincode::serialize(&AutoencoderConfig::default().with_seed(7)).unwrap();
        let back: AutoencoderConfig = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.seed, 7);
        assert_eq!(back, AutoencoderConfig::default().with_seed(7));
    }
}
