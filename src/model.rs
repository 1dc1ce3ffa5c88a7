//! # Convolutional Autoencoder
//!
//! [`ConvAutoencoder`] ties the pieces together: it resolves the shape plan for
//! a fixed input shape, builds the encoder and decoder layers into a
//! [`Sequential`], and exposes training, reconstruction, regularity scoring and
//! checkpointing.
//!
//! ```no_run
//! use ndarray::Array4;
//! use temporal_regularity::{AutoencoderConfig, ConvAutoencoder};
//!
//! # fn main() -> Result<(), temporal_regularity::AutoencoderError> {
//! let config = AutoencoderConfig::default().with_channel_divisor(16);
//! let mut model = ConvAutoencoder::new(config, [4, 227, 227, 1])?;
//! let frames = Array4::from_elem((4, 227, 227, 1), 0.5);
//! let report = model.fit(&frames)?;
//! let scores = model.regularity(&frames)?;
//! # let _ = (report, scores);
//! # Ok(())
//! # }
//! ```

use crate::config::AutoencoderConfig;
use crate::error::{AutoencoderError, Result};
use crate::nn::loss::{self, L2Regularizer};
use crate::nn::registry::{Gradients, ParamRegistry, ParamRole};
use crate::nn::topology::ShapePlan;
use crate::nn::{Conv2d, ConvTranspose2d, Sequential};
use crate::optim::{Adam, Optimizer};
use crate::tensor::{Batch, TensorData, TensorError};
use crate::utils::serialization;

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use tracing::{debug, info, warn};

/// Losses of one evaluation, both computed before any parameter update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitReport {
    pub reconstruction_loss: TensorData,
    pub regularization_loss: TensorData,
}

impl FitReport {
    pub fn total(&self) -> TensorData {
        self.reconstruction_loss + self.regularization_loss
    }
}

#[derive(Debug)]
pub struct ConvAutoencoder {
    config: AutoencoderConfig,
    input_shape: [usize; 4],
    plan: ShapePlan,
    registry: ParamRegistry,
    network: Sequential,
    regularizer: L2Regularizer,
    optimizer: Adam,
}

impl ConvAutoencoder {
    /// Builds the model for batches of exactly `input_shape` (`[n, h, w, c]`).
    ///
    /// Fails with a configuration error, before allocating any parameter, when
    /// `config` is invalid or the topology cannot be laid over `input_shape`.
    pub fn new(config: AutoencoderConfig, input_shape: [usize; 4]) -> Result<Self> {
        config.validate()?;
        let plan = ShapePlan::new(input_shape, config.channel_divisor)?;
        for stage in plan.stages() {
            debug!("{}", stage);
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut registry = ParamRegistry::new();
        let mut network = Sequential::new();
        for stage in plan.encoder() {
            let layer = Conv2d::new(*stage, &mut registry, config.init_stddev, &mut rng)?;
            network.add_module(Box::new(layer));
        }
        for stage in plan.decoder() {
            let layer = ConvTranspose2d::new(*stage, &mut registry, config.init_stddev, &mut rng)?;
            network.add_module(Box::new(layer));
        }
        for module in network.modules() {
            debug!(
                layer = module.name(),
                params = module.parameters().len(),
                output = ?module.output_shape(),
                "layer built"
            );
        }
        debug!(
            tensors = registry.len(),
            elements = registry.num_elements(),
            "parameter registry populated"
        );

        let optimizer = Adam::new(
            Some(config.learning_rate),
            Some(config.betas),
            Some(config.eps),
        )?;
        let regularizer = L2Regularizer::new(config.reg_weight, ParamRole::Conv2d);

        Ok(ConvAutoencoder {
            config,
            input_shape,
            plan,
            registry,
            network,
            regularizer,
            optimizer,
        })
    }

    /// [`ConvAutoencoder::new`] with the reference configuration.
    pub fn with_defaults(input_shape: [usize; 4]) -> Result<Self> {
        Self::new(AutoencoderConfig::default(), input_shape)
    }

    fn check_batch(&self, batch: &Batch) -> Result<()> {
        if batch.shape() != &self.input_shape[..] {
            return Err(AutoencoderError::ShapeMismatch {
                expected: self.input_shape.to_vec(),
                got: batch.shape().to_vec(),
            });
        }
        Ok(())
    }

    fn report(&self, batch: &Batch, output: &Batch) -> Result<(FitReport, Batch)> {
        let (reconstruction_loss, grad) = loss::reconstruction_loss(batch, output)?;
        let regularization_loss = self.regularizer.loss(&self.registry);
        Ok((
            FitReport {
                reconstruction_loss,
                regularization_loss,
            },
            grad,
        ))
    }

    /// Losses on `batch` and the gradient of their sum for every parameter.
    fn gradients(&self, batch: &Batch) -> Result<(FitReport, Gradients)> {
        self.check_batch(batch)?;
        let activations = self.network.forward_cached(&self.registry, batch)?;
        let output = activations
            .last()
            .ok_or_else(|| TensorError::Generic("network produced no output".into()))?;
        let (report, grad_output) = self.report(batch, output)?;

        let mut grads = self
            .network
            .backward(&self.registry, &activations, grad_output)?;
        self.regularizer.accumulate_grads(&self.registry, &mut grads)?;
        Ok((report, grads))
    }

    /// One optimisation step on `batch`. The returned losses are the ones
    /// measured before the update.
    pub fn fit(&mut self, batch: &Batch) -> Result<FitReport> {
        let (report, grads) = self.gradients(batch)?;
        self.optimizer.step(&mut self.registry, &grads)?;

        info!(
            step = self.optimizer.steps(),
            reconstruction_loss = report.reconstruction_loss,
            regularization_loss = report.regularization_loss,
            "reconstruct_loss : {:09.6}\tregularize_loss : {:09.6}",
            report.reconstruction_loss,
            report.regularization_loss
        );
        Ok(report)
    }

    /// Evaluates the losses on `batch` without updating anything.
    pub fn losses(&self, batch: &Batch) -> Result<FitReport> {
        let output = self.reconstruct(batch)?;
        let (report, _) = self.report(batch, &output)?;
        Ok(report)
    }

    /// Forward pass through encoder and decoder.
    pub fn reconstruct(&self, batch: &Batch) -> Result<Batch> {
        self.check_batch(batch)?;
        Ok(self.network.forward(&self.registry, batch)?)
    }

    /// Per-sample summed squared reconstruction error.
    pub fn pixel_error(&self, batch: &Batch) -> Result<Array1<TensorData>> {
        let output = self.reconstruct(batch)?;
        Ok(loss::pixel_error(batch, &output)?)
    }

    /// Batch-relative regularity score of every sample, `1 − (e − max e) / min e`.
    ///
    /// Fails with [`AutoencoderError::NumericalDegeneracy`] when some sample is
    /// reconstructed perfectly (zero minimum error) or the errors overflow.
    #[doc(alias = "get_regularity")]
    pub fn regularity(&self, batch: &Batch) -> Result<Array1<TensorData>> {
        let errors = self.pixel_error(batch)?;
        loss::regularity(&errors).map_err(|err| {
            if let TensorError::NumericalDegeneracy {
                min_error,
                max_error,
            } = &err
            {
                warn!(min_error, max_error, "regularity undefined for this batch");
            }
            AutoencoderError::from(err)
        })
    }

    /// Writes all parameters to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        serialization::save(&self.registry, path)?;
        info!(path = %path.display(), tensors = self.registry.len(), "saved checkpoint");
        Ok(())
    }

    /// Restores all parameters from `path`. On any mismatch the model is left
    /// unchanged. Optimizer moments restart from zero.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        serialization::load(&mut self.registry, path)?;
        self.optimizer.reset();
        info!(path = %path.display(), tensors = self.registry.len(), "loaded checkpoint");
        Ok(())
    }

    pub fn input_shape(&self) -> [usize; 4] {
        self.input_shape
    }

    pub fn config(&self) -> &AutoencoderConfig {
        &self.config
    }

    pub fn plan(&self) -> &ShapePlan {
        &self.plan
    }

    pub fn registry(&self) -> &ParamRegistry {
        &self.registry
    }

    /// Total number of scalar parameters.
    pub fn parameter_count(&self) -> usize {
        self.registry.num_elements()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array4, Dimension};

    fn tiny() -> ConvAutoencoder {
        let config = AutoencoderConfig::default().with_channel_divisor(64);
        ConvAutoencoder::new(config, [2, 87, 87, 1]).unwrap()
    }

    #[test]
    fn registry_follows_layer_order() {
        let model = tiny();
        let names: Vec<&str> = model.registry().iter().map(|(_, p)| p.name()).collect();
        assert_eq!(names.len(), 22);
        assert_eq!(&names[..2], &["conv_h1/conv2d", "conv_h1/biases"]);
        assert_eq!(names[10], "deconv_h5/deconv2d");
        assert_eq!(&names[20..], &["output/deconv2d", "output/biases"]);
        assert_eq!(model.registry().with_role(ParamRole::Conv2d).count(), 5);
    }

    #[test]
    fn layers_are_built_in_topology_order() {
        let model = tiny();
        let names: Vec<&str> = model.network.modules().map(|m| m.name()).collect();
        assert_eq!(
            names,
            [
                "conv_h1",
                "conv_h2",
                "conv_h3",
                "conv_h4",
                "conv_h5",
                "deconv_h5",
                "deconv_h4",
                "deconv_h3",
                "deconv_h2",
                "deconv_h1",
                "output",
            ]
        );
        let last = model.network.modules().last().unwrap();
        assert_eq!(last.output_shape(), [2, 87, 87, 1]);
        assert_eq!(last.parameters().len(), 2);
    }

    #[test]
    fn construction_is_seeded() {
        let a = tiny();
        let b = tiny();
        let c = ConvAutoencoder::new(
            AutoencoderConfig::default().with_channel_divisor(64).with_seed(1),
            [2, 87, 87, 1],
        )
        .unwrap();
        let first = |m: &ConvAutoencoder| {
            m.registry()
                .by_name("conv_h1/conv2d")
                .unwrap()
                .value()
                .clone()
        };
        assert_eq!(first(&a), first(&b));
        assert_ne!(first(&a), first(&c));
    }

    #[test]
    fn losses_do_not_mutate() {
        let model = tiny();
        let x = Array4::from_elem((2, 87, 87, 1), 0.5);
        let a = model.losses(&x).unwrap();
        let b = model.losses(&x).unwrap();
        assert_eq!(a, b);
        assert!(a.reconstruction_loss > 0.0);
        assert_eq!(a.total(), a.reconstruction_loss + a.regularization_loss);
    }

    #[test]
    fn regularization_covers_encoder_kernels_only() {
        let model = tiny();
        let x = Array4::from_elem((2, 87, 87, 1), 0.5);
        let report = model.losses(&x).unwrap();

        let squares = |role: ParamRole| -> TensorData {
            model
                .registry()
                .with_role(role)
                .map(|(_, p)| p.value().iter().map(|v| v * v).sum::<TensorData>())
                .sum()
        };
        let weight = model.config().reg_weight;
        let encoder = squares(ParamRole::Conv2d);
        let decoder = squares(ParamRole::Deconv2d);
        assert!(encoder > 0.0 && decoder > 0.0);
        assert_relative_eq!(report.regularization_loss, weight * encoder, max_relative = 1e-5);
        assert!((report.regularization_loss - weight * (encoder + decoder)).abs() > 1e-6);
    }

    #[test]
    fn gradients_match_central_differences() {
        let config = AutoencoderConfig::default()
            .with_channel_divisor(64)
            .with_init_stddev(0.1)
            .with_reg_weight(0.05)
            .with_seed(3);
        let mut model = ConvAutoencoder::new(config, [1, 87, 87, 1]).unwrap();
        let x = Array4::from_shape_fn((1, 87, 87, 1), |(_, h, w, _)| {
            ((h * 3 + w * 5) % 11) as TensorData / 110.0
        });
        let (_, grads) = model.gradients(&x).unwrap();

        // Every layer is linear, so the loss is quadratic in any single
        // parameter and a central difference is exact up to rounding.
        let step = 0.05;
        for name in [
            "conv_h1/conv2d",
            "conv_h5/conv2d",
            "conv_h5/biases",
            "deconv_h3/deconv2d",
            "output/deconv2d",
            "output/biases",
        ] {
            let id = model.registry().id_of(name).unwrap();
            let grad = grads.get(id).unwrap();
            let (at, &analytic) = grad
                .indexed_iter()
                .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
                .unwrap();
            let original = model.registry().value(id).unwrap()[at.slice()];

            model.registry.value_mut(id).unwrap()[at.slice()] = original + step;
            let plus = model.losses(&x).unwrap().total();
            model.registry.value_mut(id).unwrap()[at.slice()] = original - step;
            let minus = model.losses(&x).unwrap().total();
            model.registry.value_mut(id).unwrap()[at.slice()] = original;

            let numeric = (plus - minus) / (2.0 * step);
            assert!(
                (numeric - analytic).abs() <= 2e-2 * analytic.abs() + 1e-2,
                "{}: analytic {} numeric {}",
                name,
                analytic,
                numeric
            );
        }
    }

    #[test]
    fn fit_reports_pre_update_losses() {
        let mut model = tiny();
        let x = Array4::from_elem((2, 87, 87, 1), 0.5);
        let before = model.losses(&x).unwrap();
        let report = model.fit(&x).unwrap();
        assert_eq!(report, before);
        assert_ne!(model.losses(&x).unwrap(), before);
    }

    #[test]
    fn invalid_config_is_rejected_before_building() {
        let err = ConvAutoencoder::new(
            AutoencoderConfig::default().with_reg_weight(-1.0),
            [1, 100, 100, 1],
        )
        .unwrap_err();
        assert!(err.is_config());
    }
}
