//! # Convolutional Layer Modules
//!
//! `Conv2d` (valid, encoder) and `ConvTranspose2d` (explicit output shape,
//! decoder). Both are thin wrappers binding a [`StageShape`] to two registry
//! entries and delegating the arithmetic to [`crate::nn::functional`].

use crate::nn::functional as F;
use crate::nn::registry::{ParamId, ParamRegistry, ParamRole};
use crate::nn::topology::{StageKind, StageShape};
use crate::nn::{LayerGrads, Module};
use crate::tensor::{ops, randn_using, truncated_randn_using, zeros, Batch, TensorData, TensorError};
use rand::Rng;

fn check_kind(stage: &StageShape, kind: StageKind) -> Result<(), TensorError> {
    if stage.kind != kind {
        return Err(TensorError::Generic(format!(
            "layer {} is a {:?} stage, not {:?}",
            stage.name, stage.kind, kind
        )));
    }
    Ok(())
}

// --- Conv2d ---

/// Valid 2-D convolution. Kernel `(kh, kw, in, out)` is registered as
/// `"<name>/conv2d"` (truncated normal init), bias `(1, 1, 1, out)` as
/// `"<name>/biases"` (zeros).
#[derive(Debug)]
pub struct Conv2d {
    stage: StageShape,
    kernel: ParamId,
    bias: ParamId,
}

impl Conv2d {
    pub fn new<R: Rng + ?Sized>(
        stage: StageShape,
        registry: &mut ParamRegistry,
        stddev: TensorData,
        rng: &mut R,
    ) -> Result<Self, TensorError> {
        check_kind(&stage, StageKind::Conv)?;
        let (kh, kw) = stage.kernel;
        let kernel_shape = [kh, kw, stage.in_channels(), stage.out_channels()];
        let kernel = registry.register(
            stage.name,
            ParamRole::Conv2d,
            truncated_randn_using(&kernel_shape, stddev, rng)?,
        )?;
        let bias = registry.register(
            stage.name,
            ParamRole::Biases,
            zeros(&[1, 1, 1, stage.out_channels()]),
        )?;
        Ok(Conv2d {
            stage,
            kernel,
            bias,
        })
    }
}

impl Module for Conv2d {
    fn name(&self) -> &str {
        self.stage.name
    }

    fn forward(&self, params: &ParamRegistry, input: &Batch) -> Result<Batch, TensorError> {
        ops::check_shape(&self.stage.input, input.shape())?;
        F::conv2d(
            input,
            params.value(self.kernel)?,
            params.value(self.bias)?,
            self.stage.stride,
        )
    }

    fn backward(
        &self,
        params: &ParamRegistry,
        input: &Batch,
        grad_output: &Batch,
        need_input_grad: bool,
    ) -> Result<LayerGrads, TensorError> {
        let grads = F::conv2d_backward(
            input,
            params.value(self.kernel)?,
            self.stage.stride,
            grad_output,
            need_input_grad,
        )?;
        Ok(LayerGrads {
            input: grads.input,
            params: vec![(self.kernel, grads.kernel), (self.bias, grads.bias)],
        })
    }

    fn parameters(&self) -> Vec<ParamId> {
        vec![self.kernel, self.bias]
    }

    fn output_shape(&self) -> [usize; 4] {
        self.stage.output
    }
}

// --- ConvTranspose2d ---

/// Transposed 2-D convolution onto the stage's explicit output shape. Kernel
/// `(kh, kw, out, in)` is registered as `"<name>/deconv2d"` (normal init), bias
/// `(1, 1, 1, out)` as `"<name>/biases"` (zeros).
#[derive(Debug)]
pub struct ConvTranspose2d {
    stage: StageShape,
    kernel: ParamId,
    bias: ParamId,
}

impl ConvTranspose2d {
    pub fn new<R: Rng + ?Sized>(
        stage: StageShape,
        registry: &mut ParamRegistry,
        stddev: TensorData,
        rng: &mut R,
    ) -> Result<Self, TensorError> {
        check_kind(&stage, StageKind::Deconv)?;
        let (kh, kw) = stage.kernel;
        let kernel_shape = [kh, kw, stage.out_channels(), stage.in_channels()];
        let kernel = registry.register(
            stage.name,
            ParamRole::Deconv2d,
            randn_using(&kernel_shape, stddev, rng)?,
        )?;
        let bias = registry.register(
            stage.name,
            ParamRole::Biases,
            zeros(&[1, 1, 1, stage.out_channels()]),
        )?;
        Ok(ConvTranspose2d {
            stage,
            kernel,
            bias,
        })
    }
}

impl Module for ConvTranspose2d {
    fn name(&self) -> &str {
        self.stage.name
    }

    fn forward(&self, params: &ParamRegistry, input: &Batch) -> Result<Batch, TensorError> {
        ops::check_shape(&self.stage.input, input.shape())?;
        F::conv2d_transpose(
            input,
            params.value(self.kernel)?,
            params.value(self.bias)?,
            self.stage.stride,
            self.stage.output_hw(),
        )
    }

    fn backward(
        &self,
        params: &ParamRegistry,
        input: &Batch,
        grad_output: &Batch,
        need_input_grad: bool,
    ) -> Result<LayerGrads, TensorError> {
        ops::check_shape(&self.stage.output, grad_output.shape())?;
        let grads = F::conv2d_transpose_backward(
            input,
            params.value(self.kernel)?,
            self.stage.stride,
            grad_output,
            need_input_grad,
        )?;
        Ok(LayerGrads {
            input: grads.input,
            params: vec![(self.kernel, grads.kernel), (self.bias, grads.bias)],
        })
    }

    fn parameters(&self) -> Vec<ParamId> {
        vec![self.kernel, self.bias]
    }

    fn output_shape(&self) -> [usize; 4] {
        self.stage.output
    }
}
