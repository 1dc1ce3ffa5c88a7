//! # Neural Network Module (`nn`)
//!
//! Building blocks of the autoencoder: the fixed topology, the parameter
//! registry, stateless convolution kernels, layer modules and losses.
//!
//! Layers do not own their tensors. Each one registers a kernel and a bias in a
//! shared [`ParamRegistry`] when it is built and reads them back on every
//! forward/backward call, so the optimizer and the checkpoint code see one
//! ordered collection.

use crate::tensor::{Batch, TensorData, TensorError};
use ndarray::ArrayD;
use std::fmt::Debug;

// --- Submodules ---
pub mod functional;
pub mod loss;
pub mod modules;
pub mod registry;
pub mod topology;

// Re-export common items
pub use modules::{Conv2d, ConvTranspose2d};
pub use registry::{Gradients, ParamId, ParamRegistry, ParamRole, Parameter};
pub use topology::{ShapePlan, StageKind, StageShape};

/// Result of a module's backward pass.
#[derive(Debug)]
pub struct LayerGrads {
    /// `∂L/∂input`, if it was requested.
    pub input: Option<Batch>,
    /// `∂L/∂θ` for every parameter of the module.
    pub params: Vec<(ParamId, ArrayD<TensorData>)>,
}

// --- Core Trait: Module ---

/// Base trait for all layers.
pub trait Module: Debug + Send + Sync {
    /// Layer name, also the prefix of its parameter names.
    fn name(&self) -> &str;

    /// Performs the forward pass of the module.
    fn forward(&self, params: &ParamRegistry, input: &Batch) -> Result<Batch, TensorError>;

    /// Computes parameter gradients (and optionally the input gradient) from
    /// the forward input and `∂L/∂output`.
    fn backward(
        &self,
        params: &ParamRegistry,
        input: &Batch,
        grad_output: &Batch,
        need_input_grad: bool,
    ) -> Result<LayerGrads, TensorError>;

    /// Ids of the module's parameters in the registry.
    fn parameters(&self) -> Vec<ParamId>;

    fn output_shape(&self) -> [usize; 4];
}

/// A sequential container for modules.
/// The forward pass applies each module in order.
#[derive(Debug, Default)]
pub struct Sequential {
    modules: Vec<Box<dyn Module>>,
}

impl Sequential {
    /// Creates a new empty Sequential container.
    pub fn new() -> Self {
        Sequential { modules: Vec::new() }
    }

    /// Adds a module to the sequence.
    pub fn add_module(&mut self, module: Box<dyn Module>) {
        self.modules.push(module);
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn modules(&self) -> impl Iterator<Item = &dyn Module> {
        self.modules.iter().map(|m| m.as_ref())
    }

    /// Forward pass keeping nothing but the final output.
    pub fn forward(&self, params: &ParamRegistry, input: &Batch) -> Result<Batch, TensorError> {
        let mut iter = self.modules.iter();
        let first = iter
            .next()
            .ok_or_else(|| TensorError::Generic("Sequential has no modules".into()))?;
        let mut current = first.forward(params, input)?;
        for module in iter {
            current = module.forward(params, &current)?;
        }
        Ok(current)
    }

    /// Forward pass returning every activation: index 0 is `input`, index `i + 1`
    /// is the output of module `i`.
    pub fn forward_cached(
        &self,
        params: &ParamRegistry,
        input: &Batch,
    ) -> Result<Vec<Batch>, TensorError> {
        let mut activations = Vec::with_capacity(self.modules.len() + 1);
        activations.push(input.clone());
        for (i, module) in self.modules.iter().enumerate() {
            let next = module.forward(params, &activations[i])?;
            activations.push(next);
        }
        Ok(activations)
    }

    /// Back-propagates `grad_output` (`∂L/∂output`) through every module,
    /// using the activations recorded by [`Sequential::forward_cached`].
    pub fn backward(
        &self,
        params: &ParamRegistry,
        activations: &[Batch],
        grad_output: Batch,
    ) -> Result<Gradients, TensorError> {
        if activations.len() != self.modules.len() + 1 {
            return Err(TensorError::Generic(format!(
                "expected {} activations, got {}",
                self.modules.len() + 1,
                activations.len()
            )));
        }
        let mut grads = Gradients::new(params.len());
        let mut grad = grad_output;
        for (i, module) in self.modules.iter().enumerate().rev() {
            // the model input is not trainable
            let layer = module.backward(params, &activations[i], &grad, i > 0)?;
            for (id, g) in layer.params {
                grads.accumulate(id, g)?;
            }
            match layer.input {
                Some(g) => grad = g,
                None => break,
            }
        }
        Ok(grads)
    }
}
