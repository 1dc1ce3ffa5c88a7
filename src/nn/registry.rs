//! # Parameter Registry
//!
//! Ordered store of every learnable tensor. Layers register their kernel and
//! bias on construction and keep only the returned [`ParamId`]s; the optimizer,
//! the regularizer and the checkpoint code all walk the registry in creation
//! order.

use crate::tensor::{TensorData, TensorError};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Role of a parameter inside its layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamRole {
    /// Kernel of a forward (encoder) convolution.
    Conv2d,
    /// Kernel of a transposed (decoder) convolution.
    Deconv2d,
    Biases,
}

impl ParamRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamRole::Conv2d => "conv2d",
            ParamRole::Deconv2d => "deconv2d",
            ParamRole::Biases => "biases",
        }
    }
}

impl fmt::Display for ParamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a parameter in its registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(usize);

#[derive(Clone, Debug)]
pub struct Parameter {
    name: String,
    role: ParamRole,
    value: ArrayD<TensorData>,
}

impl Parameter {
    /// Full name, `"<layer>/<role>"`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &ArrayD<TensorData> {
        &self.value
    }

    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ParamRegistry {
    params: Vec<Parameter>,
    index: BTreeMap<String, ParamId>,
}

impl ParamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `value` as `"<layer>/<role>"`. Names must be unique.
    pub fn register(
        &mut self,
        layer: &str,
        role: ParamRole,
        value: ArrayD<TensorData>,
    ) -> Result<ParamId, TensorError> {
        let name = format!("{}/{}", layer, role);
        if self.index.contains_key(&name) {
            return Err(TensorError::DuplicateParameter(name));
        }
        let id = ParamId(self.params.len());
        self.index.insert(name.clone(), id);
        self.params.push(Parameter { name, role, value });
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Total number of scalar parameters.
    pub fn num_elements(&self) -> usize {
        self.params.iter().map(|p| p.value.len()).sum()
    }

    pub fn get(&self, id: ParamId) -> Option<&Parameter> {
        self.params.get(id.0)
    }

    pub fn value(&self, id: ParamId) -> Result<&ArrayD<TensorData>, TensorError> {
        self.params
            .get(id.0)
            .map(|p| &p.value)
            .ok_or(TensorError::UnknownParameter(id.0))
    }

    pub fn value_mut(&mut self, id: ParamId) -> Result<&mut ArrayD<TensorData>, TensorError> {
        self.params
            .get_mut(id.0)
            .map(|p| &mut p.value)
            .ok_or(TensorError::UnknownParameter(id.0))
    }

    pub fn id_of(&self, name: &str) -> Option<ParamId> {
        self.index.get(name).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<&Parameter> {
        self.id_of(name).and_then(|id| self.get(id))
    }

    /// Parameters in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (ParamId, &Parameter)> {
        self.params.iter().enumerate().map(|(i, p)| (ParamId(i), p))
    }

    pub fn with_role(&self, role: ParamRole) -> impl Iterator<Item = (ParamId, &Parameter)> {
        self.iter().filter(move |(_, p)| p.role == role)
    }

    /// `(name, shape)` of every parameter, in creation order.
    pub fn signature(&self) -> Vec<(String, Vec<usize>)> {
        self.params
            .iter()
            .map(|p| (p.name.clone(), p.shape().to_vec()))
            .collect()
    }
}

// --- Gradients ---

/// Gradient buffers keyed by [`ParamId`], filled during a backward pass.
#[derive(Clone, Debug, Default)]
pub struct Gradients {
    grads: Vec<Option<ArrayD<TensorData>>>,
}

impl Gradients {
    pub fn new(len: usize) -> Self {
        Gradients {
            grads: vec![None; len],
        }
    }

    /// Adds `grad` to whatever is already stored for `id`.
    pub fn accumulate(&mut self, id: ParamId, grad: ArrayD<TensorData>) -> Result<(), TensorError> {
        if id.0 >= self.grads.len() {
            self.grads.resize(id.0 + 1, None);
        }
        if let Some(existing) = self.grads[id.0].as_mut() {
            if existing.shape() != grad.shape() {
                return Err(TensorError::ShapeMismatch {
                    expected: existing.shape().to_vec(),
                    got: grad.shape().to_vec(),
                });
            }
            *existing += &grad;
            return Ok(());
        }
        self.grads[id.0] = Some(grad);
        Ok(())
    }

    pub fn get(&self, id: ParamId) -> Option<&ArrayD<TensorData>> {
        self.grads.get(id.0).and_then(|g| g.as_ref())
    }
}
