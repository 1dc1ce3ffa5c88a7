//! # Fixed Encoder/Decoder Topology
//!
//! Compile-time layer tables and the integer shape arithmetic that turns an
//! input shape into the spatial shape of every stage.
//!
//! Valid convolutions shrink each spatial dimension to
//! `floor((in - kernel) / stride) + 1`. A transposed convolution from `in` to an
//! explicit `out` is legal iff the forward convolution of `out` lands back on
//! `in`. Decoder targets are therefore resolved from the encoder shapes rather
//! than inferred.

use std::fmt;

/// Output channel count of a layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channels {
    Fixed(usize),
    /// Same as the model input (the final reconstruction layer).
    Input,
}

/// `(output_channels, kernel_h, kernel_w, stride_h, stride_w, name)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayerSpec {
    pub out_channels: Channels,
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
    pub name: &'static str,
}

/// How a decoder stage picks its explicit output spatial shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpatialTarget {
    /// The spatial shape entering encoder layer `i` (0 is the model input).
    EncoderInput(usize),
    /// The unique shape a stride-1 valid transposed convolution produces.
    Implied,
    /// Whatever the next stage's forward convolution maps its own target onto.
    FeedsNext,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecoderSpec {
    pub layer: LayerSpec,
    pub target: SpatialTarget,
}

const fn layer(out: usize, k: usize, s: usize, name: &'static str) -> LayerSpec {
    LayerSpec {
        out_channels: Channels::Fixed(out),
        kernel: (k, k),
        stride: (s, s),
        name,
    }
}

pub const ENCODER: [LayerSpec; 5] = [
    layer(512, 11, 4, "conv_h1"),
    layer(512, 2, 2, "conv_h2"),
    layer(256, 5, 1, "conv_h3"),
    layer(256, 2, 2, "conv_h4"),
    layer(128, 3, 1, "conv_h5"),
];

// deconv_h3 is 3x3 although conv_h3 is 5x5; deconv_h1 (5x5, after the second
// upsampling) absorbs the difference so the chain still closes on the input.
pub const DECODER: [DecoderSpec; 6] = [
    DecoderSpec {
        layer: layer(128, 3, 1, "deconv_h5"),
        target: SpatialTarget::EncoderInput(4),
    },
    DecoderSpec {
        layer: layer(256, 2, 2, "deconv_h4"),
        target: SpatialTarget::EncoderInput(3),
    },
    DecoderSpec {
        layer: layer(256, 3, 1, "deconv_h3"),
        target: SpatialTarget::Implied,
    },
    DecoderSpec {
        layer: layer(512, 2, 2, "deconv_h2"),
        target: SpatialTarget::FeedsNext,
    },
    DecoderSpec {
        layer: layer(512, 5, 1, "deconv_h1"),
        target: SpatialTarget::EncoderInput(1),
    },
    DecoderSpec {
        layer: LayerSpec {
            out_channels: Channels::Input,
            kernel: (11, 11),
            stride: (4, 4),
            name: "output",
        },
        target: SpatialTarget::EncoderInput(0),
    },
];

// --- Errors ---

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("input shape {shape:?} has an empty dimension")]
    EmptyDimension { shape: [usize; 4] },
    #[error("channel divisor must be at least 1")]
    InvalidDivisor,
    #[error(
        "layer {layer}: spatial input {input:?} is smaller than kernel {kernel:?} (stride {stride:?})"
    )]
    NonPositiveOutput {
        layer: &'static str,
        input: (usize, usize),
        kernel: (usize, usize),
        stride: (usize, usize),
    },
    #[error("layer {layer}: cannot resolve an output shape")]
    UnresolvedTarget { layer: &'static str },
    #[error(
        "layer {layer}: target {target:?} does not convolve back onto input {input:?} with kernel {kernel:?}, stride {stride:?}"
    )]
    IllegalTarget {
        layer: &'static str,
        input: (usize, usize),
        target: (usize, usize),
        kernel: (usize, usize),
        stride: (usize, usize),
    },
}

// --- Shape arithmetic ---

/// Output extent of a valid (unpadded) convolution, `None` if it would be empty.
pub fn conv_output_dim(input: usize, kernel: usize, stride: usize) -> Option<usize> {
    if stride == 0 || input < kernel {
        return None;
    }
    Some((input - kernel) / stride + 1)
}

fn conv_output_hw(
    input: (usize, usize),
    kernel: (usize, usize),
    stride: (usize, usize),
) -> Option<(usize, usize)> {
    Some((
        conv_output_dim(input.0, kernel.0, stride.0)?,
        conv_output_dim(input.1, kernel.1, stride.1)?,
    ))
}

/// `true` if a transposed convolution may map `input` onto `target`.
pub fn is_legal_transpose_target(
    input: (usize, usize),
    target: (usize, usize),
    kernel: (usize, usize),
    stride: (usize, usize),
) -> bool {
    conv_output_hw(target, kernel, stride) == Some(input)
}

fn scale_channels(channels: usize, divisor: usize) -> usize {
    (channels / divisor).max(1)
}

// --- Plan ---

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageKind {
    Conv,
    Deconv,
}

/// Resolved shapes of one layer, all in `[n, h, w, c]` form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageShape {
    pub name: &'static str,
    pub kind: StageKind,
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
    pub input: [usize; 4],
    pub output: [usize; 4],
}

impl StageShape {
    pub fn in_channels(&self) -> usize {
        self.input[3]
    }

    pub fn out_channels(&self) -> usize {
        self.output[3]
    }

    pub fn output_hw(&self) -> (usize, usize) {
        (self.output[1], self.output[2])
    }
}

impl fmt::Display for StageShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<9} {:?} k{}x{} s{}x{} -> {:?}",
            self.name,
            self.input,
            self.kernel.0,
            self.kernel.1,
            self.stride.0,
            self.stride.1,
            self.output
        )
    }
}

/// Shapes of every stage for one input shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShapePlan {
    input: [usize; 4],
    encoder: Vec<StageShape>,
    decoder: Vec<StageShape>,
}

impl ShapePlan {
    /// Resolves the fixed topology for `input` (`[n, h, w, c]`), dividing every
    /// fixed channel width by `channel_divisor`.
    pub fn new(input: [usize; 4], channel_divisor: usize) -> Result<Self, TopologyError> {
        if channel_divisor == 0 {
            return Err(TopologyError::InvalidDivisor);
        }
        if input.iter().any(|&d| d == 0) {
            return Err(TopologyError::EmptyDimension { shape: input });
        }
        let [n, _, _, c] = input;
        let out_channels = |ch: Channels| match ch {
            Channels::Fixed(v) => scale_channels(v, channel_divisor),
            Channels::Input => c,
        };

        // Encoder: plain forward arithmetic.
        let mut encoder = Vec::with_capacity(ENCODER.len());
        let mut current = input;
        for layer in ENCODER.iter() {
            let (h, w) = conv_output_hw((current[1], current[2]), layer.kernel, layer.stride)
                .ok_or(TopologyError::NonPositiveOutput {
                    layer: layer.name,
                    input: (current[1], current[2]),
                    kernel: layer.kernel,
                    stride: layer.stride,
                })?;
            let output = [n, h, w, out_channels(layer.out_channels)];
            encoder.push(StageShape {
                name: layer.name,
                kind: StageKind::Conv,
                kernel: layer.kernel,
                stride: layer.stride,
                input: current,
                output,
            });
            current = output;
        }
        let bottleneck = (current[1], current[2]);
        let encoder_inputs: Vec<(usize, usize)> =
            encoder.iter().map(|s| (s.input[1], s.input[2])).collect();

        // Decoder targets: encoder mirrors first, then implied shapes forward,
        // then shapes dictated by the following stage backward.
        let mut targets: Vec<Option<(usize, usize)>> = DECODER
            .iter()
            .map(|d| match d.target {
                SpatialTarget::EncoderInput(i) => encoder_inputs.get(i).copied(),
                _ => None,
            })
            .collect();
        for (i, d) in DECODER.iter().enumerate() {
            if d.target == SpatialTarget::Implied {
                let prev = if i == 0 { Some(bottleneck) } else { targets[i - 1] };
                targets[i] = prev.and_then(|(h, w)| {
                    if d.layer.stride != (1, 1) {
                        return None;
                    }
                    Some((h + d.layer.kernel.0 - 1, w + d.layer.kernel.1 - 1))
                });
            }
        }
        for i in (0..DECODER.len()).rev() {
            if DECODER[i].target == SpatialTarget::FeedsNext {
                let next = DECODER.get(i + 1);
                targets[i] = match (next, targets.get(i + 1).copied().flatten()) {
                    (Some(next), Some(t)) => {
                        conv_output_hw(t, next.layer.kernel, next.layer.stride)
                    }
                    _ => None,
                };
            }
        }

        let mut decoder = Vec::with_capacity(DECODER.len());
        for (d, target) in DECODER.iter().zip(targets) {
            let layer = &d.layer;
            let target = target.ok_or(TopologyError::UnresolvedTarget { layer: layer.name })?;
            let from = (current[1], current[2]);
            if !is_legal_transpose_target(from, target, layer.kernel, layer.stride) {
                return Err(TopologyError::IllegalTarget {
                    layer: layer.name,
                    input: from,
                    target,
                    kernel: layer.kernel,
                    stride: layer.stride,
                });
            }
            let output = [n, target.0, target.1, out_channels(layer.out_channels)];
            decoder.push(StageShape {
                name: layer.name,
                kind: StageKind::Deconv,
                kernel: layer.kernel,
                stride: layer.stride,
                input: current,
                output,
            });
            current = output;
        }

        Ok(ShapePlan {
            input,
            encoder,
            decoder,
        })
    }

    pub fn input(&self) -> [usize; 4] {
        self.input
    }

    /// Shape of the final reconstruction.
    pub fn output(&self) -> [usize; 4] {
        self.decoder.last().map(|s| s.output).unwrap_or(self.input)
    }

    /// Shape of the innermost code (output of the last encoder layer).
    pub fn bottleneck(&self) -> [usize; 4] {
        self.encoder.last().map(|s| s.output).unwrap_or(self.input)
    }

    pub fn encoder(&self) -> &[StageShape] {
        &self.encoder
    }

    pub fn decoder(&self) -> &[StageShape] {
        &self.decoder
    }

    /// All stages in execution order.
    pub fn stages(&self) -> impl Iterator<Item = &StageShape> {
        self.encoder.iter().chain(self.decoder.iter())
    }
}

/// Smallest square spatial size the fixed topology accepts.
pub fn min_spatial_size() -> usize {
    // Walk the encoder backwards from a 1x1 bottleneck.
    ENCODER
        .iter()
        .rev()
        .fold(1, |out, layer| (out - 1) * layer.stride.0 + layer.kernel.0)
}
