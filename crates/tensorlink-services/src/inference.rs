//! Inference collaborators: the model side of the hand-off.
//!
//! The transport layer only needs two things from a model: how many bytes
//! one input tensor occupies, and a way to turn such a buffer into a vector
//! of class scores. Runtime bindings (NPU or otherwise) implement
//! [`InferenceBackend`]; [`ChannelMeanBackend`] is the built-in one.

use std::cmp::Ordering;

use tensorlink_core::config::{ConfigError, ModelConfig};

use crate::handoff::HandoffError;

/// A model that consumes fixed-size input buffers.
pub trait InferenceBackend {
    /// Byte length of one input tensor (shape × element size).
    fn expected_input_byte_length(&self) -> u32;

    /// Run one forward pass. `input` is exactly `expected_input_byte_length()` bytes.
    fn run(&mut self, input: &[u8]) -> Result<Vec<f32>, HandoffError>;
}

/// Return the `k` highest scores as `(index, score)`, best first.
///
/// Equal scores keep index order, so ties go to the lowest index.
/// NaN scores rank below every number.
pub fn top_k(scores: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| match (a.1.is_nan(), b.1.is_nan()) {
        (false, false) => b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (true, true) => Ordering::Equal,
    });
    ranked.truncate(k);
    ranked
}

/// Scores each channel of an f32 NCHW tensor by its mean activation.
///
/// Stands in for an accelerator runtime on hosts without one: it honours
/// the same fixed input size and produces one score per channel, so the
/// whole receive → hand-off → top-k path can run anywhere.
#[derive(Debug, Clone)]
pub struct ChannelMeanBackend {
    channels: usize,
    plane: usize,
    input_len: u32,
}

impl ChannelMeanBackend {
    /// Build from an NCHW shape of f32 elements.
    pub fn new(shape: [u32; 4]) -> Result<Self, ConfigError> {
        Self::from_config(&ModelConfig {
            input_shape: shape.to_vec(),
            element_size: 4,
        })
    }

    pub fn from_config(model: &ModelConfig) -> Result<Self, ConfigError> {
        if model.element_size != 4 {
            return Err(ConfigError::InvalidShape(format!(
                "channel-mean backend needs f32 input, got {}-byte elements",
                model.element_size
            )));
        }
        let input_len = model.expected_input_byte_length()?;
        let [_, c, h, w] = [0, 1, 2, 3].map(|i| model.input_shape[i] as usize);

        Ok(Self {
            channels: c,
            plane: h * w,
            input_len,
        })
    }
}

impl InferenceBackend for ChannelMeanBackend {
    fn expected_input_byte_length(&self) -> u32 {
        self.input_len
    }

    fn run(&mut self, input: &[u8]) -> Result<Vec<f32>, HandoffError> {
        if input.len() != self.input_len as usize {
            return Err(HandoffError::Inference(format!(
                "input is {} bytes, backend expects {}",
                input.len(),
                self.input_len
            )));
        }

        let mut sums = vec![0f64; self.channels];
        let elements = input
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]));
        for (i, value) in elements.enumerate() {
            sums[(i / self.plane) % self.channels] += f64::from(value);
        }

        let per_channel = (input.len() / 4 / self.channels) as f64;
        Ok(sums.into_iter().map(|s| (s / per_channel) as f32).collect())
    }
}
