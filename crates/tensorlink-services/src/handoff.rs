//! Tensor hand-off: the single point where a received tensor leaves the
//! transport layer.
//!
//! Both receivers are written against [`TensorSink`]. `deliver` is called
//! synchronously, once per completed tensor, and never concurrently. The
//! buffer is only borrowed for the duration of the call; the receiver
//! reuses it for the next tensor as soon as `deliver` returns.

use std::time::{Duration, Instant};

use crate::inference::{top_k, InferenceBackend};
use crate::labels::Labels;

/// Consumer of completed tensors.
pub trait TensorSink {
    /// Byte length every delivered tensor must have.
    fn expected_input_byte_length(&self) -> u32;

    /// Hand over one completed tensor.
    fn deliver(&mut self, tensor_id: u32, tensor: &[u8]) -> Result<Prediction, HandoffError>;
}

/// Top-1 result for one tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub tensor_id: u32,
    pub index: usize,
    pub score: f32,
    pub label: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error("tensor {tensor_id} is {got} bytes, model input is {expected}")]
    SizeMismatch {
        tensor_id: u32,
        got: usize,
        expected: u32,
    },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("model produced no output scores")]
    EmptyOutput,
}

/// Whole microseconds, saturating at `u64::MAX`.
fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

/// Runs a backend on each delivered tensor and reports the top-1 class.
pub struct InferenceHandoff<B> {
    backend: B,
    labels: Option<Labels>,
}

impl<B: InferenceBackend> InferenceHandoff<B> {
    pub fn new(backend: B, labels: Option<Labels>) -> Self {
        Self { backend, labels }
    }
}

impl<B: InferenceBackend> TensorSink for InferenceHandoff<B> {
    fn expected_input_byte_length(&self) -> u32 {
        self.backend.expected_input_byte_length()
    }

    fn deliver(&mut self, tensor_id: u32, tensor: &[u8]) -> Result<Prediction, HandoffError> {
        // The datagram path does not check length before this point.
        let expected = self.expected_input_byte_length();
        if tensor.len() != expected as usize {
            return Err(HandoffError::SizeMismatch {
                tensor_id,
                got: tensor.len(),
                expected,
            });
        }

        let started = Instant::now();
        let scores = self.backend.run(tensor)?;
        let (index, score) = top_k(&scores, 1)
            .first()
            .copied()
            .ok_or(HandoffError::EmptyOutput)?;
        let label = self
            .labels
            .as_ref()
            .and_then(|l| l.label_for(index))
            .map(str::to_string);

        tracing::info!(
            tensor_id,
            index,
            score,
            label = label.as_deref().unwrap_or("-"),
            outputs = scores.len(),
            elapsed_us = micros(started.elapsed()),
            "inference complete"
        );

        Ok(Prediction {
            tensor_id,
            index,
            score,
            label,
        })
    }
}
