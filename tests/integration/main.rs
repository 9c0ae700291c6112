//! Tensorlink integration test harness.
//!
//! Tests in this crate drive the real receive loops over loopback sockets:
//! a TCP listener for the stream transport and a UDP socket for the
//! datagram transport. Senders use the same framing helpers as
//! tensorlink-ctl, so the bytes on the wire are the production format.
//!
//!   cargo test --test integration

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use tensorlink_services::{
    ChannelMeanBackend, HandoffError, InferenceHandoff, Labels, Prediction, TensorSink,
};

mod datagram;
mod stream;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Shape used throughout: N=1, C=4, H=2, W=2 of f32 → 64 bytes.
pub const SHAPE: [u32; 4] = [1, 4, 2, 2];
pub const TENSOR_BYTES: usize = 64;

/// How long a test waits for a delivery before giving up.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// One call to `deliver`, as seen by the test.
#[derive(Debug)]
pub struct Delivery {
    pub tensor_id: u32,
    pub bytes: Vec<u8>,
    pub result: Result<Prediction, String>,
}

/// Wraps a real sink and reports every hand-off on a channel.
pub struct Observed<S> {
    inner: S,
    tx: mpsc::UnboundedSender<Delivery>,
}

impl<S: TensorSink> TensorSink for Observed<S> {
    fn expected_input_byte_length(&self) -> u32 {
        self.inner.expected_input_byte_length()
    }

    fn deliver(&mut self, tensor_id: u32, tensor: &[u8]) -> Result<Prediction, HandoffError> {
        let result = self.inner.deliver(tensor_id, tensor);
        let _ = self.tx.send(Delivery {
            tensor_id,
            bytes: tensor.to_vec(),
            result: result.as_ref().map(Clone::clone).map_err(|e| e.to_string()),
        });
        result
    }
}

/// The production hand-off (channel-mean backend + labels), observed.
pub fn observed_handoff() -> (
    Observed<InferenceHandoff<ChannelMeanBackend>>,
    mpsc::UnboundedReceiver<Delivery>,
) {
    let backend = ChannelMeanBackend::new(SHAPE).expect("valid shape");
    let labels = Labels::parse("zero\none\ntwo\nthree");
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Observed {
            inner: InferenceHandoff::new(backend, Some(labels)),
            tx,
        },
        rx,
    )
}

/// A 64-byte tensor whose hottest channel is `hot`.
pub fn tensor_with_hot_channel(hot: usize) -> Vec<u8> {
    let values: Vec<f32> = (0..16)
        .map(|i| if i / 4 == hot { 10.0 + i as f32 } else { i as f32 * 0.01 })
        .collect();
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

/// Wait for the next delivery or fail after `DELIVERY_TIMEOUT`.
pub async fn next_delivery(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Result<Delivery> {
    tokio::time::timeout(DELIVERY_TIMEOUT, rx.recv())
        .await
        .context("timed out waiting for a delivery")?
        .context("sink dropped")
}

/// Assert nothing more is delivered within a short grace period.
pub async fn assert_no_delivery(rx: &mut mpsc::UnboundedReceiver<Delivery>) {
    if let Ok(Some(d)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
        panic!("unexpected delivery of tensor {}", d.tensor_id);
    }
}

#[test]
fn tensor_fixture_matches_shape() {
    assert_eq!(tensor_with_hot_channel(0).len(), TENSOR_BYTES);
    let per_element: u32 = SHAPE.iter().product();
    assert_eq!(per_element as usize * 4, TENSOR_BYTES);
}
