//! tensorlink-services: the tensor transport and reassembly layer.
//!
//! Both receivers hand completed tensors to a [`TensorSink`]; the daemon
//! backs that with an [`InferenceHandoff`] around an [`InferenceBackend`].

pub mod datagram;
pub mod handoff;
pub mod inference;
pub mod labels;
pub mod reassembly;
pub mod stream;

pub use datagram::serve_datagrams;
pub use handoff::{HandoffError, InferenceHandoff, Prediction, TensorSink};
pub use inference::{top_k, ChannelMeanBackend, InferenceBackend};
pub use labels::Labels;
pub use reassembly::{DropReason, Outcome, Reassembler};
pub use stream::{
    serve_stream, CompleteTensor, Received, StreamError, StreamReceiver, StreamSummary,
};
