//! Stream frame receiver: one length-framed tensor per read.
//!
//! The byte source is anything implementing `AsyncRead`: a `TcpStream` in
//! the daemon, an in-memory reader in tests. Reads are built on the single
//! primitive "read up to N bytes, 0 = peer closed", looped until a header
//! or payload is complete. Nothing is buffered beyond the tensor in flight,
//! so a fast sender is held back by the receiver's own reads.

use std::io;

use tensorlink_core::config::SizeMismatchPolicy;
use tensorlink_core::wire::{decode_stream_header, STREAM_HEADER_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::handoff::TensorSink;

/// The single reusable input buffer, sized once to the model input.
///
/// Contents are reachable only through the [`CompleteTensor`] borrow that
/// `receive_next_tensor` returns, and the next call needs `&mut` access to
/// the receiver, so the previous tensor is unreachable before the buffer is
/// written again. An accepted frame always fills every byte, and a frame of
/// any other size never touches it, so nothing from an earlier tensor can
/// survive into a later one. The buffer is not cleared between tensors.
#[derive(Debug)]
pub struct TensorBuffer {
    bytes: Vec<u8>,
}

impl TensorBuffer {
    pub fn new(len: usize) -> Self {
        Self { bytes: vec![0u8; len] }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A tensor read in full. Borrows the receiver's buffer until dropped.
#[derive(Debug)]
pub struct CompleteTensor<'a> {
    pub tensor_id: u32,
    pub bytes: &'a [u8],
}

#[derive(Debug)]
pub enum Received<'a> {
    Tensor(CompleteTensor<'a>),
    /// Peer closed the connection between frames.
    EndOfStream,
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The payload has been consumed; the stream is still frame-aligned.
    #[error("tensor {tensor_id} advertised {advertised} bytes, model input is {expected}")]
    SizeMismatch {
        tensor_id: u32,
        advertised: u32,
        expected: usize,
    },
}

enum Fill {
    Complete,
    Closed { got: usize },
}

/// Keep reading until `buf` is full or the peer closes.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> io::Result<Fill> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => return Ok(Fill::Closed { got: filled }),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(Fill::Complete)
}

pub struct StreamReceiver<R> {
    reader: R,
    buffer: TensorBuffer,
}

impl<R: AsyncRead + Unpin> StreamReceiver<R> {
    /// `expected_len` comes from the hand-off boundary and never changes.
    pub fn new(reader: R, expected_len: usize) -> Self {
        Self {
            reader,
            buffer: TensorBuffer::new(expected_len),
        }
    }

    /// Block until one complete tensor is available or the peer goes away.
    pub async fn receive_next_tensor(&mut self) -> Result<Received<'_>, StreamError> {
        let mut header = [0u8; STREAM_HEADER_SIZE];
        if let Fill::Closed { got } = read_full(&mut self.reader, &mut header).await? {
            if got > 0 {
                tracing::debug!(got, "peer closed mid-header, discarding partial header");
            }
            return Ok(Received::EndOfStream);
        }

        let header = decode_stream_header(&header);
        let tensor_id = header.tensor_id();
        let advertised = header.payload_size();
        tracing::debug!(tensor_id, payload_size = advertised, "receiving tensor");

        if advertised as usize != self.buffer.len() {
            self.discard(advertised).await?;
            return Err(StreamError::SizeMismatch {
                tensor_id,
                advertised,
                expected: self.buffer.len(),
            });
        }

        match read_full(&mut self.reader, &mut self.buffer.bytes).await? {
            Fill::Complete => Ok(Received::Tensor(CompleteTensor {
                tensor_id,
                bytes: &self.buffer.bytes,
            })),
            Fill::Closed { got } => Err(StreamError::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("peer closed after {got} of {advertised} payload bytes"),
            ))),
        }
    }

    /// Consume exactly `len` payload bytes without storing them.
    async fn discard(&mut self, len: u32) -> Result<(), StreamError> {
        let mut payload = (&mut self.reader).take(u64::from(len));
        let consumed = tokio::io::copy(&mut payload, &mut tokio::io::sink()).await?;
        if consumed < u64::from(len) {
            return Err(StreamError::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("peer closed after {consumed} of {len} payload bytes"),
            )));
        }
        Ok(())
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Counters for one stream session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Tensors handed to the sink successfully.
    pub delivered: u64,
    /// Tensors the sink rejected (inference errors).
    pub failed: u64,
    /// Frames dropped for a size mismatch under `SizeMismatchPolicy::Skip`.
    pub skipped: u64,
}

/// Serve one connection until the peer closes or the session fails.
///
/// A graceful close returns `Ok`. Transport errors, and size mismatches
/// under `SizeMismatchPolicy::Terminate`, end the session with `Err`.
pub async fn serve_stream<R, S>(
    reader: R,
    sink: &mut S,
    on_size_mismatch: SizeMismatchPolicy,
) -> Result<StreamSummary, StreamError>
where
    R: AsyncRead + Unpin,
    S: TensorSink,
{
    let expected = sink.expected_input_byte_length() as usize;
    let mut receiver = StreamReceiver::new(reader, expected);
    let mut summary = StreamSummary::default();

    loop {
        match receiver.receive_next_tensor().await {
            Ok(Received::Tensor(tensor)) => {
                tracing::info!(
                    tensor_id = tensor.tensor_id,
                    bytes = tensor.bytes.len(),
                    "tensor received"
                );
                match sink.deliver(tensor.tensor_id, tensor.bytes) {
                    Ok(_) => summary.delivered += 1,
                    Err(e) => {
                        tracing::warn!(tensor_id = tensor.tensor_id, error = %e, "hand-off failed");
                        summary.failed += 1;
                    }
                }
            }
            Ok(Received::EndOfStream) => {
                tracing::info!(
                    delivered = summary.delivered,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "peer closed connection"
                );
                return Ok(summary);
            }
            Err(e @ StreamError::SizeMismatch { .. })
                if on_size_mismatch == SizeMismatchPolicy::Skip =>
            {
                tracing::warn!(error = %e, "skipping mis-sized tensor");
                summary.skipped += 1;
            }
            Err(e) => {
                if matches!(e, StreamError::SizeMismatch { .. }) {
                    tracing::error!(error = %e, "size mismatch, terminating session");
                }
                return Err(e);
            }
        }
    }
}
