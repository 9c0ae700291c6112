//! Datagram receive loop: feeds every datagram on the bound port into
//! one reassembler and hands completed tensors to the sink.
//!
//! There is no notion of a peer here: chunks from any sender reaching the
//! port share the same reassembly state, and two senders interleaving on
//! one port will keep abandoning each other's tensors.

use std::io;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use crate::handoff::TensorSink;
use crate::reassembly::{DropReason, Outcome, Reassembler};

/// Large enough for any UDP payload, so oversized chunks are seen whole
/// and dropped instead of being silently truncated.
const RECV_BUFFER_SIZE: usize = 65536;

/// Consecutive `recv_from` failures tolerated before the loop gives up.
const MAX_CONSECUTIVE_RECV_ERRORS: u32 = 8;

/// First pause after a failed receive; doubles on each repeat.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Tracks a run of receive failures.
#[derive(Debug, Default)]
struct RecvErrors {
    consecutive: u32,
}

impl RecvErrors {
    /// Count one failure. Returns how long to wait before the next receive,
    /// or the error once the run is too long.
    fn record(&mut self, e: io::Error) -> io::Result<Duration> {
        self.consecutive += 1;
        if self.consecutive >= MAX_CONSECUTIVE_RECV_ERRORS {
            return Err(e);
        }
        Ok(RECV_ERROR_BACKOFF * 2u32.pow(self.consecutive - 1))
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }
}

/// Receive and reassemble forever. Drop reasons and hand-off failures are
/// logged and never end the loop. Only a run of socket errors does.
pub async fn serve_datagrams<S: TensorSink>(
    socket: UdpSocket,
    mut reassembler: Reassembler,
    mut sink: S,
) -> Result<()> {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let mut errors = RecvErrors::default();

    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(r) => {
                errors.reset();
                r
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    attempt = errors.consecutive + 1,
                    "recv_from failed"
                );
                let pause = errors.record(e).context("recv_from keeps failing")?;
                tokio::time::sleep(pause).await;
                continue;
            }
        };

        match reassembler.on_datagram(&buf[..len]) {
            Outcome::Pending => {
                tracing::trace!(
                    tensor_id = reassembler.active_tensor_id(),
                    received = reassembler.received_count(),
                    total = reassembler.total_chunks(),
                    "chunk stored"
                );
            }
            Outcome::Dropped(reason @ (DropReason::Duplicate | DropReason::OutOfRange)) => {
                tracing::debug!(%peer, len, reason = %reason, "chunk dropped");
            }
            Outcome::Dropped(reason) => {
                tracing::warn!(%peer, len, reason = %reason, "datagram dropped");
            }
            Outcome::Ready { tensor_id, tensor } => {
                tracing::info!(tensor_id, bytes = tensor.len(), "tensor reassembled");
                if let Err(e) = sink.deliver(tensor_id, tensor) {
                    tracing::warn!(tensor_id, error = %e, "hand-off failed");
                }
            }
        }
    }
}
