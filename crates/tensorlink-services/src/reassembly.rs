//! Datagram reassembly: rebuilds one tensor at a time from chunks that
//! may arrive in any order, more than once, or not at all.
//!
//! Only one tensor is ever held. A chunk carrying a different tensor id
//! than the one being assembled abandons the current tensor, whatever it
//! has collected so far. Lost chunks are never requested again; a tensor
//! with a missing chunk is simply superseded by the next one.
//!
//! The first `total_chunks` seen after a switch is kept for the tensor's
//! lifetime. Later chunks announcing a different count are not reconciled,
//! and their announced count is never validated: only the chunk id is
//! checked against the stored count.

use bytes::Bytes;
use tensorlink_core::wire::{DatagramHeader, DATAGRAM_HEADER_SIZE};
use zerocopy::FromBytes;

/// Why a datagram was discarded. Never fatal: the loop moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DropReason {
    #[error("datagram shorter than the {} byte header", DATAGRAM_HEADER_SIZE)]
    MalformedHeader,
    #[error("chunk id outside the tensor's chunk range")]
    OutOfRange,
    #[error("chunk already received")]
    Duplicate,
    #[error("total chunk count is zero or above the configured bound")]
    InvalidTotalChunks,
    #[error("chunk payload larger than the configured chunk size")]
    Oversized,
}

/// Result of feeding one datagram to the reassembler.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome<'a> {
    /// All chunks present. `tensor` is valid until the next `on_datagram`.
    Ready { tensor_id: u32, tensor: &'a [u8] },
    Pending,
    Dropped(DropReason),
}

pub struct Reassembler {
    active_tensor_id: Option<u32>,
    total_chunks: u32,
    received_count: u32,
    /// Indexed by chunk id. Resized on tensor switch only.
    slots: Vec<Option<Bytes>>,
    /// Output buffer, reused across tensors.
    assembled: Vec<u8>,
    max_chunk_size: usize,
    max_total_chunks: u32,
}

impl Reassembler {
    pub fn new(max_chunk_size: usize, max_total_chunks: u32) -> Self {
        Self {
            active_tensor_id: None,
            total_chunks: 0,
            received_count: 0,
            slots: Vec::new(),
            assembled: Vec::new(),
            max_chunk_size,
            max_total_chunks,
        }
    }

    /// Accept chunks of up to `chunk_size` bytes, and as many chunks as a
    /// tensor of `tensor_len` bytes could be split into at one byte each.
    /// Senders are free to pick any chunk size up to the maximum.
    pub fn for_tensor_len(tensor_len: u32, chunk_size: usize) -> Self {
        Self::new(chunk_size.max(1), tensor_len.max(1))
    }

    pub fn active_tensor_id(&self) -> Option<u32> {
        self.active_tensor_id
    }

    pub fn received_count(&self) -> u32 {
        self.received_count
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Feed one raw datagram, header included.
    pub fn on_datagram(&mut self, raw: &[u8]) -> Outcome<'_> {
        let Some(header) = DatagramHeader::read_from_prefix(raw) else {
            return Outcome::Dropped(DropReason::MalformedHeader);
        };
        let payload = &raw[DATAGRAM_HEADER_SIZE..];
        let tensor_id = header.tensor_id();
        let chunk_id = header.chunk_id();
        let announced_total = header.total_chunks();

        if payload.len() > self.max_chunk_size {
            return Outcome::Dropped(DropReason::Oversized);
        }
        if self.active_tensor_id != Some(tensor_id) {
            if announced_total == 0 || announced_total > self.max_total_chunks {
                return Outcome::Dropped(DropReason::InvalidTotalChunks);
            }
            self.switch_to(tensor_id, announced_total);
        }

        if chunk_id >= self.total_chunks {
            return Outcome::Dropped(DropReason::OutOfRange);
        }
        let slot = &mut self.slots[chunk_id as usize];
        if slot.is_some() {
            return Outcome::Dropped(DropReason::Duplicate);
        }
        *slot = Some(Bytes::copy_from_slice(payload));
        self.received_count += 1;

        if self.received_count < self.total_chunks {
            return Outcome::Pending;
        }

        self.assembled.clear();
        for chunk in self.slots.drain(..).flatten() {
            self.assembled.extend_from_slice(&chunk);
        }
        self.reset();

        Outcome::Ready {
            tensor_id,
            tensor: &self.assembled,
        }
    }

    /// Abandon whatever is in progress and start collecting `tensor_id`.
    fn switch_to(&mut self, tensor_id: u32, total_chunks: u32) {
        if let Some(previous) = self.active_tensor_id {
            tracing::debug!(
                previous,
                next = tensor_id,
                lost_chunks = self.received_count,
                of = self.total_chunks,
                "tensor superseded, discarding partial reassembly"
            );
        }
        self.slots.clear();
        self.slots.resize(total_chunks as usize, None);
        self.active_tensor_id = Some(tensor_id);
        self.total_chunks = total_chunks;
        self.received_count = 0;
    }

    fn reset(&mut self) {
        self.slots.clear();
        self.active_tensor_id = None;
        self.total_chunks = 0;
        self.received_count = 0;
    }
}
