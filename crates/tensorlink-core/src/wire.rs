//! Tensorlink wire format: the two on-wire headers and their constants.
//!
//! These types ARE the protocol. Every field and every size is part of the
//! wire format shared with senders that are not written in Rust, so nothing
//! here may change without changing every sender too.
//!
//! All integers are unsigned 32-bit, network byte order. The header structs
//! use zerocopy's big-endian integer wrappers, so they have alignment 1 and
//! convert to and from byte arrays without any unsafe code.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Default listening port for both transports.
pub const DEFAULT_PORT: u16 = 5005;

/// Maximum datagram payload per chunk, not including the header.
pub const MAX_CHUNK_SIZE: usize = 4096;

/// Size of the stream header on the wire.
pub const STREAM_HEADER_SIZE: usize = 8;

/// Size of the datagram header on the wire.
pub const DATAGRAM_HEADER_SIZE: usize = 12;

// ── Stream Header ─────────────────────────────────────────────────────────────

/// Precedes every tensor on the reliable stream transport.
///
/// Immediately followed by exactly `payload_size` bytes of tensor data.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct StreamHeader {
    /// Sender-assigned tensor identifier. Informational on this transport.
    pub tensor_id: U32<BigEndian>,
    /// Number of payload bytes following the header.
    pub payload_size: U32<BigEndian>,
}

assert_eq_size!(StreamHeader, [u8; STREAM_HEADER_SIZE]);

impl StreamHeader {
    pub fn new(tensor_id: u32, payload_size: u32) -> Self {
        Self {
            tensor_id: U32::new(tensor_id),
            payload_size: U32::new(payload_size),
        }
    }

    pub fn tensor_id(&self) -> u32 {
        self.tensor_id.get()
    }

    pub fn payload_size(&self) -> u32 {
        self.payload_size.get()
    }
}

// ── Datagram Header ───────────────────────────────────────────────────────────

/// Precedes every chunk on the lossy datagram transport.
///
/// Each datagram is self-describing: the receiver can place the chunk in
/// its tensor without any other context. The payload is the remainder of
/// the datagram, at most `MAX_CHUNK_SIZE` bytes, and may be shorter for the
/// final chunk.
///
/// Wire size: 12 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct DatagramHeader {
    /// Tensor this chunk belongs to. A change of id abandons the previous tensor.
    pub tensor_id: U32<BigEndian>,
    /// Zero-based index of this chunk within the tensor.
    pub chunk_id: U32<BigEndian>,
    /// Number of chunks the tensor was split into.
    pub total_chunks: U32<BigEndian>,
}

assert_eq_size!(DatagramHeader, [u8; DATAGRAM_HEADER_SIZE]);

impl DatagramHeader {
    pub fn new(tensor_id: u32, chunk_id: u32, total_chunks: u32) -> Self {
        Self {
            tensor_id: U32::new(tensor_id),
            chunk_id: U32::new(chunk_id),
            total_chunks: U32::new(total_chunks),
        }
    }

    pub fn tensor_id(&self) -> u32 {
        self.tensor_id.get()
    }

    pub fn chunk_id(&self) -> u32 {
        self.chunk_id.get()
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks.get()
    }
}

// ── Codec ─────────────────────────────────────────────────────────────────────

// The decoders take fixed-size arrays: a short buffer cannot reach them.

pub fn encode_stream_header(tensor_id: u32, payload_size: u32) -> [u8; STREAM_HEADER_SIZE] {
    zerocopy::transmute!(StreamHeader::new(tensor_id, payload_size))
}

pub fn decode_stream_header(bytes: &[u8; STREAM_HEADER_SIZE]) -> StreamHeader {
    zerocopy::transmute!(*bytes)
}

pub fn encode_datagram_header(
    tensor_id: u32,
    chunk_id: u32,
    total_chunks: u32,
) -> [u8; DATAGRAM_HEADER_SIZE] {
    zerocopy::transmute!(DatagramHeader::new(tensor_id, chunk_id, total_chunks))
}

pub fn decode_datagram_header(bytes: &[u8; DATAGRAM_HEADER_SIZE]) -> DatagramHeader {
    zerocopy::transmute!(*bytes)
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors raised while producing wire data on the sending side.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("payload of {0} bytes does not fit a 32-bit size field")]
    PayloadTooLarge(usize),

    #[error("chunk size must be non-zero")]
    ChunkSizeZero,

    #[error("chunk size {0} exceeds maximum {}", MAX_CHUNK_SIZE)]
    ChunkSizeTooLarge(usize),

    #[error("payload needs {0} chunks, more than a 32-bit chunk count allows")]
    TooManyChunks(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
