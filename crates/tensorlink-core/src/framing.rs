//! Sender-side framing: turns a raw tensor into wire units.
//!
//! The receivers never call these. They exist for the sender CLI and for
//! tests that need bit-exact traffic.

use crate::wire::{
    encode_datagram_header, encode_stream_header, WireError, DATAGRAM_HEADER_SIZE,
    MAX_CHUNK_SIZE, STREAM_HEADER_SIZE,
};

/// Frame a tensor for the stream transport: header followed by the payload.
pub fn frame_stream(tensor_id: u32, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let size =
        u32::try_from(payload.len()).map_err(|_| WireError::PayloadTooLarge(payload.len()))?;

    let mut frame = Vec::with_capacity(STREAM_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&encode_stream_header(tensor_id, size));
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Split a tensor into datagrams of at most `chunk_size` payload bytes.
///
/// Datagrams are returned in chunk order. An empty payload still produces
/// one (empty) chunk so the receiver sees a completable tensor.
pub fn split_datagrams(
    tensor_id: u32,
    payload: &[u8],
    chunk_size: usize,
) -> Result<Vec<Vec<u8>>, WireError> {
    if chunk_size == 0 {
        return Err(WireError::ChunkSizeZero);
    }
    if chunk_size > MAX_CHUNK_SIZE {
        return Err(WireError::ChunkSizeTooLarge(chunk_size));
    }

    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![payload]
    } else {
        payload.chunks(chunk_size).collect()
    };
    let total = u32::try_from(chunks.len()).map_err(|_| WireError::TooManyChunks(chunks.len()))?;

    Ok(chunks
        .into_iter()
        .zip(0u32..)
        .map(|(chunk, chunk_id)| {
            let mut datagram = Vec::with_capacity(DATAGRAM_HEADER_SIZE + chunk.len());
            datagram.extend_from_slice(&encode_datagram_header(tensor_id, chunk_id, total));
            datagram.extend_from_slice(chunk);
            datagram
        })
        .collect())
}
