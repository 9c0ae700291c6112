use std::net::SocketAddr;

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tensorlink_core::framing::split_datagrams;
use tensorlink_core::wire::encode_datagram_header;
use tensorlink_services::{serve_datagrams, Reassembler, TensorSink};

use crate::*;

/// Chunk size small enough that one test tensor spans several datagrams.
const CHUNK: usize = 24;

/// Bind a receiver on loopback and run the datagram loop in the background.
async fn spawn_receiver() -> Result<(
    SocketAddr,
    JoinHandle<Result<()>>,
    mpsc::UnboundedReceiver<Delivery>,
)> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    let addr = socket.local_addr()?;
    let (sink, rx) = observed_handoff();
    let reassembler = Reassembler::for_tensor_len(sink.expected_input_byte_length(), CHUNK);

    let handle = tokio::spawn(serve_datagrams(socket, reassembler, sink));
    Ok((addr, handle, rx))
}

async fn send_all(sender: &UdpSocket, to: SocketAddr, datagrams: &[Vec<u8>]) -> Result<()> {
    for d in datagrams {
        sender.send_to(d, to).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_datagram_reordered_with_noise() -> Result<()> {
    let (addr, handle, mut rx) = spawn_receiver().await?;
    let sender = UdpSocket::bind("127.0.0.1:0").await?;

    let tensor = tensor_with_hot_channel(3);
    let chunks = split_datagrams(77, &tensor, CHUNK)?;
    assert_eq!(chunks.len(), 3);

    let traffic = vec![
        chunks[2].clone(),
        vec![0xde, 0xad], // malformed
        chunks[0].clone(),
        chunks[0].clone(), // duplicate
        encode_datagram_header(77, 10, 3).to_vec(), // out of range
        encode_datagram_header(78, 0, 0).to_vec(),  // zero total, no switch
        chunks[1].clone(),
    ];
    send_all(&sender, addr, &traffic).await?;

    let d = next_delivery(&mut rx).await?;
    assert_eq!(d.tensor_id, 77);
    assert_eq!(d.bytes, tensor);
    let prediction = d.result.expect("inference should succeed");
    assert_eq!(prediction.index, 3);
    assert_eq!(prediction.label.as_deref(), Some("three"));

    assert_no_delivery(&mut rx).await;
    assert!(!handle.is_finished(), "drops must never end the loop");
    handle.abort();
    Ok(())
}

#[tokio::test]
async fn test_datagram_new_tensor_supersedes_partial_one() -> Result<()> {
    let (addr, handle, mut rx) = spawn_receiver().await?;
    let sender = UdpSocket::bind("127.0.0.1:0").await?;

    let a = split_datagrams(1, &tensor_with_hot_channel(0), CHUNK)?;
    let b = split_datagrams(2, &tensor_with_hot_channel(1), CHUNK)?;

    // Tensor 1 loses its last chunk; tensor 2 arrives complete.
    send_all(&sender, addr, &a[..2]).await?;
    send_all(&sender, addr, &b).await?;
    // A straggler from tensor 1 only restarts tensor 1, which never completes.
    send_all(&sender, addr, &a[2..]).await?;

    let d = next_delivery(&mut rx).await?;
    assert_eq!(d.tensor_id, 2);
    assert_eq!(d.bytes, tensor_with_hot_channel(1));
    assert_no_delivery(&mut rx).await;

    handle.abort();
    Ok(())
}

#[tokio::test]
async fn test_datagram_wrong_length_rejected_at_handoff() -> Result<()> {
    let (addr, handle, mut rx) = spawn_receiver().await?;
    let sender = UdpSocket::bind("127.0.0.1:0").await?;

    // Two chunks that reassemble to 30 bytes instead of 64.
    send_all(&sender, addr, &split_datagrams(5, &[1u8; 30], CHUNK)?).await?;
    let d = next_delivery(&mut rx).await?;
    assert_eq!(d.tensor_id, 5);
    let err = d.result.expect_err("short tensor must not reach the model");
    assert!(err.contains("30 bytes"), "unexpected error: {err}");

    // The loop keeps going.
    let next = split_datagrams(6, &tensor_with_hot_channel(2), CHUNK)?;
    send_all(&sender, addr, &next).await?;
    let d = next_delivery(&mut rx).await?;
    assert_eq!(d.tensor_id, 6);
    assert!(d.result.is_ok());

    handle.abort();
    Ok(())
}

#[tokio::test]
async fn test_datagram_sender_may_use_smaller_chunks() -> Result<()> {
    let (addr, handle, mut rx) = spawn_receiver().await?;
    let sender = UdpSocket::bind("127.0.0.1:0").await?;

    // The receiver is configured for 24-byte chunks; this sender uses 5.
    let tensor = tensor_with_hot_channel(1);
    let chunks = split_datagrams(31, &tensor, 5)?;
    assert_eq!(chunks.len(), 13);
    send_all(&sender, addr, &chunks).await?;

    let d = next_delivery(&mut rx).await?;
    assert_eq!(d.tensor_id, 31);
    assert_eq!(d.bytes, tensor);
    assert_eq!(d.result.expect("inference should succeed").index, 1);

    handle.abort();
    Ok(())
}
