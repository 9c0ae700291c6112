use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tensorlink_core::config::SizeMismatchPolicy;
use tensorlink_core::framing::frame_stream;
use tensorlink_services::{serve_stream, StreamError, StreamSummary};

use crate::*;

/// Accept one connection and serve it with the observed hand-off.
async fn spawn_server(
    policy: SizeMismatchPolicy,
) -> Result<(
    std::net::SocketAddr,
    JoinHandle<Result<StreamSummary, StreamError>>,
    mpsc::UnboundedReceiver<Delivery>,
)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (mut sink, rx) = observed_handoff();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        serve_stream(stream, &mut sink, policy).await
    });

    Ok((addr, server, rx))
}

#[tokio::test]
async fn test_stream_frames_survive_tiny_writes() -> Result<()> {
    let (addr, server, mut rx) = spawn_server(SizeMismatchPolicy::Terminate).await?;

    let mut client = TcpStream::connect(addr).await?;
    client.set_nodelay(true)?;

    // First frame one byte per write, the rest in a single burst.
    let first = frame_stream(100, &tensor_with_hot_channel(2))?;
    for byte in &first {
        client.write_all(std::slice::from_ref(byte)).await?;
        client.flush().await?;
    }
    let mut burst = frame_stream(101, &tensor_with_hot_channel(0))?;
    burst.extend(frame_stream(102, &tensor_with_hot_channel(3))?);
    client.write_all(&burst).await?;
    client.shutdown().await?;

    let summary = server.await??;
    assert_eq!(
        summary,
        StreamSummary {
            delivered: 3,
            failed: 0,
            skipped: 0
        }
    );

    let expected = [(100, 2, "two"), (101, 0, "zero"), (102, 3, "three")];
    for (tensor_id, index, label) in expected {
        let d = next_delivery(&mut rx).await?;
        assert_eq!(d.tensor_id, tensor_id);
        assert_eq!(d.bytes, tensor_with_hot_channel(index));
        let prediction = d.result.expect("inference should succeed");
        assert_eq!(prediction.index, index);
        assert_eq!(prediction.label.as_deref(), Some(label));
    }
    Ok(())
}

#[tokio::test]
async fn test_stream_size_mismatch_ends_session() -> Result<()> {
    let (addr, server, mut rx) = spawn_server(SizeMismatchPolicy::Terminate).await?;

    let mut wire = frame_stream(1, &tensor_with_hot_channel(1))?;
    wire.extend(frame_stream(2, &[0u8; TENSOR_BYTES + 4])?);
    wire.extend(frame_stream(3, &tensor_with_hot_channel(1))?);

    let mut client = TcpStream::connect(addr).await?;
    client.write_all(&wire).await?;
    client.shutdown().await?;

    match server.await? {
        Err(StreamError::SizeMismatch {
            tensor_id,
            advertised,
            expected,
        }) => {
            assert_eq!(tensor_id, 2);
            assert_eq!(advertised as usize, TENSOR_BYTES + 4);
            assert_eq!(expected, TENSOR_BYTES);
        }
        other => panic!("expected size mismatch, got {other:?}"),
    }

    assert_eq!(next_delivery(&mut rx).await?.tensor_id, 1);
    assert_no_delivery(&mut rx).await;
    Ok(())
}

#[tokio::test]
async fn test_stream_skip_policy_keeps_session() -> Result<()> {
    let (addr, server, mut rx) = spawn_server(SizeMismatchPolicy::Skip).await?;

    let mut wire = frame_stream(1, &[7u8; 3])?;
    wire.extend(frame_stream(2, &tensor_with_hot_channel(1))?);

    let mut client = TcpStream::connect(addr).await?;
    client.write_all(&wire).await?;
    client.shutdown().await?;

    let summary = server.await??;
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(next_delivery(&mut rx).await?.tensor_id, 2);
    Ok(())
}

#[tokio::test]
async fn test_stream_peer_vanishing_mid_payload_is_transport_error() -> Result<()> {
    let (addr, server, mut rx) = spawn_server(SizeMismatchPolicy::Terminate).await?;

    let frame = frame_stream(9, &tensor_with_hot_channel(0))?;
    let mut client = TcpStream::connect(addr).await?;
    client.write_all(&frame[..frame.len() - 10]).await?;
    drop(client);

    assert!(matches!(server.await?, Err(StreamError::Transport(_))));
    assert_no_delivery(&mut rx).await;
    Ok(())
}
