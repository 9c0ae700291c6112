//! Socket setup and session handling for both transports.

use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, UdpSocket};

use tensorlink_core::config::{AcceptMode, TensorlinkConfig};
use tensorlink_core::wire::MAX_CHUNK_SIZE;
use tensorlink_services::{serve_datagrams, serve_stream, Reassembler, TensorSink};

fn bind_addr(config: &TensorlinkConfig) -> Result<SocketAddr> {
    let ip = config
        .network
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.network.bind_addr))?;
    Ok(SocketAddr::new(ip, config.network.port))
}

/// TCP listener with SO_REUSEADDR and a backlog of one: a second peer
/// waits in the kernel queue until the current session ends.
fn make_stream_listener(addr: SocketAddr) -> Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket.bind(&addr.into()).context("bind()")?;
    socket.listen(1).context("listen()")?;

    Ok(socket.into())
}

/// Accept peers one at a time and serve each until it closes or fails.
pub async fn run_stream<S: TensorSink>(config: &TensorlinkConfig, mut sink: S) -> Result<()> {
    let addr = bind_addr(config)?;
    let listener = TcpListener::from_std(make_stream_listener(addr)?)
        .context("failed to convert to tokio TcpListener")?;
    tracing::info!(addr = %listener.local_addr()?, "listening (stream)");

    loop {
        let (stream, peer) = listener.accept().await.context("accept failed")?;
        tracing::info!(%peer, "connected to client");

        match serve_stream(stream, &mut sink, config.stream.on_size_mismatch).await {
            Ok(summary) => tracing::info!(
                %peer,
                delivered = summary.delivered,
                failed = summary.failed,
                skipped = summary.skipped,
                "session ended"
            ),
            Err(e) => tracing::error!(%peer, error = %e, "session terminated"),
        }

        if config.stream.accept == AcceptMode::Once {
            return Ok(());
        }
    }
}

/// Bind the datagram port and reassemble until shutdown.
pub async fn run_datagram<S: TensorSink>(config: &TensorlinkConfig, sink: S) -> Result<()> {
    let chunk_size = config.datagram.chunk_size;
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        bail!("datagram chunk_size must be between 1 and {MAX_CHUNK_SIZE}, got {chunk_size}");
    }

    let addr = bind_addr(config)?;
    let socket = UdpSocket::bind(addr)
        .await
        .with_context(|| format!("failed to bind datagram socket on {addr}"))?;
    tracing::info!(addr = %socket.local_addr()?, chunk_size, "listening (datagram)");

    let reassembler = Reassembler::for_tensor_len(sink.expected_input_byte_length(), chunk_size);
    serve_datagrams(socket, reassembler, sink).await
}
