//! tensorlink-ctl: push raw tensors to a running tensorlinkd.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};

use tensorlink_core::framing::{frame_stream, split_datagrams};
use tensorlink_core::wire::{DEFAULT_PORT, MAX_CHUNK_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Stream,
    Datagram,
}

#[derive(Debug, PartialEq, Eq)]
struct SendArgs {
    transport: Transport,
    file: PathBuf,
    addr: String,
    tensor_id: u32,
    chunk_size: usize,
    pace: Duration,
}

fn usage() {
    println!(
        "tensorlink-ctl: send tensors to tensorlinkd

USAGE:
  tensorlink-ctl send <stream|datagram> <file> [options]

OPTIONS:
  --addr HOST:PORT    Receiver address            (default 127.0.0.1:{DEFAULT_PORT})
  --id N              Tensor id                   (default 0)
  --chunk-size N      Datagram payload bytes      (default {MAX_CHUNK_SIZE})
  --pace-us N         Delay between datagrams     (default 0)"
    );
}

fn parse_send(args: &[String]) -> Result<SendArgs> {
    let transport = match args.first().map(String::as_str) {
        Some("stream") => Transport::Stream,
        Some("datagram") => Transport::Datagram,
        Some(other) => bail!("unknown transport '{other}'"),
        None => bail!("missing transport"),
    };
    let file = args.get(1).map(PathBuf::from).context("missing tensor file")?;

    let mut parsed = SendArgs {
        transport,
        file,
        addr: format!("127.0.0.1:{DEFAULT_PORT}"),
        tensor_id: 0,
        chunk_size: MAX_CHUNK_SIZE,
        pace: Duration::ZERO,
    };

    let mut rest = args[2..].iter();
    while let Some(flag) = rest.next() {
        let value = rest
            .next()
            .with_context(|| format!("{flag} needs a value"))?;
        match flag.as_str() {
            "--addr" => parsed.addr = value.clone(),
            "--id" => parsed.tensor_id = value.parse().context("invalid --id")?,
            "--chunk-size" => parsed.chunk_size = value.parse().context("invalid --chunk-size")?,
            "--pace-us" => {
                parsed.pace = Duration::from_micros(value.parse().context("invalid --pace-us")?)
            }
            other => bail!("unexpected argument: {other}"),
        }
    }

    Ok(parsed)
}

async fn send(args: &SendArgs) -> Result<()> {
    let payload = std::fs::read(&args.file)
        .with_context(|| format!("failed to read tensor file: {}", args.file.display()))?;

    match args.transport {
        Transport::Stream => {
            let frame = frame_stream(args.tensor_id, &payload)?;
            let mut stream = TcpStream::connect(&args.addr)
                .await
                .with_context(|| format!("failed to connect to tensorlinkd at {}", args.addr))?;
            stream.write_all(&frame).await.context("failed to send frame")?;
            stream.shutdown().await.ok();
            println!("sent tensor {} ({} bytes) over stream", args.tensor_id, payload.len());
        }
        Transport::Datagram => {
            let datagrams = split_datagrams(args.tensor_id, &payload, args.chunk_size)?;
            let socket = UdpSocket::bind("0.0.0.0:0").await.context("failed to bind UDP socket")?;
            for datagram in &datagrams {
                socket
                    .send_to(datagram, &args.addr)
                    .await
                    .with_context(|| format!("failed to send datagram to {}", args.addr))?;
                if !args.pace.is_zero() {
                    tokio::time::sleep(args.pace).await;
                }
            }
            println!(
                "sent tensor {} ({} bytes) as {} datagrams",
                args.tensor_id,
                payload.len(),
                datagrams.len()
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("send") => send(&parse_send(&args[1..])?).await,
        Some("help") | Some("--help") | Some("-h") | None => {
            usage();
            Ok(())
        }
        Some(other) => {
            eprintln!("unknown command: {}", other);
            usage();
            std::process::exit(1);
        }
    }
}
