//! tensorlinkd: edge tensor receiver.
//!
//! Runs exactly one transport per process:
//!
//!   tensorlinkd stream   [--port N]
//!   tensorlinkd datagram [--port N]

use anyhow::{bail, Context, Result};

use tensorlink_core::config::TensorlinkConfig;
use tensorlink_services::{ChannelMeanBackend, InferenceHandoff, Labels, TensorSink};

mod listener;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Stream,
    Datagram,
}

#[derive(Debug, PartialEq, Eq)]
struct Args {
    transport: Transport,
    port: Option<u16>,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let transport = match args.first().map(String::as_str) {
        Some("stream") => Transport::Stream,
        Some("datagram") => Transport::Datagram,
        Some(other) => bail!("unknown transport '{other}' (expected stream or datagram)"),
        None => bail!("usage: tensorlinkd <stream|datagram> [--port N]"),
    };

    let mut port = None;
    let mut rest = args[1..].iter();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--port" => {
                let value = rest.next().context("--port needs a value")?;
                port = Some(value.parse().with_context(|| format!("invalid port: {value}"))?);
            }
            other => bail!("unexpected argument: {other}"),
        }
    }

    Ok(Args { transport, port })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&argv)?;

    // Load config
    if let Err(e) = TensorlinkConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = TensorlinkConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        TensorlinkConfig::default()
    });
    if let Some(port) = args.port {
        config.network.port = port;
    }

    // Model and labels failures are fatal at launch.
    let backend =
        ChannelMeanBackend::from_config(&config.model).context("failed to initialise model")?;
    let labels = match &config.labels.path {
        Some(path) => {
            let labels = Labels::load(path)?;
            tracing::info!(path = %path.display(), count = labels.len(), "labels loaded");
            Some(labels)
        }
        None => None,
    };
    let handoff = InferenceHandoff::new(backend, labels);
    tracing::info!(
        transport = ?args.transport,
        input_shape = ?config.model.input_shape,
        input_bytes = handoff.expected_input_byte_length(),
        "tensorlinkd starting"
    );

    let serve = async {
        match args.transport {
            Transport::Stream => listener::run_stream(&config, handoff).await,
            Transport::Datagram => listener::run_datagram(&config, handoff).await,
        }
    };

    tokio::select! {
        r = serve => r?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutdown signal received"),
    }

    tracing::info!("server shutdown");
    Ok(())
}
