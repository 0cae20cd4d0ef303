//! PCM Receiver Application
//!
//! Accepts a TCP client and plays its raw PCM stream on an output device.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::{Shutdown, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pcm_relay::{
    audio::{device::list_devices, BufferPool, CpalSink},
    config::{AppConfig, ReadStrategy},
    network::{FrameSource, StreamListener},
    relay::{FlowController, RelaySummary, StopReason, WaitStrategy},
};

/// Command-line arguments for the receiver
#[derive(Parser, Debug)]
#[command(name = "receiver")]
#[command(about = "Play a raw PCM stream received over TCP")]
#[command(version)]
struct Args {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long, env = "PCM_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to listen on
    #[arg(long)]
    bind: Option<String>,

    /// Output device name
    #[arg(short, long)]
    device: Option<String>,

    /// Number of buffers in the pool
    #[arg(long)]
    buffers: Option<usize>,

    /// Bytes per network chunk
    #[arg(long)]
    frame_bytes: Option<usize>,

    /// Microseconds between slot checks (0 = spin)
    #[arg(long)]
    poll_interval_us: Option<u64>,

    /// Receive chunks with a read loop instead of a single read-exact call
    #[arg(long)]
    accumulate: bool,

    /// Go back to listening after a client disconnects
    #[arg(long)]
    keep_listening: bool,

    /// List audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(bind) = &self.bind {
            config.network.bind_address = bind.clone();
        }
        if let Some(device) = &self.device {
            config.audio.device = Some(device.clone());
        }
        if let Some(buffers) = self.buffers {
            config.pool.buffers = buffers;
        }
        if let Some(frame_bytes) = self.frame_bytes {
            config.pool.frame_bytes = frame_bytes;
        }
        if let Some(interval) = self.poll_interval_us {
            config.pool.poll_interval_us = interval;
        }
        if self.accumulate {
            config.network.read_strategy = ReadStrategy::Accumulate;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.list_devices {
        print_output_devices();
        return Ok(());
    }

    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    tracing::info!("TCP audio receiver");
    tracing::info!(
        "Format: {} Hz, {} channels, {:?}; {} buffers of {} bytes",
        config.audio.sample_rate,
        config.audio.channels,
        config.audio.encoding,
        config.pool.buffers,
        config.pool.frame_bytes
    );

    let listener = StreamListener::bind(&config.network)
        .and_then(StreamListener::into_async)
        .context("Failed to open listening socket")?;

    loop {
        tracing::info!("Waiting for client connection...");

        let stream = tokio::select! {
            accepted = listener.accept() => {
                let (stream, _peer) = accepted.context("Failed to accept client")?;
                stream
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted while waiting for a client");
                return Ok(());
            }
        };

        let (summary, interrupted) = relay_client(stream, config.clone()).await?;
        tracing::info!(
            "Stream finished ({}): {} chunks, {:.1} KB",
            summary.stop_reason,
            summary.frames_submitted,
            summary.bytes_received as f64 / 1024.0
        );

        if !listen_again(&summary, interrupted, args.keep_listening) {
            break;
        }
    }

    Ok(())
}

/// Whether to accept another client after a stream finished
fn listen_again(summary: &RelaySummary, interrupted: bool, keep_listening: bool) -> bool {
    keep_listening && !interrupted && summary.stop_reason != StopReason::StopRequested
}

/// Run one client's stream to completion, stopping early on Ctrl+C
/// Also returns whether Ctrl+C was pressed
async fn relay_client(stream: TcpStream, config: AppConfig) -> Result<(RelaySummary, bool)> {
    let stop = Arc::new(AtomicBool::new(false));
    let shutdown_handle = stream.try_clone().context("Failed to clone client socket")?;

    let mut relay = {
        let stop = stop.clone();
        tokio::task::spawn_blocking(move || run_relay(stream, &config, stop))
    };

    let summary = tokio::select! {
        finished = &mut relay => finished.context("Relay thread panicked")??,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Stopping...");
            stop.store(true, Ordering::Release);
            // Unblock a pending read; the controller sees end of stream
            if let Err(e) = shutdown_handle.shutdown(Shutdown::Both) {
                tracing::warn!("Failed to shut down client socket, waiting for the next read: {}", e);
            }
            relay.await.context("Relay thread panicked")??
        }
    };

    Ok((summary, stop.load(Ordering::Acquire)))
}

/// Blocking part: allocate, open the device and run the flow controller
fn run_relay(stream: TcpStream, config: &AppConfig, stop: Arc<AtomicBool>) -> Result<RelaySummary> {
    let format = config.audio.format();

    let pool = BufferPool::new(config.pool.buffers, config.pool.frame_bytes, format.bytes_per_frame())
        .context("Failed to allocate audio buffers")?;
    let sink = CpalSink::new(&config.audio, config.pool.buffers, config.pool.poll_interval());
    let source = FrameSource::new(stream, config.network.read_strategy);
    let wait = WaitStrategy::from_interval(config.pool.poll_interval());

    let controller = FlowController::start(pool, source, sink, &format, stop, wait)
        .context("Failed to open audio output")?;

    Ok(controller.run())
}

fn print_output_devices() {
    println!("\n=== Available Output Devices ===");
    for device in list_devices().iter().filter(|d| d.is_output) {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcm_relay::relay::RelayStats;

    fn finished(stop_reason: StopReason) -> RelaySummary {
        RelaySummary {
            frames_submitted: 3,
            bytes_received: 3 * 4096,
            stop_reason,
            stats: RelayStats::default(),
        }
    }

    #[test]
    fn test_client_disconnect_keeps_listening() {
        assert!(listen_again(&finished(StopReason::StreamEnded), false, true));
        assert!(!listen_again(&finished(StopReason::StreamEnded), false, false));
    }

    #[test]
    fn test_interrupt_always_exits() {
        // Ctrl+C while blocked in a read ends the stream through the socket
        // shutdown, so the reason alone may say the peer closed
        assert!(!listen_again(&finished(StopReason::StreamEnded), true, true));
        assert!(!listen_again(&finished(StopReason::ReadFailed("reset".into())), true, true));
        assert!(!listen_again(&finished(StopReason::StopRequested), false, true));
    }
}
