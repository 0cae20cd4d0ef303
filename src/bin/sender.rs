//! PCM Sender Application
//!
//! Streams raw S16LE audio to a receiver over TCP, either piped in on stdin
//! or captured from an input device.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use std::io::{ErrorKind, Read};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pcm_relay::{
    audio::{device::list_devices, AudioCapture},
    config::AppConfig,
    constants::DEFAULT_PORT,
    network::{sender::SenderStats, PcmSender},
    protocol::PcmFormat,
};

/// Command-line arguments for the sender
#[derive(Parser, Debug)]
#[command(name = "sender")]
#[command(about = "Stream raw PCM audio to a receiver over TCP")]
#[command(version)]
struct Args {
    /// Receiver address
    #[arg(default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))]
    target: SocketAddr,

    /// Read S16LE audio from stdin instead of an input device
    #[arg(long)]
    stdin: bool,

    /// Input device name
    #[arg(short, long)]
    device: Option<String>,

    /// Config file (defaults to the platform config dir)
    #[arg(short, long, env = "PCM_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Bytes per network chunk
    #[arg(long)]
    frame_bytes: Option<usize>,

    /// Capture sample rate
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Capture channel count
    #[arg(long)]
    channels: Option<u16>,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(device) = &self.device {
            config.audio.device = Some(device.clone());
        }
        if let Some(frame_bytes) = self.frame_bytes {
            config.pool.frame_bytes = frame_bytes;
        }
        if let Some(rate) = self.sample_rate {
            config.audio.sample_rate = rate;
        }
        if let Some(channels) = self.channels {
            config.audio.channels = channels;
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
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    if args.list_devices {
        print_input_devices();
        return Ok(());
    }

    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let format = config.audio.format();
    let frame_bytes = config.pool.frame_bytes;

    tracing::info!("TCP audio sender");
    tracing::info!("Target receiver: {}", args.target);
    tracing::info!(
        "Format: {} Hz, {} channels, {:?}; {} byte chunks ({:.1} ms)",
        format.sample_rate,
        format.channels,
        format.encoding,
        frame_bytes,
        format.duration_us(frame_bytes) as f64 / 1000.0
    );

    let sender = PcmSender::connect(args.target, frame_bytes).context("Failed to connect to receiver")?;

    let stop = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = oneshot::channel();

    // Plain thread: a blocking stdin read cannot be cancelled, and the
    // process must still be able to exit on Ctrl+C
    {
        let stop = stop.clone();
        let device = config.audio.device.clone();
        let from_stdin = args.stdin;
        thread::Builder::new()
            .name("pump".to_string())
            .spawn(move || {
                let result = if from_stdin {
                    pump_stdin(sender, frame_bytes, &stop)
                } else {
                    pump_capture(sender, device.as_deref(), format, &stop)
                };
                let _ = done_tx.send(result);
            })
            .context("Failed to start sender thread")?;
    }

    tracing::info!("Streaming - press Ctrl+C to stop");

    tokio::select! {
        finished = done_rx => {
            let stats = finished.context("Sender thread exited unexpectedly")??;
            log_stats(&stats);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Stopping...");
            stop.store(true, Ordering::Release);
        }
    }

    Ok(())
}

fn pump_stdin(mut sender: PcmSender<std::net::TcpStream>, frame_bytes: usize, stop: &AtomicBool) -> Result<SenderStats> {
    let mut stdin = std::io::stdin().lock();
    let mut chunk = vec![0u8; frame_bytes];

    while !stop.load(Ordering::Acquire) {
        let n = match stdin.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("Failed to read stdin"),
        };
        sender.push(&chunk[..n])?;
    }

    tracing::info!("Input ended");
    Ok(sender.finish()?)
}

fn pump_capture(
    mut sender: PcmSender<std::net::TcpStream>,
    device: Option<&str>,
    format: PcmFormat,
    stop: &AtomicBool,
) -> Result<SenderStats> {
    let mut capture = AudioCapture::new(device, format);
    let chunks = capture.start(64).context("Failed to start audio capture")?;

    while !stop.load(Ordering::Acquire) {
        match chunks.recv_timeout(Duration::from_millis(100)) {
            Ok(chunk) => {
                sender.push(&chunk)?;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    capture.stop();
    if capture.dropped_chunks() > 0 {
        tracing::warn!("Dropped {} captured chunks", capture.dropped_chunks());
    }
    Ok(sender.finish()?)
}

fn log_stats(stats: &SenderStats) {
    tracing::info!(
        "Sent {} chunks, {:.1} KB ({} trailing bytes not sent)",
        stats.frames_sent,
        stats.bytes_sent as f64 / 1024.0,
        stats.pending_bytes
    );
}

fn print_input_devices() {
    println!("\n=== Available Input Devices ===");
    for device in list_devices().iter().filter(|d| d.is_input) {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}
