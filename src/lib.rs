//! # PCM Relay
//!
//! Low-latency relay of a raw PCM byte stream from a TCP connection into an
//! audio output device.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │               SENDER                 │
//! │  ┌─────────────┐    ┌─────────────┐  │
//! │  │ Input device│ or │   stdin     │  │
//! │  │  (capture)  │    │ (s16le pipe)│  │
//! │  └──────┬──────┘    └──────┬──────┘  │
//! │         └────────┬─────────┘         │
//! │                  ▼                   │
//! │      ┌───────────────────────┐       │
//! │      │ PcmSender: whole      │       │
//! │      │ frame_bytes chunks    │       │
//! │      └───────────┬───────────┘       │
//! └──────────────────┼───────────────────┘
//!                    │ TCP, no headers, chunks back to back
//!                    ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              RECEIVER                                 │
//! │  ┌──────────────┐   ┌──────────────────────────┐   ┌──────────────┐  │
//! │  │ FrameSource  │──▶│ BufferPool               │──▶│ PlaybackSink │  │
//! │  │ (read chunk) │   │ slot = seq % N           │   │ (CpalSink)   │  │
//! │  └──────────────┘   │ [0][1][2] ... [N-1]      │   └──────┬───────┘  │
//! │         ▲           └────────────▲─────────────┘          │          │
//! │         │                        │ BufferRecycler          │          │
//! │         │                        └─────────────────────────┘          │
//! │  ┌──────┴───────────────────────────────────────────────────────┐    │
//! │  │ FlowController: WAIT_SLOT → FILL → SUBMIT, in flight ≤ N      │    │
//! │  └──────────────────────────────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod relay;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default TCP port for the PCM stream
    pub const DEFAULT_PORT: u16 = 9999;

    /// Default output sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 22050;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Default bytes per network chunk (1024 stereo 16-bit frames)
    pub const DEFAULT_FRAME_BYTES: usize = 4096;

    /// Default number of buffers in the pool
    pub const DEFAULT_POOL_BUFFERS: usize = 6;

    /// Default client socket receive buffer size
    pub const DEFAULT_RECV_BUFFER_BYTES: usize = 64 * 1024;

    /// Default sleep between slot checks
    pub const DEFAULT_POLL_INTERVAL_US: u64 = 1000;
}
