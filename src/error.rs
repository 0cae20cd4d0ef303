//! Error types for the PCM relay
//!
//! End of stream is not an error: the frame source reports it as
//! [`crate::network::FrameRead::Ended`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("audio output: {0}")]
    Audio(#[from] AudioError),

    #[error("connection: {0}")]
    Network(#[from] NetworkError),

    #[error("buffer pool: {0}")]
    Pool(#[from] PoolError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures setting up or feeding an audio device
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("no audio device matching {0}")]
    DeviceNotFound(String),

    #[error("could not build audio stream: {0}")]
    StreamBuild(String),

    #[error("device cannot play {0}")]
    UnsupportedFormat(String),

    /// Every buffer is already queued; the in-flight bound was broken
    #[error("playback queue already holds every buffer")]
    QueueFull,

    #[error("sink is not open")]
    NotOpen,

    #[error("audio backend: {0}")]
    Backend(String),
}

/// Failures on the PCM connection
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("could not listen: {0}")]
    BindFailed(String),

    #[error("could not accept client: {0}")]
    AcceptFailed(String),

    #[error("could not reach receiver: {0}")]
    ConnectionFailed(String),

    #[error("write to receiver failed: {0}")]
    SendFailed(String),

    #[error("read from client failed: {0}")]
    ReceiveFailed(String),
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("could not allocate {count} buffers of {bytes} bytes")]
    Allocation { count: usize, bytes: usize },

    #[error("bad pool geometry: {0}")]
    InvalidGeometry(String),
}

pub type Result<T> = std::result::Result<T, Error>;
