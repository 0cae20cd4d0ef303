//! Network subsystem for the TCP PCM stream

pub mod listener;
pub mod sender;
pub mod source;

pub use listener::{AsyncStreamListener, StreamListener};
pub use sender::PcmSender;
pub use source::{FrameRead, FrameSource};
