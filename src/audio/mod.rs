//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;
pub mod sink;

pub use buffer::{AudioBuffer, BufferPool, BufferRecycler};
pub use capture::AudioCapture;
pub use device::{find_device, list_devices, AudioDevice, Direction};
pub use playback::CpalSink;
pub use sink::{MemorySink, PlaybackSink, Rejected, SinkHandle};
