//! Flow control between the network and the audio output

pub mod controller;
pub mod signal;
pub mod stats;

pub use controller::{FlowController, RelayState, RelaySummary, StopReason};
pub use signal::{StopSignal, WaitStrategy};
pub use stats::RelayStats;
