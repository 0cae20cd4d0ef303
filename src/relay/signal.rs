//! Stop signal and slot-wait strategy

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Poll-style stop request, checked once per controller iteration
pub trait StopSignal {
    fn should_stop(&self) -> bool;
}

impl StopSignal for AtomicBool {
    fn should_stop(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

impl<T: StopSignal + ?Sized> StopSignal for Arc<T> {
    fn should_stop(&self) -> bool {
        (**self).should_stop()
    }
}

impl<F: Fn() -> bool> StopSignal for F {
    fn should_stop(&self) -> bool {
        self()
    }
}

/// How the controller waits for a slot to free up
///
/// The sink exposes no completion notification, so waiting is a bounded
/// poll of its completion counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Sleep between checks
    Sleep(Duration),
    /// Re-check immediately
    Spin,
}

impl WaitStrategy {
    /// Sleep for non-zero intervals, spin for zero
    pub fn from_interval(interval: Duration) -> Self {
        if interval.is_zero() {
            WaitStrategy::Spin
        } else {
            WaitStrategy::Sleep(interval)
        }
    }

    /// Pause once before the next check
    pub fn wait(&self) {
        match self {
            WaitStrategy::Sleep(interval) => thread::sleep(*interval),
            WaitStrategy::Spin => std::hint::spin_loop(),
        }
    }
}

impl Default for WaitStrategy {
    fn default() -> Self {
        WaitStrategy::Sleep(Duration::from_micros(crate::constants::DEFAULT_POLL_INTERVAL_US))
    }
}
