//! Flow controller: network → pool slot → sink
//!
//! ```text
//!            ┌──────────────────────────────────────────┐
//!            ▼                                          │
//!      ┌───────────┐  slot free   ┌──────┐  full chunk  ┌────────┐
//!  ──▶ │ WAIT_SLOT │ ───────────▶ │ FILL │ ───────────▶ │ SUBMIT │
//!      └───────────┘              └──────┘              └────────┘
//!            │ stop                   │ ended / error        │ sink error
//!            ▼                        ▼                      ▼
//!      ┌──────────────────────────────────────────────────────────┐
//!      │                        STOPPING                          │
//!      └──────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//!                               STOPPED
//! ```
//!
//! The two blocking points, waiting for a slot and waiting for network
//! bytes, are visited one after the other and never nested. The in-flight
//! count `submitted - completed` never exceeds the pool size: the
//! controller waits rather than fill a slot whose buffer is still playing.

use std::io::Read;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::audio::buffer::{AudioBuffer, BufferPool};
use crate::audio::sink::{PlaybackSink, Rejected};
use crate::error::AudioError;
use crate::network::source::{FrameRead, FrameSource};
use crate::protocol::PcmFormat;
use crate::relay::signal::{StopSignal, WaitStrategy};
use crate::relay::stats::RelayStats;

/// Interval between periodic status reports
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    WaitSlot,
    Fill,
    Submit,
    Stopping,
    Stopped,
}

/// Why the relay stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The stop signal was raised
    StopRequested,
    /// The peer closed the connection
    StreamEnded,
    /// Reading from the connection failed
    ReadFailed(String),
    /// The sink refused a buffer
    SubmitFailed(String),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::StopRequested => write!(f, "stop requested"),
            StopReason::StreamEnded => write!(f, "connection closed"),
            StopReason::ReadFailed(e) => write!(f, "receive failed: {}", e),
            StopReason::SubmitFailed(e) => write!(f, "submit failed: {}", e),
        }
    }
}

/// Final result of a relay run
#[derive(Debug, Clone)]
pub struct RelaySummary {
    pub frames_submitted: u64,
    pub bytes_received: u64,
    pub stop_reason: StopReason,
    pub stats: RelayStats,
}

/// Single-threaded backpressure loop between a frame source and a sink
pub struct FlowController<R, S, St> {
    pool: BufferPool,
    source: FrameSource<R>,
    sink: S,
    stop: St,
    wait: WaitStrategy,

    state: RelayState,
    /// Buffer owned by the controller between WAIT_SLOT and SUBMIT
    current: Option<AudioBuffer>,
    /// Buffers handed to the sink since start; never reset
    submitted_seq: u64,
    stop_reason: Option<StopReason>,

    stats: RelayStats,
    last_report: Instant,
}

impl<R, S, St> FlowController<R, S, St>
where
    R: Read,
    S: PlaybackSink,
    St: StopSignal,
{
    /// Open the sink for `format` and prepare to stream
    ///
    /// Fails only if the sink cannot be opened; the pool is allocated by
    /// the caller before this point.
    pub fn start(
        pool: BufferPool,
        source: FrameSource<R>,
        mut sink: S,
        format: &PcmFormat,
        stop: St,
        wait: WaitStrategy,
    ) -> Result<Self, AudioError> {
        sink.open(format, pool.recycler())?;

        debug!(
            "Flow controller ready: {} slots of {} bytes ({} frames each), wait {:?}",
            pool.slot_count(),
            pool.frame_bytes(),
            format.frames_in(pool.frame_bytes()),
            wait
        );

        Ok(Self {
            pool,
            source,
            sink,
            stop,
            wait,
            state: RelayState::WaitSlot,
            current: None,
            submitted_seq: 0,
            stop_reason: None,
            stats: RelayStats::default(),
            last_report: Instant::now(),
        })
    }

    /// Run until stopped
    pub fn run(mut self) -> RelaySummary {
        info!("Receiving audio");
        while self.step() != RelayState::Stopped {}
        self.summary()
    }

    /// Perform one state transition and return the new state
    pub fn step(&mut self) -> RelayState {
        self.state = match self.state {
            RelayState::WaitSlot => self.wait_slot(),
            RelayState::Fill => self.fill(),
            RelayState::Submit => self.submit(),
            RelayState::Stopping => self.shutdown(),
            RelayState::Stopped => RelayState::Stopped,
        };
        self.check_in_flight();
        self.state
    }

    fn wait_slot(&mut self) -> RelayState {
        if self.stop.should_stop() {
            info!("Stop requested");
            return self.begin_stop(StopReason::StopRequested);
        }

        let completed = self.sink.completed_count();
        let in_flight = self.submitted_seq.saturating_sub(completed);
        self.stats.peak_in_flight = self.stats.peak_in_flight.max(in_flight);
        self.maybe_report(in_flight);

        if in_flight < self.pool.slot_count() as u64 {
            if let Some(buffer) = self.pool.acquire_slot(self.submitted_seq, completed) {
                self.current = Some(buffer);
                return RelayState::Fill;
            }
        }

        self.stats.slot_waits += 1;
        self.wait.wait();
        RelayState::WaitSlot
    }

    fn fill(&mut self) -> RelayState {
        let Some(mut buffer) = self.current.take() else {
            return RelayState::WaitSlot;
        };

        match self.source.read_frame(&mut buffer) {
            Ok(FrameRead::Complete(n)) => {
                self.stats.bytes_received += n as u64;
                self.current = Some(buffer);
                RelayState::Submit
            }
            Ok(FrameRead::Ended { partial }) => {
                self.pool.release(buffer);
                // Stopping shuts the socket down under a blocked read, so
                // an end of stream seen after the stop is the stop itself
                if self.stop.should_stop() {
                    info!("Stop requested during receive");
                    return self.begin_stop(StopReason::StopRequested);
                }
                info!(
                    "Connection closed after {} chunks ({} trailing bytes dropped)",
                    self.submitted_seq, partial
                );
                self.begin_stop(StopReason::StreamEnded)
            }
            Err(e) => {
                self.pool.release(buffer);
                if self.stop.should_stop() {
                    info!("Stop requested during receive ({})", e);
                    return self.begin_stop(StopReason::StopRequested);
                }
                warn!("Connection closed or receive failed: {}", e);
                self.begin_stop(StopReason::ReadFailed(e.to_string()))
            }
        }
    }

    fn submit(&mut self) -> RelayState {
        let Some(mut buffer) = self.current.take() else {
            return RelayState::WaitSlot;
        };

        if !buffer.is_complete() {
            let short = buffer.len();
            self.pool.release(buffer);
            return self.begin_stop(StopReason::ReadFailed(format!("short chunk of {} bytes", short)));
        }

        buffer.set_sequence(self.submitted_seq);
        self.sink.flush(&buffer);

        match self.sink.submit(buffer) {
            Ok(()) => {
                self.submitted_seq += 1;
                self.stats.frames_submitted += 1;
                RelayState::WaitSlot
            }
            Err(Rejected { error, buffer }) => {
                self.pool.release(buffer);
                warn!("Sink rejected chunk {}: {}", self.submitted_seq, error);
                self.begin_stop(StopReason::SubmitFailed(error.to_string()))
            }
        }
    }

    fn begin_stop(&mut self, reason: StopReason) -> RelayState {
        if self.stop_reason.is_none() {
            self.stop_reason = Some(reason);
        }
        RelayState::Stopping
    }

    fn shutdown(&mut self) -> RelayState {
        info!("Cleaning up");

        if let Some(buffer) = self.current.take() {
            self.pool.release(buffer);
        }

        self.stats.underruns = self.sink.underrun_count();
        self.sink.close();
        self.stats.buffers_freed = self.pool.release_all() as u64;
        self.source.close();

        debug!("Released {} buffers", self.stats.buffers_freed);
        info!(
            "Relay stopped ({}): {} chunks, {} bytes, {} slot waits, peak in flight {}, {} underruns",
            self.stop_reason.as_ref().unwrap_or(&StopReason::StopRequested),
            self.stats.frames_submitted,
            self.stats.bytes_received,
            self.stats.slot_waits,
            self.stats.peak_in_flight,
            self.stats.underruns
        );
        RelayState::Stopped
    }

    fn maybe_report(&mut self, in_flight: u64) {
        if self.last_report.elapsed() < REPORT_INTERVAL {
            return;
        }
        self.last_report = Instant::now();
        self.stats.underruns = self.sink.underrun_count();
        info!(
            "Relay stats: {} chunks, {:.1} KB received, {}/{} in flight, {:.1}% waiting, {} underruns",
            self.stats.frames_submitted,
            self.stats.bytes_received as f64 / 1024.0,
            in_flight,
            self.pool.slot_count(),
            self.stats.wait_ratio() * 100.0,
            self.stats.underruns
        );
    }

    fn check_in_flight(&self) {
        // Guard skips the counter load in release builds
        if cfg!(debug_assertions) && self.state != RelayState::Stopped {
            let completed = self.sink.completed_count();
            debug_assert!(completed <= self.submitted_seq);
            debug_assert!(self.submitted_seq - completed <= self.pool.slot_count() as u64);
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Buffers handed to the sink since start
    pub fn submitted_seq(&self) -> u64 {
        self.submitted_seq
    }

    /// Submissions not yet reported complete
    pub fn in_flight(&self) -> u64 {
        self.submitted_seq.saturating_sub(self.sink.completed_count())
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    pub fn source(&self) -> &FrameSource<R> {
        &self.source
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Snapshot of the run so far
    pub fn summary(&self) -> RelaySummary {
        RelaySummary {
            frames_submitted: self.stats.frames_submitted,
            bytes_received: self.stats.bytes_received,
            stop_reason: self.stop_reason.clone().unwrap_or(StopReason::StopRequested),
            stats: self.stats.clone(),
        }
    }
}
