//! Playback sink interface
//!
//! A sink accepts filled buffers, plays them asynchronously in submission
//! order and reports progress through a monotonically increasing completion
//! counter. The flow controller only ever polls that counter; it never
//! blocks on the engine itself.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::buffer::{AudioBuffer, BufferRecycler};
use crate::error::AudioError;
use crate::protocol::PcmFormat;

/// Asynchronous audio engine as seen by the flow controller
///
/// Implementations must play submissions FIFO, must hand each buffer back
/// through the recycler before counting it complete, and must not read a
/// buffer after counting it complete.
pub trait PlaybackSink {
    /// Configure the output format and start the engine
    fn open(&mut self, format: &PcmFormat, recycler: BufferRecycler) -> Result<(), AudioError>;

    /// Make the buffer contents visible to the engine before submission
    ///
    /// Engines reading from write-combined or cached memory need a cache
    /// flush here. Engines reading coherent memory still implement this,
    /// with a memory fence.
    fn flush(&mut self, buffer: &AudioBuffer);

    /// Queue a filled buffer for playback
    ///
    /// A refused buffer is handed back so it can return to its pool.
    fn submit(&mut self, buffer: AudioBuffer) -> Result<(), Rejected>;

    /// Submissions fully played since `open`; non-blocking
    fn completed_count(&self) -> u64;

    /// Times the engine ran dry and played silence
    fn underrun_count(&self) -> u64 {
        0
    }

    /// Stop the engine and release its resources
    fn close(&mut self);
}

/// Submission refused by a sink, with the buffer it was given
#[derive(Debug)]
pub struct Rejected {
    pub error: AudioError,
    pub buffer: AudioBuffer,
}

impl Rejected {
    pub fn new(error: AudioError, buffer: AudioBuffer) -> Self {
        Self { error, buffer }
    }
}

struct MemoryState {
    recycler: Option<BufferRecycler>,
    format: Option<PcmFormat>,
    queue: VecDeque<AudioBuffer>,
    played: Vec<u8>,
    played_sequences: Vec<u64>,
    flushes: u64,
    submitted: u64,
    open: bool,
    closed: bool,
}

/// In-memory sink that completes submissions only when told to
///
/// Playback is recorded byte for byte, so callers can check exactly what
/// reached the "device". Completion is driven through a [`SinkHandle`],
/// which may live on another thread.
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
    completed: Arc<AtomicU64>,
    auto_complete: bool,
}

impl MemorySink {
    /// Sink that holds every submission until [`SinkHandle::complete`]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                recycler: None,
                format: None,
                queue: VecDeque::new(),
                played: Vec::new(),
                played_sequences: Vec::new(),
                flushes: 0,
                submitted: 0,
                open: false,
                closed: false,
            })),
            completed: Arc::new(AtomicU64::new(0)),
            auto_complete: false,
        }
    }

    /// Sink that finishes each submission as soon as it is queued
    pub fn auto_complete() -> Self {
        Self {
            auto_complete: true,
            ..Self::new()
        }
    }

    /// Get a handle for driving and inspecting this sink
    pub fn handle(&self) -> SinkHandle {
        SinkHandle {
            state: self.state.clone(),
            completed: self.completed.clone(),
        }
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackSink for MemorySink {
    fn open(&mut self, format: &PcmFormat, recycler: BufferRecycler) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        state.format = Some(*format);
        state.recycler = Some(recycler);
        state.open = true;
        Ok(())
    }

    fn flush(&mut self, _buffer: &AudioBuffer) {
        self.state.lock().flushes += 1;
    }

    fn submit(&mut self, buffer: AudioBuffer) -> Result<(), Rejected> {
        {
            let mut state = self.state.lock();
            if !state.open || state.closed {
                return Err(Rejected::new(AudioError::NotOpen, buffer));
            }
            state.submitted += 1;
            state.queue.push_back(buffer);
        }
        if self.auto_complete {
            self.handle().complete(1);
        }
        Ok(())
    }

    fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Queued submissions stay playable through the handle; only the
    /// return path to the pool is cut
    fn close(&mut self) {
        let mut state = self.state.lock();
        state.recycler = None;
        state.closed = true;
    }
}

/// Cloneable control handle for a [`MemorySink`]
#[derive(Clone)]
pub struct SinkHandle {
    state: Arc<Mutex<MemoryState>>,
    completed: Arc<AtomicU64>,
}

impl SinkHandle {
    /// Finish up to `n` of the oldest in-flight submissions, in order
    /// Returns how many were finished
    pub fn complete(&self, n: usize) -> usize {
        let mut state = self.state.lock();
        let mut finished = 0;

        while finished < n {
            let Some(buffer) = state.queue.pop_front() else {
                break;
            };
            state.played.extend_from_slice(buffer.as_bytes());
            state.played_sequences.push(buffer.sequence());
            if let Some(recycler) = &state.recycler {
                recycler.recycle(buffer);
            }
            // Buffer is back with the pool before the count moves
            self.completed.fetch_add(1, Ordering::Release);
            finished += 1;
        }

        finished
    }

    /// Finish everything in flight
    pub fn complete_all(&self) -> usize {
        self.complete(usize::MAX)
    }

    /// Submissions queued but not yet finished
    pub fn in_flight(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Total submissions accepted
    pub fn submitted(&self) -> u64 {
        self.state.lock().submitted
    }

    /// Total submissions finished
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Bytes played so far, in playback order
    pub fn played_bytes(&self) -> Vec<u8> {
        self.state.lock().played.clone()
    }

    /// Sequence numbers of finished submissions, in completion order
    pub fn played_sequences(&self) -> Vec<u64> {
        self.state.lock().played_sequences.clone()
    }

    /// Number of flush calls seen
    pub fn flush_count(&self) -> u64 {
        self.state.lock().flushes
    }

    /// Format passed to `open`
    pub fn format(&self) -> Option<PcmFormat> {
        self.state.lock().format
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::BufferPool;

    fn filled(pool: &mut BufferPool, seq: u64, completed: u64, byte: u8) -> AudioBuffer {
        let mut buffer = pool.acquire_slot(seq, completed).unwrap();
        buffer.data_mut().fill(byte);
        let len = buffer.capacity();
        buffer.set_filled(len);
        buffer.set_sequence(seq);
        buffer
    }

    #[test]
    fn test_submit_requires_open() {
        let mut pool = BufferPool::new(2, 4, 4).unwrap();
        let mut sink = MemorySink::new();
        let buffer = filled(&mut pool, 0, 0, 1);
        let rejected = sink.submit(buffer).unwrap_err();
        assert!(matches!(rejected.error, AudioError::NotOpen));
        assert_eq!(rejected.buffer.slot(), 0);
    }

    #[test]
    fn test_completion_is_fifo() {
        let mut pool = BufferPool::new(3, 4, 4).unwrap();
        let mut sink = MemorySink::new();
        let handle = sink.handle();
        sink.open(&PcmFormat::default(), pool.recycler()).unwrap();

        for seq in 0..3 {
            let buffer = filled(&mut pool, seq, 0, seq as u8 + 1);
            sink.submit(buffer).unwrap();
        }
        assert_eq!(sink.completed_count(), 0);

        assert_eq!(handle.complete(2), 2);
        assert_eq!(sink.completed_count(), 2);
        assert_eq!(handle.played_sequences(), vec![0, 1]);
        assert_eq!(handle.played_bytes(), vec![1, 1, 1, 1, 2, 2, 2, 2]);

        // Completed buffers went home
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_auto_complete() {
        let mut pool = BufferPool::new(1, 4, 4).unwrap();
        let mut sink = MemorySink::auto_complete();
        sink.open(&PcmFormat::default(), pool.recycler()).unwrap();

        for seq in 0..5 {
            let buffer = filled(&mut pool, seq, sink.completed_count(), 7);
            sink.submit(buffer).unwrap();
        }
        assert_eq!(sink.completed_count(), 5);
        assert_eq!(sink.handle().played_bytes().len(), 20);
    }

    #[test]
    fn test_close_rejects_further_submissions() {
        let mut pool = BufferPool::new(2, 4, 4).unwrap();
        let mut sink = MemorySink::new();
        let handle = sink.handle();
        sink.open(&PcmFormat::default(), pool.recycler()).unwrap();
        sink.close();

        assert!(handle.is_closed());
        let buffer = filled(&mut pool, 0, 0, 1);
        let rejected = sink.submit(buffer).unwrap_err();

        // The refused buffer can go straight back to its slot
        pool.release(rejected.buffer);
        assert_eq!(pool.available(), 2);
    }
}
