//! Playback sink backed by a cpal output stream
//!
//! Submitted buffers wait in a bounded lock-free queue. The output callback
//! drains them sample by sample; once the last sample of a buffer has been
//! copied out, the buffer goes back to the pool and the completion counter
//! advances. When the queue runs dry the callback plays silence and counts
//! an underrun.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::buffer::{AudioBuffer, BufferRecycler};
use crate::audio::device::{find_device, Direction};
use crate::audio::sink::{PlaybackSink, Rejected};
use crate::config::AudioConfig;
use crate::error::AudioError;
use crate::protocol::{s16_to_f32, PcmFormat};

/// Extra time allowed for queued audio to finish on close
const DRAIN_MARGIN: Duration = Duration::from_millis(250);

/// State owned by the output callback
struct Player {
    queue: Arc<ArrayQueue<AudioBuffer>>,
    recycler: BufferRecycler,
    completed: Arc<AtomicU64>,
    underruns: Arc<AtomicU64>,
    current: Option<AudioBuffer>,
    offset: usize,
    started: bool,
}

impl Player {
    /// Next interleaved sample, or `None` when nothing is queued
    fn next_sample(&mut self) -> Option<i16> {
        loop {
            if self.current.is_none() {
                self.current = Some(self.queue.pop()?);
                self.offset = 0;
                self.started = true;
            }

            let bytes = self.current.as_ref()?.as_bytes();
            if self.offset + 2 <= bytes.len() {
                let sample = i16::from_le_bytes([bytes[self.offset], bytes[self.offset + 1]]);
                self.offset += 2;
                if self.offset + 2 > bytes.len() {
                    self.finish_current();
                }
                return Some(sample);
            }

            self.finish_current();
        }
    }

    fn finish_current(&mut self) {
        if let Some(buffer) = self.current.take() {
            self.recycler.recycle(buffer);
            self.completed.fetch_add(1, Ordering::Release);
        }
    }

    fn fill<T>(&mut self, data: &mut [T], convert: impl Fn(i16) -> T, silence: T)
    where
        T: Copy,
    {
        let mut starved = false;
        for out in data.iter_mut() {
            match self.next_sample() {
                Some(sample) => *out = convert(sample),
                None => {
                    *out = silence;
                    starved = true;
                }
            }
        }
        if starved && self.started {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Hardware playback sink on a cpal output device
pub struct CpalSink {
    /// Output device name (None = host default)
    device_name: Option<String>,

    /// Fixed hardware buffer size in frames (None = device default)
    hardware_buffer_frames: Option<u32>,

    /// Maximum buffers queued at once (pool size)
    queue_capacity: usize,

    /// Live stream, present between open and close
    stream: Option<cpal::Stream>,

    queue: Option<Arc<ArrayQueue<AudioBuffer>>>,
    completed: Arc<AtomicU64>,
    underruns: Arc<AtomicU64>,
    stream_errors: Arc<AtomicU64>,

    format: Option<PcmFormat>,
    submitted: u64,
    chunk_bytes: usize,
    poll_interval: Duration,
}

impl CpalSink {
    /// Create a sink for the configured device; nothing is opened yet
    pub fn new(config: &AudioConfig, queue_capacity: usize, poll_interval: Duration) -> Self {
        Self {
            device_name: config.device.clone(),
            hardware_buffer_frames: config.hardware_buffer_frames,
            queue_capacity: queue_capacity.max(1),
            stream: None,
            queue: None,
            completed: Arc::new(AtomicU64::new(0)),
            underruns: Arc::new(AtomicU64::new(0)),
            stream_errors: Arc::new(AtomicU64::new(0)),
            format: None,
            submitted: 0,
            chunk_bytes: 0,
            poll_interval,
        }
    }

    /// Errors reported by the audio backend since open
    pub fn stream_error_count(&self) -> u64 {
        self.stream_errors.load(Ordering::Relaxed)
    }

    /// Wait for queued audio to finish, bounded by its own duration
    fn drain(&self) {
        let Some(format) = self.format else { return };
        let pending = self.submitted.saturating_sub(self.completed_count());
        if pending == 0 {
            return;
        }

        let budget = Duration::from_micros(format.duration_us(self.chunk_bytes) * pending) + DRAIN_MARGIN;
        let deadline = Instant::now() + budget;
        tracing::debug!("Draining {} queued buffers (up to {:?})", pending, budget);

        while self.completed_count() < self.submitted && Instant::now() < deadline {
            thread::sleep(self.poll_interval.max(Duration::from_millis(1)));
        }
    }
}

impl PlaybackSink for CpalSink {
    fn open(&mut self, format: &PcmFormat, recycler: BufferRecycler) -> Result<(), AudioError> {
        let device = find_device(self.device_name.as_deref(), Direction::Output)?;
        let sample_format = device.sample_format_for(format)?;

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: match self.hardware_buffer_frames {
                Some(frames) => cpal::BufferSize::Fixed(frames),
                None => cpal::BufferSize::Default,
            },
        };

        let queue = Arc::new(ArrayQueue::new(self.queue_capacity));
        self.completed.store(0, Ordering::SeqCst);
        self.underruns.store(0, Ordering::SeqCst);
        self.submitted = 0;

        let mut player = Player {
            queue: queue.clone(),
            recycler,
            completed: self.completed.clone(),
            underruns: self.underruns.clone(),
            current: None,
            offset: 0,
            started: false,
        };

        let stream_errors = self.stream_errors.clone();
        let on_error = move |err: cpal::StreamError| {
            tracing::error!("Audio stream error: {}", err);
            stream_errors.fetch_add(1, Ordering::Relaxed);
        };

        let stream = match sample_format {
            SampleFormat::I16 => device.inner().build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    player.fill(data, |s| s, 0)
                },
                on_error,
                None,
            ),
            SampleFormat::F32 => device.inner().build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    player.fill(data, s16_to_f32, 0.0)
                },
                on_error,
                None,
            ),
            other => {
                return Err(AudioError::UnsupportedFormat(format!("{:?}", other)));
            }
        }
        .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamBuild(format!("Failed to start stream: {}", e)))?;

        tracing::info!(
            "Audio output open on {}: {} Hz, {} channels, device samples {:?}",
            device.name,
            format.sample_rate,
            format.channels,
            sample_format
        );

        self.stream = Some(stream);
        self.queue = Some(queue);
        self.format = Some(*format);
        Ok(())
    }

    fn flush(&mut self, _buffer: &AudioBuffer) {
        // cpal reads from ordinary coherent memory; publishing the writes
        // before the queue hand-off is all that is needed
        fence(Ordering::Release);
    }

    fn submit(&mut self, buffer: AudioBuffer) -> Result<(), Rejected> {
        let Some(queue) = self.queue.as_ref() else {
            return Err(Rejected::new(AudioError::NotOpen, buffer));
        };
        let bytes = buffer.len();
        queue
            .push(buffer)
            .map_err(|buffer| Rejected::new(AudioError::QueueFull, buffer))?;
        self.submitted += 1;
        self.chunk_bytes = bytes;
        Ok(())
    }

    fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    fn underrun_count(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    fn close(&mut self) {
        if self.stream.is_none() {
            return;
        }

        self.drain();

        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::warn!("Failed to pause output stream: {}", e);
            }
        }

        // Buffers still queued are freed with the queue
        self.queue = None;

        tracing::info!(
            "Audio output closed: {} submitted, {} completed, {} underruns, {} stream errors",
            self.submitted,
            self.completed_count(),
            self.underrun_count(),
            self.stream_error_count()
        );
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::BufferPool;

    fn player_with(pool: &mut BufferPool, chunks: &[&[u8]]) -> Player {
        let queue = Arc::new(ArrayQueue::new(pool.slot_count()));
        for (seq, chunk) in chunks.iter().enumerate() {
            let mut buffer = pool.acquire_slot(seq as u64, 0).unwrap();
            buffer.data_mut()[..chunk.len()].copy_from_slice(chunk);
            buffer.set_filled(chunk.len());
            queue.push(buffer).unwrap();
        }
        Player {
            queue,
            recycler: pool.recycler(),
            completed: Arc::new(AtomicU64::new(0)),
            underruns: Arc::new(AtomicU64::new(0)),
            current: None,
            offset: 0,
            started: false,
        }
    }

    #[test]
    fn test_player_decodes_s16le_in_order() {
        let mut pool = BufferPool::new(2, 4, 4).unwrap();
        let mut player = player_with(&mut pool, &[&[0x01, 0x00, 0xff, 0xff], &[0x00, 0x80, 0xff, 0x7f]]);

        let mut out = [0i16; 4];
        player.fill(&mut out, |s| s, 0);

        assert_eq!(out, [1, -1, i16::MIN, i16::MAX]);
        assert_eq!(player.completed.load(Ordering::Acquire), 2);
        assert_eq!(player.underruns.load(Ordering::Relaxed), 0);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_completion_spans_callbacks() {
        let mut pool = BufferPool::new(1, 8, 4).unwrap();
        let mut player = player_with(&mut pool, &[&[1, 0, 2, 0, 3, 0, 4, 0]]);

        let mut out = [0i16; 2];
        player.fill(&mut out, |s| s, 0);
        assert_eq!(out, [1, 2]);
        assert_eq!(player.completed.load(Ordering::Acquire), 0);

        player.fill(&mut out, |s| s, 0);
        assert_eq!(out, [3, 4]);
        assert_eq!(player.completed.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_starvation_plays_silence() {
        let mut pool = BufferPool::new(1, 4, 4).unwrap();
        let mut player = player_with(&mut pool, &[]);

        // Silence before the first buffer is not an underrun
        let mut out = [7.0f32; 4];
        player.fill(&mut out, s16_to_f32, 0.0);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(player.underruns.load(Ordering::Relaxed), 0);

        let mut buffer = pool.acquire_slot(0, 0).unwrap();
        buffer.data_mut().copy_from_slice(&[0x00, 0x40, 0x00, 0xc0]);
        buffer.set_filled(4);
        player.queue.push(buffer).unwrap();

        player.fill(&mut out, s16_to_f32, 0.0);
        assert_eq!(out, [0.5, -0.5, 0.0, 0.0]);
        assert_eq!(player.underruns.load(Ordering::Relaxed), 1);
    }
}
