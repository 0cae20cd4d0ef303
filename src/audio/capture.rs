//! Audio capture from an input device
//!
//! Feeds the sender: captured samples are converted to the wire encoding
//! (S16LE) on the audio thread and handed over as byte chunks through a
//! bounded channel.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::{find_device, Direction};
use crate::error::AudioError;
use crate::protocol::{f32_to_s16, PcmFormat};

/// Live capture from one input device
pub struct AudioCapture {
    /// Device name (None = host default)
    device_name: Option<String>,

    /// Requested capture format
    format: PcmFormat,

    /// Whether capture is running
    running: Arc<AtomicBool>,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Total bytes delivered to the channel
    bytes_captured: Arc<AtomicU64>,

    /// Chunks dropped because the consumer fell behind
    dropped_chunks: Arc<AtomicU64>,
}

impl AudioCapture {
    pub fn new(device_name: Option<&str>, format: PcmFormat) -> Self {
        Self {
            device_name: device_name.map(str::to_string),
            format,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            bytes_captured: Arc::new(AtomicU64::new(0)),
            dropped_chunks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start capturing; returns the channel the S16LE chunks arrive on
    ///
    /// The stream is built on a dedicated thread; setup failures are
    /// reported back before this returns.
    pub fn start(&mut self, channel_capacity: usize) -> Result<Receiver<Vec<u8>>, AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(AudioError::StreamBuild("capture already running".into()));
        }

        let (chunk_tx, chunk_rx) = bounded::<Vec<u8>>(channel_capacity.max(1));
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let device_name = self.device_name.clone();
        let format = self.format;
        let running = self.running.clone();
        let bytes_captured = self.bytes_captured.clone();
        let dropped_chunks = self.dropped_chunks.clone();

        self.bytes_captured.store(0, Ordering::SeqCst);
        self.dropped_chunks.store(0, Ordering::SeqCst);
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                let stream = match build_stream(device_name.as_deref(), &format, chunk_tx, bytes_captured, dropped_chunks) {
                    Ok(stream) => stream,
                    Err(e) => {
                        running.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    running.store(false, Ordering::SeqCst);
                    let _ = ready_tx.send(Err(AudioError::StreamBuild(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive while running
                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

        self.thread_handle = Some(handle);

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(chunk_rx),
            Ok(Err(e)) => {
                self.stop();
                Err(e)
            }
            Err(_) => {
                self.stop();
                Err(AudioError::StreamBuild("capture thread exited".into()))
            }
        }
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn bytes_captured(&self) -> u64 {
        self.bytes_captured.load(Ordering::Relaxed)
    }

    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks.load(Ordering::Relaxed)
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_stream(
    device_name: Option<&str>,
    format: &PcmFormat,
    chunk_tx: Sender<Vec<u8>>,
    bytes_captured: Arc<AtomicU64>,
    dropped_chunks: Arc<AtomicU64>,
) -> Result<cpal::Stream, AudioError> {
    let device = find_device(device_name, Direction::Input)?;
    let sample_format = device.sample_format_for(format)?;

    let config = StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    tracing::info!(
        "Capturing from {}: {} Hz, {} channels, device samples {:?}",
        device.name,
        format.sample_rate,
        format.channels,
        sample_format
    );

    let deliver = move |chunk: Vec<u8>| {
        let len = chunk.len() as u64;
        if chunk_tx.try_send(chunk).is_ok() {
            bytes_captured.fetch_add(len, Ordering::Relaxed);
        } else {
            dropped_chunks.fetch_add(1, Ordering::Relaxed);
        }
    };
    let on_error = |err: cpal::StreamError| tracing::error!("Capture stream error: {}", err);

    let stream = match sample_format {
        SampleFormat::I16 => device.inner().build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| deliver(i16_to_s16le(data)),
            on_error,
            None,
        ),
        SampleFormat::F32 => device.inner().build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| deliver(f32_to_s16le(data)),
            on_error,
            None,
        ),
        other => return Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    };

    stream.map_err(|e| AudioError::StreamBuild(e.to_string()))
}

/// Interleaved i16 samples as little-endian bytes
pub fn i16_to_s16le(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Interleaved f32 samples in [-1, 1] as little-endian i16 bytes
pub fn f32_to_s16le(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .map(|&s| f32_to_s16(s))
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i16_encoding() {
        assert_eq!(i16_to_s16le(&[1, -1, 256]), vec![0x01, 0x00, 0xff, 0xff, 0x00, 0x01]);
    }

    #[test]
    fn test_f32_encoding_clamps() {
        let bytes = f32_to_s16le(&[0.0, 1.0, -2.0]);
        assert_eq!(bytes.len(), 6);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 0);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), i16::MIN);
    }

    #[test]
    fn test_capture_setup() {
        // Only meaningful where an input device exists; CI machines usually
        // have none, in which case start must fail cleanly
        let mut capture = AudioCapture::new(None, PcmFormat::default());
        match capture.start(8) {
            Ok(_rx) => {
                assert!(capture.is_running());
                capture.stop();
                assert!(!capture.is_running());
            }
            Err(_) => assert!(!capture.is_running()),
        }
    }
}
