//! Wire format and shared descriptive types
//!
//! The stream carries no headers: sender and receiver agree on the PCM
//! format out of band, and frames of `frame_bytes` bytes follow each other
//! back to back.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE};

/// Sample encoding of the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SampleEncoding {
    /// Signed 16-bit little-endian, interleaved
    #[default]
    #[serde(rename = "s16le")]
    S16Le,
}

impl SampleEncoding {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleEncoding::S16Le => 2,
        }
    }
}

/// Float scale for 16-bit samples: `i16::MIN` maps to exactly -1.0
pub const S16_FULL_SCALE: f32 = 32768.0;

/// 16-bit sample as a float in [-1, 1)
pub fn s16_to_f32(sample: i16) -> f32 {
    sample as f32 / S16_FULL_SCALE
}

/// Float sample as 16-bit, clamped; +1.0 saturates to `i16::MAX`
pub fn f32_to_s16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * S16_FULL_SCALE) as i16
}

/// Fixed output format, set at stream start and never renegotiated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub encoding: SampleEncoding,
}

impl PcmFormat {
    pub fn new(sample_rate: u32, channels: u16, encoding: SampleEncoding) -> Self {
        Self {
            sample_rate,
            channels,
            encoding,
        }
    }

    /// Bytes in one multi-channel sample instant
    pub fn bytes_per_frame(&self) -> usize {
        self.encoding.bytes_per_sample() * self.channels as usize
    }

    /// Sample frames carried by a chunk of `bytes` bytes
    pub fn frames_in(&self, bytes: usize) -> usize {
        bytes / self.bytes_per_frame()
    }

    /// Playback duration of a chunk in microseconds
    pub fn duration_us(&self, bytes: usize) -> u64 {
        (self.frames_in(bytes) as u64 * 1_000_000) / self.sample_rate as u64
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, DEFAULT_CHANNELS, SampleEncoding::S16Le)
    }
}

/// Audio device description for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_conversions_share_one_scale() {
        for sample in [i16::MIN, -16384, -1, 0, 1, 12345, i16::MAX] {
            assert_eq!(f32_to_s16(s16_to_f32(sample)), sample);
        }
        assert_eq!(s16_to_f32(i16::MIN), -1.0);
        assert_eq!(f32_to_s16(0.5), 16384);
        assert_eq!(f32_to_s16(1.0), i16::MAX);
        assert_eq!(f32_to_s16(-2.0), i16::MIN);
    }

    #[test]
    fn test_default_format_geometry() {
        let format = PcmFormat::default();
        assert_eq!(format.bytes_per_frame(), 4);
        assert_eq!(format.frames_in(4096), 1024);
    }

    #[test]
    fn test_chunk_duration() {
        let format = PcmFormat::new(48000, 2, SampleEncoding::S16Le);
        // 480 frames at 48kHz = 10ms
        assert_eq!(format.duration_us(480 * 4), 10_000);
    }

    #[test]
    fn test_encoding_serde_name() {
        let format: PcmFormat =
            toml::from_str("sample_rate = 22050\nchannels = 1\nencoding = \"s16le\"").unwrap();
        assert_eq!(format.channels, 1);
        assert_eq!(format.bytes_per_frame(), 2);
    }
}
