//! Audio device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, SupportedStreamConfigRange};

use crate::error::AudioError;
use crate::protocol::{AudioDeviceInfo, PcmFormat};

/// Sample rates probed when listing devices
const PROBE_RATES: [u32; 8] = [8000, 16000, 22050, 32000, 44100, 48000, 88200, 96000];

/// Direction a device is opened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Wrapper around cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub direction: Direction,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device, direction: Direction) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
            direction,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    /// Supported configurations in this device's direction
    pub fn supported_configs(&self) -> Result<Vec<SupportedStreamConfigRange>, AudioError> {
        let configs = match self.direction {
            Direction::Input => self.inner.supported_input_configs().map(|it| it.collect()),
            Direction::Output => self.inner.supported_output_configs().map(|it| it.collect()),
        };
        configs.map_err(|e| AudioError::Backend(e.to_string()))
    }

    /// Pick a native sample type able to carry `format` unchanged
    ///
    /// The relay never resamples or remixes, so the rate and channel count
    /// must be supported exactly. i16 is preferred, f32 accepted.
    pub fn sample_format_for(&self, format: &PcmFormat) -> Result<SampleFormat, AudioError> {
        let rate = cpal::SampleRate(format.sample_rate);
        let candidates: Vec<SampleFormat> = self
            .supported_configs()?
            .iter()
            .filter(|c| {
                c.channels() == format.channels
                    && c.min_sample_rate() <= rate
                    && rate <= c.max_sample_rate()
            })
            .map(|c| c.sample_format())
            .collect();

        [SampleFormat::I16, SampleFormat::F32]
            .into_iter()
            .find(|preferred| candidates.contains(preferred))
            .ok_or_else(|| {
                AudioError::UnsupportedFormat(format!(
                    "{} does not support {} Hz with {} channels as i16 or f32",
                    self.name, format.sample_rate, format.channels
                ))
            })
    }
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            let Ok(name) = device.name() else { continue };
            let (sample_rates, channels) = device_capabilities(&device, Direction::Input);
            devices.push(AudioDeviceInfo {
                id: format!("input:{}", name),
                is_default: default_input_name.as_ref() == Some(&name),
                name,
                is_input: true,
                is_output: false,
                sample_rates,
                channels,
            });
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            let Ok(name) = device.name() else { continue };
            let is_default = default_output_name.as_ref() == Some(&name);

            // Duplex devices show up once
            if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                existing.is_output = true;
                existing.is_default |= is_default;
                continue;
            }

            let (sample_rates, channels) = device_capabilities(&device, Direction::Output);
            devices.push(AudioDeviceInfo {
                id: format!("output:{}", name),
                name,
                is_input: false,
                is_output: true,
                is_default,
                sample_rates,
                channels,
            });
        }
    }

    devices
}

fn device_capabilities(device: &cpal::Device, direction: Direction) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<SupportedStreamConfigRange> = match direction {
        Direction::Input => device
            .supported_input_configs()
            .map(|it| it.collect())
            .unwrap_or_default(),
        Direction::Output => device
            .supported_output_configs()
            .map(|it| it.collect())
            .unwrap_or_default(),
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();
    for config in &configs {
        for rate_val in PROBE_RATES {
            let rate = cpal::SampleRate(rate_val);
            if rate >= config.min_sample_rate()
                && rate <= config.max_sample_rate()
                && !sample_rates.contains(&rate_val)
            {
                sample_rates.push(rate_val);
            }
        }
        if !channels.contains(&config.channels()) {
            channels.push(config.channels());
        }
    }

    sample_rates.sort();
    channels.sort();
    (sample_rates, channels)
}

/// Find a device by name, or the host default when `name` is `None`
pub fn find_device(name: Option<&str>, direction: Direction) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();

    let Some(name) = name else {
        let device = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        };
        return device
            .map(|d| AudioDevice::from_cpal(d, direction))
            .ok_or_else(|| AudioError::DeviceNotFound(format!("No default {:?} device", direction)));
    };

    // Accept the "input:"/"output:" ids produced by list_devices
    let name = name
        .strip_prefix("input:")
        .or_else(|| name.strip_prefix("output:"))
        .unwrap_or(name);

    let devices = match direction {
        Direction::Input => host.input_devices(),
        Direction::Output => host.output_devices(),
    }
    .map_err(|e| AudioError::Backend(e.to_string()))?;

    for device in devices {
        if device.name().ok().as_deref() == Some(name) {
            return Ok(AudioDevice::from_cpal(device, direction));
        }
    }

    Err(AudioError::DeviceNotFound(name.to_string()))
}
