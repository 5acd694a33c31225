//! Output device discovery and host audio settings, via cpal.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;
use log::debug;
use pdhost_types::HostAudio;
use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Host buffer sizes offered to users. Each is a whole number of 64-frame
/// engine blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BufferSize {
    B64 = 64,
    B128 = 128,
    #[default]
    B256 = 256,
    B512 = 512,
    B1024 = 1024,
    B2048 = 2048,
}

impl BufferSize {
    pub const ALL: [BufferSize; 6] = [
        BufferSize::B64,
        BufferSize::B128,
        BufferSize::B256,
        BufferSize::B512,
        BufferSize::B1024,
        BufferSize::B2048,
    ];

    pub fn as_frames(&self) -> u32 {
        *self as u32
    }

    pub fn from_frames(frames: u32) -> Option<BufferSize> {
        Self::ALL.into_iter().find(|b| b.as_frames() == frames)
    }

    /// Calculate latency in milliseconds for a given sample rate
    pub fn latency_ms(&self, sample_rate: u32) -> f32 {
        (self.as_frames() as f32 / sample_rate as f32) * 1000.0
    }
}

/// An output device discovered on the system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    pub name: String,
    pub output_channels: Option<u16>,
    pub sample_rate: Option<u32>,
    pub is_default_output: bool,
}

/// User-selected output configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    pub device: Option<String>, // None = system default
    pub buffer_size: BufferSize,
    /// None = the device's default rate
    pub sample_rate: Option<u32>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device: None,
            buffer_size: BufferSize::default(),
            sample_rate: None,
        }
    }
}

/// Enumerate output devices on the default host.
pub fn enumerate_devices() -> Vec<AudioDevice> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let devices = match host.output_devices() {
        Ok(devices) => devices,
        Err(e) => {
            debug!(target: "pd::audio", "cannot enumerate output devices: {}", e);
            return Vec::new();
        }
    };

    devices
        .filter_map(|device| {
            let name = device.name().ok()?;
            let config = device.default_output_config().ok();
            Some(AudioDevice {
                is_default_output: default_name.as_deref() == Some(name.as_str()),
                output_channels: config.as_ref().map(|c| c.channels()),
                sample_rate: config.as_ref().map(|c| c.sample_rate().0),
                name,
            })
        })
        .collect()
}

/// Find the configured output device, or the default one.
pub fn output_device(name: Option<&str>) -> Result<Device, DeviceError> {
    let host = cpal::default_host();
    match name {
        None => host.default_output_device().ok_or(DeviceError::NoOutputDevice),
        Some(wanted) => host
            .output_devices()?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| DeviceError::UnknownDevice(wanted.to_string())),
    }
}

/// Host audio settings for `config`: the configured rate, or the device's
/// default rate, with the configured buffer size.
pub fn host_audio(device: &Device, config: &OutputConfig) -> Result<HostAudio, DeviceError> {
    let sample_rate = match config.sample_rate {
        Some(rate) => rate,
        None => device.default_output_config()?.sample_rate().0,
    };
    Ok(HostAudio {
        sample_rate,
        buffer_frames: config.buffer_size.as_frames(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_callback::ticks_per_callback;

    #[test]
    fn every_buffer_size_is_whole_blocks() {
        for size in BufferSize::ALL {
            assert!(ticks_per_callback(size.as_frames(), 64).is_ok());
        }
    }

    #[test]
    fn from_frames_matches_known_sizes() {
        assert_eq!(BufferSize::from_frames(512), Some(BufferSize::B512));
        assert_eq!(BufferSize::from_frames(500), None);
    }

    #[test]
    fn latency_at_48k() {
        let ms = BufferSize::B256.latency_ms(48_000);
        assert!((ms - 5.333).abs() < 0.01);
    }
}
