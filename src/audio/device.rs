//! Output device enumeration and stream configuration

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use super::route::OutputKind;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub kind: OutputKind,
}

/// Preferred stream settings; the device may override them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_size: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            buffer_size: 512,
        }
    }
}

/// Named output devices of the default host
fn named_output_devices(host: &cpal::Host) -> Result<Vec<(String, cpal::Device)>> {
    let devices = host
        .output_devices()
        .map_err(|e| EngineError::device(format!("Failed to enumerate devices: {}", e)))?;

    Ok(devices
        .filter_map(|device| device.name().ok().map(|name| (name, device)))
        .collect())
}

/// Get list of available output devices, classified by output kind
pub fn list_output_devices() -> Result<Vec<AudioDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    Ok(named_output_devices(&host)?
        .into_iter()
        .map(|(name, _)| AudioDeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            kind: OutputKind::classify(&name),
            name,
        })
        .collect())
}

/// Get output device by name (exact, then case-insensitive), or the default if None
pub fn get_output_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();

    let Some(wanted) = name else {
        return host
            .default_output_device()
            .ok_or_else(|| EngineError::device("No default output device found"));
    };

    let mut devices = named_output_devices(&host)?;
    let index = devices
        .iter()
        .position(|(n, _)| n == wanted)
        .or_else(|| devices.iter().position(|(n, _)| n.eq_ignore_ascii_case(wanted)))
        .ok_or_else(|| EngineError::device(format!("Device '{}' not found", wanted)))?;

    Ok(devices.swap_remove(index).1)
}

/// One supported output range, reduced to what config selection needs
#[derive(Debug, Clone, Copy, PartialEq)]
struct OutputRange {
    float: bool,
    channels: u16,
    min_rate: u32,
    max_rate: u32,
}

impl OutputRange {
    fn fits(&self, preferred: &AudioConfig) -> bool {
        self.float
            && (self.min_rate..=self.max_rate).contains(&preferred.sample_rate)
            && self.channels >= preferred.channels
    }
}

/// The preferred config if some f32 range supports it
fn pick_config(ranges: &[OutputRange], preferred: &AudioConfig) -> Option<cpal::StreamConfig> {
    ranges.iter().any(|r| r.fits(preferred)).then(|| cpal::StreamConfig {
        channels: preferred.channels,
        sample_rate: cpal::SampleRate(preferred.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(preferred.buffer_size),
    })
}

/// Get a stream config for a device, preferring `preferred` when supported.
///
/// Only f32 ranges qualify; otherwise the device's native rate is used with
/// at most two channels.
pub fn get_supported_config(
    device: &cpal::Device,
    preferred: &AudioConfig,
) -> Result<cpal::StreamConfig> {
    let ranges: Vec<OutputRange> = device
        .supported_output_configs()
        .map_err(|e| EngineError::device(format!("Failed to get supported configs: {}", e)))?
        .map(|c| OutputRange {
            float: c.sample_format() == cpal::SampleFormat::F32,
            channels: c.channels(),
            min_rate: c.min_sample_rate().0,
            max_rate: c.max_sample_rate().0,
        })
        .collect();

    if let Some(config) = pick_config(&ranges, preferred) {
        return Ok(config);
    }

    let native = device
        .default_output_config()
        .map_err(|e| EngineError::device(format!("Failed to get default config: {}", e)))?;
    log::info!(
        "Preferred output config unsupported, using native {} Hz",
        native.sample_rate().0
    );

    Ok(cpal::StreamConfig {
        channels: native.channels().min(2),
        sample_rate: native.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    })
}
