//! Output stream lifecycle using cpal for real-time audio output
//!
//! [`AudioEngine`] is a two-state machine (Stopped/Running) over an
//! [`OutputBackend`]. Starting opens a stream whose callback drives a
//! [`StereoMixer`]; stopping drops the stream, after which the callback is
//! guaranteed not to run again.

use cpal::traits::{DeviceTrait, StreamTrait};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::device::{get_output_device, get_supported_config, AudioConfig};
use super::render::StereoMixer;
use super::route::{RouteEvent, RouteEventQueue};
use super::shared::SharedParams;
use crate::error::{EngineError, Result};

/// Current state of the audio engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Stopped,
    Running,
}

/// An open output stream. Dropping it stops the stream.
pub trait OutputStream {
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
    fn device_name(&self) -> Option<&str> {
        None
    }
}

/// Opens output streams that render from the shared parameters
pub trait OutputBackend {
    fn open(
        &mut self,
        shared: Arc<SharedParams>,
        events: RouteEventQueue,
    ) -> Result<Box<dyn OutputStream>>;
}

/// Plays through a cpal output device
pub struct CpalBackend {
    device_name: Option<String>,
    config: AudioConfig,
}

impl CpalBackend {
    pub fn new(device_name: Option<String>, config: AudioConfig) -> Self {
        Self {
            device_name,
            config,
        }
    }
}

struct CpalStream {
    _stream: cpal::Stream,
    sample_rate: u32,
    channels: u16,
    device_name: String,
}

impl OutputStream for CpalStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn device_name(&self) -> Option<&str> {
        Some(&self.device_name)
    }
}

impl OutputBackend for CpalBackend {
    fn open(
        &mut self,
        shared: Arc<SharedParams>,
        events: RouteEventQueue,
    ) -> Result<Box<dyn OutputStream>> {
        let device = get_output_device(self.device_name.as_deref())?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let stream_config = get_supported_config(&device, &self.config)?;

        let sample_rate = stream_config.sample_rate.0;
        let channels = stream_config.channels;

        log::info!(
            "Opening output '{}': {} Hz, {} channels",
            device_name,
            sample_rate,
            channels
        );

        let mut mixer = StereoMixer::new(sample_rate, channels as usize, shared);

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    mixer.process(data);
                },
                move |err| {
                    log::error!("Audio stream error: {}", err);
                    if let cpal::StreamError::DeviceNotAvailable = err {
                        events.try_push(RouteEvent::DeviceLost);
                    }
                },
                None, // No timeout
            )
            .map_err(|e| EngineError::device(format!("Failed to build output stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| EngineError::device(format!("Failed to start stream: {}", e)))?;

        Ok(Box::new(CpalStream {
            _stream: stream,
            sample_rate,
            channels,
            device_name,
        }))
    }
}

struct OfflineInner {
    mixer: Option<StereoMixer>,
    available: bool,
    sample_rate: u32,
    channels: u16,
    seed: u64,
    opened: usize,
}

/// Backend without a device: the caller pulls buffers with [`OfflineBackend::pull`].
///
/// Used for tests and for rendering to memory. Clones share the same stream.
#[derive(Clone)]
pub struct OfflineBackend {
    inner: Arc<Mutex<OfflineInner>>,
}

impl OfflineBackend {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            inner: Arc::new(Mutex::new(OfflineInner {
                mixer: None,
                available: true,
                sample_rate,
                channels,
                seed: 0,
                opened: 0,
            })),
        }
    }

    /// Simulate a missing/unusable device: subsequent opens fail
    pub fn set_available(&self, available: bool) {
        self.inner.lock().available = available;
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().mixer.is_some()
    }

    /// How many streams have been opened so far
    pub fn open_count(&self) -> usize {
        self.inner.lock().opened
    }

    /// Render one buffer as the device callback would.
    ///
    /// Returns false and writes silence when no stream is open.
    pub fn pull(&self, data: &mut [f32]) -> bool {
        let mut inner = self.inner.lock();
        match inner.mixer.as_mut() {
            Some(mixer) => {
                mixer.process(data);
                true
            }
            None => {
                data.fill(0.0);
                false
            }
        }
    }
}

struct OfflineStream {
    inner: Arc<Mutex<OfflineInner>>,
    sample_rate: u32,
    channels: u16,
}

impl OutputStream for OfflineStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

impl Drop for OfflineStream {
    fn drop(&mut self) {
        // Waits for an in-flight pull to finish
        self.inner.lock().mixer = None;
    }
}

impl OutputBackend for OfflineBackend {
    fn open(
        &mut self,
        shared: Arc<SharedParams>,
        _events: RouteEventQueue,
    ) -> Result<Box<dyn OutputStream>> {
        let mut inner = self.inner.lock();
        if !inner.available {
            return Err(EngineError::device("Offline output unavailable"));
        }

        let (sample_rate, channels) = (inner.sample_rate, inner.channels);
        let seed = inner.seed;
        inner.seed = inner.seed.wrapping_add(2);
        inner.opened += 1;
        inner.mixer = Some(StereoMixer::with_seed(sample_rate, channels as usize, shared, seed));

        Ok(Box::new(OfflineStream {
            inner: Arc::clone(&self.inner),
            sample_rate,
            channels,
        }))
    }
}

/// The render graph's lifecycle
pub struct AudioEngine {
    backend: Box<dyn OutputBackend>,
    stream: Option<Box<dyn OutputStream>>,
    shared: Arc<SharedParams>,
    events: RouteEventQueue,
}

impl AudioEngine {
    pub fn new(
        backend: Box<dyn OutputBackend>,
        shared: Arc<SharedParams>,
        events: RouteEventQueue,
    ) -> Self {
        Self {
            backend,
            stream: None,
            shared,
            events,
        }
    }

    /// Open and start the output. No-op if already running.
    ///
    /// On failure the engine stays stopped; there is no retry.
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            log::debug!("AudioEngine: start() while running, ignoring");
            return Ok(());
        }

        match self
            .backend
            .open(Arc::clone(&self.shared), self.events.clone())
        {
            Ok(stream) => {
                log::info!(
                    "AudioEngine: running at {} Hz, {} channels",
                    stream.sample_rate(),
                    stream.channels()
                );
                self.stream = Some(stream);
                Ok(())
            }
            Err(e) => {
                log::error!("AudioEngine: failed to start: {}", e);
                Err(e)
            }
        }
    }

    /// Stop the output. No-op if already stopped.
    ///
    /// Returns once the render callback can no longer fire.
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            log::info!("AudioEngine: stopped");
        }
    }

    pub fn state(&self) -> EngineState {
        if self.stream.is_some() {
            EngineState::Running
        } else {
            EngineState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    /// Sample rate of the open stream
    pub fn sample_rate(&self) -> Option<u32> {
        self.stream.as_ref().map(|s| s.sample_rate())
    }

    pub fn device_name(&self) -> Option<&str> {
        self.stream.as_ref().and_then(|s| s.device_name())
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::shared::ParamPublisher;
    use crate::params::StereoParameters;

    fn engine(backend: &OfflineBackend) -> AudioEngine {
        let publisher = ParamPublisher::new(&StereoParameters::default());
        AudioEngine::new(
            Box::new(backend.clone()),
            publisher.shared(),
            RouteEventQueue::default(),
        )
    }

    #[test]
    fn test_start_stop_idempotent() {
        let backend = OfflineBackend::new(44_100, 2);
        let mut engine = engine(&backend);
        assert_eq!(engine.state(), EngineState::Stopped);

        engine.start().unwrap();
        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert_eq!(backend.open_count(), 1);
        assert_eq!(engine.sample_rate(), Some(44_100));

        engine.stop();
        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(!backend.is_open());
    }

    #[test]
    fn test_failed_start_stays_stopped() {
        let backend = OfflineBackend::new(48_000, 2);
        backend.set_available(false);
        let mut engine = engine(&backend);

        let err = engine.start().unwrap_err();
        assert!(matches!(err, EngineError::DeviceUnavailable(_)));
        assert!(!engine.is_running());

        // recovery is an explicit new start
        backend.set_available(true);
        engine.start().unwrap();
        assert!(engine.is_running());
    }

    #[test]
    fn test_callback_silent_after_stop() {
        let backend = OfflineBackend::new(48_000, 2);
        let mut engine = engine(&backend);
        let mut buf = vec![0.0f32; 512];

        engine.start().unwrap();
        assert!(backend.pull(&mut buf));
        assert!(buf.iter().any(|&s| s != 0.0));

        engine.stop();
        assert!(!backend.pull(&mut buf));
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_drop_stops_stream() {
        let backend = OfflineBackend::new(48_000, 2);
        {
            let mut engine = engine(&backend);
            engine.start().unwrap();
            assert!(backend.is_open());
        }
        assert!(!backend.is_open());
    }

    #[test]
    fn test_very_low_sample_rate_renders() {
        let backend = OfflineBackend::new(40, 2);
        let mut engine = engine(&backend);
        engine.start().unwrap();

        let mut buf = vec![0.0f32; 256];
        for _ in 0..4 {
            assert!(backend.pull(&mut buf));
            assert!(buf.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
        }
    }
}
