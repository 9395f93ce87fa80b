//! Real-time render path
//!
//! One [`ChannelRenderer`] per ear renders noise -> band-pass -> gain into
//! its own slot of an interleaved buffer and writes zero to every other slot,
//! so each ear is a hard-isolated source rather than a panned mono one. The
//! [`StereoMixer`] runs both sources into preallocated scratch buffers and
//! sums them onto the output bus.
//!
//! Nothing here allocates, locks, logs or panics once constructed.

use std::sync::Arc;

use super::filter::BandPass;
use super::noise::NoiseGenerator;
use super::shared::{RenderParams, SharedParams};
use crate::params::{ChannelParameters, Ear};

/// Largest block rendered in one pass; bigger device buffers are split
pub const MAX_BLOCK_FRAMES: usize = 4096;

/// Renders one ear
pub struct ChannelRenderer {
    ear: Ear,
    shared: Arc<SharedParams>,
    generator: NoiseGenerator,
    filter: BandPass,
    params: RenderParams,
    version: Option<u32>,
    /// Gain applied to the last rendered frame
    gain: f32,
}

impl ChannelRenderer {
    pub fn new(ear: Ear, sample_rate: u32, shared: Arc<SharedParams>) -> Self {
        Self::with_generator(ear, sample_rate, shared, NoiseGenerator::new())
    }

    pub fn with_generator(
        ear: Ear,
        sample_rate: u32,
        shared: Arc<SharedParams>,
        generator: NoiseGenerator,
    ) -> Self {
        let (version, params) = match shared.try_read(ear) {
            Some((v, p)) => (Some(v), p),
            None => (None, RenderParams::from_channel(&ChannelParameters::default(), 0)),
        };

        Self {
            ear,
            filter: BandPass::new(sample_rate, params.center_hz, params.bandwidth_oct),
            shared,
            generator,
            params,
            version,
            // fade in from silence on the first buffer
            gain: 0.0,
        }
    }

    pub fn generator(&self) -> &NoiseGenerator {
        &self.generator
    }

    pub fn params(&self) -> &RenderParams {
        &self.params
    }

    /// Pick up the latest published snapshot, if any
    fn sync(&mut self) {
        let Some((version, next)) = self.shared.try_read(self.ear) else {
            return;
        };
        if self.version == Some(version) {
            return;
        }
        self.version = Some(version);

        if next.reset_epoch != self.params.reset_epoch {
            self.generator.reset();
        }
        self.filter.set_params(next.center_hz, next.bandwidth_oct);
        self.params = next;
    }

    /// Fill `out` (interleaved, `channels` per frame) with this ear's signal.
    ///
    /// The ear's slot gets the sample, all other slots get zero. A mono
    /// buffer receives the sample in its only slot. Buffers that are not a
    /// whole number of frames are silenced.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        if channels == 0 || out.len() % channels != 0 {
            out.fill(0.0);
            return;
        }

        self.sync();

        let frames = out.len() / channels;
        if frames == 0 {
            return;
        }

        let slot = if channels == 1 { 0 } else { self.ear.slot() };
        let target = self.params.gain;
        let step = (target - self.gain) / frames as f32;
        let noise_type = self.params.noise_type;

        for frame in out.chunks_exact_mut(channels) {
            self.gain += step;
            let raw = self.generator.next_sample(noise_type);
            let sample = self.filter.process(raw) * self.gain;

            frame.fill(0.0);
            frame[slot] = sample;
        }

        self.gain = target;
    }
}

/// Both ears summed onto the output bus
pub struct StereoMixer {
    left: ChannelRenderer,
    right: ChannelRenderer,
    left_buf: Vec<f32>,
    right_buf: Vec<f32>,
    channels: usize,
}

impl StereoMixer {
    pub fn new(sample_rate: u32, channels: usize, shared: Arc<SharedParams>) -> Self {
        let left = ChannelRenderer::new(Ear::Left, sample_rate, Arc::clone(&shared));
        let right = ChannelRenderer::new(Ear::Right, sample_rate, shared);
        Self::from_renderers(left, right, channels)
    }

    /// Mixer with deterministic generators
    pub fn with_seed(sample_rate: u32, channels: usize, shared: Arc<SharedParams>, seed: u64) -> Self {
        let left = ChannelRenderer::with_generator(
            Ear::Left,
            sample_rate,
            Arc::clone(&shared),
            NoiseGenerator::with_seed(seed),
        );
        let right = ChannelRenderer::with_generator(
            Ear::Right,
            sample_rate,
            shared,
            NoiseGenerator::with_seed(seed.wrapping_add(1)),
        );
        Self::from_renderers(left, right, channels)
    }

    fn from_renderers(left: ChannelRenderer, right: ChannelRenderer, channels: usize) -> Self {
        // Pre-allocate so the audio callback never has to
        let scratch = MAX_BLOCK_FRAMES * channels.max(1);
        Self {
            left,
            right,
            left_buf: vec![0.0; scratch],
            right_buf: vec![0.0; scratch],
            channels,
        }
    }

    /// Render one device buffer of interleaved frames
    pub fn process(&mut self, data: &mut [f32]) {
        let channels = self.channels;
        if channels == 0 || data.len() % channels != 0 {
            data.fill(0.0);
            return;
        }

        for block in data.chunks_mut(MAX_BLOCK_FRAMES * channels) {
            let n = block.len();
            let left = &mut self.left_buf[..n];
            let right = &mut self.right_buf[..n];

            self.left.render(left, channels);
            self.right.render(right, channels);

            for ((out, l), r) in block.iter_mut().zip(left.iter()).zip(right.iter()) {
                let s = l + r;
                *out = if s.is_finite() { s.clamp(-1.0, 1.0) } else { 0.0 };
            }
        }
    }
}
