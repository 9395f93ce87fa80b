//! Parameter snapshots shared between the control thread and the audio thread
//!
//! Each ear has one sequence-locked cell of atomics. The control thread is the
//! only writer (enforced by [`ParamPublisher`] taking `&mut self`); renderers
//! call [`SharedParams::try_read`] once per buffer and keep their previous
//! snapshot if a write is in flight, so the audio thread never waits and
//! never sees a half-written snapshot.

use std::sync::atomic::{fence, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use super::noise::NoiseType;
use crate::params::{ChannelParameters, Ear, StereoParameters};

/// Output volume 1.0 maps to this linear gain
pub const OUTPUT_HEADROOM: f32 = 0.3;

/// Helper to store f32 in AtomicU32
#[inline]
fn f32_to_u32(f: f32) -> u32 {
    f.to_bits()
}

/// Helper to load f32 from AtomicU32
#[inline]
fn u32_to_f32(u: u32) -> f32 {
    f32::from_bits(u)
}

/// Everything one ear's renderer needs for a buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderParams {
    pub noise_type: NoiseType,
    /// Linear output gain, already scaled into the headroom range
    pub gain: f32,
    pub center_hz: f32,
    pub bandwidth_oct: f32,
    /// Bumped whenever the generator memory must be zeroed
    pub reset_epoch: u32,
}

impl RenderParams {
    pub fn from_channel(params: &ChannelParameters, reset_epoch: u32) -> Self {
        Self {
            noise_type: params.noise_type,
            gain: params.volume.clamp(0.0, 1.0) * OUTPUT_HEADROOM,
            center_hz: params.center_frequency,
            bandwidth_oct: params.bandwidth,
            reset_epoch,
        }
    }
}

struct ParamCell {
    seq: AtomicU32,
    noise_type: AtomicU8,
    gain: AtomicU32,
    center_hz: AtomicU32,
    bandwidth_oct: AtomicU32,
    reset_epoch: AtomicU32,
}

impl ParamCell {
    fn new(p: RenderParams) -> Self {
        Self {
            seq: AtomicU32::new(0),
            noise_type: AtomicU8::new(p.noise_type.to_u8()),
            gain: AtomicU32::new(f32_to_u32(p.gain)),
            center_hz: AtomicU32::new(f32_to_u32(p.center_hz)),
            bandwidth_oct: AtomicU32::new(f32_to_u32(p.bandwidth_oct)),
            reset_epoch: AtomicU32::new(p.reset_epoch),
        }
    }

    // Single writer only
    fn write(&self, p: RenderParams) {
        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        self.noise_type.store(p.noise_type.to_u8(), Ordering::Relaxed);
        self.gain.store(f32_to_u32(p.gain), Ordering::Relaxed);
        self.center_hz.store(f32_to_u32(p.center_hz), Ordering::Relaxed);
        self.bandwidth_oct.store(f32_to_u32(p.bandwidth_oct), Ordering::Relaxed);
        self.reset_epoch.store(p.reset_epoch, Ordering::Relaxed);

        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    fn try_read(&self) -> Option<(u32, RenderParams)> {
        let before = self.seq.load(Ordering::Acquire);
        if before & 1 == 1 {
            return None;
        }

        let params = RenderParams {
            noise_type: NoiseType::from_u8(self.noise_type.load(Ordering::Relaxed)),
            gain: u32_to_f32(self.gain.load(Ordering::Relaxed)),
            center_hz: u32_to_f32(self.center_hz.load(Ordering::Relaxed)),
            bandwidth_oct: u32_to_f32(self.bandwidth_oct.load(Ordering::Relaxed)),
            reset_epoch: self.reset_epoch.load(Ordering::Relaxed),
        };

        fence(Ordering::Acquire);
        let after = self.seq.load(Ordering::Relaxed);
        (before == after).then_some((before, params))
    }
}

/// Per-ear render parameters readable from the audio thread
pub struct SharedParams {
    left: ParamCell,
    right: ParamCell,
}

impl SharedParams {
    fn cell(&self, ear: Ear) -> &ParamCell {
        match ear {
            Ear::Left => &self.left,
            Ear::Right => &self.right,
        }
    }

    /// Read the latest snapshot for `ear` with its version.
    ///
    /// Returns None while the control thread is mid-write; the caller keeps
    /// its previous snapshot and retries on the next buffer.
    #[inline]
    pub fn try_read(&self, ear: Ear) -> Option<(u32, RenderParams)> {
        self.cell(ear).try_read()
    }
}

/// The single writer of a [`SharedParams`]
pub struct ParamPublisher {
    shared: Arc<SharedParams>,
    reset_epoch: u32,
}

impl ParamPublisher {
    pub fn new(params: &StereoParameters) -> Self {
        let shared = Arc::new(SharedParams {
            left: ParamCell::new(RenderParams::from_channel(&params.effective(Ear::Left), 0)),
            right: ParamCell::new(RenderParams::from_channel(&params.effective(Ear::Right), 0)),
        });
        Self {
            shared,
            reset_epoch: 0,
        }
    }

    /// Reader side, handed to the renderers
    pub fn shared(&self) -> Arc<SharedParams> {
        Arc::clone(&self.shared)
    }

    /// Publish the effective values of both ears.
    ///
    /// With `reset_generators` both ears zero their pink/brown memory before
    /// rendering with the new values.
    pub fn publish(&mut self, params: &StereoParameters, reset_generators: bool) {
        if reset_generators {
            self.reset_epoch = self.reset_epoch.wrapping_add(1);
        }
        for ear in Ear::BOTH {
            let p = RenderParams::from_channel(&params.effective(ear), self.reset_epoch);
            self.shared.cell(ear).write(p);
        }
    }

    pub fn reset_epoch(&self) -> u32 {
        self.reset_epoch
    }
}
