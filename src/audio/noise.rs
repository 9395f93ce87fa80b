//! Noise generators (white, pink, brown)
//!
//! Each generator produces exactly one sample per call and makes no
//! assumption about the sample rate. Pink and brown noise carry a small amount
//! of filter memory which belongs to a single ear and is zeroed whenever
//! generation restarts for that ear.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Noise color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseType {
    #[default]
    White,
    Pink,
    Brown,
}

impl NoiseType {
    pub const ALL: [NoiseType; 3] = [NoiseType::White, NoiseType::Pink, NoiseType::Brown];

    pub fn as_str(self) -> &'static str {
        match self {
            NoiseType::White => "white",
            NoiseType::Pink => "pink",
            NoiseType::Brown => "brown",
        }
    }

    #[inline]
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            NoiseType::White => 0,
            NoiseType::Pink => 1,
            NoiseType::Brown => 2,
        }
    }

    #[inline]
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => NoiseType::Pink,
            2 => NoiseType::Brown,
            _ => NoiseType::White,
        }
    }
}

impl fmt::Display for NoiseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoiseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "white" => Ok(NoiseType::White),
            "pink" => Ok(NoiseType::Pink),
            "brown" => Ok(NoiseType::Brown),
            other => Err(format!("Unknown noise type '{}'", other)),
        }
    }
}

/// Pink noise filter memory
pub type PinkState = [f32; 7];

/// Feedback/input weight pairs for the first six pink stages
const PINK_STAGES: [(f32, f32); 6] = [
    (0.99886, 0.0555179),
    (0.99332, 0.0750759),
    (0.96900, 0.1538520),
    (0.86650, 0.3104856),
    (0.55000, 0.5329522),
    (-0.7616, -0.0168980),
];

const PINK_DIRECT_GAIN: f32 = 0.5362;
const PINK_LAST_STAGE_GAIN: f32 = 0.115926;
/// Output attenuation so the summed stages don't clip
const PINK_OUTPUT_GAIN: f32 = 0.1;

/// Step size of the brown random walk
const BROWN_STEP: f32 = 0.02;

/// Uniform white noise in [-1, 1]
#[inline]
pub fn white<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    rng.gen_range(-1.0f32..=1.0)
}

/// Pink (1/f) noise approximation using a bank of one-pole smoothers.
///
/// `state` must be carried across calls for spectral continuity.
#[inline]
pub fn pink<R: Rng + ?Sized>(rng: &mut R, state: &mut PinkState) -> f32 {
    let w = white(rng);

    for (slot, &(feedback, weight)) in state.iter_mut().zip(PINK_STAGES.iter()) {
        *slot = feedback * *slot + w * weight;
    }

    let sum: f32 = state.iter().sum::<f32>() + w * PINK_DIRECT_GAIN;
    state[6] = w * PINK_LAST_STAGE_GAIN;

    (sum * PINK_OUTPUT_GAIN).clamp(-1.0, 1.0)
}

/// Brown noise as a saturating random walk.
///
/// Once `last` sits on a rail the walk can only hold or move back inward.
#[inline]
pub fn brown<R: Rng + ?Sized>(rng: &mut R, last: &mut f32) -> f32 {
    *last = (*last + white(rng) * BROWN_STEP).clamp(-1.0, 1.0);
    *last
}

/// Per-ear noise source: random source plus pink/brown memory
pub struct NoiseGenerator {
    rng: SmallRng,
    pink: PinkState,
    brown: f32,
}

impl NoiseGenerator {
    pub fn new() -> Self {
        Self::from_rng(SmallRng::from_entropy())
    }

    /// Deterministic generator, used by tests and offline rendering
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(SmallRng::seed_from_u64(seed))
    }

    fn from_rng(rng: SmallRng) -> Self {
        Self {
            rng,
            pink: [0.0; 7],
            brown: 0.0,
        }
    }

    #[inline]
    pub fn next_sample(&mut self, noise_type: NoiseType) -> f32 {
        match noise_type {
            NoiseType::White => white(&mut self.rng),
            NoiseType::Pink => pink(&mut self.rng, &mut self.pink),
            NoiseType::Brown => brown(&mut self.rng, &mut self.brown),
        }
    }

    /// Zero the pink and brown memory
    pub fn reset(&mut self) {
        self.pink = [0.0; 7];
        self.brown = 0.0;
    }

    pub fn pink_state(&self) -> &PinkState {
        &self.pink
    }

    pub fn brown_state(&self) -> f32 {
        self.brown
    }

    pub fn is_reset(&self) -> bool {
        self.brown == 0.0 && self.pink.iter().all(|&s| s == 0.0)
    }
}

impl Default for NoiseGenerator {
    fn default() -> Self {
        Self::new()
    }
}
