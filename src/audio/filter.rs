//! Per-ear band-pass filter
//!
//! RBJ cookbook band-pass (constant 0 dB peak gain) in Direct Form II
//! Transposed. Coefficients are derived from a center frequency in Hz and a
//! bandwidth in octaves at the device sample rate.

use std::f64::consts::{LN_2, PI};

const MIN_CENTER_HZ: f64 = 20.0;
/// Highest usable center as a fraction of the sample rate
const MAX_CENTER_RATIO: f64 = 0.45;
const MIN_BANDWIDTH_OCT: f64 = 0.05;
const MAX_BANDWIDTH_OCT: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Coefficients {
    b0: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Coefficients {
    fn band_pass(sample_rate: f64, center_hz: f64, bandwidth_oct: f64) -> Self {
        // The Nyquist ceiling wins over the floor at very low sample rates
        let center = center_hz
            .max(MIN_CENTER_HZ)
            .min(sample_rate * MAX_CENTER_RATIO);
        let bw = bandwidth_oct.clamp(MIN_BANDWIDTH_OCT, MAX_BANDWIDTH_OCT);

        let w0 = 2.0 * PI * center / sample_rate;
        let sin_w0 = w0.sin();
        let cos_w0 = w0.cos();
        let alpha = sin_w0 * (LN_2 / 2.0 * bw * w0 / sin_w0).sinh();

        let a0 = 1.0 + alpha;
        // b1 is always zero for this design
        Self {
            b0: alpha / a0,
            b2: -alpha / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
        }
    }
}

/// Band-pass biquad owned by one ear's render path
#[derive(Debug, Clone)]
pub struct BandPass {
    sample_rate: f64,
    center_hz: f32,
    bandwidth_oct: f32,
    coeffs: Coefficients,
    z1: f64,
    z2: f64,
}

impl BandPass {
    pub fn new(sample_rate: u32, center_hz: f32, bandwidth_oct: f32) -> Self {
        let sample_rate = f64::from(sample_rate.max(1));
        Self {
            sample_rate,
            center_hz,
            bandwidth_oct,
            coeffs: Coefficients::band_pass(sample_rate, center_hz as f64, bandwidth_oct as f64),
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Retune the filter. The delay line is kept so a retune does not click.
    ///
    /// Returns true if the coefficients were recomputed.
    pub fn set_params(&mut self, center_hz: f32, bandwidth_oct: f32) -> bool {
        if center_hz == self.center_hz && bandwidth_oct == self.bandwidth_oct {
            return false;
        }
        if !center_hz.is_finite() || !bandwidth_oct.is_finite() {
            return false;
        }
        self.center_hz = center_hz;
        self.bandwidth_oct = bandwidth_oct;
        self.coeffs = Coefficients::band_pass(self.sample_rate, center_hz as f64, bandwidth_oct as f64);
        true
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let x = input as f64;
        let c = &self.coeffs;
        let y = c.b0 * x + self.z1;
        self.z1 = -c.a1 * y + self.z2;
        self.z2 = c.b2 * x - c.a2 * y;
        y as f32
    }

    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }

    pub fn center_hz(&self) -> f32 {
        self.center_hz
    }
}
