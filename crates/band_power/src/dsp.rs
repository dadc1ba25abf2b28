//! Preprocessing filters for band power estimation
//!
//! Each channel owns a [`FilterBank`]: a first-order high-pass that removes DC
//! offset and slow drift, followed by a powerline notch biquad. Filter state
//! carries across calls and is only cleared by [`FilterBank::reset`].
//! The Hann window is stateless and applied on every tick.

use std::f32::consts::PI;

use apodize::hanning_iter;
use eeg_types::FilterConfig;

// Biquad coefficients, normalized so that a0 == 1
#[derive(Clone, Debug)]
struct FilterCoefficients {
    b0: f32, b1: f32, b2: f32,
    a1: f32, a2: f32,
}

/// First-order RC high-pass: `y[n] = α·(y[n-1] + x[n] − x[n-1])`
#[derive(Clone, Debug)]
pub struct HighPassFilter {
    alpha: f32,
    prev_input: f32,
    prev_output: f32,
}

impl HighPassFilter {
    pub fn new(sample_rate: f32, cutoff_hz: f32) -> Self {
        let rc = 1.0 / (2.0 * PI * cutoff_hz);
        let dt = 1.0 / sample_rate;
        Self {
            alpha: rc / (rc + dt),
            prev_input: 0.0,
            prev_output: 0.0,
        }
    }

    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.alpha * (self.prev_output + x - self.prev_input);
        self.prev_input = x;
        self.prev_output = y;
        y
    }

    pub fn reset(&mut self) {
        self.prev_input = 0.0;
        self.prev_output = 0.0;
    }

    fn is_finite(&self) -> bool {
        self.prev_input.is_finite() && self.prev_output.is_finite()
    }
}

/// Second-order IIR notch in direct form I, keeping `x1, x2, y1, y2` as history.
#[derive(Clone, Debug)]
pub struct NotchFilter {
    coeffs: FilterCoefficients,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl NotchFilter {
    pub fn new(sample_rate: f32, notch_freq: f32, q_factor: f32) -> Self {
        Self {
            coeffs: Self::notch_coefficients(sample_rate, notch_freq, q_factor),
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    fn notch_coefficients(sample_rate: f32, freq: f32, q: f32) -> FilterCoefficients {
        let omega = 2.0 * PI * freq / sample_rate;
        let alpha = omega.sin() / (2.0 * q);
        let cos_omega = omega.cos();

        let b0 = 1.0;
        let b1 = -2.0 * cos_omega;
        let b2 = 1.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha;

        FilterCoefficients {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    pub fn process(&mut self, x: f32) -> f32 {
        let c = &self.coeffs;
        let y = c.b0 * x + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }

    fn is_finite(&self) -> bool {
        [self.x1, self.x2, self.y1, self.y2].iter().all(|v| v.is_finite())
    }
}

/// High-pass followed by notch, for one channel.
#[derive(Clone, Debug)]
pub struct FilterBank {
    high_pass: HighPassFilter,
    notch: NotchFilter,
}

impl FilterBank {
    pub fn new(sample_rate: f32, config: &FilterConfig) -> Self {
        Self {
            high_pass: HighPassFilter::new(sample_rate, config.high_pass_cutoff_hz),
            notch: NotchFilter::new(sample_rate, config.notch_hz, config.notch_q),
        }
    }

    /// Filter `samples` in place, continuing from the stored history.
    pub fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            let hp = self.high_pass.process(*sample);
            *sample = self.notch.process(hp);
        }
    }

    pub fn reset(&mut self) {
        self.high_pass.reset();
        self.notch.reset();
    }

    /// False once any history value has become NaN or infinite.
    pub fn is_stable(&self) -> bool {
        self.high_pass.is_finite() && self.notch.is_finite()
    }
}

/// Precomputed Hann window: `0.5·(1 − cos(2π·i/(W−1)))`
#[derive(Clone, Debug)]
pub struct HannWindow {
    coefficients: Vec<f32>,
}

impl HannWindow {
    pub fn new(size: usize) -> Self {
        Self {
            coefficients: hanning_iter(size).map(|v| v as f32).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    pub fn apply(&self, samples: &mut [f32]) {
        for (sample, w) in samples.iter_mut().zip(&self.coefficients) {
            *sample *= w;
        }
    }
}
