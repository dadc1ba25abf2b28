//! Transform-free spectrum estimator
//!
//! Used when the FFT path is unavailable. It does not compute a real
//! spectrum: it synthesizes a `W/2`-bin spectrum with a plausible EEG shape
//! from three cheap signal features:
//!
//! - the mean absolute amplitude, which sets the overall scale,
//! - short-lag autocorrelation at one lag per band, which picks a dominant band,
//! - mean absolute sample-to-sample difference, which flags movement artifacts
//!   and boosts the lowest-frequency bands.
//!
//! Optional jitter and random dominant-band switching keep live displays
//! moving when no real signal is present. Both draw from a [`RandomSource`],
//! so tests can seed or disable them.

use eeg_types::{EngineConfig, FallbackConfig, TransformMode};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::transform::SpectralEstimator;

/// Uniform random numbers in `[0, 1)`.
pub trait RandomSource: Send {
    fn next_unit(&mut self) -> f32;
}

/// [`RandomSource`] backed by `StdRng`.
pub struct StdRandom(StdRng);

impl StdRandom {
    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self(StdRng::from_entropy())
    }
}

impl RandomSource for StdRandom {
    fn next_unit(&mut self) -> f32 {
        self.0.gen::<f32>()
    }
}

#[derive(Debug, Clone)]
struct BandShape {
    min_hz: f32,
    max_hz: f32,
    /// Relative strength by table position: 1.0, 0.9, 0.8, ...
    weight: f32,
    /// Autocorrelation lag matching the band's centre frequency
    lag: usize,
}

/// Features extracted from one windowed block.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalFeatures {
    pub mean_abs: f32,
    pub variability: f32,
    /// Index into the band table
    pub dominant_band: Option<usize>,
}

pub struct FallbackEstimator {
    config: FallbackConfig,
    sample_rate: f32,
    window_size: usize,
    bands: Vec<BandShape>,
    /// Band indices sorted by ascending lower edge
    low_band_order: Vec<usize>,
    rng: Option<Box<dyn RandomSource>>,
}

impl FallbackEstimator {
    pub fn from_config(config: &EngineConfig) -> Self {
        let window_size = config.window_size;
        let max_lag = window_size.saturating_sub(1).max(1);

        let bands: Vec<BandShape> = config
            .bands
            .iter()
            .enumerate()
            .map(|(k, band)| {
                let lag = (config.sample_rate_hz / band.centre_hz()).round();
                let lag = if lag.is_finite() { lag as usize } else { max_lag };
                BandShape {
                    min_hz: band.min_hz,
                    max_hz: band.max_hz,
                    weight: (1.0 - 0.1 * k as f32).max(0.1),
                    lag: lag.clamp(1, max_lag),
                }
            })
            .collect();

        let mut low_band_order: Vec<usize> = (0..bands.len()).collect();
        low_band_order.sort_by(|&a, &b| bands[a].min_hz.total_cmp(&bands[b].min_hz));

        let fallback = config.fallback.clone();
        let rng: Option<Box<dyn RandomSource>> = if fallback.jitter {
            Some(Box::new(match fallback.seed {
                Some(seed) => StdRandom::seeded(seed),
                None => StdRandom::from_entropy(),
            }))
        } else {
            None
        };

        Self {
            config: fallback,
            sample_rate: config.sample_rate_hz,
            window_size,
            bands,
            low_band_order,
            rng,
        }
    }

    /// Replace the random source, enabling jitter.
    pub fn with_random_source(mut self, rng: Box<dyn RandomSource>) -> Self {
        self.rng = Some(rng);
        self
    }

    /// Remove the random source; output becomes a pure function of the input.
    pub fn without_jitter(mut self) -> Self {
        self.rng = None;
        self
    }

    pub fn band_lags(&self) -> Vec<usize> {
        self.bands.iter().map(|b| b.lag).collect()
    }

    pub fn features(&self, samples: &[f32]) -> SignalFeatures {
        SignalFeatures {
            mean_abs: mean_abs(samples),
            variability: variability(samples),
            dominant_band: self.dominant_band(samples),
        }
    }

    /// Band whose lag shows the largest absolute mean autocorrelation.
    fn dominant_band(&self, samples: &[f32]) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;

        for (k, band) in self.bands.iter().enumerate() {
            if band.lag >= samples.len() {
                continue;
            }
            let n = (samples.len() - band.lag).min(self.config.correlation_window);
            let sum: f32 = (0..n).map(|i| samples[i] * samples[i + band.lag]).sum();
            let correlation = sum.abs() / n as f32;

            // NaN never compares greater, so a corrupt window yields no dominant band
            if correlation > best.map_or(0.0, |(_, c)| c) {
                best = Some((k, correlation));
            }
        }

        best.map(|(k, _)| k)
    }

    fn band_boosts(&self, features: &SignalFeatures) -> Vec<f32> {
        let mut boosts: Vec<f32> = self.bands.iter().map(|b| b.weight).collect();

        if let Some(dominant) = features.dominant_band {
            for (k, boost) in boosts.iter_mut().enumerate() {
                if k == dominant {
                    *boost = self.config.dominant_boost;
                } else {
                    *boost *= self.config.non_dominant_factor;
                }
            }
        }

        if features.variability > self.config.variability_threshold {
            for (&k, &boost) in self.low_band_order.iter().zip(&self.config.movement_boosts) {
                boosts[k] = boost;
            }
        }

        boosts
    }

    fn next_unit(&mut self) -> Option<f32> {
        self.rng.as_mut().map(|rng| rng.next_unit())
    }
}

impl SpectralEstimator for FallbackEstimator {
    fn power_spectrum(&mut self, input: &[f32]) -> Vec<f32> {
        let mut features = self.features(input);

        if let Some(roll) = self.next_unit() {
            if roll < self.config.dominant_switch_probability && !self.bands.is_empty() {
                let pick = self.next_unit().unwrap_or(0.0);
                let k = ((pick * self.bands.len() as f32) as usize).min(self.bands.len() - 1);
                features.dominant_band = Some(k);
            }
        }

        let scale = (features.mean_abs * self.config.amplitude_gain)
            .clamp(self.config.amplitude_min, self.config.amplitude_max);
        let boosts = self.band_boosts(&features);

        let bins = self.window_size / 2;
        let resolution = self.sample_rate / self.window_size as f32;
        let jitter = self.config.jitter_amplitude;

        let mut spectrum = Vec::with_capacity(bins);
        for i in 0..bins {
            let freq = i as f32 * resolution;
            let band = self
                .bands
                .iter()
                .position(|b| freq >= b.min_hz && freq < b.max_hz);

            let value = match band {
                Some(k) => {
                    let shape = &self.bands[k];
                    let position = (freq - shape.min_hz) / (shape.max_hz - shape.min_hz);
                    scale * boosts[k] * shape.weight * (1.0 - 0.1 * position)
                }
                None => scale * self.config.off_band_level,
            };

            let factor = match self.next_unit() {
                Some(r) => 1.0 - jitter + 2.0 * jitter * r,
                None => 1.0,
            };
            spectrum.push(value * factor);
        }

        spectrum
    }

    fn mode(&self) -> TransformMode {
        TransformMode::Fallback
    }
}

fn mean_abs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|v| v.abs()).sum::<f32>() / samples.len() as f32
}

fn variability(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let total: f32 = samples.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    total / (samples.len() - 1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> FallbackEstimator {
        FallbackEstimator::from_config(&EngineConfig::default()).without_jitter()
    }

    fn impulses_at(lag: usize) -> Vec<f32> {
        let mut samples = vec![0.0; 256];
        samples[0] = 1.0;
        samples[lag] = 1.0;
        samples
    }

    fn mean(values: &[f32]) -> f32 {
        values.iter().sum::<f32>() / values.len() as f32
    }

    #[test]
    fn test_lags_follow_band_centres() {
        assert_eq!(estimator().band_lags(), vec![128, 45, 25, 13, 7]);
    }

    #[test]
    fn test_dominant_band_from_autocorrelation() {
        let est = estimator();
        assert_eq!(est.features(&impulses_at(25)).dominant_band, Some(2));
        assert_eq!(est.features(&impulses_at(7)).dominant_band, Some(4));
        assert_eq!(est.features(&[0.0; 256]).dominant_band, None);
    }

    #[test]
    fn test_dominant_band_is_boosted() {
        let mut est = estimator();
        let spectrum = est.power_spectrum(&impulses_at(25));
        assert_eq!(spectrum.len(), 128);

        let alpha = mean(&spectrum[8..13]);
        for (lo, hi) in [(1, 4), (4, 8), (13, 30), (30, 50)] {
            assert!(alpha > mean(&spectrum[lo..hi]));
        }
        // Amplitude is tiny, so the scale sits at its lower clamp
        assert!((spectrum[100] - 500.0 * 0.05).abs() < 1e-3);
    }

    #[test]
    fn test_movement_boosts_low_bands() {
        let mut est = estimator();
        let noisy: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 1000.0 } else { -1000.0 })
            .collect();
        assert!(est.features(&noisy).variability > 20.0);

        let spectrum = est.power_spectrum(&noisy);
        assert!(spectrum[2] > spectrum[10]);
        assert!(spectrum[6] > spectrum[10]);
        // Scale is clamped at its upper bound
        assert!(spectrum.iter().all(|v| *v <= 10_000.0 * 1.5));
    }

    #[test]
    fn test_deterministic_without_jitter() {
        let input: Vec<f32> = (0..256).map(|i| ((i * 7) % 13) as f32 - 6.0).collect();
        let a = estimator().power_spectrum(&input);
        let b = estimator().power_spectrum(&input);
        assert_eq!(a, b);
    }

    #[test]
    fn test_seeded_jitter_is_reproducible() {
        let input = impulses_at(25);
        let config = EngineConfig::default();
        let mut a = FallbackEstimator::from_config(&config)
            .with_random_source(Box::new(StdRandom::seeded(7)));
        let mut b = FallbackEstimator::from_config(&config)
            .with_random_source(Box::new(StdRandom::seeded(7)));

        let first = a.power_spectrum(&input);
        assert_eq!(first, b.power_spectrum(&input));
        assert_ne!(first, estimator().power_spectrum(&input));
        assert!(first.iter().all(|v| v.is_finite() && *v > 0.0));
    }

    #[test]
    fn test_nan_input_propagates() {
        let mut est = estimator();
        let mut input = vec![1.0; 256];
        input[3] = f32::NAN;
        let spectrum = est.power_spectrum(&input);
        assert!(spectrum.iter().any(|v| v.is_nan()));
    }
}
