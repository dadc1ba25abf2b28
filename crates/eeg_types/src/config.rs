//! Configuration types for the band power engine
//!
//! All values here are load-time configuration. Nothing in the processing
//! path hardcodes a sampling rate, window size, channel list or band table.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Errors produced while validating an [`EngineConfig`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("sample rate must be a positive, finite number of Hz (got {0})")]
    InvalidSampleRate(f32),
    #[error("window size must be a power of two >= 4 (got {0})")]
    InvalidWindowSize(usize),
    #[error("update interval must be at least 1 ms")]
    InvalidUpdateInterval,
    #[error("at least one channel must be configured")]
    NoChannels,
    #[error("duplicate channel name: {0}")]
    DuplicateChannel(String),
    #[error("at least one frequency band must be configured")]
    NoBands,
    #[error("duplicate band name: {0}")]
    DuplicateBand(String),
    #[error("band '{name}' has an invalid range [{min_hz}, {max_hz})")]
    InvalidBand { name: String, min_hz: f32, max_hz: f32 },
    #[error("output scale must be positive and finite (got {0})")]
    InvalidOutputScale(f32),
    #[error("invalid filter configuration: {0}")]
    InvalidFilter(String),
    #[error("invalid fallback configuration: {0}")]
    InvalidFallback(String),
}

/// A named frequency range `[min_hz, max_hz)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand {
    pub name: String,
    pub min_hz: f32,
    pub max_hz: f32,
}

impl FrequencyBand {
    pub fn new(name: impl Into<String>, min_hz: f32, max_hz: f32) -> Self {
        Self {
            name: name.into(),
            min_hz,
            max_hz,
        }
    }

    /// Representative centre frequency of the band.
    ///
    /// Uses the geometric mean of the edges, which sits closer to the lower
    /// edge on wide bands. Falls back to the arithmetic mean for bands that
    /// start at 0 Hz.
    pub fn centre_hz(&self) -> f32 {
        if self.min_hz > 0.0 {
            (self.min_hz * self.max_hz).sqrt()
        } else {
            (self.min_hz + self.max_hz) / 2.0
        }
    }
}

/// The conventional EEG band table: delta, theta, alpha, beta, gamma.
pub fn default_bands() -> Vec<FrequencyBand> {
    vec![
        FrequencyBand::new("delta", 1.0, 4.0),
        FrequencyBand::new("theta", 4.0, 8.0),
        FrequencyBand::new("alpha", 8.0, 13.0),
        FrequencyBand::new("beta", 13.0, 30.0),
        FrequencyBand::new("gamma", 30.0, 50.0),
    ]
}

/// Electrode names of a 4-channel headset (TP9, AF7, AF8, TP10).
pub fn default_channels() -> Vec<String> {
    ["TP9", "AF7", "AF8", "TP10"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Preprocessing filter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Whether the high-pass and notch stages run at startup
    pub enabled: bool,
    /// First-order high-pass cutoff in Hz
    pub high_pass_cutoff_hz: f32,
    /// Powerline notch centre frequency in Hz (50 or 60 typically)
    pub notch_hz: f32,
    /// Quality factor of the notch biquad
    pub notch_q: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            high_pass_cutoff_hz: 0.5,
            notch_hz: 50.0,
            notch_q: 30.0,
        }
    }
}

/// Which spectral path the engine should try to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransformPreference {
    /// Use the FFT when it is available, otherwise fall back.
    #[default]
    Auto,
    /// Always use the transform-free estimator.
    Fallback,
}

/// Tuning for the transform-free spectrum estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Multiplier from mean absolute amplitude to spectrum scale
    pub amplitude_gain: f32,
    pub amplitude_min: f32,
    pub amplitude_max: f32,
    /// Mean absolute sample-to-sample difference above which the window is
    /// treated as movement or blink artifact
    pub variability_threshold: f32,
    /// Number of products summed per autocorrelation lag
    pub correlation_window: usize,
    pub dominant_boost: f32,
    /// Applied to every non-dominant band when a dominant band is found
    pub non_dominant_factor: f32,
    /// Boosts for the lowest-frequency bands (ascending) on high variability
    pub movement_boosts: Vec<f32>,
    /// Relative level of bins outside every configured band
    pub off_band_level: f32,
    /// Half-width of the multiplicative jitter (0.2 gives 0.8..1.2)
    pub jitter_amplitude: f32,
    /// Per-tick probability of picking a random dominant band
    pub dominant_switch_probability: f32,
    /// Enables the random components
    pub jitter: bool,
    /// Seed for a reproducible random stream; seeded from OS entropy when absent
    pub seed: Option<u64>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            amplitude_gain: 10.0,
            amplitude_min: 500.0,
            amplitude_max: 10_000.0,
            variability_threshold: 20.0,
            correlation_window: 100,
            dominant_boost: 1.5,
            non_dominant_factor: 0.8,
            movement_boosts: vec![1.4, 1.2],
            off_band_level: 0.05,
            jitter_amplitude: 0.2,
            dominant_switch_probability: 0.05,
            jitter: true,
            seed: None,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate of every channel in Hz
    pub sample_rate_hz: f32,
    /// Transform window W in samples (power of two)
    pub window_size: usize,
    /// Scheduler period in milliseconds
    pub update_interval_ms: u64,
    /// Uniform factor applied to every band power before publication
    pub output_scale: f32,
    /// Ordered channel names; index positions are stable for the engine's lifetime
    pub channels: Vec<String>,
    /// Band table, order preserved
    pub bands: Vec<FrequencyBand>,
    pub filter: FilterConfig,
    pub transform: TransformPreference,
    pub fallback: FallbackConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 256.0,
            window_size: 256,
            update_interval_ms: 250,
            output_scale: 1.0,
            channels: default_channels(),
            bands: default_bands(),
            filter: FilterConfig::default(),
            transform: TransformPreference::Auto,
            fallback: FallbackConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn nyquist_hz(&self) -> f32 {
        self.sample_rate_hz / 2.0
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate_hz.is_finite() && self.sample_rate_hz > 0.0) {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate_hz));
        }
        if !self.window_size.is_power_of_two() || self.window_size < 4 {
            return Err(ConfigError::InvalidWindowSize(self.window_size));
        }
        if self.update_interval_ms == 0 {
            return Err(ConfigError::InvalidUpdateInterval);
        }
        if !(self.output_scale.is_finite() && self.output_scale > 0.0) {
            return Err(ConfigError::InvalidOutputScale(self.output_scale));
        }

        if self.channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.as_str()) {
                return Err(ConfigError::DuplicateChannel(channel.clone()));
            }
        }

        if self.bands.is_empty() {
            return Err(ConfigError::NoBands);
        }
        let mut seen = HashSet::new();
        for band in &self.bands {
            if !seen.insert(band.name.as_str()) {
                return Err(ConfigError::DuplicateBand(band.name.clone()));
            }
            let valid = band.min_hz.is_finite()
                && band.max_hz.is_finite()
                && band.min_hz >= 0.0
                && band.min_hz < band.max_hz;
            if !valid {
                return Err(ConfigError::InvalidBand {
                    name: band.name.clone(),
                    min_hz: band.min_hz,
                    max_hz: band.max_hz,
                });
            }
        }

        let filter = &self.filter;
        if !(filter.high_pass_cutoff_hz.is_finite() && filter.high_pass_cutoff_hz > 0.0) {
            return Err(ConfigError::InvalidFilter(format!(
                "high-pass cutoff must be positive (got {})",
                filter.high_pass_cutoff_hz
            )));
        }
        if !(filter.notch_hz > 0.0 && filter.notch_hz < self.nyquist_hz()) {
            return Err(ConfigError::InvalidFilter(format!(
                "notch frequency {} Hz must lie in (0, {}) Hz",
                filter.notch_hz,
                self.nyquist_hz()
            )));
        }
        if !(filter.notch_q.is_finite() && filter.notch_q > 0.0) {
            return Err(ConfigError::InvalidFilter(format!(
                "notch Q must be positive (got {})",
                filter.notch_q
            )));
        }

        let fallback = &self.fallback;
        let levels = [
            ("amplitude_gain", fallback.amplitude_gain),
            ("amplitude_min", fallback.amplitude_min),
            ("amplitude_max", fallback.amplitude_max),
            ("variability_threshold", fallback.variability_threshold),
            ("dominant_boost", fallback.dominant_boost),
            ("non_dominant_factor", fallback.non_dominant_factor),
            ("off_band_level", fallback.off_band_level),
        ];
        for (name, value) in levels {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::InvalidFallback(format!(
                    "{} must be finite and non-negative (got {})",
                    name, value
                )));
            }
        }
        if let Some(boost) = fallback
            .movement_boosts
            .iter()
            .find(|b| !(b.is_finite() && **b >= 0.0))
        {
            return Err(ConfigError::InvalidFallback(format!(
                "movement_boosts must be finite and non-negative (got {})",
                boost
            )));
        }
        if fallback.amplitude_min > fallback.amplitude_max {
            return Err(ConfigError::InvalidFallback(
                "amplitude_min must not exceed amplitude_max".to_string(),
            ));
        }
        if fallback.correlation_window == 0 {
            return Err(ConfigError::InvalidFallback(
                "correlation_window must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&fallback.dominant_switch_probability) {
            return Err(ConfigError::InvalidFallback(
                "dominant_switch_probability must lie in [0, 1]".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&fallback.jitter_amplitude) {
            return Err(ConfigError::InvalidFallback(
                "jitter_amplitude must lie in [0, 1)".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.channels.len(), 4);
        assert_eq!(config.bands.len(), 5);
    }

    #[test]
    fn test_window_size_validation() {
        let mut config = EngineConfig::default();
        config.window_size = 250; // Not a power of 2
        assert_eq!(config.validate(), Err(ConfigError::InvalidWindowSize(250)));

        config.window_size = 2;
        assert!(config.validate().is_err());

        config.window_size = 512;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sample_rate_validation() {
        let mut config = EngineConfig::default();
        config.sample_rate_hz = -1.0;
        assert!(config.validate().is_err());
        config.sample_rate_hz = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut config = EngineConfig::default();
        config.channels.push("TP9".to_string());
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateChannel("TP9".to_string()))
        );

        let mut config = EngineConfig::default();
        config.bands.push(FrequencyBand::new("alpha", 9.0, 11.0));
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateBand("alpha".to_string()))
        );
    }

    #[test]
    fn test_inverted_band_rejected() {
        let mut config = EngineConfig::default();
        config.bands = vec![FrequencyBand::new("odd", 12.0, 8.0)];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBand { .. })
        ));
    }

    #[test]
    fn test_notch_above_nyquist_rejected() {
        let mut config = EngineConfig::default();
        config.filter.notch_hz = 200.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidFilter(_))));
    }

    #[test]
    fn test_fallback_levels_must_be_finite_and_non_negative() {
        let json = r#"{ "transform": "fallback", "fallback": { "jitter": false, "dominant_boost": -1.5 } }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidFallback(_))
        ));

        let cases: [fn(&mut FallbackConfig); 9] = [
            |f| f.amplitude_gain = -10.0,
            |f| f.amplitude_min = f32::NAN,
            |f| f.amplitude_max = f32::NAN,
            |f| f.amplitude_max = f32::INFINITY,
            |f| f.non_dominant_factor = -0.8,
            |f| f.off_band_level = f32::NAN,
            |f| f.variability_threshold = -1.0,
            |f| f.movement_boosts = vec![1.4, f32::NEG_INFINITY],
            |f| f.amplitude_min = 20_000.0,
        ];
        for (i, mutate) in cases.iter().enumerate() {
            let mut config = EngineConfig::default();
            mutate(&mut config.fallback);
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidFallback(_))),
                "case {} accepted",
                i
            );
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "sample_rate_hz": 512.0, "transform": "fallback" }"#)
                .unwrap();
        assert_eq!(config.sample_rate_hz, 512.0);
        assert_eq!(config.window_size, 256);
        assert_eq!(config.transform, TransformPreference::Fallback);
        assert_eq!(config.filter, FilterConfig::default());
    }

    #[test]
    fn test_band_centre() {
        let delta = FrequencyBand::new("delta", 1.0, 4.0);
        assert!((delta.centre_hz() - 2.0).abs() < 1e-6);
        let low = FrequencyBand::new("low", 0.0, 4.0);
        assert!((low.centre_hz() - 2.0).abs() < 1e-6);
    }
}
