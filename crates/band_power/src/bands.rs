//! Frequency band aggregation
//!
//! Reduces a `W/2`-bin power spectrum to one value per configured band.

use eeg_types::{EngineConfig, FrequencyBand};

/// Inclusive spectrum bin range `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinRange {
    pub min: usize,
    pub max: usize,
}

impl BinRange {
    /// Number of bins averaged; never zero.
    pub fn bin_count(&self) -> usize {
        self.max - self.min + 1
    }
}

/// Map a band to spectrum bins with `bin = round(hz · W / sample_rate)`.
///
/// Bins are clamped to `[1, W/2 − 1]` so DC never contributes. A band that
/// collapses to an inverted range falls back to the single bin nearest its
/// centre frequency.
pub fn bin_range(band: &FrequencyBand, sample_rate_hz: f32, window_size: usize) -> BinRange {
    let last = (window_size / 2).saturating_sub(1).max(1);
    let to_bin = |hz: f32| -> usize {
        let bin = (hz * window_size as f32 / sample_rate_hz).round();
        if bin.is_finite() && bin > 0.0 {
            (bin as usize).clamp(1, last)
        } else {
            1
        }
    };

    let min = to_bin(band.min_hz);
    let max = to_bin(band.max_hz);
    if min <= max {
        BinRange { min, max }
    } else {
        let centre = to_bin(band.centre_hz());
        BinRange { min: centre, max: centre }
    }
}

/// Precomputed bin ranges for the configured band table.
#[derive(Debug, Clone)]
pub struct BandAggregator {
    names: Vec<String>,
    ranges: Vec<BinRange>,
    output_scale: f32,
}

impl BandAggregator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            names: config.bands.iter().map(|b| b.name.clone()).collect(),
            ranges: config
                .bands
                .iter()
                .map(|b| bin_range(b, config.sample_rate_hz, config.window_size))
                .collect(),
            output_scale: config.output_scale,
        }
    }

    pub fn band_names(&self) -> &[String] {
        &self.names
    }

    pub fn ranges(&self) -> &[BinRange] {
        &self.ranges
    }

    /// Mean spectrum value over each band's bins, times the output scale.
    ///
    /// Returned in band table order. Bins past the end of a short spectrum
    /// are ignored; a band with no available bins yields 0.
    pub fn aggregate(&self, spectrum: &[f32]) -> Vec<f32> {
        self.ranges
            .iter()
            .map(|range| {
                let end = (range.max + 1).min(spectrum.len());
                match spectrum.get(range.min..end) {
                    Some(bins) if !bins.is_empty() => {
                        bins.iter().sum::<f32>() / bins.len() as f32 * self.output_scale
                    }
                    _ => 0.0,
                }
            })
            .collect()
    }
}
