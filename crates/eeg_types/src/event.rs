//! Snapshot types published by the band power engine
//!
//! A [`PowerSnapshot`] is produced once per scheduler tick and shared with
//! every observer through an `Arc`, so it is never mutated after publication.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Spectral path the engine selected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransformMode {
    /// Windowed FFT power spectrum
    Fft,
    /// Transform-free heuristic estimator
    Fallback,
}

impl std::fmt::Display for TransformMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformMode::Fft => write!(f, "fft"),
            TransformMode::Fallback => write!(f, "fallback"),
        }
    }
}

/// Per-tick health information carried alongside the band values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDiagnostics {
    /// Spectral path used for this snapshot
    pub transform_mode: TransformMode,
    /// Channels left out of this tick (still warming up or numerically invalid)
    pub excluded_channels: Vec<String>,
    /// Cumulative count of channel results dropped for NaN/infinite values
    pub numeric_anomalies: u64,
    /// Cumulative count of ingested batches addressed to unknown channels
    pub unknown_channel_batches: u64,
}

/// Band power for every band and every ready channel at one tick.
///
/// Channels whose ring buffer has not yet filled are omitted from the inner
/// maps rather than reported as zero. Every configured band key is present,
/// possibly with an empty channel map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerSnapshot {
    /// Monotonic tick counter, starting at 1
    pub sequence: u64,
    /// Latest ingestion timestamp among the included channels (ms), 0 if none
    pub timestamp_ms: u64,
    /// band name -> channel name -> power (finite, >= 0)
    pub bands: BTreeMap<String, BTreeMap<String, f32>>,
    pub diagnostics: SnapshotDiagnostics,
}

impl PowerSnapshot {
    /// Power of one band on one channel, if that channel was included.
    pub fn value(&self, band: &str, channel: &str) -> Option<f32> {
        self.bands.get(band)?.get(channel).copied()
    }

    /// Mean power of `band` across the included channels.
    pub fn band_average(&self, band: &str) -> Option<f32> {
        let channels = self.bands.get(band)?;
        if channels.is_empty() {
            return None;
        }
        Some(channels.values().sum::<f32>() / channels.len() as f32)
    }

    /// Names of channels that contributed values to this snapshot.
    pub fn channels(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .bands
            .values()
            .flat_map(|channels| channels.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// True when every value is finite and non-negative.
    pub fn is_finite(&self) -> bool {
        self.bands
            .values()
            .flat_map(|channels| channels.values())
            .all(|v| v.is_finite() && *v >= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> PowerSnapshot {
        let mut bands = BTreeMap::new();
        let mut alpha = BTreeMap::new();
        alpha.insert("TP9".to_string(), 4.0);
        alpha.insert("AF7".to_string(), 2.0);
        bands.insert("alpha".to_string(), alpha);
        bands.insert("beta".to_string(), BTreeMap::new());
        PowerSnapshot {
            sequence: 1,
            timestamp_ms: 1000,
            bands,
            diagnostics: SnapshotDiagnostics {
                transform_mode: TransformMode::Fft,
                excluded_channels: vec!["AF8".to_string()],
                numeric_anomalies: 0,
                unknown_channel_batches: 0,
            },
        }
    }

    #[test]
    fn test_band_average() {
        let s = snapshot();
        assert_eq!(s.band_average("alpha"), Some(3.0));
        assert_eq!(s.band_average("beta"), None);
        assert_eq!(s.band_average("gamma"), None);
    }

    #[test]
    fn test_value_lookup_and_channels() {
        let s = snapshot();
        assert_eq!(s.value("alpha", "TP9"), Some(4.0));
        assert_eq!(s.value("alpha", "AF8"), None);
        assert_eq!(s.channels(), vec!["AF7", "TP9"]);
        assert!(s.is_finite());
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(snapshot()).unwrap();
        assert_eq!(json["bands"]["alpha"]["TP9"], 4.0);
        assert_eq!(json["diagnostics"]["transform_mode"], "fft");
    }
}
