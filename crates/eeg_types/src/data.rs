use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A batch of raw amplitude samples for one named channel.
///
/// Produced by the sample source and consumed by ingestion; the engine does
/// not keep the batch itself, only the samples it copies into its ring buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleBatch {
    pub channel: String,
    /// Source timestamp in milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    pub samples: Vec<f32>,
}

impl SampleBatch {
    pub fn new(channel: impl Into<String>, timestamp_ms: u64, samples: Vec<f32>) -> Self {
        Self {
            channel: channel.into(),
            timestamp_ms,
            samples,
        }
    }
}

/// Per-band reference power captured while the user is at rest.
///
/// This is the value that crosses the calibration store boundary. Values are
/// channel-averaged band powers, averaged again over the capture duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBaseline {
    /// Capture completion time, milliseconds since the Unix epoch
    pub captured_at_ms: u64,
    pub duration_ms: u64,
    /// Number of snapshots averaged into the baseline
    pub snapshot_count: usize,
    pub bands: BTreeMap<String, f32>,
}

impl CalibrationBaseline {
    pub fn band(&self, name: &str) -> Option<f32> {
        self.bands.get(name).copied()
    }
}
