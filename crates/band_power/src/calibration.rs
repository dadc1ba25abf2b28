//! Resting-state baseline capture and storage
//!
//! A baseline is the per-band power averaged over a fixed capture period.
//! It is read once when a session starts and rewritten on explicit request;
//! it never takes part in the per-tick loop.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use eeg_types::{CalibrationBaseline, PowerSnapshot};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::event_bus::Subscription;

/// Running per-band means over a stream of snapshots.
#[derive(Debug)]
pub struct BaselineAccumulator {
    started: Instant,
    sums: BTreeMap<String, (f64, usize)>,
    snapshot_count: usize,
}

impl Default for BaselineAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl BaselineAccumulator {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            sums: BTreeMap::new(),
            snapshot_count: 0,
        }
    }

    /// Add the channel-averaged power of every band present in `snapshot`.
    ///
    /// Snapshots with no channel values at all (warm-up) are ignored.
    pub fn push(&mut self, snapshot: &PowerSnapshot) {
        let mut contributed = false;
        for band in snapshot.bands.keys() {
            if let Some(average) = snapshot.band_average(band) {
                let entry = self.sums.entry(band.clone()).or_insert((0.0, 0));
                entry.0 += f64::from(average);
                entry.1 += 1;
                contributed = true;
            }
        }
        if contributed {
            self.snapshot_count += 1;
        }
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshot_count
    }

    /// Per-band means, or `None` if no snapshot carried any value.
    pub fn finish(self) -> Option<CalibrationBaseline> {
        if self.snapshot_count == 0 {
            return None;
        }

        let bands = self
            .sums
            .into_iter()
            .map(|(band, (sum, count))| (band, (sum / count as f64) as f32))
            .collect();

        Some(CalibrationBaseline {
            captured_at_ms: unix_millis(),
            duration_ms: self.started.elapsed().as_millis() as u64,
            snapshot_count: self.snapshot_count,
            bands,
        })
    }
}

/// Average every snapshot received on `subscription` for `duration`.
///
/// The subscription should be taken just before calling, since its replayed
/// latest snapshot is included.
pub async fn capture_baseline(
    subscription: &mut Subscription,
    duration: Duration,
) -> EngineResult<CalibrationBaseline> {
    info!(duration_ms = duration.as_millis() as u64, "Capturing calibration baseline");

    let deadline = tokio::time::Instant::now() + duration;
    let mut accumulator = BaselineAccumulator::new();

    loop {
        match tokio::time::timeout_at(deadline, subscription.recv()).await {
            Ok(Some(snapshot)) => accumulator.push(&snapshot),
            Ok(None) => {
                debug!("Snapshot bus closed during calibration");
                break;
            }
            Err(_) => break,
        }
    }

    let baseline = accumulator.finish().ok_or_else(|| EngineError::Calibration {
        message: format!("no band power received within {} ms", duration.as_millis()),
    })?;

    info!(
        snapshots = baseline.snapshot_count,
        bands = ?baseline.bands,
        "Calibration baseline captured"
    );
    Ok(baseline)
}

/// External persistence of calibration baselines
#[async_trait]
pub trait CalibrationStore: Send + Sync {
    /// Most recently captured baseline, if any has been saved.
    async fn load_latest(&self) -> EngineResult<Option<CalibrationBaseline>>;

    async fn save(&self, baseline: &CalibrationBaseline) -> EngineResult<()>;
}

/// Keeps every saved baseline in memory.
#[derive(Debug, Default)]
pub struct InMemoryCalibrationStore {
    history: Mutex<Vec<CalibrationBaseline>>,
}

impl InMemoryCalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<CalibrationBaseline> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl CalibrationStore for InMemoryCalibrationStore {
    async fn load_latest(&self) -> EngineResult<Option<CalibrationBaseline>> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(history.iter().max_by_key(|b| b.captured_at_ms).cloned())
    }

    async fn save(&self, baseline: &CalibrationBaseline) -> EngineResult<()> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(baseline.clone());
        Ok(())
    }
}

/// Stores the latest baseline as a single JSON document.
#[derive(Debug, Clone)]
pub struct JsonFileCalibrationStore {
    path: PathBuf,
}

impl JsonFileCalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CalibrationStore for JsonFileCalibrationStore {
    async fn load_latest(&self) -> EngineResult<Option<CalibrationBaseline>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn save(&self, baseline: &CalibrationBaseline) -> EngineResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_vec_pretty(baseline)?;
        tokio::fs::write(&self.path, json).await?;
        debug!(path = %self.path.display(), "Calibration baseline saved");
        Ok(())
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
