//! Neurofeedback scoring and derived mental-state indices
//!
//! Both read published snapshots only; neither feeds back into the engine.

use eeg_types::{CalibrationBaseline, PowerSnapshot};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Band whose channel-averaged power drives the reward
    pub target_band: String,
    /// Normalized level above which a reward is given
    pub threshold: f32,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            target_band: "alpha".to_string(),
            threshold: 0.6,
        }
    }
}

/// One feedback evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSample {
    pub sequence: u64,
    pub raw_power: f32,
    /// `raw / (2 · baseline)`, capped at 1
    pub normalized: f32,
    pub rewarded: bool,
}

#[derive(Debug, Clone)]
pub struct FeedbackEvaluator {
    config: FeedbackConfig,
    baseline: Option<f32>,
}

impl FeedbackEvaluator {
    pub fn new(config: FeedbackConfig) -> Self {
        Self {
            config,
            baseline: None,
        }
    }

    /// Use the target band's value from `baseline` as the reference level.
    pub fn with_baseline(mut self, baseline: &CalibrationBaseline) -> Self {
        self.set_baseline(baseline);
        self
    }

    pub fn set_baseline(&mut self, baseline: &CalibrationBaseline) {
        self.baseline = baseline.band(&self.config.target_band);
    }

    pub fn config(&self) -> &FeedbackConfig {
        &self.config
    }

    /// `None` when no channel reported the target band in this snapshot.
    pub fn evaluate(&self, snapshot: &PowerSnapshot) -> Option<FeedbackSample> {
        let raw_power = snapshot.band_average(&self.config.target_band)?;
        let reference = match self.baseline {
            Some(b) if b.is_finite() && b > 0.0 => b,
            _ => 1.0,
        };
        let normalized = (raw_power / (reference * 2.0)).min(1.0);

        Some(FeedbackSample {
            sequence: snapshot.sequence,
            raw_power,
            normalized,
            rewarded: normalized > self.config.threshold,
        })
    }
}

/// Ratio-based indices on a 0–100 scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MentalStates {
    pub focus: f32,
    pub relaxation: f32,
    pub stress: f32,
    pub fatigue: f32,
    pub engagement: f32,
}

impl MentalStates {
    /// Needs delta, theta, alpha, beta and gamma averages in the snapshot.
    pub fn from_snapshot(snapshot: &PowerSnapshot) -> Option<Self> {
        let delta = snapshot.band_average("delta")?;
        let theta = snapshot.band_average("theta")?;
        let alpha = snapshot.band_average("alpha")?;
        let beta = snapshot.band_average("beta")?;
        let gamma = snapshot.band_average("gamma")?;

        Some(Self {
            focus: index(beta, theta + alpha, 100.0),
            relaxation: index(alpha, beta, 50.0),
            stress: index(beta + gamma, alpha + theta, 50.0),
            fatigue: index(theta, beta, 60.0),
            engagement: index(beta + gamma, delta + theta, 50.0),
        })
    }
}

fn index(numerator: f32, denominator: f32, scale: f32) -> f32 {
    if denominator == 0.0 {
        return 0.0;
    }
    let value = numerator / denominator * scale;
    if value.is_finite() {
        value.clamp(0.0, 100.0).round()
    } else {
        0.0
    }
}
