//! Daemon configuration
//!
//! Loaded from a JSON file when one is given; every field falls back to its
//! default, so `{}` is a valid configuration.

use std::path::Path;

use anyhow::Context;
use band_power::FeedbackConfig;
use eeg_types::EngineConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Parameters of the simulated sample source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub batches_per_second: u32,
    /// Frequency of the dominant rhythm in Hz
    pub alpha_hz: f32,
    pub amplitude: f32,
    /// Upper bound of the random amplitude added per batch
    pub amplitude_jitter: f32,
    /// Peak amplitude of uniform noise
    pub noise: f32,
    /// Mains hum frequency and amplitude
    pub line_noise_hz: f32,
    pub line_noise: f32,
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            batches_per_second: 10,
            alpha_hz: 10.0,
            amplitude: 50.0,
            amplitude_jitter: 20.0,
            noise: 30.0,
            line_noise_hz: 50.0,
            line_noise: 10.0,
            seed: None,
        }
    }
}

/// Configuration for the daemon
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub engine: EngineConfig,
    pub simulation: SimulationConfig,
    pub feedback: FeedbackConfig,
}

/// Load configuration from `path`, or use defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<DaemonConfig> {
    let Some(path) = path else {
        info!("No configuration file given; using defaults");
        return Ok(DaemonConfig::default());
    };

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read configuration file '{}'", path.display()))?;
    let config: DaemonConfig = serde_json::from_str(&contents)
        .with_context(|| format!("Could not parse configuration file '{}'", path.display()))?;

    config
        .engine
        .validate()
        .with_context(|| format!("Invalid engine configuration in '{}'", path.display()))?;
    if config.simulation.batches_per_second == 0 {
        anyhow::bail!("simulation.batches_per_second must be at least 1");
    }

    info!(path = %path.display(), "Loaded configuration");
    Ok(config)
}
