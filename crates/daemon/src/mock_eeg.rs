//! Simulated headset
//!
//! Produces per-channel sample batches at a fixed rate: an alpha-band sine
//! whose amplitude is re-drawn every batch, mains hum, and uniform noise.
//! Stands in for a real device when no hardware is attached.

use std::f32::consts::PI;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use eeg_types::{EngineConfig, SampleBatch};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SimulationConfig;

pub struct SimulatedSource {
    channels: Vec<String>,
    sample_rate: f32,
    batch_len: usize,
    config: SimulationConfig,
    // Phase accumulators per channel
    alpha_phase: Vec<f32>,
    line_phase: Vec<f32>,
    rng: StdRng,
}

impl SimulatedSource {
    pub fn new(engine: &EngineConfig, config: SimulationConfig) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let batches = config.batches_per_second.max(1) as f32;
        let batch_len = ((engine.sample_rate_hz / batches).round() as usize).max(1);

        // Random starting phases so channels are not identical
        let alpha_phase = engine
            .channels
            .iter()
            .map(|_| rng.gen::<f32>() * 2.0 * PI)
            .collect();
        let line_phase = engine
            .channels
            .iter()
            .map(|_| rng.gen::<f32>() * 2.0 * PI)
            .collect();

        debug!(
            channels = engine.channels.len(),
            batch_len, "Simulated source initialized"
        );

        Self {
            channels: engine.channels.clone(),
            sample_rate: engine.sample_rate_hz,
            batch_len,
            config,
            alpha_phase,
            line_phase,
            rng,
        }
    }

    pub fn batch_len(&self) -> usize {
        self.batch_len
    }

    /// Time between batches.
    pub fn period(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.config.batches_per_second.max(1)))
    }

    /// One batch per channel, all stamped with `timestamp_ms`.
    pub fn next_batches(&mut self, timestamp_ms: u64) -> Vec<SampleBatch> {
        let alpha_inc = 2.0 * PI * self.config.alpha_hz / self.sample_rate;
        let line_inc = 2.0 * PI * self.config.line_noise_hz / self.sample_rate;

        let mut batches = Vec::with_capacity(self.channels.len());
        for ch in 0..self.channels.len() {
            let amplitude = self.config.amplitude + self.rng.gen::<f32>() * self.config.amplitude_jitter;
            let mut samples = Vec::with_capacity(self.batch_len);

            for _ in 0..self.batch_len {
                let alpha = self.alpha_phase[ch].sin() * amplitude;
                let hum = self.line_phase[ch].sin() * self.config.line_noise;
                let noise = (self.rng.gen::<f32>() * 2.0 - 1.0) * self.config.noise;
                samples.push(alpha + hum + noise);

                self.alpha_phase[ch] = (self.alpha_phase[ch] + alpha_inc) % (2.0 * PI);
                self.line_phase[ch] = (self.line_phase[ch] + line_inc) % (2.0 * PI);
            }

            batches.push(SampleBatch::new(self.channels[ch].clone(), timestamp_ms, samples));
        }
        batches
    }
}

/// Push batches into `tx` at the configured rate until cancelled or the
/// receiving side goes away.
pub async fn run(
    mut source: SimulatedSource,
    tx: flume::Sender<SampleBatch>,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval(source.period());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        batches_per_second = source.config.batches_per_second,
        batch_len = source.batch_len(),
        "Simulated source started"
    );

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!("Simulated source received shutdown signal");
                break;
            }
            _ = interval.tick() => {
                for batch in source.next_batches(unix_millis()) {
                    if tx.send_async(batch).await.is_err() {
                        debug!("Sample receiver closed; stopping source");
                        return;
                    }
                }
            }
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
