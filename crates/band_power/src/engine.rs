//! Band power engine
//!
//! Owns the per-channel ring buffers and filter banks, the spectral estimator
//! chosen at construction, and the snapshot bus. Ingestion may happen from any
//! thread at any time; ticks are serialized by a dedicated mutex and run
//! either from the scheduler task or directly through [`Engine::tick`].
//!
//! Lock order is scheduler → tick → (channel buffer | channel filter | bus).
//! Channel locks are held only for the copy in or out of a single channel.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use eeg_types::{EngineConfig, PowerSnapshot, SampleBatch, SnapshotDiagnostics, TransformMode};
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::bands::BandAggregator;
use crate::dsp::{FilterBank, HannWindow};
use crate::error::{EngineError, EngineResult, UnknownChannel};
use crate::event_bus::{BusMetrics, SnapshotBus, Subscription};
use crate::ring_buffer::{ChannelBuffers, ChannelReadiness};
use crate::transform::{select_estimator, SpectralEstimator};

/// Anomaly warnings are emitted for the first occurrence and then every Nth.
const ANOMALY_WARN_EVERY: u64 = 100;

/// Point-in-time engine counters
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStats {
    pub running: bool,
    pub filtering: bool,
    pub transform_mode: TransformMode,
    /// Ticks completed since construction, including manual ones
    pub ticks: u64,
    pub numeric_anomalies: u64,
    pub unknown_channel_batches: u64,
    pub bus: BusMetrics,
}

struct TickState {
    estimator: Box<dyn SpectralEstimator>,
    sequence: u64,
}

/// Outcome of one channel's pass through the pipeline
enum ChannelResult {
    Powers(Vec<f32>),
    NonFinite,
}

pub struct Engine {
    config: EngineConfig,
    buffers: ChannelBuffers,
    filters: Vec<Mutex<FilterBank>>,
    window: HannWindow,
    aggregator: BandAggregator,
    transform_mode: TransformMode,
    tick_state: Mutex<TickState>,
    bus: SnapshotBus,
    filtering: AtomicBool,
    /// Cancellation token of the running scheduler task; `None` while stopped
    scheduler: Mutex<Option<CancellationToken>>,
    ticks: AtomicU64,
    numeric_anomalies: AtomicU64,
    unknown_channel_batches: AtomicU64,
    unknown_channel_warned: AtomicBool,
}

impl Engine {
    /// Validate `config` and build a stopped engine.
    pub fn new(config: EngineConfig) -> EngineResult<Arc<Self>> {
        config.validate()?;

        let estimator = select_estimator(&config);
        let transform_mode = estimator.mode();

        let filters = config
            .channels
            .iter()
            .map(|_| Mutex::new(FilterBank::new(config.sample_rate_hz, &config.filter)))
            .collect();

        info!(
            channels = config.channels.len(),
            bands = config.bands.len(),
            sample_rate_hz = config.sample_rate_hz,
            window_size = config.window_size,
            update_interval_ms = config.update_interval_ms,
            %transform_mode,
            "Band power engine created"
        );

        let aggregator = BandAggregator::new(&config);
        for (band, range) in aggregator.band_names().iter().zip(aggregator.ranges()) {
            debug!(%band, min_bin = range.min, max_bin = range.max, "Band bin range");
        }

        Ok(Arc::new(Self {
            buffers: ChannelBuffers::new(&config.channels, config.window_size),
            filters,
            window: HannWindow::new(config.window_size),
            aggregator,
            transform_mode,
            tick_state: Mutex::new(TickState {
                estimator,
                sequence: 0,
            }),
            bus: SnapshotBus::new(),
            filtering: AtomicBool::new(config.filter.enabled),
            scheduler: Mutex::new(None),
            ticks: AtomicU64::new(0),
            numeric_anomalies: AtomicU64::new(0),
            unknown_channel_batches: AtomicU64::new(0),
            unknown_channel_warned: AtomicBool::new(false),
            config,
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transform_mode(&self) -> TransformMode {
        self.transform_mode
    }

    /// Append samples to a channel's ring buffer.
    ///
    /// Batches for channels outside the configured set are dropped and counted.
    pub fn ingest(&self, channel: &str, samples: &[f32], timestamp_ms: u64) {
        match self.buffers.ingest(channel, samples, timestamp_ms) {
            Ok(idx) => trace!(channel, idx, samples = samples.len(), "Ingested batch"),
            Err(UnknownChannel(name)) => self.record_unknown_channel(&name),
        }
    }

    pub fn ingest_batch(&self, batch: &SampleBatch) {
        self.ingest(&batch.channel, &batch.samples, batch.timestamp_ms);
    }

    /// Warm-up state of a configured channel, `None` for unknown names.
    pub fn readiness(&self, channel: &str) -> Option<ChannelReadiness> {
        self.buffers
            .index_of(channel)
            .map(|idx| self.buffers.readiness(idx))
    }

    /// Start the periodic scheduler on the current tokio runtime.
    ///
    /// No-op when already running. Every channel's filter state is reset on
    /// the transition to running.
    pub fn start(self: &Arc<Self>) -> EngineResult<()> {
        let handle = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        let mut scheduler = self.lock_scheduler();
        if scheduler.is_some() {
            debug!("Engine already running");
            return Ok(());
        }

        {
            let _tick = self.lock_tick();
            self.reset_filters();
        }

        let token = CancellationToken::new();
        let period = Duration::from_millis(self.config.update_interval_ms);
        handle.spawn(run_scheduler(Arc::downgrade(self), period, token.clone()));
        *scheduler = Some(token);

        info!(interval_ms = self.config.update_interval_ms, "Band power engine started");
        Ok(())
    }

    /// Stop the scheduler. Safe to call at any time, any number of times.
    ///
    /// A tick already in progress completes; no further ticks start.
    pub fn stop(&self) {
        if let Some(token) = self.lock_scheduler().take() {
            token.cancel();
            info!("Band power engine stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_scheduler().is_some()
    }

    /// Enable or disable the high-pass and notch stages.
    ///
    /// Enabling always clears filter history. The Hann window is applied
    /// either way.
    pub fn set_filtering(&self, enabled: bool) {
        let _tick = self.lock_tick();
        self.filtering.store(enabled, Ordering::SeqCst);
        if enabled {
            self.reset_filters();
        }
        info!(enabled, "Filtering toggled");
    }

    pub fn is_filtering(&self) -> bool {
        self.filtering.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe("observer")
    }

    pub fn subscribe_named(&self, name: impl Into<String>) -> Subscription {
        self.bus.subscribe(name)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.bus.unsubscribe(subscription);
    }

    pub fn latest(&self) -> Option<Arc<PowerSnapshot>> {
        self.bus.latest()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            running: self.is_running(),
            filtering: self.is_filtering(),
            transform_mode: self.transform_mode,
            ticks: self.ticks.load(Ordering::Relaxed),
            numeric_anomalies: self.numeric_anomalies.load(Ordering::Relaxed),
            unknown_channel_batches: self.unknown_channel_batches.load(Ordering::Relaxed),
            bus: self.bus.metrics(),
        }
    }

    /// Run one processing pass over every ready channel and publish the result.
    ///
    /// Channels still warming up, and channels whose result is not finite,
    /// are left out of the snapshot and listed in its diagnostics. Exactly one
    /// snapshot is published per call.
    pub fn tick(&self) -> Arc<PowerSnapshot> {
        let mut state = self.lock_tick();
        self.tick_locked(&mut state)
    }

    /// Tick on behalf of the scheduler owning `token`.
    ///
    /// Cancellation is checked under the tick lock, so a scheduler stopped
    /// after its timer fired cannot tick into a later run.
    fn scheduled_tick(&self, token: &CancellationToken) -> Option<Arc<PowerSnapshot>> {
        let mut state = self.lock_tick();
        if token.is_cancelled() {
            return None;
        }
        Some(self.tick_locked(&mut state))
    }

    fn tick_locked(&self, state: &mut TickState) -> Arc<PowerSnapshot> {
        let filtering = self.filtering.load(Ordering::SeqCst);

        let mut bands: BTreeMap<String, BTreeMap<String, f32>> = self
            .aggregator
            .band_names()
            .iter()
            .map(|name| (name.clone(), BTreeMap::new()))
            .collect();
        let mut excluded = Vec::new();
        let mut timestamp_ms = 0;

        for (idx, channel) in self.buffers.names().iter().enumerate() {
            let Some((samples, last_ts)) = self.buffers.snapshot(idx) else {
                trace!(%channel, "Channel not ready");
                excluded.push(channel.clone());
                continue;
            };

            let estimator = state.estimator.as_mut();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                self.process_channel(idx, samples, filtering, estimator)
            }));

            match outcome {
                Ok(ChannelResult::Powers(powers)) => {
                    for (name, power) in self.aggregator.band_names().iter().zip(powers) {
                        if let Some(per_channel) = bands.get_mut(name) {
                            per_channel.insert(channel.clone(), power);
                        }
                    }
                    timestamp_ms = timestamp_ms.max(last_ts);
                }
                Ok(ChannelResult::NonFinite) => {
                    self.record_anomaly(idx, channel);
                    excluded.push(channel.clone());
                }
                Err(_) => {
                    error!(%channel, "Channel processing panicked; skipping for this tick");
                    self.record_anomaly(idx, channel);
                    excluded.push(channel.clone());
                }
            }
        }

        state.sequence += 1;
        let snapshot = Arc::new(PowerSnapshot {
            sequence: state.sequence,
            timestamp_ms,
            bands,
            diagnostics: SnapshotDiagnostics {
                transform_mode: self.transform_mode,
                excluded_channels: excluded,
                numeric_anomalies: self.numeric_anomalies.load(Ordering::Relaxed),
                unknown_channel_batches: self.unknown_channel_batches.load(Ordering::Relaxed),
            },
        });

        self.ticks.fetch_add(1, Ordering::Relaxed);
        // Published while the tick lock is held so sequence order is publish order
        self.bus.publish(snapshot.clone());

        debug!(
            sequence = snapshot.sequence,
            excluded = snapshot.diagnostics.excluded_channels.len(),
            "Published band power snapshot"
        );
        snapshot
    }

    fn process_channel(
        &self,
        idx: usize,
        mut samples: Vec<f32>,
        filtering: bool,
        estimator: &mut dyn SpectralEstimator,
    ) -> ChannelResult {
        if filtering {
            let mut bank = self.lock_filter(idx);
            bank.process(&mut samples);
            if !bank.is_stable() {
                return ChannelResult::NonFinite;
            }
        }
        self.window.apply(&mut samples);

        let spectrum = estimator.power_spectrum(&samples);
        let powers = self.aggregator.aggregate(&spectrum);

        if powers.iter().all(|p| p.is_finite() && *p >= 0.0) {
            ChannelResult::Powers(powers)
        } else {
            ChannelResult::NonFinite
        }
    }

    fn record_anomaly(&self, idx: usize, channel: &str) {
        // Non-finite history would poison every later tick on this channel
        self.lock_filter(idx).reset();

        let total = self.numeric_anomalies.fetch_add(1, Ordering::Relaxed) + 1;
        if total == 1 || total % ANOMALY_WARN_EVERY == 0 {
            warn!(channel, total, "Non-finite band power; channel excluded from snapshot");
        } else {
            debug!(channel, total, "Non-finite band power");
        }
    }

    fn record_unknown_channel(&self, channel: &str) {
        let total = self.unknown_channel_batches.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.unknown_channel_warned.swap(true, Ordering::Relaxed) {
            warn!(channel, "Dropping batch for unknown channel");
        } else {
            debug!(channel, total, "Dropping batch for unknown channel");
        }
    }

    fn reset_filters(&self) {
        for idx in 0..self.filters.len() {
            self.lock_filter(idx).reset();
        }
    }

    fn lock_filter(&self, idx: usize) -> MutexGuard<'_, FilterBank> {
        self.filters[idx].lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tick(&self) -> MutexGuard<'_, TickState> {
        self.tick_state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_scheduler(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let scheduler = self.scheduler.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = scheduler.take() {
            token.cancel();
        }
    }
}

/// Scheduler loop. Holds only a weak reference so the engine can be dropped
/// while the task is parked on the timer.
async fn run_scheduler(engine: Weak<Engine>, period: Duration, token: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    // An overrunning tick delays the next one rather than bunching them up
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick of a tokio interval completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Scheduler received shutdown signal");
                break;
            }
            _ = interval.tick() => {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                if engine.scheduled_tick(&token).is_none() {
                    break;
                }
            }
        }
    }

    debug!("Scheduler task exited");
}
