//! Real-time EEG band power engine
//!
//! Streaming per-channel samples go into fixed-size ring buffers; on every
//! scheduler tick each ready channel is filtered, Hann-windowed, turned into
//! a power spectrum and reduced to one value per frequency band. The result is
//! published as a [`PowerSnapshot`] on a replay-last broadcast.
//!
//! ```no_run
//! # async fn run() -> band_power::EngineResult<()> {
//! use band_power::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default())?;
//! let mut snapshots = engine.subscribe();
//! engine.start()?;
//!
//! engine.ingest("TP9", &[0.0; 64], 0);
//! if let Some(snapshot) = snapshots.recv().await {
//!     println!("alpha: {:?}", snapshot.band_average("alpha"));
//! }
//! engine.stop();
//! # Ok(())
//! # }
//! ```

pub mod bands;
pub mod calibration;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod fallback;
pub mod feedback;
pub mod ring_buffer;
pub mod transform;

pub use bands::{bin_range, BandAggregator, BinRange};
pub use calibration::{
    capture_baseline, BaselineAccumulator, CalibrationStore, InMemoryCalibrationStore,
    JsonFileCalibrationStore,
};
pub use engine::{Engine, EngineStats};
pub use error::{EngineError, EngineResult, UnknownChannel};
pub use event_bus::{BusMetrics, SnapshotBus, Subscription};
pub use fallback::{FallbackEstimator, RandomSource, StdRandom};
pub use feedback::{FeedbackConfig, FeedbackEvaluator, FeedbackSample, MentalStates};
pub use ring_buffer::ChannelReadiness;
pub use transform::{select_estimator, SpectralEstimator};

pub use eeg_types::{
    CalibrationBaseline, EngineConfig, FrequencyBand, PowerSnapshot, SampleBatch, TransformMode,
};
