//! Spectral transform selection
//!
//! The engine turns a windowed `W`-sample block into a `W/2`-bin power
//! spectrum through a [`SpectralEstimator`]. The FFT implementation lives
//! behind the `fft` cargo feature; without it, or when configuration asks for
//! it, the transform-free [`FallbackEstimator`] is used for the engine's whole
//! lifetime.

use eeg_types::{EngineConfig, TransformMode, TransformPreference};
use tracing::info;

use crate::fallback::FallbackEstimator;

/// Produces a power spectrum of `input.len() / 2` bins from a windowed block.
///
/// Bin `i` corresponds to `i · sample_rate / W` Hz.
pub trait SpectralEstimator: Send {
    fn power_spectrum(&mut self, input: &[f32]) -> Vec<f32>;

    fn mode(&self) -> TransformMode;
}

#[cfg(feature = "fft")]
pub use fft::FftTransform;

#[cfg(feature = "fft")]
mod fft {
    use std::sync::Arc;

    use eeg_types::TransformMode;
    use rustfft::{num_complex::Complex, Fft, FftPlanner};

    use super::SpectralEstimator;

    /// Forward real FFT with `power[i] = (re² + im²) / W`.
    pub struct FftTransform {
        fft: Arc<dyn Fft<f32>>,
        size: usize,
        buffer: Vec<Complex<f32>>,
        scratch: Vec<Complex<f32>>,
    }

    impl FftTransform {
        pub fn new(size: usize) -> Self {
            let mut planner = FftPlanner::<f32>::new();
            let fft = planner.plan_fft_forward(size);
            let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
            Self {
                fft,
                size,
                buffer: Vec::with_capacity(size),
                scratch,
            }
        }
    }

    impl SpectralEstimator for FftTransform {
        fn power_spectrum(&mut self, input: &[f32]) -> Vec<f32> {
            self.buffer.clear();
            self.buffer
                .extend(input.iter().take(self.size).map(|&v| Complex::new(v, 0.0)));
            // Short input is zero-padded to the planned size
            self.buffer.resize(self.size, Complex::new(0.0, 0.0));

            self.fft
                .process_with_scratch(&mut self.buffer, &mut self.scratch);

            let norm = self.size as f32;
            self.buffer
                .iter()
                .take(self.size / 2)
                .map(|c| c.norm_sqr() / norm)
                .collect()
        }

        fn mode(&self) -> TransformMode {
            TransformMode::Fft
        }
    }
}

/// Pick the spectral path once, at engine construction.
pub fn select_estimator(config: &EngineConfig) -> Box<dyn SpectralEstimator> {
    match config.transform {
        TransformPreference::Fallback => {
            info!("Fallback spectrum estimator selected by configuration");
            Box::new(FallbackEstimator::from_config(config))
        }
        TransformPreference::Auto => structured_or_fallback(config),
    }
}

#[cfg(feature = "fft")]
fn structured_or_fallback(config: &EngineConfig) -> Box<dyn SpectralEstimator> {
    info!(window_size = config.window_size, "Using FFT power spectrum");
    Box::new(FftTransform::new(config.window_size))
}

#[cfg(not(feature = "fft"))]
fn structured_or_fallback(config: &EngineConfig) -> Box<dyn SpectralEstimator> {
    tracing::warn!("FFT support not compiled in; using the fallback spectrum estimator for this engine");
    Box::new(FallbackEstimator::from_config(config))
}
