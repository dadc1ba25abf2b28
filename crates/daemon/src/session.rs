//! Tasks that connect the sample source, the engine and the log output

use std::fmt::Write as _;
use std::sync::Arc;

use band_power::{Engine, FeedbackEvaluator, MentalStates, PowerSnapshot, Subscription};
use eeg_types::SampleBatch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Feed every received batch into the engine until the sender side closes.
///
/// Returns the number of batches ingested.
pub async fn ingest_loop(engine: Arc<Engine>, rx: flume::Receiver<SampleBatch>) -> u64 {
    let mut batches = 0u64;
    while let Ok(batch) = rx.recv_async().await {
        engine.ingest_batch(&batch);
        batches += 1;
    }
    debug!(batches, "Ingest loop finished");
    batches
}

/// Log each snapshot and its feedback evaluation until cancelled.
///
/// Returns the number of snapshots reported.
pub async fn report_loop(
    mut snapshots: Subscription,
    evaluator: FeedbackEvaluator,
    token: CancellationToken,
) -> u64 {
    let mut reporter = SnapshotReporter::new(evaluator);
    let mut reported = 0u64;
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = snapshots.recv() => match next {
                Some(snapshot) => {
                    reporter.report(&snapshot);
                    reported += 1;
                }
                None => break,
            }
        }
    }
    debug!(reported, "Report loop finished");
    reported
}

/// Logs snapshots, remembering the anomaly counter between them.
pub struct SnapshotReporter {
    evaluator: FeedbackEvaluator,
    anomalies_seen: u64,
}

impl SnapshotReporter {
    pub fn new(evaluator: FeedbackEvaluator) -> Self {
        Self {
            evaluator,
            anomalies_seen: 0,
        }
    }

    /// Log one snapshot. Returns the numeric anomalies added since the previous one.
    ///
    /// Channels excluded only while warming up are logged at debug level.
    pub fn report(&mut self, snapshot: &PowerSnapshot) -> u64 {
        let diagnostics = &snapshot.diagnostics;
        let new_anomalies = diagnostics
            .numeric_anomalies
            .saturating_sub(self.anomalies_seen);
        self.anomalies_seen = self.anomalies_seen.max(diagnostics.numeric_anomalies);

        if new_anomalies > 0 {
            warn!(
                sequence = snapshot.sequence,
                new_anomalies,
                excluded = ?diagnostics.excluded_channels,
                "Non-finite band power; channels left out of this snapshot"
            );
        } else if !diagnostics.excluded_channels.is_empty() {
            debug!(
                sequence = snapshot.sequence,
                waiting = ?diagnostics.excluded_channels,
                "Waiting for channels to fill"
            );
        }

        if snapshot.channels().is_empty() {
            return new_anomalies;
        }

        info!(
            sequence = snapshot.sequence,
            mode = %diagnostics.transform_mode,
            "Band power: {}",
            band_summary(snapshot)
        );

        if let Some(feedback) = self.evaluator.evaluate(snapshot) {
            info!(
                band = %self.evaluator.config().target_band,
                normalized = feedback.normalized,
                rewarded = feedback.rewarded,
                "Feedback"
            );
        }

        if let Some(states) = MentalStates::from_snapshot(snapshot) {
            debug!(?states, "Mental state indices");
        }

        match serde_json::to_string(snapshot) {
            Ok(json) => debug!(snapshot = %json, "Snapshot"),
            Err(e) => warn!("Failed to serialize snapshot: {}", e),
        }

        new_anomalies
    }
}

/// `band=value` pairs of the channel-averaged power, in band-name order.
pub fn band_summary(snapshot: &PowerSnapshot) -> String {
    let mut out = String::new();
    for band in snapshot.bands.keys() {
        if let Some(avg) = snapshot.band_average(band) {
            if !out.is_empty() {
                out.push(' ');
            }
            let _ = write!(out, "{}={:.1}", band, avg);
        }
    }
    out
}
