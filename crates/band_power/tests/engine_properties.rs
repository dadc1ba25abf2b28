//! End-to-end behaviour of the band power engine

use std::f32::consts::PI;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use band_power::{ChannelReadiness, Engine, EngineConfig, PowerSnapshot, TransformMode};
use eeg_types::TransformPreference;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const OTHER_BANDS: [&str; 4] = ["delta", "theta", "beta", "gamma"];

fn config(filtering: bool) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.filter.enabled = filtering;
    config
}

fn sine(freq: f32, amplitude: f32, n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| amplitude * (2.0 * PI * freq * i as f32 / 256.0).sin())
        .collect()
}

fn assert_alpha_dominates(snapshot: &PowerSnapshot, channel: &str) {
    let alpha = snapshot.value("alpha", channel).expect("alpha present");
    for band in OTHER_BANDS {
        let other = snapshot.value(band, channel).expect("band present");
        assert!(alpha > other, "alpha {} not above {} {}", alpha, band, other);
    }
}

#[test]
fn automatic_transform_matches_build_features() {
    let engine = Engine::new(config(false)).unwrap();
    engine.ingest("TP9", &sine(10.0, 50.0, 256), 0);

    let expected_mode = if cfg!(feature = "fft") {
        TransformMode::Fft
    } else {
        TransformMode::Fallback
    };
    assert_eq!(engine.transform_mode(), expected_mode);

    let snapshot = engine.tick();
    assert_eq!(snapshot.diagnostics.transform_mode, expected_mode);
    assert!(snapshot.value("alpha", "TP9").unwrap() > 0.0);
}

#[cfg(feature = "fft")]
#[test]
fn alpha_sine_dominates_without_filtering() {
    let engine = Engine::new(config(false)).unwrap();
    engine.ingest("TP9", &sine(10.0, 50.0, 256), 0);

    let snapshot = engine.tick();
    assert_eq!(snapshot.diagnostics.transform_mode, TransformMode::Fft);
    assert_alpha_dominates(&snapshot, "TP9");
}

#[cfg(feature = "fft")]
#[test]
fn alpha_sine_dominates_with_filtering() {
    let engine = Engine::new(config(true)).unwrap();
    engine.ingest("AF7", &sine(10.0, 50.0, 256), 0);
    assert_alpha_dominates(&engine.tick(), "AF7");
}

#[test]
fn channel_publishes_only_once_window_is_full() {
    let engine = Engine::new(config(false)).unwrap();
    let samples = sine(10.0, 50.0, 256);

    engine.ingest("TP10", &samples[..255], 0);
    assert_eq!(
        engine.readiness("TP10"),
        Some(ChannelReadiness::NotReady { have: 255, need: 256 })
    );
    let before = engine.tick();
    assert!(before.bands.values().all(|c| !c.contains_key("TP10")));
    assert!(before
        .diagnostics
        .excluded_channels
        .contains(&"TP10".to_string()));

    engine.ingest("TP10", &samples[255..], 1);
    let after = engine.tick();
    assert!(after.bands.values().all(|c| c.contains_key("TP10")));
    assert_eq!(after.timestamp_ms, 1);
}

fn random_batch(rng: &mut StdRng, len: usize) -> Vec<f32> {
    match rng.gen_range(0..6) {
        0 => vec![0.0; len],
        1 => (0..len).map(|_| rng.gen_range(-100.0..100.0)).collect(),
        2 => (0..len)
            .map(|_| if rng.gen_bool(0.5) { 1e30 } else { -1e30 })
            .collect(),
        3 => (0..len)
            .map(|_| match rng.gen_range(0..4) {
                0 => f32::MAX,
                1 => f32::MIN,
                2 => f32::MIN_POSITIVE,
                _ => f32::EPSILON,
            })
            .collect(),
        4 => (0..len)
            .map(|_| if rng.gen_bool(0.05) { f32::NAN } else { rng.gen_range(-1.0..1.0) })
            .collect(),
        _ => vec![f32::INFINITY; len],
    }
}

#[test]
fn randomized_input_never_publishes_invalid_values() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let engine = Engine::new(config(true)).unwrap();
    let channels = engine.config().channels.clone();

    for tick in 0..10_000u64 {
        if tick % 1_000 == 0 {
            engine.set_filtering(tick % 2_000 == 0);
        }
        for channel in &channels {
            let len = rng.gen_range(1..=96);
            let batch = random_batch(&mut rng, len);
            engine.ingest(channel, &batch, tick);
        }

        let snapshot = engine.tick();
        assert!(snapshot.is_finite(), "invalid value at tick {}", tick);
    }

    let stats = engine.stats();
    assert_eq!(stats.ticks, 10_000);
    assert!(stats.numeric_anomalies > 0);
}

#[test]
fn randomized_input_on_fallback_path_stays_finite() {
    let mut rng = StdRng::seed_from_u64(17);
    let mut cfg = config(true);
    cfg.transform = TransformPreference::Fallback;
    cfg.fallback.seed = Some(3);
    let engine = Engine::new(cfg).unwrap();
    assert_eq!(engine.transform_mode(), TransformMode::Fallback);

    for tick in 0..1_000u64 {
        for channel in ["TP9", "AF7", "AF8", "TP10"] {
            let batch = random_batch(&mut rng, 64);
            engine.ingest(channel, &batch, tick);
        }
        assert!(engine.tick().is_finite());
    }
}

#[test]
fn late_subscriber_receives_latest_snapshot() {
    let engine = Engine::new(config(false)).unwrap();
    for _ in 0..5 {
        engine.tick();
    }

    let mut late = engine.subscribe();
    assert_eq!(late.try_recv().map(|s| s.sequence), Some(5));
    assert!(late.try_recv().is_none());

    engine.unsubscribe(late);
    engine.tick();
    engine.tick();

    let mut again = engine.subscribe();
    assert_eq!(again.try_recv().map(|s| s.sequence), Some(7));
    assert!(again.try_recv().is_none());

    engine.tick();
    assert_eq!(again.try_recv().map(|s| s.sequence), Some(8));
}

#[test]
fn unknown_channel_does_not_disturb_known_ones() {
    let engine = Engine::new(config(false)).unwrap();
    engine.ingest("Cz", &sine(10.0, 50.0, 256), 0);
    engine.ingest("TP9", &sine(10.0, 50.0, 256), 0);

    let snapshot = engine.tick();
    assert_eq!(snapshot.channels(), vec!["TP9"]);
    assert_eq!(snapshot.diagnostics.unknown_channel_batches, 1);
}

#[test]
fn concurrent_ingestion_and_ticks() {
    let engine = Engine::new(config(false)).unwrap();
    let writers: Vec<_> = ["TP9", "AF7", "AF8", "TP10"]
        .into_iter()
        .map(|channel| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let signal = sine(10.0, 50.0, 6_400);
                for (i, chunk) in signal.chunks(32).enumerate() {
                    engine.ingest(channel, chunk, i as u64);
                }
            })
        })
        .collect();

    for _ in 0..50 {
        assert!(engine.tick().is_finite());
    }
    for writer in writers {
        writer.join().unwrap();
    }

    let snapshot = engine.tick();
    assert_eq!(snapshot.channels().len(), 4);
    if cfg!(feature = "fft") {
        assert_alpha_dominates(&snapshot, "AF8");
    }
}

#[tokio::test(start_paused = true)]
async fn scheduler_ticks_at_configured_interval() {
    let engine = Engine::new(config(false)).unwrap();
    engine.ingest("TP9", &sine(10.0, 50.0, 256), 0);

    let mut sub = engine.subscribe();
    let started = tokio::time::Instant::now();
    engine.start().unwrap();

    let first = sub.recv().await.unwrap();
    assert_eq!(first.sequence, 1);
    assert_eq!(started.elapsed(), Duration::from_millis(250));
    if cfg!(feature = "fft") {
        assert_alpha_dominates(&first, "TP9");
    }

    let second = sub.recv().await.unwrap();
    assert_eq!(second.sequence, 2);
    assert_eq!(started.elapsed(), Duration::from_millis(500));

    engine.stop();
    let after_stop = tokio::time::timeout(Duration::from_secs(2), sub.recv()).await;
    assert!(after_stop.is_err(), "no ticks after stop");
    assert!(!engine.stats().running);
}

#[tokio::test(start_paused = true)]
async fn restart_continues_sequence() {
    let engine = Engine::new(config(true)).unwrap();
    let mut sub = engine.subscribe();

    engine.start().unwrap();
    engine.start().unwrap();
    assert_eq!(sub.recv().await.unwrap().sequence, 1);

    engine.stop();
    engine.stop();
    engine.start().unwrap();
    assert!(engine.is_running());
    assert_eq!(sub.recv().await.unwrap().sequence, 2);
    engine.stop();
}

#[tokio::test(start_paused = true)]
async fn dropping_engine_ends_scheduler() {
    let engine = Engine::new(config(false)).unwrap();
    engine.start().unwrap();
    let weak = Arc::downgrade(&engine);

    drop(engine);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(weak.upgrade().is_none());
}
