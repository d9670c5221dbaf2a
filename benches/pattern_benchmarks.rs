//! # Muse Patterns Performance Benchmarks
//!
//! Benchmarks for the stages of a detection run.
//!
//! ## Benchmark Categories
//!
//! - **Baseline**: Summarizing the whole history
//! - **Period Detection**: Sliding windows over histories of growing length
//! - **Habit Detection**: Slot evaluation and overlap resolution
//! - **Ranking**: Scoring track sets of different sizes
//! - **Clustering**: k-means on audio feature vectors
//! - **Cache**: Writing and reading the SQLite feature table
//! - **Presets**: Building every context playlist
//!
//! ## Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench
//!
//! # Run a specific group
//! cargo bench periods
//! cargo bench ranking
//! ```

use chrono::{Duration, TimeZone, Utc};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use std::hint::black_box;
use tempfile::TempDir;

use muse_patterns::cluster::{standardize, KMeans};
use muse_patterns::config::{CandidateWeights, DetectionConfig};
use muse_patterns::db;
use muse_patterns::finder::find_patterns;
use muse_patterns::habits::detect_habits;
use muse_patterns::periods::detect_periods;
use muse_patterns::play::{AudioFeatures, PlayEvent};
use muse_patterns::playlist::ArtistCap;
use muse_patterns::presets::{generate_preset_playlists, Preset};
use muse_patterns::ranking::{rank_tracks, RankingContext};
use muse_patterns::stats::Baseline;
use muse_patterns::FeatureTable;

const DEVICES: [&str; 4] = ["iPhone", "HomePod", "Mac", "Car"];

/// `days` days of listening, `per_day` plays a day, over 500 tracks by 50
/// artists. Values are deterministic but varied enough to exercise every
/// feature.
fn create_history(days: i64, per_day: i64) -> FeatureTable {
    let start = Utc.with_ymd_and_hms(2023, 1, 2, 6, 0, 0).unwrap();
    let mut plays = Vec::with_capacity((days * per_day) as usize);
    for day in 0..days {
        for i in 0..per_day {
            let n = day * per_day + i;
            let ts = start + Duration::days(day) + Duration::minutes(i * 1_000 / per_day);
            let track = n * 7 % 500;
            let level = (track % 100) as f64 / 100.0;
            let skipped = n % 5 == 0;
            let mut play = PlayEvent::new(
                ts,
                format!("spotify:track:{track:04}"),
                format!("artist{}", track % 50),
                DEVICES[(n % 4) as usize],
            )
            .with_reasons("trackdone", if skipped { "fwdbtn" } else { "trackdone" })
            .with_playback(if skipped { 15_000 } else { 180_000 }, Some(180_000));
            if track % 10 != 0 {
                play = play.with_audio(AudioFeatures {
                    speechiness: level / 4.0,
                    energy: level,
                    danceability: 1.0 - level,
                    valence: (level * 3.0) % 1.0,
                    popularity: (track % 90) as f64,
                });
            }
            plays.push(play);
        }
    }
    FeatureTable::new(plays)
}

fn benchmark_baseline(c: &mut Criterion) {
    let mut group = c.benchmark_group("baseline");

    for days in [90, 365, 730].iter() {
        let table = create_history(*days, 30);
        group.bench_with_input(BenchmarkId::new("compute", days), &table, |b, table| {
            b.iter(|| Baseline::compute(black_box(table)))
        });
    }

    group.finish();
}

fn benchmark_period_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("periods");
    let config = DetectionConfig::default();

    for days in [90, 365, 730].iter() {
        let table = create_history(*days, 30);
        let baseline = Baseline::compute(&table);
        group.bench_with_input(BenchmarkId::new("detect", days), &table, |b, table| {
            b.iter(|| detect_periods(black_box(table), black_box(&baseline), black_box(&config)))
        });
    }

    group.finish();
}

fn benchmark_habit_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("habits");
    let config = DetectionConfig::default();

    for days in [90, 365].iter() {
        let table = create_history(*days, 30);
        let baseline = Baseline::compute(&table);
        group.bench_with_input(BenchmarkId::new("detect", days), &table, |b, table| {
            b.iter(|| detect_habits(black_box(table), black_box(&baseline), black_box(&config)))
        });
    }

    let mut no_audio = config.clone();
    no_audio.habit.audio.enabled = false;
    let table = create_history(365, 30);
    let baseline = Baseline::compute(&table);
    group.bench_function("detect_without_audio_profiles", |b| {
        b.iter(|| detect_habits(black_box(&table), black_box(&baseline), black_box(&no_audio)))
    });

    group.finish();
}

fn benchmark_ranking(c: &mut Criterion) {
    let mut group = c.benchmark_group("ranking");
    let context = RankingContext::new(CandidateWeights::default());

    for plays in [100, 1_000, 10_000].iter() {
        let table = create_history(*plays / 20, 20);
        group.bench_with_input(BenchmarkId::new("rank_tracks", plays), &table, |b, table| {
            b.iter(|| rank_tracks(black_box(table.plays()), black_box(&context), 20))
        });
    }

    group.finish();
}

fn benchmark_clustering(c: &mut Criterion) {
    let mut group = c.benchmark_group("clustering");

    for points in [30, 300, 3_000].iter() {
        let raw: Vec<Vec<f64>> = (0..*points)
            .map(|i| {
                let x = (i % 97) as f64 / 97.0;
                vec![x, 1.0 - x, (x * 7.0) % 1.0, (x * 13.0) % 1.0]
            })
            .collect();
        let data = standardize(&raw);
        group.bench_with_input(BenchmarkId::new("kmeans_k3", points), &data, |b, data| {
            b.iter(|| KMeans::new(3, 42).fit(black_box(data)))
        });
    }

    group.finish();
}

fn benchmark_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");
    let table = create_history(365, 30);

    group.bench_function("save_table", |b| {
        b.iter_batched(
            || TempDir::new().expect("Failed to create temp directory"),
            |temp_dir| db::save_table(&temp_dir.path().join("plays.db"), black_box(&table)),
            BatchSize::SmallInput,
        )
    });

    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let cache = temp_dir.path().join("plays.db");
    db::save_table(&cache, &table).expect("Failed to write cache");
    group.bench_function("load_table", |b| b.iter(|| db::load_table(black_box(&cache))));

    group.finish();
}

fn benchmark_presets(c: &mut Criterion) {
    let mut group = c.benchmark_group("presets");

    for days in [90, 365].iter() {
        let table = create_history(*days, 30);
        group.bench_with_input(BenchmarkId::new("all_presets", days), &table, |b, table| {
            b.iter(|| {
                generate_preset_playlists(black_box(table), &Preset::ALL, 20, ArtistCap::Auto)
            })
        });
    }

    group.finish();
}

fn benchmark_full_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_run");
    group.sample_size(20);

    let config = DetectionConfig::default();
    let table = create_history(365, 30);
    group.bench_function("find_patterns_1y", |b| {
        b.iter(|| find_patterns(black_box(&table), black_box(&config), 20))
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_baseline,
    benchmark_period_detection,
    benchmark_habit_detection,
    benchmark_ranking,
    benchmark_clustering,
    benchmark_cache,
    benchmark_presets,
    benchmark_full_run
);

criterion_main!(benches);
