//! # Period Detection
//!
//! A period is a run of calendar days during which listening looked unlike
//! the rest of the history: a month of one artist, a holiday abroad, a week of
//! high-energy tracks.
//!
//! ## Algorithm
//!
//! 1. Slide a fixed-size window over the calendar from the first play date to
//!    the last, advancing by the configured step.
//! 2. Run the deviation test on every window (in parallel, results kept in
//!    window order). A window with at least one flagged feature qualifies.
//! 3. Merge qualifying windows that overlap or touch. The span keeps the
//!    union of flagged features, each with its strongest z-score.
//! 4. Trim leading and trailing days that do not deviate on their own, so a
//!    window that only partially covered the event does not stretch it.
//! 5. Drop spans shorter than the minimum length or with too few plays.

use chrono::{Duration, NaiveDate};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::ops::Range;

use crate::config::DetectionConfig;
use crate::stats::{self, Baseline, DeviationTest, FeatureDeviation, FeatureKey};
use crate::table::FeatureTable;

/// A calendar window over the table. `end` is inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub rows: Range<usize>,
}

/// A detected period.
#[derive(Debug, Clone, PartialEq)]
pub struct Period {
    pub start: NaiveDate,
    /// Inclusive
    pub end: NaiveDate,
    pub rows: Range<usize>,
    pub deviations: Vec<FeatureDeviation>,
    pub significance: f64,
}

impl Period {
    /// Length in calendar days, both ends included.
    #[must_use]
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    #[must_use]
    pub fn play_count(&self) -> usize {
        self.rows.len()
    }
}

/// Windows of `size_days` every `step_days`, covering the table's date range.
///
/// A history shorter than one window yields no windows. Empty windows are
/// returned too; they simply cannot qualify.
#[must_use]
pub fn sliding_windows(table: &FeatureTable, size_days: u32, step_days: u32) -> Vec<Window> {
    let Some((first, last)) = table.date_range() else {
        return Vec::new();
    };
    if size_days == 0 || step_days == 0 {
        return Vec::new();
    }

    let span = Duration::days(i64::from(size_days) - 1);
    let step = Duration::days(i64::from(step_days));
    let mut windows = Vec::new();
    let mut start = first;

    while start + span <= last {
        let end = start + span;
        windows.push(Window {
            start,
            end,
            rows: table.rows_between(start, end),
        });
        start += step;
    }

    windows
}

/// A merged run of qualifying windows, before refinement.
#[derive(Debug)]
struct Span {
    start: NaiveDate,
    end: NaiveDate,
    flagged: BTreeMap<FeatureKey, FeatureDeviation>,
}

impl Span {
    fn absorb(&mut self, deviations: Vec<FeatureDeviation>) {
        for deviation in deviations {
            match self.flagged.get(&deviation.key) {
                Some(existing) if existing.magnitude() >= deviation.magnitude() => {}
                _ => {
                    self.flagged.insert(deviation.key.clone(), deviation);
                }
            }
        }
    }
}

fn period_test(config: &DetectionConfig) -> DeviationTest {
    let threshold = config.period.zscore_threshold;
    let test = config
        .period
        .numeric_features
        .iter()
        .fold(DeviationTest::new(), |test, &f| test.numeric(f, threshold));
    config
        .period
        .categorical_features
        .iter()
        .fold(test, |test, &f| test.categorical(f, threshold))
}

/// Detect periods, ordered by start date.
pub fn detect_periods(
    table: &FeatureTable,
    baseline: &Baseline,
    config: &DetectionConfig,
) -> Vec<Period> {
    let period_config = &config.period;
    let windows = sliding_windows(
        table,
        period_config.window_size_days,
        period_config.step_size_days,
    );
    let test = period_test(config);

    let evaluated: Vec<(&Window, Vec<FeatureDeviation>)> = windows
        .par_iter()
        .map(|window| {
            let flagged = if window.rows.is_empty() {
                Vec::new()
            } else {
                test.evaluate(baseline, &table.plays()[window.rows.clone()])
            };
            (window, flagged)
        })
        .collect();

    let qualifying = evaluated.iter().filter(|(_, f)| !f.is_empty()).count();
    log::debug!(
        "{} of {} windows qualify as unusual",
        qualifying,
        windows.len()
    );

    let spans = merge_windows(evaluated);
    let threshold = period_config.zscore_threshold;

    let periods: Vec<Period> = spans
        .into_iter()
        .filter_map(|span| refine_span(table, baseline, span, threshold))
        .filter_map(|(start, end, merged)| {
            let rows = table.rows_between(start, end);
            let days = (end - start).num_days() + 1;
            if days < i64::from(period_config.min_days) {
                log::trace!("Dropping {start}..{end}: {days} days is too short");
                return None;
            }
            if rows.len() < config.min_tracks_for_playlist {
                log::trace!("Dropping {start}..{end}: only {} plays", rows.len());
                return None;
            }

            let mut deviations = test.evaluate(baseline, &table.plays()[rows.clone()]);
            if deviations.is_empty() {
                deviations = merged;
            }
            let significance = stats::significance(&deviations);
            Some(Period {
                start,
                end,
                rows,
                deviations,
                significance,
            })
        })
        .collect();

    log::info!("Detected {} period(s)", periods.len());
    periods
}

/// Merge qualifying windows that overlap or are adjacent.
fn merge_windows(evaluated: Vec<(&Window, Vec<FeatureDeviation>)>) -> Vec<Span> {
    let mut spans: Vec<Span> = Vec::new();

    for (window, flagged) in evaluated {
        if flagged.is_empty() {
            continue;
        }
        match spans.last_mut() {
            Some(span) if window.start <= span.end + Duration::days(1) => {
                span.end = span.end.max(window.end);
                span.absorb(flagged);
            }
            _ => {
                let mut span = Span {
                    start: window.start,
                    end: window.end,
                    flagged: BTreeMap::new(),
                };
                span.absorb(flagged);
                spans.push(span);
            }
        }
    }

    spans
}

/// Trim non-deviating days off both ends of a span.
///
/// A day deviates if its own plays push any of the span's flagged features
/// past `threshold` in the same direction. Returns `None` if no day does.
fn refine_span(
    table: &FeatureTable,
    baseline: &Baseline,
    span: Span,
    threshold: f64,
) -> Option<(NaiveDate, NaiveDate, Vec<FeatureDeviation>)> {
    let day_deviates = |day: NaiveDate| {
        let plays = &table.plays()[table.rows_between(day, day)];
        if plays.is_empty() {
            return false;
        }
        span.flagged.values().any(|deviation| {
            stats::z_for_key(baseline, &deviation.key, plays).is_some_and(|z| {
                z.abs() >= threshold && z.signum() == deviation.z_score.signum()
            })
        })
    };

    let days: Vec<NaiveDate> = span.start.iter_days().take_while(|d| *d <= span.end).collect();
    let first = days.iter().copied().find(|&d| day_deviates(d))?;
    let last = days.iter().rev().copied().find(|&d| day_deviates(d))?;

    Some((first, last, span.flagged.into_values().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::play::{AudioFeatures, NumericFeature, PlayEvent};
    use chrono::{TimeZone, Utc};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    /// Four plays a day from `from` to `to`; valence 0.9 on days in `hot`.
    fn history(from: NaiveDate, to: NaiveDate, hot: Option<(NaiveDate, NaiveDate)>) -> FeatureTable {
        let mut plays = Vec::new();
        for day in from.iter_days().take_while(|x| *x <= to) {
            let is_hot = hot.is_some_and(|(a, b)| day >= a && day <= b);
            for (i, hour) in [9, 12, 15, 18].into_iter().enumerate() {
                let ts = Utc.from_utc_datetime(&day.and_hms_opt(hour, 0, 0).unwrap());
                let valence = if is_hot { 0.9 } else { 0.3 + 0.01 * i as f64 };
                plays.push(
                    PlayEvent::new(ts, format!("t{i}"), "artist", "iPhone").with_audio(
                        AudioFeatures {
                            valence,
                            energy: 0.5,
                            ..AudioFeatures::default()
                        },
                    ),
                );
            }
        }
        FeatureTable::new(plays)
    }

    fn config() -> DetectionConfig {
        let mut config = DetectionConfig::default();
        config.min_tracks_for_playlist = 5;
        config.period.numeric_features = vec![NumericFeature::Valence, NumericFeature::Energy];
        config.period.categorical_features.clear();
        config
    }

    #[test]
    fn test_sliding_windows_cover_range() {
        let table = history(d(2024, 1, 1), d(2024, 1, 10), None);
        let windows = sliding_windows(&table, 7, 1);

        assert_eq!(windows.len(), 4);
        assert_eq!(windows[0].start, d(2024, 1, 1));
        assert_eq!(windows[0].end, d(2024, 1, 7));
        assert_eq!(windows[3].end, d(2024, 1, 10));
        assert_eq!(windows[0].rows.len(), 28);
    }

    #[test]
    fn test_history_shorter_than_window_has_no_windows() {
        let table = history(d(2024, 1, 1), d(2024, 1, 3), None);
        assert!(sliding_windows(&table, 7, 1).is_empty());
        assert!(detect_periods(&table, &Baseline::compute(&table), &config()).is_empty());
    }

    #[test]
    fn test_flat_history_has_no_periods() {
        let table = history(d(2024, 1, 1), d(2024, 3, 1), None);
        let baseline = Baseline::compute(&table);
        assert!(detect_periods(&table, &baseline, &config()).is_empty());
    }

    #[test]
    fn test_hot_span_detected_exactly() {
        let table = history(
            d(2024, 1, 1),
            d(2024, 3, 31),
            Some((d(2024, 2, 10), d(2024, 2, 16))),
        );
        let baseline = Baseline::compute(&table);
        let periods = detect_periods(&table, &baseline, &config());

        assert_eq!(periods.len(), 1);
        let period = &periods[0];
        assert_eq!(period.start, d(2024, 2, 10));
        assert_eq!(period.end, d(2024, 2, 16));
        assert_eq!(period.days(), 7);
        assert_eq!(period.play_count(), 28);
        // energy never varies
        assert!(period
            .deviations
            .iter()
            .all(|dev| dev.key == FeatureKey::Numeric { feature: NumericFeature::Valence }));
        assert!(period.significance > 0.0);
    }

    #[test]
    fn test_short_span_dropped_by_min_days() {
        let table = history(
            d(2024, 1, 1),
            d(2024, 3, 31),
            Some((d(2024, 2, 10), d(2024, 2, 16))),
        );
        let baseline = Baseline::compute(&table);
        let mut config = config();
        config.period.min_days = 8;
        assert!(detect_periods(&table, &baseline, &config).is_empty());
    }

    #[test]
    fn test_merge_joins_adjacent_windows() {
        let window = |s: u32, e: u32| Window {
            start: d(2024, 1, s),
            end: d(2024, 1, e),
            rows: 0..0,
        };
        let dev = |z: f64| FeatureDeviation {
            key: FeatureKey::Numeric { feature: NumericFeature::Valence },
            z_score: z,
            observed: 0.0,
            baseline: 0.0,
        };
        let (a, b, c) = (window(1, 3), window(4, 6), window(9, 11));
        let spans = merge_windows(vec![
            (&a, vec![dev(2.5)]),
            (&b, vec![dev(3.5)]),
            (&c, vec![dev(2.1)]),
        ]);

        assert_eq!(spans.len(), 2);
        assert_eq!((spans[0].start, spans[0].end), (d(2024, 1, 1), d(2024, 1, 6)));
        assert_eq!(spans[0].flagged.len(), 1);
        let strongest = spans[0].flagged.values().next().unwrap();
        assert_eq!(strongest.z_score, 3.5);
    }
}
