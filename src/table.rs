//! The enriched, time-ordered feature table every detector reads from.

use crate::play::PlayEvent;
use chrono::NaiveDate;
use std::ops::Range;

/// Play events sorted by timestamp, with sequence features filled in.
///
/// Construction is the only way in, so the ordering invariant holds for every
/// table the detectors see. Row indices are stable for the lifetime of the
/// table and are what patterns hold on to.
#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    plays: Vec<PlayEvent>,
}

impl FeatureTable {
    /// Sort `plays` (stable, by timestamp then track id) and recompute
    /// session gaps and artist-loyalty runs.
    pub fn new(mut plays: Vec<PlayEvent>) -> Self {
        plays.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.track_id.cmp(&b.track_id))
        });
        derive_sequence_features(&mut plays);
        Self { plays }
    }

    #[must_use]
    pub fn plays(&self) -> &[PlayEvent] {
        &self.plays
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plays.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plays.is_empty()
    }

    #[must_use]
    pub fn get(&self, row: usize) -> Option<&PlayEvent> {
        self.plays.get(row)
    }

    /// First and last calendar date with a play.
    #[must_use]
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.plays.first()?;
        let last = self.plays.last()?;
        Some((first.date(), last.date()))
    }

    /// Rows whose date lies in `start..=end`.
    #[must_use]
    pub fn rows_between(&self, start: NaiveDate, end: NaiveDate) -> Range<usize> {
        let lo = self.plays.partition_point(|p| p.date() < start);
        let hi = self.plays.partition_point(|p| p.date() <= end);
        lo..hi.max(lo)
    }

    /// Plays at the given rows. Out-of-range rows are skipped.
    pub fn select<'a>(&'a self, rows: &'a [usize]) -> impl Iterator<Item = &'a PlayEvent> + 'a {
        rows.iter().filter_map(move |&row| self.plays.get(row))
    }

    #[must_use]
    pub fn into_plays(self) -> Vec<PlayEvent> {
        self.plays
    }
}

fn derive_sequence_features(plays: &mut [PlayEvent]) {
    let mut previous: Option<(chrono::DateTime<chrono::Utc>, String, u32)> = None;

    for play in plays.iter_mut() {
        match &previous {
            Some((ts, artist, run)) => {
                #[allow(clippy::cast_precision_loss)]
                let gap_ms = (play.timestamp - *ts).num_milliseconds() as f64;
                play.session_gap_s = gap_ms / 1000.0;
                play.artist_loyalty = if *artist == play.artist_id { run + 1 } else { 1 };
            }
            None => {
                play.session_gap_s = 0.0;
                play.artist_loyalty = 1;
            }
        }
        previous = Some((play.timestamp, play.artist_id.clone(), play.artist_loyalty));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn play(day: u32, hour: u32, minute: u32, track: &str, artist: &str) -> PlayEvent {
        let ts = Utc.with_ymd_and_hms(2024, 3, day, hour, minute, 0).unwrap();
        PlayEvent::new(ts, track, artist, "iPhone")
    }

    #[test]
    fn test_new_sorts_by_timestamp() {
        let table = FeatureTable::new(vec![
            play(3, 10, 0, "c", "x"),
            play(1, 10, 0, "a", "x"),
            play(2, 10, 0, "b", "x"),
        ]);

        let ids: Vec<&str> = table.plays().iter().map(|p| p.track_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_session_gap_and_artist_loyalty() {
        let table = FeatureTable::new(vec![
            play(1, 10, 0, "a", "x"),
            play(1, 10, 4, "b", "x"),
            play(1, 10, 8, "c", "x"),
            play(1, 11, 0, "d", "y"),
            play(1, 11, 3, "e", "x"),
        ]);
        let plays = table.plays();

        assert_eq!(plays[0].session_gap_s, 0.0);
        assert_eq!(plays[1].session_gap_s, 240.0);
        assert_eq!(plays[3].session_gap_s, 52.0 * 60.0);

        let runs: Vec<u32> = plays.iter().map(|p| p.artist_loyalty).collect();
        assert_eq!(runs, vec![1, 2, 3, 1, 1]);
    }

    #[test]
    fn test_sequence_features_recomputed_after_sort() {
        let mut stale = play(1, 9, 0, "late", "x");
        stale.artist_loyalty = 42;
        stale.session_gap_s = -1.0;

        let table = FeatureTable::new(vec![stale, play(1, 8, 0, "early", "x")]);
        assert_eq!(table.plays()[1].track_id, "late");
        assert_eq!(table.plays()[1].artist_loyalty, 2);
        assert_eq!(table.plays()[1].session_gap_s, 3600.0);
    }

    #[test]
    fn test_rows_between_is_inclusive() {
        let table = FeatureTable::new(vec![
            play(1, 10, 0, "a", "x"),
            play(2, 10, 0, "b", "x"),
            play(2, 23, 0, "c", "x"),
            play(4, 10, 0, "d", "x"),
        ]);
        let d = |day| NaiveDate::from_ymd_opt(2024, 3, day).unwrap();

        assert_eq!(table.rows_between(d(2), d(2)), 1..3);
        assert_eq!(table.rows_between(d(1), d(4)), 0..4);
        assert!(table.rows_between(d(3), d(3)).is_empty());
        assert_eq!(table.date_range(), Some((d(1), d(4))));
    }

    #[test]
    fn test_empty_table() {
        let table = FeatureTable::new(Vec::new());
        assert!(table.is_empty());
        assert_eq!(table.date_range(), None);
    }
}
