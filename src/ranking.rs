//! Track ranking within a detected pattern.
//!
//! Scores each distinct track of a pattern's plays from three sub-scores and
//! orders them, most recommended first.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::config::CandidateWeights;
use crate::play::PlayEvent;

/// Ranking parameters, fixed for one run
#[derive(Debug, Clone, Copy, Default)]
pub struct RankingContext {
    pub weights: CandidateWeights,
}

impl RankingContext {
    #[must_use]
    pub fn new(weights: CandidateWeights) -> Self {
        Self { weights }
    }
}

/// Raw per-track figures gathered from a play subset
#[derive(Debug, Clone, PartialEq)]
pub struct TrackStats {
    pub track_id: String,
    pub track_name: Option<String>,
    pub artist_id: String,
    pub plays: usize,
    pub skips: usize,
    /// Mean attention span over plays that define one
    pub attention_span: Option<f64>,
    pub has_audio_features: bool,
}

impl TrackStats {
    #[must_use]
    pub fn skip_rate(&self) -> f64 {
        if self.plays == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.skips as f64 / self.plays as f64;
        rate
    }
}

/// A track with its final score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedTrack {
    pub track_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_name: Option<String>,
    pub artist_id: String,
    pub plays: usize,
    pub skip_rate: f64,
    pub attention_span: Option<f64>,
    pub has_audio_features: bool,
    pub score: f64,
}

/// Per-track figures, in track-id order.
pub fn collect_track_stats<'p, I>(plays: I) -> Vec<TrackStats>
where
    I: IntoIterator<Item = &'p PlayEvent>,
{
    #[derive(Default)]
    struct Acc<'p> {
        first: Option<&'p PlayEvent>,
        plays: usize,
        skips: usize,
        attention_sum: f64,
        attention_count: usize,
        has_audio: bool,
    }

    let mut by_track: BTreeMap<&str, Acc<'p>> = BTreeMap::new();
    for play in plays {
        let acc = by_track.entry(play.track_id.as_str()).or_default();
        acc.first.get_or_insert(play);
        acc.plays += 1;
        acc.skips += usize::from(play.is_skipped());
        if let Some(attention) = play.attention_span {
            acc.attention_sum += attention;
            acc.attention_count += 1;
        }
        acc.has_audio |= play.has_audio_features();
    }

    by_track
        .into_iter()
        .filter_map(|(track_id, acc)| {
            let first = acc.first?;
            #[allow(clippy::cast_precision_loss)]
            let attention_span =
                (acc.attention_count > 0).then(|| acc.attention_sum / acc.attention_count as f64);
            Some(TrackStats {
                track_id: track_id.to_string(),
                track_name: first.track_name.clone(),
                artist_id: first.artist_id.clone(),
                plays: acc.plays,
                skips: acc.skips,
                attention_span,
                has_audio_features: acc.has_audio,
            })
        })
        .collect()
}

/// Min-max normalization; a constant input maps to all zeros.
#[must_use]
pub fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    values
        .iter()
        .map(|v| if range > 0.0 { (v - min) / range } else { 0.0 })
        .collect()
}

/// Score every track and order them: score, then play count (both
/// descending), then track id.
///
/// ```text
/// score = w_count * norm(plays) + w_skip * (1 - norm(skip_rate)) + w_att * norm(attention)
/// ```
///
/// A track without attention data takes the mean attention of the others.
#[must_use]
pub fn score_tracks(stats: Vec<TrackStats>, context: &RankingContext) -> Vec<RankedTrack> {
    if stats.is_empty() {
        return Vec::new();
    }

    let known: Vec<f64> = stats.iter().filter_map(|s| s.attention_span).collect();
    #[allow(clippy::cast_precision_loss)]
    let fill = if known.is_empty() {
        0.0
    } else {
        known.iter().sum::<f64>() / known.len() as f64
    };

    #[allow(clippy::cast_precision_loss)]
    let counts: Vec<f64> = stats.iter().map(|s| s.plays as f64).collect();
    let skip_rates: Vec<f64> = stats.iter().map(TrackStats::skip_rate).collect();
    let attention: Vec<f64> = stats.iter().map(|s| s.attention_span.unwrap_or(fill)).collect();

    let counts_n = min_max_normalize(&counts);
    let skips_n = min_max_normalize(&skip_rates);
    let attention_n = min_max_normalize(&attention);
    let w = context.weights;

    let mut ranked: Vec<RankedTrack> = stats
        .into_iter()
        .enumerate()
        .map(|(i, s)| {
            let score = w.count * counts_n[i]
                + w.skip_rate * (1.0 - skips_n[i])
                + w.attention_span * attention_n[i];
            RankedTrack {
                skip_rate: skip_rates[i],
                track_id: s.track_id,
                track_name: s.track_name,
                artist_id: s.artist_id,
                plays: s.plays,
                attention_span: s.attention_span,
                has_audio_features: s.has_audio_features,
                score,
            }
        })
        .collect();

    ranked.sort_by(compare_ranked);
    ranked
}

pub(crate) fn compare_ranked(a: &RankedTrack, b: &RankedTrack) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.plays.cmp(&a.plays))
        .then_with(|| a.track_id.cmp(&b.track_id))
}

/// Top `top_n` tracks of a play subset. Shorter if there are fewer tracks.
pub fn rank_tracks<'p, I>(plays: I, context: &RankingContext, top_n: usize) -> Vec<RankedTrack>
where
    I: IntoIterator<Item = &'p PlayEvent>,
{
    let mut ranked = score_tracks(collect_track_stats(plays), context);
    ranked.truncate(top_n);
    ranked
}

/// Score distribution of a ranked list, for reporting
pub mod statistics {
    use super::RankedTrack;
    use serde::Serialize;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct ScoreStatistics {
        pub mean: f64,
        pub std_deviation: f64,
        pub min: f64,
        pub max: f64,
        pub count: usize,
    }

    /// `None` for an empty list.
    #[must_use]
    pub fn analyze_score_distribution(tracks: &[RankedTrack]) -> Option<ScoreStatistics> {
        if tracks.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = tracks.len() as f64;
        let mean = tracks.iter().map(|t| t.score).sum::<f64>() / n;
        let variance = tracks.iter().map(|t| (t.score - mean).powi(2)).sum::<f64>() / n;

        Some(ScoreStatistics {
            mean,
            std_deviation: variance.sqrt(),
            min: tracks.iter().map(|t| t.score).fold(f64::INFINITY, f64::min),
            max: tracks.iter().map(|t| t.score).fold(f64::NEG_INFINITY, f64::max),
            count: tracks.len(),
        })
    }
}
