//! Playlist assembly from a ranked track list.

use crate::config::CandidateWeights;
use crate::pattern::Pattern;
use crate::ranking::{rank_tracks, RankedTrack, RankingContext};
use crate::table::FeatureTable;
use std::collections::HashMap;
use std::str::FromStr;

/// Share of the playlist one artist may fill under [`ArtistCap::Auto`].
const AUTO_ARTIST_SHARE: f64 = 0.15;

/// Per-artist limit on a playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArtistCap {
    #[default]
    Unlimited,
    /// 15% of the playlist length, at least one track
    Auto,
    Max(usize),
}

impl ArtistCap {
    /// Tracks allowed per artist for a playlist of `num_songs`.
    #[must_use]
    pub fn limit(self, num_songs: usize) -> Option<usize> {
        match self {
            ArtistCap::Unlimited => None,
            ArtistCap::Auto => {
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    clippy::cast_precision_loss
                )]
                let share = (num_songs as f64 * AUTO_ARTIST_SHARE) as usize;
                Some(share.max(1))
            }
            ArtistCap::Max(n) => Some(n.max(1)),
        }
    }
}

impl FromStr for ArtistCap {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(ArtistCap::Auto),
            "none" | "unlimited" => Ok(ArtistCap::Unlimited),
            n => n
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .map(ArtistCap::Max)
                .ok_or_else(|| format!("expected a positive number, 'auto' or 'none', got '{n}'")),
        }
    }
}

/// Keep ranked order, skip tracks whose artist is full, stop at `num_songs`.
#[must_use]
pub fn build_playlist(ranked: &[RankedTrack], num_songs: usize, cap: ArtistCap) -> Vec<RankedTrack> {
    let limit = cap.limit(num_songs);
    let mut per_artist: HashMap<&str, usize> = HashMap::new();
    let mut playlist = Vec::with_capacity(num_songs.min(ranked.len()));

    for track in ranked {
        if playlist.len() >= num_songs {
            break;
        }
        let used = per_artist.entry(track.artist_id.as_str()).or_insert(0);
        if limit.is_some_and(|limit| *used >= limit) {
            continue;
        }
        *used += 1;
        playlist.push(track.clone());
    }

    playlist
}

/// Rebuild every pattern's track list from its full ranking under `cap`.
pub fn apply_artist_cap(
    patterns: &mut [Pattern],
    table: &FeatureTable,
    weights: CandidateWeights,
    num_songs: usize,
    cap: ArtistCap,
) {
    let context = RankingContext::new(weights);
    for pattern in patterns.iter_mut() {
        let ranked = rank_tracks(table.select(&pattern.rows), &context, usize::MAX);
        pattern.tracks = build_playlist(&ranked, num_songs, cap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str, artist: &str, score: f64) -> RankedTrack {
        RankedTrack {
            track_id: id.to_string(),
            track_name: None,
            artist_id: artist.to_string(),
            plays: 1,
            skip_rate: 0.0,
            attention_span: None,
            has_audio_features: false,
            score,
        }
    }

    fn ranked() -> Vec<RankedTrack> {
        vec![
            track("a1", "a", 0.9),
            track("a2", "a", 0.8),
            track("a3", "a", 0.7),
            track("b1", "b", 0.6),
            track("c1", "c", 0.5),
        ]
    }

    #[test]
    fn test_unlimited_truncates_in_order() {
        let playlist = build_playlist(&ranked(), 3, ArtistCap::Unlimited);
        let ids: Vec<&str> = playlist.iter().map(|t| t.track_id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2", "a3"]);
    }

    #[test]
    fn test_artist_cap_skips_to_other_artists() {
        let playlist = build_playlist(&ranked(), 3, ArtistCap::Max(1));
        let ids: Vec<&str> = playlist.iter().map(|t| t.track_id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "b1", "c1"]);
    }

    #[test]
    fn test_cap_may_shorten_playlist() {
        let playlist = build_playlist(&ranked(), 10, ArtistCap::Max(2));
        assert_eq!(playlist.len(), 4);
    }

    #[test]
    fn test_auto_limit() {
        assert_eq!(ArtistCap::Auto.limit(20), Some(3));
        assert_eq!(ArtistCap::Auto.limit(5), Some(1));
        assert_eq!(ArtistCap::Unlimited.limit(20), None);
    }

    #[test]
    fn test_parse() {
        assert_eq!("auto".parse::<ArtistCap>(), Ok(ArtistCap::Auto));
        assert_eq!("4".parse::<ArtistCap>(), Ok(ArtistCap::Max(4)));
        assert!("0".parse::<ArtistCap>().is_err());
        assert!("lots".parse::<ArtistCap>().is_err());
    }
}
