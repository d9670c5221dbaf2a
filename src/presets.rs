//! # Context Playlists
//!
//! Fixed playlist recipes that need no detection run: each preset filters the
//! history with a list of [`Condition`]s, scores every matching play and keeps
//! the best-scoring distinct tracks.
//!
//! | Preset            | Plays kept                                              |
//! |-------------------|---------------------------------------------------------|
//! | Commute           | weekday mornings and evenings on a phone, not skipped   |
//! | Workout           | energetic, danceable afternoons and evenings            |
//! | Focus             | little speech, full attention, not skipped              |
//! | Artist Loyalty    | the second play or later of an artist run               |
//! | Vacation          | plays outside the home country                          |
//! | Background        | smart speakers                                          |
//! | Sing Along        | phone plays listened to the end                         |
//! | Evening Chill     | calm, positive evenings                                 |
//! | Spring Vibes      | spring                                                  |
//! | Weekend Party     | energetic, danceable weekends                           |
//! | Popular Favorites | tracks played often that are also popular               |
//!
//! Conditions on audio features never match a play without them. Recency is
//! the play's position between the oldest (0) and the newest (1) play.

use clap::ValueEnum;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::play::{CategoricalFeature, PlayEvent, Season, TimeOfDay, WeekPart};
use crate::playlist::{build_playlist, ArtistCap};
use crate::ranking::{collect_track_stats, compare_ranked, RankedTrack};
use crate::table::FeatureTable;

const PHONES: &[&str] = &["iPhone", "Android"];
const SMART_SPEAKERS: &[&str] = &["HomePod", "Home Pod", "Amazon Echo", "Echo Dot"];

/// Named playlist recipes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    Commute,
    Workout,
    Focus,
    ArtistLoyalty,
    Vacation,
    Background,
    SingAlong,
    EveningChill,
    SpringVibes,
    WeekendParty,
    PopularFavorites,
}

impl Preset {
    pub const ALL: [Preset; 11] = [
        Preset::Commute,
        Preset::Workout,
        Preset::Focus,
        Preset::ArtistLoyalty,
        Preset::Vacation,
        Preset::Background,
        Preset::SingAlong,
        Preset::EveningChill,
        Preset::SpringVibes,
        Preset::WeekendParty,
        Preset::PopularFavorites,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Preset::Commute => "Commute",
            Preset::Workout => "Workout",
            Preset::Focus => "Focus",
            Preset::ArtistLoyalty => "Artist Loyalty",
            Preset::Vacation => "Vacation",
            Preset::Background => "Background",
            Preset::SingAlong => "Sing Along",
            Preset::EveningChill => "Evening Chill",
            Preset::SpringVibes => "Spring Vibes",
            Preset::WeekendParty => "Weekend Party",
            Preset::PopularFavorites => "Popular Favorites",
        }
    }

    /// Every condition must hold for a play to be considered.
    #[must_use]
    pub fn conditions(self) -> Vec<Condition> {
        use Condition as C;
        match self {
            Preset::Commute => vec![
                C::WeekPart(WeekPart::Weekday),
                C::TimeOfDay(&[TimeOfDay::Morning, TimeOfDay::Evening]),
                C::DeviceContains(PHONES),
                C::NotSkipped,
            ],
            Preset::Workout => vec![
                C::EnergyAbove(0.7),
                C::DanceabilityAbove(0.7),
                C::NotSkipped,
                C::TimeOfDay(&[TimeOfDay::Afternoon, TimeOfDay::Evening]),
            ],
            Preset::Focus => vec![
                C::SpeechinessBelow(0.3),
                C::AttentionAbove(0.9),
                C::NotSkipped,
            ],
            Preset::ArtistLoyalty => vec![C::ArtistLoyaltyAtLeast(2)],
            Preset::Vacation => vec![C::AwayFromHome],
            Preset::Background => vec![C::DeviceContains(SMART_SPEAKERS)],
            Preset::SingAlong => vec![C::DeviceContains(PHONES), C::AttentionAbove(0.95)],
            Preset::EveningChill => vec![
                C::TimeOfDay(&[TimeOfDay::Evening]),
                C::EnergyBelow(0.5),
                C::ValenceAbove(0.5),
            ],
            Preset::SpringVibes => vec![C::Season(Season::Spring)],
            Preset::WeekendParty => vec![
                C::WeekPart(WeekPart::Weekend),
                C::DanceabilityAbove(0.7),
                C::EnergyAbove(0.7),
            ],
            Preset::PopularFavorites => vec![C::PersonalPlaysAtLeast(3), C::PopularityAtLeast(60.0)],
        }
    }

    /// Score of one matching play; higher is better.
    #[must_use]
    pub fn score(self, play: &PlayEvent, context: &PresetContext) -> f64 {
        let audio = play.audio.unwrap_or_default();
        let attention = play.attention_span.unwrap_or(0.0);
        let recency = context.recency(play);
        match self {
            Preset::Commute => {
                let not_skipped = if play.is_skipped() { 0.0 } else { 1.0 };
                0.5 * not_skipped + 0.3 * recency + 0.2 * attention
            }
            Preset::Workout => {
                0.4 * audio.energy + 0.3 * audio.danceability + 0.2 * attention + 0.1 * recency
            }
            Preset::Focus => 0.6 * (1.0 - audio.speechiness) + 0.4 * attention,
            Preset::ArtistLoyalty => f64::from(play.artist_loyalty),
            Preset::Vacation => recency,
            Preset::Background | Preset::SingAlong => attention,
            Preset::EveningChill => 0.5 * (1.0 - audio.energy) + 0.5 * audio.valence,
            Preset::SpringVibes => audio.valence,
            Preset::WeekendParty => 0.4 * audio.energy + 0.4 * audio.danceability + 0.2 * recency,
            Preset::PopularFavorites => {
                #[allow(clippy::cast_precision_loss)]
                let personal = context.track_plays(&play.track_id) as f64;
                0.5 * personal + 0.5 * audio.popularity
            }
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One filter a play must pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Condition {
    WeekPart(WeekPart),
    TimeOfDay(&'static [TimeOfDay]),
    /// Device name contains one of these, ignoring case
    DeviceContains(&'static [&'static str]),
    NotSkipped,
    EnergyAbove(f64),
    EnergyBelow(f64),
    DanceabilityAbove(f64),
    SpeechinessBelow(f64),
    ValenceAbove(f64),
    AttentionAbove(f64),
    ArtistLoyaltyAtLeast(u32),
    Season(Season),
    /// Known country other than the home country
    AwayFromHome,
    /// Track played at least this often over the whole history
    PersonalPlaysAtLeast(usize),
    PopularityAtLeast(f64),
}

impl Condition {
    #[must_use]
    pub fn matches(&self, play: &PlayEvent, context: &PresetContext) -> bool {
        match *self {
            Condition::WeekPart(part) => play.week_part() == part,
            Condition::TimeOfDay(periods) => periods.contains(&play.time_of_day),
            Condition::DeviceContains(devices) => {
                let device = play.device.to_lowercase();
                devices.iter().any(|d| device.contains(&d.to_lowercase()))
            }
            Condition::NotSkipped => !play.is_skipped(),
            Condition::EnergyAbove(t) => play.audio.is_some_and(|a| a.energy > t),
            Condition::EnergyBelow(t) => play.audio.is_some_and(|a| a.energy < t),
            Condition::DanceabilityAbove(t) => play.audio.is_some_and(|a| a.danceability > t),
            Condition::SpeechinessBelow(t) => play.audio.is_some_and(|a| a.speechiness < t),
            Condition::ValenceAbove(t) => play.audio.is_some_and(|a| a.valence > t),
            Condition::PopularityAtLeast(t) => play.audio.is_some_and(|a| a.popularity >= t),
            Condition::AttentionAbove(t) => play.attention_span.is_some_and(|a| a > t),
            Condition::ArtistLoyaltyAtLeast(n) => play.artist_loyalty >= n,
            Condition::Season(season) => play.season == season,
            Condition::AwayFromHome => context.home_country.as_deref().is_some_and(|home| {
                play.country != home && !CategoricalFeature::Country.is_unknown(&play.country)
            }),
            Condition::PersonalPlaysAtLeast(n) => context.track_plays(&play.track_id) >= n,
        }
    }
}

/// History-wide figures the conditions and scores refer to.
#[derive(Debug, Clone, Default)]
pub struct PresetContext {
    first_ts: i64,
    last_ts: i64,
    /// Most played known country, ties by name
    home_country: Option<String>,
    track_plays: HashMap<String, usize>,
}

impl PresetContext {
    #[must_use]
    pub fn new(table: &FeatureTable) -> Self {
        let plays = table.plays();
        let first_ts = plays.first().map_or(0, |p| p.timestamp.timestamp());
        let last_ts = plays.last().map_or(0, |p| p.timestamp.timestamp());

        let mut countries: BTreeMap<&str, usize> = BTreeMap::new();
        let mut track_plays: HashMap<String, usize> = HashMap::new();
        for play in plays {
            if !CategoricalFeature::Country.is_unknown(&play.country) {
                *countries.entry(play.country.as_str()).or_insert(0) += 1;
            }
            *track_plays.entry(play.track_id.clone()).or_insert(0) += 1;
        }
        let home_country = countries
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(country, _)| country.to_string());

        Self {
            first_ts,
            last_ts,
            home_country,
            track_plays,
        }
    }

    #[must_use]
    pub fn home_country(&self) -> Option<&str> {
        self.home_country.as_deref()
    }

    /// 0 for the oldest play, 1 for the newest.
    #[must_use]
    pub fn recency(&self, play: &PlayEvent) -> f64 {
        let span = self.last_ts - self.first_ts;
        if span <= 0 {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let recency = (play.timestamp.timestamp() - self.first_ts) as f64 / span as f64;
        recency.clamp(0.0, 1.0)
    }

    #[must_use]
    pub fn track_plays(&self, track_id: &str) -> usize {
        self.track_plays.get(track_id).copied().unwrap_or(0)
    }
}

/// A generated context playlist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresetPlaylist {
    pub preset: Preset,
    pub name: &'static str,
    /// Plays that passed every condition
    pub matched_plays: usize,
    pub distinct_tracks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_per_artist: Option<usize>,
    pub tracks: Vec<RankedTrack>,
}

/// Build one playlist per preset, in the order given.
///
/// A track's score is the best score among its matching plays.
#[must_use]
pub fn generate_preset_playlists(
    table: &FeatureTable,
    presets: &[Preset],
    num_songs: usize,
    cap: ArtistCap,
) -> Vec<PresetPlaylist> {
    let context = PresetContext::new(table);
    presets
        .par_iter()
        .map(|&preset| preset_playlist(table, &context, preset, num_songs, cap))
        .collect()
}

fn preset_playlist(
    table: &FeatureTable,
    context: &PresetContext,
    preset: Preset,
    num_songs: usize,
    cap: ArtistCap,
) -> PresetPlaylist {
    let conditions = preset.conditions();
    let matching: Vec<&PlayEvent> = table
        .plays()
        .iter()
        .filter(|play| conditions.iter().all(|c| c.matches(play, context)))
        .collect();

    let mut best: HashMap<&str, f64> = HashMap::new();
    for play in &matching {
        let score = preset.score(play, context);
        best.entry(play.track_id.as_str())
            .and_modify(|s| *s = s.max(score))
            .or_insert(score);
    }

    let mut ranked: Vec<RankedTrack> = collect_track_stats(matching.iter().copied())
        .into_iter()
        .map(|stats| RankedTrack {
            score: best.get(stats.track_id.as_str()).copied().unwrap_or(0.0),
            skip_rate: stats.skip_rate(),
            track_id: stats.track_id,
            track_name: stats.track_name,
            artist_id: stats.artist_id,
            plays: stats.plays,
            attention_span: stats.attention_span,
            has_audio_features: stats.has_audio_features,
        })
        .collect();
    ranked.sort_by(compare_ranked);

    let tracks = build_playlist(&ranked, num_songs, cap);
    log::info!(
        "Playlist '{}': {} matching plays, {} of {} tracks",
        preset,
        matching.len(),
        tracks.len(),
        ranked.len()
    );

    PresetPlaylist {
        preset,
        name: preset.name(),
        matched_plays: matching.len(),
        distinct_tracks: ranked.len(),
        max_per_artist: cap.limit(num_songs),
        tracks,
    }
}
