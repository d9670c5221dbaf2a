//! # Play Events
//!
//! One [`PlayEvent`] is one row of the enriched feature table: a single stream
//! of a single track on a single device. Calendar features (time of day, day of
//! week, season) are derived from the timestamp when the event is built, and
//! audio features are optional because not every track can be matched to an
//! external feature source.
//!
//! The feature enums ([`NumericFeature`], [`CategoricalFeature`]) are the
//! vocabulary used by configuration files and by the detectors to read values
//! out of a play without caring which column they live in.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

/// End reasons that count as the listener skipping the track.
pub const SKIP_END_REASONS: &[&str] = &["fwdbtn"];

/// Country code used when the export does not know where a play happened.
pub const UNKNOWN_COUNTRY: &str = "ZZ";

/// Coarse hour block of a play (UTC hours).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimeOfDay {
    /// 06:00 - 11:59
    Morning,
    /// 12:00 - 17:59
    Afternoon,
    /// 18:00 - 21:59
    Evening,
    /// 22:00 - 05:59
    Night,
}

impl TimeOfDay {
    pub const ALL: [TimeOfDay; 4] = [
        TimeOfDay::Morning,
        TimeOfDay::Afternoon,
        TimeOfDay::Evening,
        TimeOfDay::Night,
    ];

    #[must_use]
    pub const fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => TimeOfDay::Morning,
            12..=17 => TimeOfDay::Afternoon,
            18..=21 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TimeOfDay::Morning => "Morning",
            TimeOfDay::Afternoon => "Afternoon",
            TimeOfDay::Evening => "Evening",
            TimeOfDay::Night => "Night",
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Day of the week, ordered Monday first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            DayOfWeek::Monday => "Monday",
            DayOfWeek::Tuesday => "Tuesday",
            DayOfWeek::Wednesday => "Wednesday",
            DayOfWeek::Thursday => "Thursday",
            DayOfWeek::Friday => "Friday",
            DayOfWeek::Saturday => "Saturday",
            DayOfWeek::Sunday => "Sunday",
        }
    }

    #[must_use]
    pub const fn week_part(self) -> WeekPart {
        match self {
            DayOfWeek::Saturday | DayOfWeek::Sunday => WeekPart::Weekend,
            _ => WeekPart::Weekday,
        }
    }
}

impl From<Weekday> for DayOfWeek {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weekday/weekend split of the week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WeekPart {
    Weekday,
    Weekend,
}

impl WeekPart {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            WeekPart::Weekday => "Weekday",
            WeekPart::Weekend => "Weekend",
        }
    }
}

impl fmt::Display for WeekPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Meteorological season (northern hemisphere).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Season {
    Spring,
    Summer,
    Fall,
    Winter,
}

impl Season {
    #[must_use]
    pub const fn from_month(month: u32) -> Self {
        match month {
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            9..=11 => Season::Fall,
            _ => Season::Winter,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Season::Spring => "Spring",
            Season::Summer => "Summer",
            Season::Fall => "Fall",
            Season::Winter => "Winter",
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audio features joined from an external source.
///
/// All values are present or the whole record is absent; a partially matched
/// track is treated as unmatched.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub speechiness: f64,
    pub energy: f64,
    pub danceability: f64,
    pub valence: f64,
    /// 0-100 popularity as reported by the feature source.
    pub popularity: f64,
}

/// A single stream of a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayEvent {
    pub timestamp: DateTime<Utc>,
    pub track_id: String,
    /// Display name, when the export carried one.
    pub track_name: Option<String>,
    pub artist_id: String,
    pub device: String,
    pub country: String,
    pub reason_start: String,
    pub reason_end: String,
    pub ms_played: u64,
    pub duration_ms: Option<u64>,
    pub shuffle: bool,

    // Derived features
    pub time_of_day: TimeOfDay,
    pub day_of_week: DayOfWeek,
    pub season: Season,
    /// `ms_played / duration_ms`, capped at 1. Undefined without a duration.
    pub attention_span: Option<f64>,
    /// Seconds since the previous play in the table (0 for the first play).
    pub session_gap_s: f64,
    /// Consecutive plays of this artist ending at this play (1 = no run).
    pub artist_loyalty: u32,

    pub audio: Option<AudioFeatures>,
}

impl PlayEvent {
    /// Build a play with calendar features derived from `timestamp`.
    ///
    /// Playback defaults to a complete, unskipped play of unknown duration in
    /// country `ZZ` (unknown); use the `with_*` methods to fill in the rest.
    pub fn new(
        timestamp: DateTime<Utc>,
        track_id: impl Into<String>,
        artist_id: impl Into<String>,
        device: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            track_id: track_id.into(),
            track_name: None,
            artist_id: artist_id.into(),
            device: device.into(),
            country: UNKNOWN_COUNTRY.to_string(),
            reason_start: "trackdone".to_string(),
            reason_end: "trackdone".to_string(),
            ms_played: 0,
            duration_ms: None,
            shuffle: false,
            time_of_day: TimeOfDay::from_hour(timestamp.hour()),
            day_of_week: DayOfWeek::from(timestamp.weekday()),
            season: Season::from_month(timestamp.month()),
            attention_span: None,
            session_gap_s: 0.0,
            artist_loyalty: 1,
            audio: None,
        }
    }

    #[must_use]
    pub fn with_track_name(mut self, name: impl Into<String>) -> Self {
        self.track_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = country.into();
        self
    }

    #[must_use]
    pub fn with_reasons(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.reason_start = start.into();
        self.reason_end = end.into();
        self
    }

    /// Set playback length and recompute the attention span.
    #[must_use]
    pub fn with_playback(mut self, ms_played: u64, duration_ms: Option<u64>) -> Self {
        self.ms_played = ms_played;
        self.duration_ms = duration_ms;
        self.attention_span = attention_span(ms_played, duration_ms);
        self
    }

    #[must_use]
    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    #[must_use]
    pub fn with_audio(mut self, audio: AudioFeatures) -> Self {
        self.audio = Some(audio);
        self
    }

    #[must_use]
    pub fn is_skipped(&self) -> bool {
        SKIP_END_REASONS.contains(&self.reason_end.as_str())
    }

    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    /// ISO (year, week) the play falls in.
    #[must_use]
    pub fn iso_week(&self) -> (i32, u32) {
        let week = self.timestamp.iso_week();
        (week.year(), week.week())
    }

    #[must_use]
    pub fn week_part(&self) -> WeekPart {
        self.day_of_week.week_part()
    }

    #[must_use]
    pub fn has_audio_features(&self) -> bool {
        self.audio.is_some()
    }
}

fn attention_span(ms_played: u64, duration_ms: Option<u64>) -> Option<f64> {
    match duration_ms {
        Some(duration) if duration > 0 => {
            #[allow(clippy::cast_precision_loss)]
            let ratio = ms_played as f64 / duration as f64;
            Some(ratio.min(1.0))
        }
        _ => None,
    }
}

/// Numerical columns the detectors can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericFeature {
    /// 1.0 for a skipped play, 0.0 otherwise; its mean is the skip rate.
    SkipRate,
    AttentionSpan,
    SessionGap,
    ArtistLoyalty,
    Speechiness,
    Energy,
    Danceability,
    Valence,
    Popularity,
}

impl NumericFeature {
    pub const ALL: [NumericFeature; 9] = [
        NumericFeature::SkipRate,
        NumericFeature::AttentionSpan,
        NumericFeature::SessionGap,
        NumericFeature::ArtistLoyalty,
        NumericFeature::Speechiness,
        NumericFeature::Energy,
        NumericFeature::Danceability,
        NumericFeature::Valence,
        NumericFeature::Popularity,
    ];

    /// Read this feature from a play. `None` when the play lacks the column.
    #[must_use]
    pub fn value(self, play: &PlayEvent) -> Option<f64> {
        match self {
            NumericFeature::SkipRate => Some(if play.is_skipped() { 1.0 } else { 0.0 }),
            NumericFeature::AttentionSpan => play.attention_span,
            NumericFeature::SessionGap => Some(play.session_gap_s),
            NumericFeature::ArtistLoyalty => Some(f64::from(play.artist_loyalty)),
            NumericFeature::Speechiness => play.audio.map(|a| a.speechiness),
            NumericFeature::Energy => play.audio.map(|a| a.energy),
            NumericFeature::Danceability => play.audio.map(|a| a.danceability),
            NumericFeature::Valence => play.audio.map(|a| a.valence),
            NumericFeature::Popularity => play.audio.map(|a| a.popularity),
        }
    }

    /// Listening-behavior features, as opposed to track audio features.
    #[must_use]
    pub const fn is_behavioral(self) -> bool {
        matches!(
            self,
            NumericFeature::SkipRate
                | NumericFeature::AttentionSpan
                | NumericFeature::SessionGap
                | NumericFeature::ArtistLoyalty
        )
    }

    #[must_use]
    pub const fn is_audio(self) -> bool {
        !self.is_behavioral()
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            NumericFeature::SkipRate => "skip rate",
            NumericFeature::AttentionSpan => "attention span",
            NumericFeature::SessionGap => "session gap",
            NumericFeature::ArtistLoyalty => "artist loyalty",
            NumericFeature::Speechiness => "speechiness",
            NumericFeature::Energy => "energy",
            NumericFeature::Danceability => "danceability",
            NumericFeature::Valence => "valence",
            NumericFeature::Popularity => "popularity",
        }
    }
}

impl fmt::Display for NumericFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categorical columns the detectors can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoricalFeature {
    Artist,
    Device,
    Country,
    TimeOfDay,
    DayOfWeek,
    Season,
    Shuffle,
    ReasonStart,
    ReasonEnd,
}

impl CategoricalFeature {
    pub const ALL: [CategoricalFeature; 9] = [
        CategoricalFeature::Artist,
        CategoricalFeature::Device,
        CategoricalFeature::Country,
        CategoricalFeature::TimeOfDay,
        CategoricalFeature::DayOfWeek,
        CategoricalFeature::Season,
        CategoricalFeature::Shuffle,
        CategoricalFeature::ReasonStart,
        CategoricalFeature::ReasonEnd,
    ];

    #[must_use]
    pub fn value(self, play: &PlayEvent) -> &str {
        match self {
            CategoricalFeature::Artist => &play.artist_id,
            CategoricalFeature::Device => &play.device,
            CategoricalFeature::Country => &play.country,
            CategoricalFeature::TimeOfDay => play.time_of_day.as_str(),
            CategoricalFeature::DayOfWeek => play.day_of_week.as_str(),
            CategoricalFeature::Season => play.season.as_str(),
            CategoricalFeature::Shuffle => {
                if play.shuffle {
                    "shuffle"
                } else {
                    "in order"
                }
            }
            CategoricalFeature::ReasonStart => &play.reason_start,
            CategoricalFeature::ReasonEnd => &play.reason_end,
        }
    }

    /// Whether `value` stands for "not known" rather than a real category.
    ///
    /// Unknown values are never reported as a deviation.
    #[must_use]
    pub fn is_unknown(self, value: &str) -> bool {
        self == CategoricalFeature::Country && value == UNKNOWN_COUNTRY
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            CategoricalFeature::Artist => "artist",
            CategoricalFeature::Device => "device",
            CategoricalFeature::Country => "country",
            CategoricalFeature::TimeOfDay => "time of day",
            CategoricalFeature::DayOfWeek => "day of week",
            CategoricalFeature::Season => "season",
            CategoricalFeature::Shuffle => "shuffle",
            CategoricalFeature::ReasonStart => "start reason",
            CategoricalFeature::ReasonEnd => "end reason",
        }
    }
}

impl fmt::Display for CategoricalFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_calendar_features_derived_from_timestamp() {
        // 2024-12-13 is a Friday
        let play = PlayEvent::new(at(2024, 12, 13, 19), "t1", "a1", "HomePod");

        assert_eq!(play.time_of_day, TimeOfDay::Evening);
        assert_eq!(play.day_of_week, DayOfWeek::Friday);
        assert_eq!(play.season, Season::Winter);
        assert_eq!(play.week_part(), WeekPart::Weekday);
        assert_eq!(play.iso_week(), (2024, 50));
    }

    #[test]
    fn test_time_of_day_boundaries() {
        assert_eq!(TimeOfDay::from_hour(5), TimeOfDay::Night);
        assert_eq!(TimeOfDay::from_hour(6), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::from_hour(12), TimeOfDay::Afternoon);
        assert_eq!(TimeOfDay::from_hour(18), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::from_hour(21), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::from_hour(22), TimeOfDay::Night);
    }

    #[test]
    fn test_attention_span_is_capped_and_optional() {
        let base = PlayEvent::new(at(2024, 1, 1, 10), "t1", "a1", "iPhone");

        let full = base.clone().with_playback(300_000, Some(200_000));
        assert_eq!(full.attention_span, Some(1.0));

        let half = base.clone().with_playback(100_000, Some(200_000));
        assert_eq!(half.attention_span, Some(0.5));

        let unknown = base.clone().with_playback(100_000, None);
        assert_eq!(unknown.attention_span, None);

        let zero_duration = base.with_playback(100_000, Some(0));
        assert_eq!(zero_duration.attention_span, None);
    }

    #[test]
    fn test_skip_detection_uses_end_reason() {
        let base = PlayEvent::new(at(2024, 1, 1, 10), "t1", "a1", "iPhone");
        assert!(!base.is_skipped());
        assert!(base.clone().with_reasons("clickrow", "fwdbtn").is_skipped());
        assert!(!base.with_reasons("fwdbtn", "trackdone").is_skipped());
    }

    #[test]
    fn test_audio_features_absent_without_enrichment() {
        let play = PlayEvent::new(at(2024, 1, 1, 10), "t1", "a1", "iPhone");
        assert_eq!(NumericFeature::Valence.value(&play), None);
        assert_eq!(NumericFeature::SkipRate.value(&play), Some(0.0));

        let enriched = play.with_audio(AudioFeatures {
            valence: 0.8,
            ..AudioFeatures::default()
        });
        assert_eq!(NumericFeature::Valence.value(&enriched), Some(0.8));
    }

    #[test]
    fn test_feature_names_serialize_snake_case() {
        let json = serde_json::to_string(&NumericFeature::SkipRate).unwrap();
        assert_eq!(json, "\"skip_rate\"");
        let parsed: CategoricalFeature = serde_json::from_str("\"time_of_day\"").unwrap();
        assert_eq!(parsed, CategoricalFeature::TimeOfDay);
    }

    #[test]
    fn test_categorical_values_borrow_from_play() {
        let play = PlayEvent::new(at(2024, 12, 13, 19), "t1", "a1", "HomePod")
            .with_country("DE")
            .with_shuffle(true);

        assert_eq!(CategoricalFeature::Device.value(&play), "HomePod");
        assert_eq!(CategoricalFeature::Country.value(&play), "DE");
        assert_eq!(CategoricalFeature::TimeOfDay.value(&play), "Evening");
        assert_eq!(CategoricalFeature::Shuffle.value(&play), "shuffle");
    }

    #[test]
    fn test_only_unknown_country_is_unknown() {
        let play = PlayEvent::new(at(2024, 12, 13, 19), "t1", "ZZ", "HomePod");

        assert_eq!(play.country, UNKNOWN_COUNTRY);
        assert!(CategoricalFeature::Country.is_unknown(UNKNOWN_COUNTRY));
        assert!(!CategoricalFeature::Country.is_unknown("DE"));
        // An artist that happens to be called ZZ is still an artist
        assert!(!CategoricalFeature::Artist.is_unknown(CategoricalFeature::Artist.value(&play)));
    }
}
