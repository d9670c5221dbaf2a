//! # Habit Detection
//!
//! A habit is a slot of the week that keeps coming back with the same
//! signature: Friday evenings on the living-room speaker with lots of skips,
//! weekday mornings with low-energy tracks.
//!
//! ## Schemas
//!
//! Each play falls into at most one slot per schema:
//!
//! | Schema                  | Slot                                   | Slots      |
//! |-------------------------|----------------------------------------|------------|
//! | `time_of_day`           | Morning / Afternoon / Evening / Night  | 4          |
//! | `week_part_time_of_day` | weekday or weekend × time of day       | 8          |
//! | `day_time_of_day`       | day of week × time of day              | 28         |
//! | `day_device`            | day of week × top device (or "Other")  | 7 × (n+1)  |
//! | `season_time_of_day`    | season × time of day                   | 16         |
//! | `month_time_of_day`     | calendar month × time of day           | 48         |
//! | `country_time_of_day`   | country × time of day                  | 4 × c      |
//! | `day_country`           | day of week × country                  | 7 × c      |
//!
//! `c` counts the known countries in the history. Plays from the unknown
//! country `ZZ` have no slot in the country schemas.
//!
//! ## Selection
//!
//! A slot needs enough distinct ISO weeks and enough plays, then at least
//! `min_num_features` flagged features. Each schema keeps its strongest slots,
//! and candidates from all schemas are accepted greedily by significance,
//! dropping any slot that shares plays with one already accepted.
//!
//! Two slots holding exactly the same plays with the same significance are the
//! same habit, and the finer schema names it. Otherwise equal significance
//! goes to the coarser slot: when every Friday-evening slot carries the same
//! signature as the whole evening, the habit is the evening.
//!
//! Accepted habits can be split further by audio profile; see
//! [`crate::cluster`].

use chrono::Datelike;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::cluster::{standardize, KMeans};
use crate::config::DetectionConfig;
use crate::play::{CategoricalFeature, DayOfWeek, PlayEvent, Season, TimeOfDay, WeekPart};
use crate::stats::{self, Baseline, DeviationTest, FeatureDeviation};
use crate::table::FeatureTable;

/// Device bucket for everything outside the top devices.
pub const OTHER_DEVICE: &str = "Other";

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Ways of cutting the calendar into slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotSchema {
    TimeOfDay,
    WeekPartTimeOfDay,
    DayTimeOfDay,
    DayDevice,
    SeasonTimeOfDay,
    MonthTimeOfDay,
    CountryTimeOfDay,
    DayCountry,
}

impl SlotSchema {
    pub const ALL: [SlotSchema; 8] = [
        SlotSchema::TimeOfDay,
        SlotSchema::WeekPartTimeOfDay,
        SlotSchema::DayTimeOfDay,
        SlotSchema::DayDevice,
        SlotSchema::SeasonTimeOfDay,
        SlotSchema::MonthTimeOfDay,
        SlotSchema::CountryTimeOfDay,
        SlotSchema::DayCountry,
    ];

    /// Granularity of the schema: how many distinct slots it can produce.
    ///
    /// `countries` is the number of known countries in the history; a history
    /// without any still counts as one.
    #[must_use]
    pub const fn slot_count(self, top_platforms: usize, countries: usize) -> usize {
        let countries = if countries == 0 { 1 } else { countries };
        match self {
            SlotSchema::TimeOfDay => 4,
            SlotSchema::WeekPartTimeOfDay => 8,
            SlotSchema::DayTimeOfDay => 28,
            SlotSchema::DayDevice => 7 * (top_platforms + 1),
            SlotSchema::SeasonTimeOfDay => 16,
            SlotSchema::MonthTimeOfDay => 48,
            SlotSchema::CountryTimeOfDay => 4 * countries,
            SlotSchema::DayCountry => 7 * countries,
        }
    }

    /// Categorical features that are fixed within a slot and so not tested.
    #[must_use]
    pub const fn key_features(self) -> &'static [CategoricalFeature] {
        match self {
            SlotSchema::TimeOfDay => &[CategoricalFeature::TimeOfDay],
            SlotSchema::WeekPartTimeOfDay | SlotSchema::DayTimeOfDay => {
                &[CategoricalFeature::DayOfWeek, CategoricalFeature::TimeOfDay]
            }
            SlotSchema::DayDevice => &[CategoricalFeature::DayOfWeek, CategoricalFeature::Device],
            // A month fixes its season
            SlotSchema::SeasonTimeOfDay | SlotSchema::MonthTimeOfDay => {
                &[CategoricalFeature::Season, CategoricalFeature::TimeOfDay]
            }
            SlotSchema::CountryTimeOfDay => {
                &[CategoricalFeature::Country, CategoricalFeature::TimeOfDay]
            }
            SlotSchema::DayCountry => &[CategoricalFeature::DayOfWeek, CategoricalFeature::Country],
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SlotSchema::TimeOfDay => "time_of_day",
            SlotSchema::WeekPartTimeOfDay => "week_part_time_of_day",
            SlotSchema::DayTimeOfDay => "day_time_of_day",
            SlotSchema::DayDevice => "day_device",
            SlotSchema::SeasonTimeOfDay => "season_time_of_day",
            SlotSchema::MonthTimeOfDay => "month_time_of_day",
            SlotSchema::CountryTimeOfDay => "country_time_of_day",
            SlotSchema::DayCountry => "day_country",
        }
    }

    /// The slot `play` falls into, `None` when the schema has no slot for it.
    fn slot_for(self, play: &PlayEvent, devices: &DeviceBuckets) -> Option<SlotKey> {
        let country = || {
            (!CategoricalFeature::Country.is_unknown(&play.country))
                .then(|| SlotComponent::Country(play.country.clone()))
        };
        let components = match self {
            SlotSchema::TimeOfDay => vec![SlotComponent::TimeOfDay(play.time_of_day)],
            SlotSchema::WeekPartTimeOfDay => vec![
                SlotComponent::WeekPart(play.week_part()),
                SlotComponent::TimeOfDay(play.time_of_day),
            ],
            SlotSchema::DayTimeOfDay => vec![
                SlotComponent::Day(play.day_of_week),
                SlotComponent::TimeOfDay(play.time_of_day),
            ],
            SlotSchema::DayDevice => vec![
                SlotComponent::Day(play.day_of_week),
                SlotComponent::Device(devices.bucket(&play.device).to_string()),
            ],
            SlotSchema::SeasonTimeOfDay => vec![
                SlotComponent::Season(play.season),
                SlotComponent::TimeOfDay(play.time_of_day),
            ],
            SlotSchema::MonthTimeOfDay => vec![
                SlotComponent::Month(play.timestamp.month()),
                SlotComponent::TimeOfDay(play.time_of_day),
            ],
            SlotSchema::CountryTimeOfDay => {
                vec![SlotComponent::TimeOfDay(play.time_of_day), country()?]
            }
            SlotSchema::DayCountry => vec![SlotComponent::Day(play.day_of_week), country()?],
        };
        Some(SlotKey(components))
    }
}

impl fmt::Display for SlotSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One coordinate of a slot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SlotComponent {
    Day(DayOfWeek),
    WeekPart(WeekPart),
    TimeOfDay(TimeOfDay),
    Device(String),
    Season(Season),
    /// Calendar month, 1-12
    Month(u32),
    Country(String),
}

/// A recurring slot, e.g. `[Friday, Evening]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SlotKey(pub Vec<SlotComponent>);

impl SlotKey {
    #[must_use]
    pub fn components(&self) -> &[SlotComponent] {
        &self.0
    }
}

/// "Friday Evening", "Weekend Morning", "Friday on HomePod", "December
/// Evening", "Friday in DE". The "Other" device bucket is left out of the name.
impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::with_capacity(self.0.len());
        for component in &self.0 {
            match component {
                SlotComponent::Day(day) => parts.push(day.to_string()),
                SlotComponent::WeekPart(part) => parts.push(part.to_string()),
                SlotComponent::TimeOfDay(tod) => parts.push(tod.to_string()),
                SlotComponent::Device(device) if device == OTHER_DEVICE => {}
                SlotComponent::Device(device) => parts.push(format!("on {device}")),
                SlotComponent::Season(season) => parts.push(season.to_string()),
                SlotComponent::Month(month) => {
                    let name = usize::try_from(*month)
                        .ok()
                        .and_then(|m| m.checked_sub(1))
                        .and_then(|i| MONTH_NAMES.get(i));
                    match name {
                        Some(name) => parts.push((*name).to_string()),
                        None => parts.push(format!("Month {month}")),
                    }
                }
                SlotComponent::Country(country) => parts.push(format!("in {country}")),
            }
        }
        f.write_str(&parts.join(" "))
    }
}

/// Number of distinct known countries in the history.
fn known_countries(table: &FeatureTable) -> usize {
    table
        .plays()
        .iter()
        .map(|p| p.country.as_str())
        .filter(|c| !CategoricalFeature::Country.is_unknown(c))
        .collect::<BTreeSet<_>>()
        .len()
}

/// Top-n devices by play count; ties broken by name.
#[derive(Debug, Clone)]
struct DeviceBuckets {
    top: BTreeSet<String>,
}

impl DeviceBuckets {
    fn new(table: &FeatureTable, top_platforms: usize) -> Self {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for play in table.plays() {
            *counts.entry(play.device.as_str()).or_insert(0) += 1;
        }
        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        let top = ranked
            .into_iter()
            .take(top_platforms)
            .map(|(device, _)| device.to_string())
            .collect();
        Self { top }
    }

    fn bucket<'a>(&self, device: &'a str) -> &'a str {
        if self.top.contains(device) {
            device
        } else {
            OTHER_DEVICE
        }
    }
}

/// A detected habit, or an audio sub-habit of one.
#[derive(Debug, Clone, PartialEq)]
pub struct Habit {
    pub schema: SlotSchema,
    pub slot: SlotKey,
    /// Table rows, ascending
    pub rows: Vec<usize>,
    /// Distinct ISO weeks the rows span
    pub weeks: usize,
    pub deviations: Vec<FeatureDeviation>,
    pub significance: f64,
    /// Set on sub-habits: 1-based audio profile within the parent slot
    pub audio_profile: Option<usize>,
}

impl Habit {
    #[must_use]
    pub fn play_count(&self) -> usize {
        self.rows.len()
    }
}

/// Significance rounded to a fixed grid, so comparisons form a total order.
fn significance_rank(significance: f64) -> i64 {
    #[allow(clippy::cast_possible_truncation)]
    let rank = (significance * 1e6).round() as i64;
    rank
}

fn distinct_weeks(table: &FeatureTable, rows: &[usize]) -> usize {
    table
        .select(rows)
        .map(PlayEvent::iso_week)
        .collect::<BTreeSet<_>>()
        .len()
}

fn habit_test(config: &DetectionConfig, schema: SlotSchema) -> DeviationTest {
    let habit = &config.habit;
    let test = habit
        .numeric_features
        .iter()
        .fold(DeviationTest::new(), |test, &f| test.numeric(f, habit.threshold_for(f)));
    habit
        .categorical_features
        .iter()
        .filter(|f| !schema.key_features().contains(*f))
        .fold(test, |test, &f| test.categorical(f, habit.zscore_threshold))
}

/// Detect habits ordered by schema, slot, then audio profile.
pub fn detect_habits(
    table: &FeatureTable,
    baseline: &Baseline,
    config: &DetectionConfig,
) -> Vec<Habit> {
    let habit_config = &config.habit;
    let devices = DeviceBuckets::new(table, habit_config.top_platforms);
    let countries = known_countries(table);

    let candidates: Vec<Habit> = habit_config
        .schemas
        .iter()
        .flat_map(|&schema| schema_candidates(table, baseline, config, schema, &devices))
        .collect();
    log::debug!("{} habit candidate slot(s) before overlap resolution", candidates.len());

    let accepted = resolve_overlaps(candidates, table.len(), config, countries);

    let mut habits = Vec::with_capacity(accepted.len());
    for parent in accepted {
        let subs = if habit_config.audio.enabled {
            audio_sub_habits(table, baseline, config, &parent)
        } else {
            Vec::new()
        };
        habits.push(parent);
        habits.extend(subs);
    }

    let schema_position = |schema: SlotSchema| {
        habit_config
            .schemas
            .iter()
            .position(|s| *s == schema)
            .unwrap_or(usize::MAX)
    };
    habits.sort_by(|a, b| {
        schema_position(a.schema)
            .cmp(&schema_position(b.schema))
            .then_with(|| a.slot.cmp(&b.slot))
            .then_with(|| a.audio_profile.cmp(&b.audio_profile))
    });

    log::info!("Detected {} habit(s)", habits.len());
    habits
}

/// Qualifying slots of one schema, strongest first, capped.
fn schema_candidates(
    table: &FeatureTable,
    baseline: &Baseline,
    config: &DetectionConfig,
    schema: SlotSchema,
    devices: &DeviceBuckets,
) -> Vec<Habit> {
    let habit_config = &config.habit;

    let mut slots: BTreeMap<SlotKey, Vec<usize>> = BTreeMap::new();
    for (row, play) in table.plays().iter().enumerate() {
        if let Some(slot) = schema.slot_for(play, devices) {
            slots.entry(slot).or_default().push(row);
        }
    }
    let slots: Vec<(SlotKey, Vec<usize>)> = slots.into_iter().collect();
    let test = habit_test(config, schema);

    let mut candidates: Vec<Habit> = slots
        .into_par_iter()
        .filter_map(|(slot, rows)| {
            if rows.len() < habit_config.min_streams_per_slot
                || rows.len() < config.min_tracks_for_playlist
            {
                return None;
            }
            let weeks = distinct_weeks(table, &rows);
            if weeks < habit_config.min_weeks {
                return None;
            }
            let deviations = test.evaluate(baseline, table.select(&rows));
            if deviations.len() < habit_config.min_num_features {
                return None;
            }
            let significance = stats::significance(&deviations);
            Some(Habit {
                schema,
                slot,
                rows,
                weeks,
                deviations,
                significance,
                audio_profile: None,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        significance_rank(b.significance)
            .cmp(&significance_rank(a.significance))
            .then_with(|| a.slot.cmp(&b.slot))
    });
    candidates.truncate(habit_config.max_slots_per_schema);

    log::debug!("Schema {}: {} candidate slot(s)", schema, candidates.len());
    candidates
}

/// Greedy acceptance: strongest first, coarser slot on ties, no shared plays.
///
/// A candidate whose rows and significance are matched exactly by a finer
/// schema's candidate is dropped first, so the finer name survives.
fn resolve_overlaps(
    candidates: Vec<Habit>,
    table_len: usize,
    config: &DetectionConfig,
    countries: usize,
) -> Vec<Habit> {
    let top = config.habit.top_platforms;
    let schemas = &config.habit.schemas;
    let position = |schema: SlotSchema| schemas.iter().position(|s| *s == schema);
    let granularity = |habit: &Habit| habit.schema.slot_count(top, countries);
    // Lower wins: finer schema, then configured order
    let naming_order = |habit: &Habit| (Reverse(granularity(habit)), position(habit.schema));

    let renamed: Vec<bool> = candidates
        .iter()
        .map(|candidate| {
            candidates.iter().any(|other| {
                other.rows == candidate.rows
                    && significance_rank(other.significance)
                        == significance_rank(candidate.significance)
                    && naming_order(other) < naming_order(candidate)
            })
        })
        .collect();
    let mut candidates: Vec<Habit> = candidates
        .into_iter()
        .zip(renamed)
        .filter_map(|(candidate, renamed)| {
            if renamed {
                log::trace!(
                    "Dropping {} slot {}: same plays as a finer slot",
                    candidate.schema,
                    candidate.slot
                );
            }
            (!renamed).then_some(candidate)
        })
        .collect();

    candidates.sort_by(|a, b| {
        significance_rank(b.significance)
            .cmp(&significance_rank(a.significance))
            .then_with(|| granularity(a).cmp(&granularity(b)))
            .then_with(|| position(a.schema).cmp(&position(b.schema)))
            .then_with(|| a.slot.cmp(&b.slot))
    });

    let mut claimed = vec![false; table_len];
    let mut accepted = Vec::new();

    for candidate in candidates {
        if candidate.rows.iter().any(|&row| claimed[row]) {
            log::trace!(
                "Dropping {} slot {}: overlaps an accepted habit",
                candidate.schema,
                candidate.slot
            );
            continue;
        }
        for &row in &candidate.rows {
            claimed[row] = true;
        }
        accepted.push(candidate);
    }

    accepted
}

/// Split a habit's tracks into audio profiles and keep the substantial ones.
fn audio_sub_habits(
    table: &FeatureTable,
    baseline: &Baseline,
    config: &DetectionConfig,
    parent: &Habit,
) -> Vec<Habit> {
    let audio = &config.habit.audio;
    if audio.features.len() < 2 {
        return Vec::new();
    }

    let mut vectors: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for play in table.select(&parent.rows) {
        if vectors.contains_key(play.track_id.as_str()) {
            continue;
        }
        let values: Option<Vec<f64>> = audio.features.iter().map(|f| f.value(play)).collect();
        if let Some(values) = values {
            vectors.insert(play.track_id.as_str(), values);
        }
    }
    if vectors.len() < audio.k * 3 {
        log::trace!(
            "Slot {} has {} enriched tracks, not clustering",
            parent.slot,
            vectors.len()
        );
        return Vec::new();
    }

    let (tracks, points): (Vec<&str>, Vec<Vec<f64>>) = vectors.into_iter().unzip();
    let Some(clustering) = KMeans::new(audio.k, audio.seed)
        .with_max_iterations(audio.max_iterations)
        .fit(&standardize(&points))
    else {
        return Vec::new();
    };
    let cluster_of: BTreeMap<&str, usize> =
        tracks.into_iter().zip(clustering.assignments).collect();

    let mut members: Vec<Vec<usize>> = vec![Vec::new(); audio.k];
    for &row in &parent.rows {
        let Some(play) = table.get(row) else { continue };
        if let Some(&cluster) = cluster_of.get(play.track_id.as_str()) {
            members[cluster].push(row);
        }
    }

    let test = habit_test(config, parent.schema);
    #[allow(clippy::cast_precision_loss)]
    let parent_plays = parent.rows.len() as f64;

    let mut retained: Vec<Habit> = members
        .into_iter()
        .filter_map(|rows| {
            #[allow(clippy::cast_precision_loss)]
            let share = rows.len() as f64 / parent_plays;
            if share < audio.min_share || rows.len() < config.min_tracks_for_playlist {
                return None;
            }
            let weeks = distinct_weeks(table, &rows);
            if weeks < audio.min_weeks {
                return None;
            }
            let deviations = test.evaluate(baseline, table.select(&rows));
            let significance = stats::significance(&deviations);
            Some(Habit {
                schema: parent.schema,
                slot: parent.slot.clone(),
                rows,
                weeks,
                deviations,
                significance,
                audio_profile: None,
            })
        })
        .collect();

    // Number profiles by size, largest first
    retained.sort_by(|a, b| b.rows.len().cmp(&a.rows.len()).then_with(|| a.rows.cmp(&b.rows)));
    for (i, habit) in retained.iter_mut().enumerate() {
        habit.audio_profile = Some(i + 1);
    }

    log::debug!(
        "Slot {} split into {} audio profile(s)",
        parent.slot,
        retained.len()
    );
    retained
}
