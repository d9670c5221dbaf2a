//! Detected patterns as handed to the report and playlist stages.

use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

use crate::habits::{SlotKey, SlotSchema};
use crate::naming::LabelBasis;
use crate::ranking::RankedTrack;
use crate::stats::FeatureDeviation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Period,
    Habit,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternKind::Period => f.write_str("period"),
            PatternKind::Habit => f.write_str("habit"),
        }
    }
}

/// Where in time a pattern lives.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatternScope {
    Period {
        start: NaiveDate,
        end: NaiveDate,
        days: i64,
    },
    Habit {
        schema: SlotSchema,
        slot: SlotKey,
        /// Human form of the slot, e.g. "Friday Evening"
        slot_name: String,
        weeks: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        audio_profile: Option<usize>,
    },
}

impl PatternScope {
    /// "2024-12-10 to 2024-12-19", "Friday Evening" or
    /// "Friday Evening (audio profile 2)".
    #[must_use]
    pub fn context(&self) -> String {
        match self {
            PatternScope::Period { start, end, .. } => format!("{start} to {end}"),
            PatternScope::Habit {
                slot_name,
                audio_profile: Some(profile),
                ..
            } => format!("{slot_name} (audio profile {profile})"),
            PatternScope::Habit { slot_name, .. } => slot_name.clone(),
        }
    }
}

/// A named period or habit with its ranked tracks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pattern {
    pub kind: PatternKind,
    pub label: String,
    pub label_basis: LabelBasis,
    /// Flagged features in words, strongest first
    pub description: String,
    pub scope: PatternScope,
    pub deviations: Vec<FeatureDeviation>,
    /// Sum of |z| over the flagged features
    pub significance: f64,
    pub play_count: usize,
    pub distinct_tracks: usize,
    pub tracks: Vec<RankedTrack>,
    /// Feature-table rows the pattern was detected on
    #[serde(skip)]
    pub rows: Vec<usize>,
}
