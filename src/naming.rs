//! Human-readable labels for detected patterns.
//!
//! A pattern is named after whatever dominates its plays: one artist if it
//! holds enough of them, otherwise one device, otherwise the time-of-day or
//! season bucket most of the plays fall in.

use serde::Serialize;

use crate::config::NamingConfig;
use crate::pattern::PatternKind;
use crate::play::{CategoricalFeature, PlayEvent};
use crate::stats::{FeatureDeviation, FrequencyTable};

/// Which feature a label was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelBasis {
    Artist,
    Device,
    TimeOfDay,
    Season,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternLabel {
    pub text: String,
    pub basis: LabelBasis,
    /// The dominant value, e.g. the artist
    pub value: String,
    /// Share of the pattern's plays the value holds
    pub share: f64,
}

/// Label a pattern from its context ("Friday Evening", a date span), its
/// flagged features and its plays.
pub fn label_pattern<'p, I>(
    context: &str,
    kind: PatternKind,
    deviations: &[FeatureDeviation],
    plays: I,
    config: &NamingConfig,
) -> PatternLabel
where
    I: IntoIterator<Item = &'p PlayEvent>,
{
    let mut artists = FrequencyTable::default();
    let mut devices = FrequencyTable::default();
    let mut times = FrequencyTable::default();
    let mut seasons = FrequencyTable::default();
    for play in plays {
        artists.add(&play.artist_id);
        devices.add(&play.device);
        times.add(play.time_of_day.as_str());
        seasons.add(play.season.as_str());
    }

    if let Some((artist, share)) = artists.dominant() {
        if share >= config.top_artist_share {
            return PatternLabel {
                text: format!("{context} with {artist}"),
                basis: LabelBasis::Artist,
                value: artist.to_string(),
                share,
            };
        }
    }

    if let Some((device, share)) = devices.dominant() {
        if share >= config.min_device_share {
            return PatternLabel {
                text: format!("{context} on {device}"),
                basis: LabelBasis::Device,
                value: device.to_string(),
                share,
            };
        }
    }

    let basis = fallback_basis(kind, deviations);
    let table = match basis {
        LabelBasis::Season => &seasons,
        _ => &times,
    };
    let (value, share) = table
        .dominant()
        .map(|(v, s)| (v.to_string(), s))
        .unwrap_or_default();

    PatternLabel {
        text: if value.is_empty() {
            context.to_string()
        } else {
            format!("{context}, mostly {value}")
        },
        basis,
        value,
        share,
    }
}

/// Time of day or season, whichever deviates more. With neither flagged,
/// habits use time of day and periods use season.
fn fallback_basis(kind: PatternKind, deviations: &[FeatureDeviation]) -> LabelBasis {
    let strongest = |feature: CategoricalFeature| {
        deviations
            .iter()
            .filter(|d| d.key.categorical_feature() == Some(feature))
            .map(FeatureDeviation::magnitude)
            .fold(None, |best: Option<f64>, z| Some(best.map_or(z, |b| b.max(z))))
    };

    match (
        strongest(CategoricalFeature::TimeOfDay),
        strongest(CategoricalFeature::Season),
    ) {
        (Some(t), Some(s)) if s > t => LabelBasis::Season,
        (Some(_), _) => LabelBasis::TimeOfDay,
        (None, Some(_)) => LabelBasis::Season,
        (None, None) => match kind {
            PatternKind::Habit => LabelBasis::TimeOfDay,
            PatternKind::Period => LabelBasis::Season,
        },
    }
}

/// Flagged features in words, strongest first, e.g.
/// "High skip rate, More HomePod, Low attention span".
#[must_use]
pub fn describe_deviations(deviations: &[FeatureDeviation]) -> String {
    let mut ordered: Vec<&FeatureDeviation> = deviations.iter().collect();
    ordered.sort_by(|a, b| {
        b.magnitude()
            .total_cmp(&a.magnitude())
            .then_with(|| a.key.cmp(&b.key))
    });
    ordered
        .iter()
        .map(|d| d.describe())
        .collect::<Vec<_>>()
        .join(", ")
}
