//! # Baseline and Deviation Statistics
//!
//! Both detectors ask the same question of a group of plays (a window, a
//! weekly slot, an audio cluster): does this group look different from the
//! listener's history as a whole? This module answers it with plain z-scores.
//!
//! ## Numerical features
//!
//! ```text
//! z = (mean(group) - mean(baseline)) / std(baseline)
//! ```
//!
//! using the sample standard deviation of the baseline.
//!
//! ## Categorical features
//!
//! Each category value is treated as a 0/1 indicator with baseline share `p`:
//!
//! ```text
//! z = (share(group) - p) / sqrt(p * (1 - p))
//! ```
//!
//! The feature's deviation is its most over-represented value.
//!
//! A feature whose baseline spread is zero (or that has fewer than two
//! baseline samples) cannot discriminate anything and is never flagged.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::play::{CategoricalFeature, NumericFeature, PlayEvent};
use crate::table::FeatureTable;

/// Spreads below this are treated as zero.
const MIN_SPREAD: f64 = 1e-12;

/// Mean, sample standard deviation and count of one numerical feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NumericSummary {
    pub mean: f64,
    pub std_dev: f64,
    pub count: usize,
}

impl NumericSummary {
    /// `None` for an empty input.
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Option<Self> {
        let values: Vec<f64> = values.into_iter().collect();
        if values.is_empty() {
            return None;
        }
        let count = values.len();
        #[allow(clippy::cast_precision_loss)]
        let n = count as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std_dev = if count < 2 {
            0.0
        } else {
            let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (n - 1.0)).sqrt()
        };
        Some(Self { mean, std_dev, count })
    }

    #[must_use]
    pub fn is_discriminating(&self) -> bool {
        self.count >= 2 && self.std_dev.is_finite() && self.std_dev > MIN_SPREAD
    }

    /// z-score of an observed group mean, `None` if non-discriminating.
    #[must_use]
    pub fn z_score(&self, observed_mean: f64) -> Option<f64> {
        self.is_discriminating()
            .then(|| (observed_mean - self.mean) / self.std_dev)
    }
}

/// Value counts of one categorical feature. Iterates in value order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrequencyTable {
    counts: BTreeMap<String, usize>,
    total: usize,
}

impl FrequencyTable {
    pub fn add(&mut self, value: &str) {
        *self.counts.entry(value.to_string()).or_insert(0) += 1;
        self.total += 1;
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    #[must_use]
    pub fn count(&self, value: &str) -> usize {
        self.counts.get(value).copied().unwrap_or(0)
    }

    /// Share of `value`, 0 for an empty table.
    #[must_use]
    pub fn share(&self, value: &str) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let share = self.count(value) as f64 / self.total as f64;
        share
    }

    /// Most frequent value and its share. Ties go to the smaller value.
    #[must_use]
    pub fn dominant(&self) -> Option<(&str, f64)> {
        let mut best: Option<(&str, usize)> = None;
        for (value, &count) in &self.counts {
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((value.as_str(), count));
            }
        }
        best.map(|(value, _)| (value, self.share(value)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counts.iter().map(|(v, &c)| (v.as_str(), c))
    }
}

impl<'a> FromIterator<&'a str> for FrequencyTable {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut table = Self::default();
        for value in iter {
            table.add(value);
        }
        table
    }
}

/// Indicator z-score of one category value.
#[must_use]
pub fn indicator_z(baseline_share: f64, group_share: f64) -> Option<f64> {
    let variance = baseline_share * (1.0 - baseline_share);
    (variance > MIN_SPREAD).then(|| (group_share - baseline_share) / variance.sqrt())
}

/// Reference distribution over the whole history.
#[derive(Debug, Clone, Default)]
pub struct Baseline {
    numeric: BTreeMap<NumericFeature, NumericSummary>,
    categorical: BTreeMap<CategoricalFeature, FrequencyTable>,
    play_count: usize,
}

impl Baseline {
    /// Summarize every known feature over `table`.
    pub fn compute(table: &FeatureTable) -> Self {
        let plays = table.plays();

        let numeric = NumericFeature::ALL
            .iter()
            .filter_map(|&feature| {
                NumericSummary::from_values(plays.iter().filter_map(|p| feature.value(p)))
                    .map(|summary| (feature, summary))
            })
            .collect();

        let categorical = CategoricalFeature::ALL
            .iter()
            .map(|&feature| {
                let mut freq = FrequencyTable::default();
                for play in plays {
                    freq.add(feature.value(play));
                }
                (feature, freq)
            })
            .collect();

        log::debug!("Baseline computed over {} plays", plays.len());

        Self {
            numeric,
            categorical,
            play_count: plays.len(),
        }
    }

    #[must_use]
    pub fn numeric(&self, feature: NumericFeature) -> Option<&NumericSummary> {
        self.numeric.get(&feature)
    }

    #[must_use]
    pub fn categorical(&self, feature: CategoricalFeature) -> Option<&FrequencyTable> {
        self.categorical.get(&feature)
    }

    #[must_use]
    pub fn play_count(&self) -> usize {
        self.play_count
    }
}

/// What a deviation is about: a numerical feature, or one value of a
/// categorical feature.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureKey {
    Numeric { feature: NumericFeature },
    Categorical { feature: CategoricalFeature, value: String },
}

impl FeatureKey {
    #[must_use]
    pub fn categorical_feature(&self) -> Option<CategoricalFeature> {
        match self {
            FeatureKey::Categorical { feature, .. } => Some(*feature),
            FeatureKey::Numeric { .. } => None,
        }
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureKey::Numeric { feature } => write!(f, "{feature}"),
            FeatureKey::Categorical { feature, value } => write!(f, "{feature}={value}"),
        }
    }
}

/// A flagged feature of a group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureDeviation {
    pub key: FeatureKey,
    pub z_score: f64,
    /// Group mean, or group share for a category value.
    pub observed: f64,
    /// Baseline mean, or baseline share.
    pub baseline: f64,
}

impl FeatureDeviation {
    #[must_use]
    pub fn magnitude(&self) -> f64 {
        self.z_score.abs()
    }

    /// Short human phrase, e.g. "High skip rate" or "More HomePod".
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.key {
            FeatureKey::Numeric { feature } => {
                let direction = if self.z_score >= 0.0 { "High" } else { "Low" };
                format!("{direction} {feature}")
            }
            FeatureKey::Categorical { value, .. } => format!("More {value}"),
        }
    }
}

/// Sum of |z| over a set of deviations.
#[must_use]
pub fn significance(deviations: &[FeatureDeviation]) -> f64 {
    deviations.iter().map(FeatureDeviation::magnitude).sum()
}

/// The features to test and the threshold each has to reach.
#[derive(Debug, Clone, Default)]
pub struct DeviationTest {
    numeric: Vec<(NumericFeature, f64)>,
    categorical: Vec<(CategoricalFeature, f64)>,
}

impl DeviationTest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn numeric(mut self, feature: NumericFeature, threshold: f64) -> Self {
        if !self.numeric.iter().any(|(f, _)| *f == feature) {
            self.numeric.push((feature, threshold));
        }
        self
    }

    #[must_use]
    pub fn categorical(mut self, feature: CategoricalFeature, threshold: f64) -> Self {
        if !self.categorical.iter().any(|(f, _)| *f == feature) {
            self.categorical.push((feature, threshold));
        }
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.numeric.is_empty() && self.categorical.is_empty()
    }

    /// Threshold configured for the feature behind `key`.
    #[must_use]
    pub fn threshold_for(&self, key: &FeatureKey) -> Option<f64> {
        match key {
            FeatureKey::Numeric { feature } => self
                .numeric
                .iter()
                .find(|(f, _)| f == feature)
                .map(|(_, t)| *t),
            FeatureKey::Categorical { feature, .. } => self
                .categorical
                .iter()
                .find(|(f, _)| f == feature)
                .map(|(_, t)| *t),
        }
    }

    /// Flagged deviations of a group, numerical features first, each in
    /// configured order. An empty group yields nothing.
    pub fn evaluate<'p, I>(&self, baseline: &Baseline, plays: I) -> Vec<FeatureDeviation>
    where
        I: IntoIterator<Item = &'p PlayEvent>,
    {
        let mut sums = vec![(0.0_f64, 0_usize); self.numeric.len()];
        let mut freqs = vec![FrequencyTable::default(); self.categorical.len()];

        for play in plays {
            for (slot, (feature, _)) in sums.iter_mut().zip(&self.numeric) {
                if let Some(value) = feature.value(play) {
                    slot.0 += value;
                    slot.1 += 1;
                }
            }
            for (freq, (feature, _)) in freqs.iter_mut().zip(&self.categorical) {
                freq.add(feature.value(play));
            }
        }

        let mut flagged = Vec::new();

        for ((sum, count), &(feature, threshold)) in sums.into_iter().zip(&self.numeric) {
            if count == 0 {
                continue;
            }
            let Some(summary) = baseline.numeric(feature) else { continue };
            #[allow(clippy::cast_precision_loss)]
            let observed = sum / count as f64;
            if let Some(z) = summary.z_score(observed) {
                if z.abs() >= threshold {
                    flagged.push(FeatureDeviation {
                        key: FeatureKey::Numeric { feature },
                        z_score: z,
                        observed,
                        baseline: summary.mean,
                    });
                }
            }
        }

        for (freq, &(feature, threshold)) in freqs.iter().zip(&self.categorical) {
            let Some(reference) = baseline.categorical(feature) else { continue };
            if let Some(deviation) = strongest_category(feature, freq, reference) {
                if deviation.z_score >= threshold {
                    flagged.push(deviation);
                }
            }
        }

        flagged
    }
}

/// The most over-represented known value of `group` relative to `reference`.
fn strongest_category(
    feature: CategoricalFeature,
    group: &FrequencyTable,
    reference: &FrequencyTable,
) -> Option<FeatureDeviation> {
    let mut best: Option<FeatureDeviation> = None;
    for (value, _) in group.iter() {
        if feature.is_unknown(value) {
            continue;
        }
        let observed = group.share(value);
        let expected = reference.share(value);
        let Some(z) = indicator_z(expected, observed) else { continue };
        if z > 0.0 && best.as_ref().map_or(true, |b| z > b.z_score) {
            best = Some(FeatureDeviation {
                key: FeatureKey::Categorical {
                    feature,
                    value: value.to_string(),
                },
                z_score: z,
                observed,
                baseline: expected,
            });
        }
    }
    best
}

/// z-score of `key` over a group, `None` when it cannot be computed.
pub fn z_for_key<'p, I>(baseline: &Baseline, key: &FeatureKey, plays: I) -> Option<f64>
where
    I: IntoIterator<Item = &'p PlayEvent>,
{
    match key {
        FeatureKey::Numeric { feature } => {
            let summary = baseline.numeric(*feature)?;
            let (sum, count) = plays
                .into_iter()
                .filter_map(|p| feature.value(p))
                .fold((0.0, 0_usize), |(s, c), v| (s + v, c + 1));
            if count == 0 {
                return None;
            }
            #[allow(clippy::cast_precision_loss)]
            let mean = sum / count as f64;
            summary.z_score(mean)
        }
        FeatureKey::Categorical { feature, value } => {
            let reference = baseline.categorical(*feature)?;
            let (hits, total) = plays.into_iter().fold((0_usize, 0_usize), |(h, t), p| {
                (h + usize::from(feature.value(p) == value.as_str()), t + 1)
            });
            if total == 0 {
                return None;
            }
            #[allow(clippy::cast_precision_loss)]
            let share = hits as f64 / total as f64;
            indicator_z(reference.share(value), share)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::play::{AudioFeatures, UNKNOWN_COUNTRY};
    use chrono::{Duration, TimeZone, Utc};

    fn plays_with_valence(values: &[f64], device: &str) -> Vec<PlayEvent> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                PlayEvent::new(start + Duration::hours(i as i64), format!("t{i}"), "a", device)
                    .with_audio(AudioFeatures { valence: v, ..AudioFeatures::default() })
            })
            .collect()
    }

    #[test]
    fn test_numeric_summary_uses_sample_std() {
        let s = NumericSummary::from_values([2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((s.mean - 5.0).abs() < 1e-12);
        assert!((s.std_dev - (32.0_f64 / 7.0).sqrt()).abs() < 1e-12);
        assert_eq!(s.count, 8);
    }

    #[test]
    fn test_single_sample_is_not_discriminating() {
        let s = NumericSummary::from_values([3.0]).unwrap();
        assert!(!s.is_discriminating());
        assert_eq!(s.z_score(10.0), None);
        assert!(NumericSummary::from_values(Vec::<f64>::new()).is_none());
    }

    #[test]
    fn test_zero_variance_feature_never_flagged() {
        let table = FeatureTable::new(plays_with_valence(&[0.5; 20], "iPhone"));
        let baseline = Baseline::compute(&table);
        let test = DeviationTest::new().numeric(NumericFeature::Valence, 0.01);

        let group = &table.plays()[..5];
        assert!(test.evaluate(&baseline, group).is_empty());
    }

    #[test]
    fn test_numeric_deviation_flagged_both_directions() {
        let mut values = vec![0.5; 18];
        values.extend([0.0, 1.0]);
        let table = FeatureTable::new(plays_with_valence(&values, "iPhone"));
        let baseline = Baseline::compute(&table);
        let test = DeviationTest::new().numeric(NumericFeature::Valence, 2.0);

        let high: Vec<&PlayEvent> =
            table.plays().iter().filter(|p| p.audio.unwrap().valence == 1.0).collect();
        let flagged = test.evaluate(&baseline, high.iter().copied());
        assert_eq!(flagged.len(), 1);
        assert!(flagged[0].z_score > 2.0);
        assert_eq!(flagged[0].describe(), "High valence");

        let low: Vec<&PlayEvent> =
            table.plays().iter().filter(|p| p.audio.unwrap().valence == 0.0).collect();
        let flagged = test.evaluate(&baseline, low.iter().copied());
        assert!(flagged[0].z_score < -2.0);
        assert_eq!(flagged[0].describe(), "Low valence");
    }

    #[test]
    fn test_categorical_picks_most_over_represented_value() {
        let mut plays = plays_with_valence(&[0.5; 16], "iPhone");
        plays.extend(plays_with_valence(&[0.5; 4], "HomePod"));
        let table = FeatureTable::new(plays);
        let baseline = Baseline::compute(&table);
        let test = DeviationTest::new().categorical(CategoricalFeature::Device, 1.0);

        let homepod: Vec<&PlayEvent> =
            table.plays().iter().filter(|p| p.device == "HomePod").collect();
        let flagged = test.evaluate(&baseline, homepod.iter().copied());

        assert_eq!(flagged.len(), 1);
        assert_eq!(
            flagged[0].key,
            FeatureKey::Categorical {
                feature: CategoricalFeature::Device,
                value: "HomePod".to_string()
            }
        );
        // share 1.0 vs baseline 0.2: (1 - 0.2) / sqrt(0.16)
        assert!((flagged[0].z_score - 2.0).abs() < 1e-9);
        assert_eq!(flagged[0].describe(), "More HomePod");
    }

    #[test]
    fn test_empty_group_yields_nothing() {
        let table = FeatureTable::new(plays_with_valence(&[0.1, 0.9, 0.5], "iPhone"));
        let baseline = Baseline::compute(&table);
        let test = DeviationTest::new()
            .numeric(NumericFeature::Valence, 0.1)
            .categorical(CategoricalFeature::Device, 0.1);
        assert!(test.evaluate(&baseline, std::iter::empty()).is_empty());
    }

    #[test]
    fn test_z_for_key_matches_evaluate() {
        let mut values = vec![0.5; 18];
        values.extend([0.0, 1.0]);
        let table = FeatureTable::new(plays_with_valence(&values, "iPhone"));
        let baseline = Baseline::compute(&table);
        let key = FeatureKey::Numeric { feature: NumericFeature::Valence };

        let group = &table.plays()[19..];
        let direct = z_for_key(&baseline, &key, group).unwrap();
        let flagged = DeviationTest::new()
            .numeric(NumericFeature::Valence, 0.0001)
            .evaluate(&baseline, group);
        assert!((direct - flagged[0].z_score).abs() < 1e-12);
    }

    #[test]
    fn test_frequency_table_dominant_breaks_ties_by_name() {
        let freq: FrequencyTable = ["b", "a", "b", "a", "c"].into_iter().collect();
        assert_eq!(freq.dominant(), Some(("a", 0.4)));
        assert_eq!(freq.total(), 5);
    }

    #[test]
    fn test_unknown_country_never_flagged() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let plays: Vec<PlayEvent> = (0..40)
            .map(|i| {
                let country = if i < 10 { UNKNOWN_COUNTRY } else { "DE" };
                PlayEvent::new(start + Duration::hours(i), format!("t{i}"), "a", "iPhone")
                    .with_country(country)
            })
            .collect();
        let table = FeatureTable::new(plays);
        let baseline = Baseline::compute(&table);
        let test = DeviationTest::new().categorical(CategoricalFeature::Country, 0.5);

        // Every play of the group is ZZ: share 1.0 vs 0.25 would be z = 1.73
        let unknown: Vec<&PlayEvent> =
            table.plays().iter().filter(|p| p.country == UNKNOWN_COUNTRY).collect();
        assert!(test.evaluate(&baseline, unknown.iter().copied()).is_empty());

        // A known country in the same position is still reported
        let known: Vec<&PlayEvent> = table.plays().iter().filter(|p| p.country == "DE").collect();
        let flagged = test.evaluate(&baseline, known.iter().copied());
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].describe(), "More DE");
    }
}
