//! One detection run: validate, baseline, detect, name, rank.

use crate::config::{ConfigError, DetectionConfig};
use crate::habits::{self, Habit};
use crate::naming::{describe_deviations, label_pattern};
use crate::pattern::{Pattern, PatternKind, PatternScope};
use crate::periods::{self, Period};
use crate::ranking::{rank_tracks, RankingContext};
use crate::stats::{Baseline, FeatureDeviation};
use crate::table::FeatureTable;

/// Runs both detectors over one feature table.
///
/// The configuration is validated on construction, so a finder that exists
/// can always run.
#[derive(Debug)]
pub struct PatternFinder<'a> {
    table: &'a FeatureTable,
    config: &'a DetectionConfig,
}

impl<'a> PatternFinder<'a> {
    pub fn new(table: &'a FeatureTable, config: &'a DetectionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { table, config })
    }

    /// Periods (chronological) followed by habits (schema, slot, profile),
    /// each with up to `num_songs` ranked tracks.
    #[must_use]
    pub fn find(&self, num_songs: usize) -> Vec<Pattern> {
        if self.table.is_empty() {
            log::warn!("Feature table is empty, nothing to detect");
            return Vec::new();
        }

        let baseline = Baseline::compute(self.table);
        let ranking = RankingContext::new(self.config.weights);

        let periods = periods::detect_periods(self.table, &baseline, self.config);
        let habits = habits::detect_habits(self.table, &baseline, self.config);

        let mut patterns = Vec::with_capacity(periods.len() + habits.len());
        patterns.extend(
            periods
                .into_iter()
                .map(|period| self.period_pattern(period, &ranking, num_songs)),
        );
        patterns.extend(
            habits
                .into_iter()
                .map(|habit| self.habit_pattern(habit, &ranking, num_songs)),
        );

        log::info!("Found {} pattern(s)", patterns.len());
        patterns
    }

    fn period_pattern(&self, period: Period, ranking: &RankingContext, num_songs: usize) -> Pattern {
        let scope = PatternScope::Period {
            start: period.start,
            end: period.end,
            days: period.days(),
        };
        let rows: Vec<usize> = period.rows.collect();
        self.build(
            PatternKind::Period,
            scope,
            period.deviations,
            period.significance,
            rows,
            ranking,
            num_songs,
        )
    }

    fn habit_pattern(&self, habit: Habit, ranking: &RankingContext, num_songs: usize) -> Pattern {
        let scope = PatternScope::Habit {
            schema: habit.schema,
            slot_name: habit.slot.to_string(),
            slot: habit.slot,
            weeks: habit.weeks,
            audio_profile: habit.audio_profile,
        };
        self.build(
            PatternKind::Habit,
            scope,
            habit.deviations,
            habit.significance,
            habit.rows,
            ranking,
            num_songs,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        kind: PatternKind,
        scope: PatternScope,
        deviations: Vec<FeatureDeviation>,
        significance: f64,
        rows: Vec<usize>,
        ranking: &RankingContext,
        num_songs: usize,
    ) -> Pattern {
        let label = label_pattern(
            &scope.context(),
            kind,
            &deviations,
            self.table.select(&rows),
            &self.config.naming,
        );
        let all_tracks = rank_tracks(self.table.select(&rows), ranking, usize::MAX);
        let distinct_tracks = all_tracks.len();
        let mut tracks = all_tracks;
        tracks.truncate(num_songs);

        log::debug!(
            "{} '{}': {} plays, {} tracks",
            kind,
            label.text,
            rows.len(),
            distinct_tracks
        );

        Pattern {
            kind,
            label: label.text,
            label_basis: label.basis,
            description: describe_deviations(&deviations),
            scope,
            deviations,
            significance,
            play_count: rows.len(),
            distinct_tracks,
            tracks,
            rows,
        }
    }
}

/// Validate `config` and run one detection pass over `table`.
pub fn find_patterns(
    table: &FeatureTable,
    config: &DetectionConfig,
    num_songs: usize,
) -> Result<Vec<Pattern>, ConfigError> {
    Ok(PatternFinder::new(table, config)?.find(num_songs))
}
