//! Text and JSON rendering of detected patterns and context playlists.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fmt::{self, Write};

use crate::pattern::{Pattern, PatternKind, PatternScope};
use crate::presets::PresetPlaylist;
use crate::ranking::statistics::analyze_score_distribution;
use crate::ranking::RankedTrack;

const RULE: &str = "------------------------------------";

/// Patterns, most significant first, each with its playlist.
pub fn render_patterns(patterns: &[Pattern]) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "\n--- Detected Listening Patterns ---\n")?;
    if patterns.is_empty() {
        writeln!(out, "No significant patterns found.")?;
        return Ok(out);
    }

    let mut ordered: Vec<&Pattern> = patterns.iter().collect();
    ordered.sort_by(|a, b| b.significance.total_cmp(&a.significance));

    for pattern in ordered {
        writeln!(out, "Pattern: {} ({})", pattern.label, pattern.kind)?;
        if !pattern.description.is_empty() {
            writeln!(out, "   Description: {}", pattern.description)?;
        }
        writeln!(out, "   Significance: {:.2}", pattern.significance)?;
        match &pattern.scope {
            PatternScope::Period { start, end, days } => {
                writeln!(out, "   Span: {start} to {end} ({days} days)")?;
            }
            PatternScope::Habit { schema, weeks, .. } => {
                writeln!(out, "   Slot: {} ({schema}, {weeks} weeks)", pattern.scope.context())?;
            }
        }
        writeln!(
            out,
            "   Plays: {} across {} tracks",
            pattern.play_count, pattern.distinct_tracks
        )?;
        write_tracks(&mut out, &pattern.tracks, pattern.distinct_tracks)?;
        writeln!(out, "\n{RULE}\n")?;
    }

    Ok(out)
}

fn write_tracks(out: &mut String, tracks: &[RankedTrack], available: usize) -> fmt::Result {
    if tracks.is_empty() {
        return Ok(());
    }
    writeln!(out, "   Tracks ({} of {available}):", tracks.len())?;
    for track in tracks {
        let name = track.track_name.as_deref().unwrap_or(&track.track_id);
        writeln!(out, "     - {} - {} ({:.3})", name, track.artist_id, track.score)?;
    }
    Ok(())
}

/// Counts by kind, period descriptions and habit slots.
pub fn render_statistics(patterns: &[Pattern]) -> Result<String, fmt::Error> {
    let mut out = String::new();
    if patterns.is_empty() {
        return Ok(out);
    }

    let periods: Vec<&Pattern> = patterns.iter().filter(|p| p.kind == PatternKind::Period).collect();
    let habits: Vec<&Pattern> = patterns.iter().filter(|p| p.kind == PatternKind::Habit).collect();

    writeln!(out, "\n--- Pattern Statistics ---")?;
    writeln!(out, "Total Patterns Found: {}", patterns.len())?;
    writeln!(out, "  - Periods: {}", periods.len())?;
    writeln!(out, "  - Habits: {}", habits.len())?;

    if !periods.is_empty() {
        writeln!(out, "\nPeriod Breakdown:")?;
        for (description, count) in most_common(periods.iter().map(|p| p.description.clone()), 15) {
            writeln!(out, "  - {description}: {count}")?;
        }
    }

    if !habits.is_empty() {
        writeln!(out, "\nHabit Breakdown by Time Slot:")?;
        let slots = habits.iter().filter_map(|p| match &p.scope {
            PatternScope::Habit { slot_name, .. } => Some(slot_name.clone()),
            PatternScope::Period { .. } => None,
        });
        for (slot, count) in most_common(slots, 5) {
            writeln!(out, "  - {slot}: {count} habit(s)")?;
        }
    }

    let scored: Vec<_> = patterns.iter().flat_map(|p| p.tracks.iter().cloned()).collect();
    if let Some(stats) = analyze_score_distribution(&scored) {
        writeln!(
            out,
            "\nTrack scores: mean {:.3}, std {:.3}, range {:.3}..{:.3} over {} tracks",
            stats.mean, stats.std_deviation, stats.min, stats.max, stats.count
        )?;
    }

    writeln!(out, "\n--------------------------\n")?;
    Ok(out)
}

/// Context playlists in the order they were generated.
pub fn render_preset_playlists(playlists: &[PresetPlaylist]) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "\n--- Context Playlists ---\n")?;
    for playlist in playlists {
        write!(out, "Playlist: {} ({} matching plays", playlist.name, playlist.matched_plays)?;
        if let Some(limit) = playlist.max_per_artist {
            write!(out, ", max {limit} per artist")?;
        }
        writeln!(out, ")")?;
        if playlist.tracks.is_empty() {
            writeln!(out, "   No matching tracks.")?;
        }
        write_tracks(&mut out, &playlist.tracks, playlist.distinct_tracks)?;
        writeln!(out, "\n{RULE}\n")?;
    }
    Ok(out)
}

/// Values by descending count, ties by value.
fn most_common<I: Iterator<Item = String>>(values: I, limit: usize) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(limit);
    ranked
}

/// Pretty JSON array of patterns.
pub fn render_json(patterns: &[Pattern]) -> Result<String> {
    serde_json::to_string_pretty(patterns).context("Failed to serialize patterns")
}

/// Pretty JSON array of context playlists.
pub fn render_preset_json(playlists: &[PresetPlaylist]) -> Result<String> {
    serde_json::to_string_pretty(playlists).context("Failed to serialize playlists")
}
