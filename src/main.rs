//! # Muse Patterns
//!
//! Finds listening periods and weekly habits in a streaming-history export and
//! prints a ranked playlist for each.
//!
//! ## Usage
//!
//! ```bash
//! # Import an export (file or directory) into the cache
//! muse-patterns import ~/Downloads/my_spotify_data --audio-features features.json
//!
//! # Detect and print patterns
//! muse-patterns find-patterns -n 25 --stats
//!
//! # Same, as JSON, one track per artist at most
//! muse-patterns find-patterns --json --max-per-artist 1
//!
//! # Context playlists
//! muse-patterns playlists --preset commute --preset focus
//! ```

use anyhow::Result;
use clap::{CommandFactory, Parser};
use log::info;
use std::io;
use std::path::{Path, PathBuf};

use muse_patterns::cli;
use muse_patterns::completion;
use muse_patterns::config::{DetectionConfig, RuntimeConfig};
use muse_patterns::db;
use muse_patterns::finder::find_patterns;
use muse_patterns::ingest::{self, IngestOptions};
use muse_patterns::playlist::apply_artist_cap;
use muse_patterns::presets::{generate_preset_playlists, Preset};
use muse_patterns::report;
use muse_patterns::FeatureTable;

/// Feature table from an export read directly, or from the cache.
fn load_table(
    input: Option<&Path>,
    audio_features: Option<&Path>,
    cache: Option<PathBuf>,
) -> Result<FeatureTable> {
    let table = match input {
        Some(input) => ingest::import(input, audio_features, &IngestOptions::default())?.0,
        None => {
            let runtime = RuntimeConfig::with_cache_path(cache)?;
            db::load_table(&runtime.cache_path)?
        }
    };
    Ok(table)
}

/// Main entry point.
///
/// Logging is controlled via `RUST_LOG`:
/// - `RUST_LOG=info muse-patterns find-patterns` - Progress messages
/// - `RUST_LOG=muse_patterns::habits=trace muse-patterns find-patterns` - Slot decisions
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();

    match args.command {
        cli::Command::Import {
            path,
            audio_features,
            exclude_devices,
            cache,
        } => {
            let runtime = RuntimeConfig::with_cache_path(cache)?;
            let options = IngestOptions { exclude_devices };
            let (table, summary) = ingest::import(&path, audio_features.as_deref(), &options)?;

            let written = db::save_table(&runtime.cache_path, &table)?;
            info!("Cache written to {}", runtime.cache_path.display());
            println!(
                "Imported {written} plays ({} with audio features, {} skipped without a track) into {}",
                summary.enriched,
                summary.without_track,
                runtime.cache_path.display()
            );
        }
        cli::Command::FindPatterns {
            cache,
            input,
            audio_features,
            config,
            num_songs,
            max_per_artist,
            json,
            stats,
        } => {
            let detection = DetectionConfig::load(config.as_deref())?;

            let table = load_table(input.as_deref(), audio_features.as_deref(), cache)?;
            info!("Searching {} plays for patterns", table.len());

            let mut patterns = find_patterns(&table, &detection, num_songs)?;
            if let Some(cap) = max_per_artist {
                apply_artist_cap(&mut patterns, &table, detection.weights, num_songs, cap);
            }

            if json {
                println!("{}", report::render_json(&patterns)?);
            } else {
                print!("{}", report::render_patterns(&patterns)?);
                if stats {
                    print!("{}", report::render_statistics(&patterns)?);
                }
            }
        }
        cli::Command::Playlists {
            cache,
            input,
            audio_features,
            presets,
            num_songs,
            max_per_artist,
            json,
        } => {
            let table = load_table(input.as_deref(), audio_features.as_deref(), cache)?;
            let presets = if presets.is_empty() {
                Preset::ALL.to_vec()
            } else {
                presets
            };
            info!("Building {} context playlist(s) from {} plays", presets.len(), table.len());

            let playlists = generate_preset_playlists(&table, &presets, num_songs, max_per_artist);
            if json {
                println!("{}", report::render_preset_json(&playlists)?);
            } else {
                print!("{}", report::render_preset_playlists(&playlists)?);
            }
        }
        cli::Command::Config { config } => {
            let detection = DetectionConfig::load(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&detection)?);
        }
        cli::Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            completion::generate_completions(
                completion::shell_to_completion_shell(shell),
                &mut cmd,
                &mut io::stdout(),
            );
        }
    }

    Ok(())
}
