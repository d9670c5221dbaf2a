//! # Command-Line Interface Module
//!
//! This module defines the command-line interface for Muse Patterns using Clap
//! derive macros.
//!
//! ## Commands
//!
//! - `import`: Read a streaming-history export into the local cache
//! - `find-patterns`: Detect periods and habits and print their playlists
//! - `playlists`: Build context playlists from fixed presets
//! - `config`: Print the effective detection configuration
//! - `completion`: Generate shell completions
//!
//! ## Examples
//!
//! ```bash
//! muse-patterns import ~/Downloads/my_spotify_data --audio-features features.json
//! muse-patterns find-patterns -n 30 --max-per-artist auto
//! muse-patterns find-patterns --json > patterns.json
//! muse-patterns playlists --preset workout --preset evening-chill -n 25
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::playlist::ArtistCap;
use crate::presets::Preset;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Main application arguments structure.
#[derive(Parser, Debug)]
#[command(name = "muse-patterns")]
#[command(about = "Muse Patterns: find listening periods & habits in your streaming history")]
#[command(version)]
pub struct Args {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Enumeration of all available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import a streaming-history export into the cache
    ///
    /// Reads one export JSON file, or every .json file in a directory, joins
    /// optional audio features, derives the feature table and replaces the
    /// cache with it. Records without a track (podcasts) are skipped.
    Import {
        /// Export file or directory
        path: PathBuf,

        /// JSON array of audio features keyed by track URI or id
        #[arg(long)]
        audio_features: Option<PathBuf>,

        /// Device (platform) to leave out; may be repeated
        #[arg(long = "exclude-device", value_name = "DEVICE")]
        exclude_devices: Vec<String>,

        /// Cache file to write instead of the default location
        #[arg(long)]
        cache: Option<PathBuf>,
    },

    /// Detect listening periods and habits and rank their tracks
    ///
    /// Loads the cached feature table (or imports --input directly), runs
    /// period and habit detection and prints every pattern with its
    /// playlist.
    FindPatterns {
        /// Cache file to read instead of the default location
        #[arg(long, conflicts_with = "input")]
        cache: Option<PathBuf>,

        /// Read this export directly instead of the cache
        #[arg(long)]
        input: Option<PathBuf>,

        /// Audio features to join when reading --input
        #[arg(long, requires = "input")]
        audio_features: Option<PathBuf>,

        /// Detection configuration (JSON); missing keys keep their defaults
        #[arg(long, env = "MUSE_PATTERNS_CONFIG")]
        config: Option<PathBuf>,

        /// Tracks per playlist
        #[arg(short = 'n', long, default_value = "20")]
        num_songs: usize,

        /// Limit tracks per artist: a number, 'auto' (15% of the playlist) or 'none'
        #[arg(long, value_parser = clap::value_parser!(ArtistCap))]
        max_per_artist: Option<ArtistCap>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Also print summary statistics (text output only)
        #[arg(long)]
        stats: bool,
    },

    /// Build context playlists (commute, workout, focus, ...) from presets
    ///
    /// Each preset filters the history by fixed conditions, scores the
    /// matching plays and keeps the best distinct tracks.
    Playlists {
        /// Cache file to read instead of the default location
        #[arg(long, conflicts_with = "input")]
        cache: Option<PathBuf>,

        /// Read this export directly instead of the cache
        #[arg(long)]
        input: Option<PathBuf>,

        /// Audio features to join when reading --input
        #[arg(long, requires = "input")]
        audio_features: Option<PathBuf>,

        /// Preset to build; may be repeated. All presets when omitted
        #[arg(short = 'p', long = "preset", value_enum, ignore_case = true)]
        presets: Vec<Preset>,

        /// Tracks per playlist
        #[arg(short = 'n', long, default_value = "20")]
        num_songs: usize,

        /// Limit tracks per artist: a number, 'auto' (15% of the playlist) or 'none'
        #[arg(long, default_value = "auto", value_parser = clap::value_parser!(ArtistCap))]
        max_per_artist: ArtistCap,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Print the effective detection configuration as JSON
    ///
    /// Useful as a starting point for a custom configuration file.
    Config {
        /// Configuration file to merge over the defaults
        #[arg(long, env = "MUSE_PATTERNS_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Generate shell completions
    ///
    /// Usage: muse-patterns completion bash > ~/.local/share/bash-completion/completions/muse-patterns
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },
}
