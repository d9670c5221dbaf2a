//! Finds recurring listening patterns in a personal streaming history and
//! turns each one into a playlist.
//!
//! Two kinds of pattern are detected:
//!
//! - **Periods**: calendar spans where listening differed from the rest of
//!   the history (a December of upbeat tracks, a week abroad).
//! - **Habits**: weekly slots that keep showing the same signature (Friday
//!   evenings on the living-room speaker, skipping a lot).
//!
//! Core modules:
//! - [`play`] / [`table`] - Play events and the time-ordered feature table
//! - [`stats`] - Baseline distribution and the z-score deviation test
//! - [`periods`] - Sliding-window period detection
//! - [`habits`] / [`cluster`] - Weekly slot habits and audio sub-profiles
//! - [`naming`] - Pattern labels and descriptions
//! - [`ranking`] - Track scoring within a pattern
//! - [`finder`] - One detection run end to end
//!
//! ### Supporting Modules
//!
//! - [`ingest`] - Streaming-history export and audio-feature import
//! - [`db`] - SQLite cache of the feature table
//! - [`config`] - Data directory and detection parameters
//! - [`playlist`] - Playlist assembly with artist caps
//! - [`presets`] - Context playlists from fixed recipes
//! - [`report`] - Text and JSON output
//! - [`cli`] / [`completion`] - Command-line interface
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use muse_patterns::config::DetectionConfig;
//! use muse_patterns::finder::find_patterns;
//! use muse_patterns::ingest::{import, IngestOptions};
//! use std::path::Path;
//!
//! let (table, _summary) = import(
//!     Path::new("my_spotify_data/"),
//!     Some(Path::new("audio_features.json")),
//!     &IngestOptions::default(),
//! )?;
//!
//! let config = DetectionConfig::default();
//! for pattern in find_patterns(&table, &config, 20)? {
//!     println!("{} ({} tracks)", pattern.label, pattern.tracks.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Error Handling
//!
//! Import, cache and CLI functions return `anyhow::Result` with context.
//! Detection itself cannot fail once the configuration is valid; an invalid
//! configuration is reported as [`config::ConfigError`] before anything runs.
//! Too little data is never an error, it just yields fewer patterns.
//!
//! ## Logging
//!
//! Everything logs through the `log` facade. The binary installs
//! `env_logger`, so `RUST_LOG=muse_patterns=debug` shows detector decisions.

pub mod cli;
pub mod cluster;
pub mod completion;
pub mod config;
pub mod db;
pub mod finder;
pub mod habits;
pub mod ingest;
pub mod naming;
pub mod pattern;
pub mod periods;
pub mod play;
pub mod playlist;
pub mod presets;
pub mod ranking;
pub mod report;
pub mod stats;
pub mod table;

pub use config::{ConfigError, DetectionConfig};
pub use finder::{find_patterns, PatternFinder};
pub use pattern::{Pattern, PatternKind, PatternScope};
pub use play::PlayEvent;
pub use table::FeatureTable;
