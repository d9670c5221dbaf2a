//! # Ingestion
//!
//! Turns a streaming-history export into a [`FeatureTable`].
//!
//! The export is one or more JSON arrays of records like
//!
//! ```json
//! {
//!   "ts": "2024-12-13T19:04:11Z",
//!   "platform": "HomePod",
//!   "ms_played": 183000,
//!   "conn_country": "DE",
//!   "master_metadata_track_name": "Hyperballad",
//!   "master_metadata_album_artist_name": "Björk",
//!   "spotify_track_uri": "spotify:track:4iV5W9uYEdYUVa79Axb7Rh",
//!   "reason_start": "trackdone",
//!   "reason_end": "fwdbtn",
//!   "shuffle": false
//! }
//! ```
//!
//! Records without a track URI (podcast episodes, audiobooks) are dropped.
//! Audio features come from a separate JSON array keyed by track URI (or bare
//! track id) and are joined on import.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use path_absolutize::Absolutize;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::play::{AudioFeatures, PlayEvent, UNKNOWN_COUNTRY};
use crate::table::FeatureTable;

const TRACK_URI_PREFIX: &str = "spotify:track:";

/// One record of the raw export. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamRecord {
    pub ts: DateTime<Utc>,
    pub platform: Option<String>,
    #[serde(default)]
    pub ms_played: u64,
    pub conn_country: Option<String>,
    pub master_metadata_track_name: Option<String>,
    pub master_metadata_album_artist_name: Option<String>,
    pub spotify_track_uri: Option<String>,
    pub reason_start: Option<String>,
    pub reason_end: Option<String>,
    pub shuffle: Option<bool>,
}

/// One row of an audio-feature dump.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioFeatureRecord {
    #[serde(alias = "uri", alias = "id")]
    pub spotify_track_uri: String,
    pub duration_ms: Option<u64>,
    pub speechiness: Option<f64>,
    pub energy: Option<f64>,
    pub danceability: Option<f64>,
    pub valence: Option<f64>,
    pub popularity: Option<f64>,
}

impl AudioFeatureRecord {
    /// All five features, or nothing.
    fn features(&self) -> Option<AudioFeatures> {
        Some(AudioFeatures {
            speechiness: self.speechiness?,
            energy: self.energy?,
            danceability: self.danceability?,
            valence: self.valence?,
            popularity: self.popularity?,
        })
    }
}

/// Import options
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Devices (`platform` values) to leave out entirely
    pub exclude_devices: Vec<String>,
}

/// Counts from one import, for the log and the CLI summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub records: usize,
    pub without_track: usize,
    pub excluded_device: usize,
    pub enriched: usize,
    pub plays: usize,
}

fn track_key(raw: &str) -> String {
    if raw.starts_with(TRACK_URI_PREFIX) {
        raw.to_string()
    } else {
        format!("{TRACK_URI_PREFIX}{raw}")
    }
}

/// JSON files to read: `path` itself, or every `*.json` in it, by name.
fn export_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files: Vec<PathBuf> = fs::read_dir(path)
        .with_context(|| format!("Failed to read export directory {}", path.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")))
        .collect();
    files.sort();
    if files.is_empty() {
        anyhow::bail!("No .json files found in {}", path.display());
    }
    Ok(files)
}

/// Read every stream record from a file or directory.
pub fn load_stream_records(path: &Path) -> Result<Vec<StreamRecord>> {
    let mut records = Vec::new();
    for file in export_files(path)? {
        let raw = fs::read_to_string(&file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let mut batch: Vec<StreamRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse streaming history {}", file.display()))?;
        log::debug!("{}: {} records", file.display(), batch.len());
        records.append(&mut batch);
    }
    Ok(records)
}

/// Read an audio-feature dump, keyed by track URI.
pub fn load_audio_features(path: &Path) -> Result<HashMap<String, AudioFeatureRecord>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read audio features {}", path.display()))?;
    let records: Vec<AudioFeatureRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse audio features {}", path.display()))?;
    Ok(records
        .into_iter()
        .map(|r| (track_key(&r.spotify_track_uri), r))
        .collect())
}

/// Build play events from raw records, joining audio features.
pub fn build_plays(
    records: Vec<StreamRecord>,
    audio: &HashMap<String, AudioFeatureRecord>,
    options: &IngestOptions,
) -> (Vec<PlayEvent>, IngestSummary) {
    let mut summary = IngestSummary {
        records: records.len(),
        ..IngestSummary::default()
    };
    let mut plays = Vec::with_capacity(records.len());

    for record in records {
        let Some(uri) = record.spotify_track_uri.as_deref().filter(|u| !u.is_empty()) else {
            summary.without_track += 1;
            continue;
        };
        let device = record.platform.unwrap_or_else(|| "unknown".to_string());
        if options.exclude_devices.iter().any(|d| *d == device) {
            summary.excluded_device += 1;
            continue;
        }

        let track_id = track_key(uri);
        let features = audio.get(&track_id);
        let artist = record
            .master_metadata_album_artist_name
            .unwrap_or_else(|| "unknown".to_string());

        let mut play = PlayEvent::new(record.ts, track_id, artist, device)
            .with_country(record.conn_country.unwrap_or_else(|| UNKNOWN_COUNTRY.to_string()))
            .with_reasons(
                record.reason_start.unwrap_or_else(|| "unknown".to_string()),
                record.reason_end.unwrap_or_else(|| "unknown".to_string()),
            )
            .with_playback(record.ms_played, features.and_then(|f| f.duration_ms))
            .with_shuffle(record.shuffle.unwrap_or(false));
        if let Some(name) = record.master_metadata_track_name {
            play = play.with_track_name(name);
        }
        if let Some(audio) = features.and_then(AudioFeatureRecord::features) {
            play = play.with_audio(audio);
            summary.enriched += 1;
        }
        plays.push(play);
    }

    summary.plays = plays.len();
    (plays, summary)
}

/// Load an export (and optionally audio features) into a feature table.
pub fn import(
    export: &Path,
    audio_features: Option<&Path>,
    options: &IngestOptions,
) -> Result<(FeatureTable, IngestSummary)> {
    let display = export.absolutize().map_or_else(
        |_| export.display().to_string(),
        |p| p.display().to_string(),
    );
    log::info!("Importing streaming history from {display}");

    let records = load_stream_records(export)?;
    let audio = match audio_features {
        Some(path) => load_audio_features(path)?,
        None => HashMap::new(),
    };
    let (plays, summary) = build_plays(records, &audio, options);

    log::info!(
        "Imported {} plays ({} without a track, {} on excluded devices, {} with audio features)",
        summary.plays,
        summary.without_track,
        summary.excluded_device,
        summary.enriched
    );
    Ok((FeatureTable::new(plays), summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const EXPORT: &str = r#"[
        {"ts": "2024-12-13T19:04:11Z", "platform": "HomePod", "ms_played": 100000,
         "conn_country": "DE", "master_metadata_track_name": "Song A",
         "master_metadata_album_artist_name": "Artist A",
         "spotify_track_uri": "spotify:track:aaa", "reason_start": "trackdone",
         "reason_end": "fwdbtn", "shuffle": true, "offline": false},
        {"ts": "2024-12-13T18:00:00Z", "platform": "iPhone", "ms_played": 5000,
         "spotify_track_uri": null, "episode_name": "Some podcast"},
        {"ts": "2024-12-13T17:00:00Z", "platform": "Web Player", "ms_played": 5000,
         "master_metadata_album_artist_name": "Artist B",
         "spotify_track_uri": "spotify:track:bbb"}
    ]"#;

    const AUDIO: &str = r#"[
        {"id": "aaa", "duration_ms": 200000, "speechiness": 0.1, "energy": 0.8,
         "danceability": 0.7, "valence": 0.6, "popularity": 55},
        {"uri": "spotify:track:bbb", "duration_ms": 100000, "energy": 0.2}
    ]"#;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_import_joins_and_filters() {
        let dir = TempDir::new().unwrap();
        let export = write(&dir, "Streaming_History_Audio_2024.json", EXPORT);
        let audio = write(&dir, "features.json", AUDIO);

        let (table, summary) = import(&export, Some(&audio), &IngestOptions::default()).unwrap();

        assert_eq!(summary.records, 3);
        assert_eq!(summary.without_track, 1);
        assert_eq!(summary.enriched, 1);
        assert_eq!(table.len(), 2);

        // sorted: Web Player play at 17:00 first
        let first = &table.plays()[0];
        assert_eq!(first.device, "Web Player");
        assert_eq!(first.country, "ZZ");
        // partial features: duration used, audio absent
        assert_eq!(first.attention_span, Some(0.05));
        assert!(first.audio.is_none());

        let second = &table.plays()[1];
        assert_eq!(second.track_id, "spotify:track:aaa");
        assert_eq!(second.track_name.as_deref(), Some("Song A"));
        assert!(second.is_skipped());
        assert!(second.shuffle);
        assert_eq!(second.attention_span, Some(0.5));
        assert_eq!(second.audio.map(|a| a.energy), Some(0.8));
    }

    #[test]
    fn test_exclude_devices() {
        let dir = TempDir::new().unwrap();
        let export = write(&dir, "history.json", EXPORT);
        let options = IngestOptions {
            exclude_devices: vec!["Web Player".to_string()],
        };

        let (table, summary) = import(&export, None, &options).unwrap();
        assert_eq!(summary.excluded_device, 1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.plays()[0].attention_span, None);
    }

    #[test]
    fn test_directory_reads_all_json_files() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.json", EXPORT);
        write(&dir, "b.json", EXPORT);
        write(&dir, "notes.txt", "not json");

        let records = load_stream_records(dir.path()).unwrap();
        assert_eq!(records.len(), 6);
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(load_stream_records(dir.path()).is_err());
    }

    #[test]
    fn test_malformed_export_is_an_error() {
        let dir = TempDir::new().unwrap();
        let export = write(&dir, "bad.json", "{ not an array }");
        assert!(load_stream_records(&export).is_err());
    }
}
