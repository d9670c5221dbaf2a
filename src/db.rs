//! SQLite cache of the imported feature table.
//!
//! Calendar and sequence features are not stored: they are pure functions of
//! the stored columns and are rebuilt by [`FeatureTable::new`] on load.

use anyhow::{Context, Result};
use chrono::DateTime;
use log::trace;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::play::{AudioFeatures, PlayEvent};
use crate::table::FeatureTable;

/// Open (or create) the cache at `path`.
pub fn connect(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Rusqlite DB connection refused. DB location: {path:?}"))?;
    Ok(conn)
}

fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS plays (
            id            INTEGER PRIMARY KEY,
            ts_ms         INTEGER NOT NULL,
            track_id      TEXT    NOT NULL,
            track_name    TEXT,
            artist_id     TEXT    NOT NULL,
            device        TEXT    NOT NULL,
            country       TEXT    NOT NULL,
            reason_start  TEXT    NOT NULL,
            reason_end    TEXT    NOT NULL,
            ms_played     INTEGER NOT NULL,
            duration_ms   INTEGER,
            shuffle       INTEGER NOT NULL,
            speechiness   REAL,
            energy        REAL,
            danceability  REAL,
            valence       REAL,
            popularity    REAL
        )",
        (),
    )
    .context("Invalid SQL command when CREATEing plays TABLE.")?;
    Ok(())
}

/// Replace the cached table with `table`, in one transaction.
/// Returns the number of rows written.
pub fn save_table(path: &Path, table: &FeatureTable) -> Result<usize> {
    let mut conn = connect(path)?;
    let tx = conn.transaction()?;

    tx.execute("DROP TABLE IF EXISTS plays", ())
        .context("Failed to DROP previous plays TABLE.")?;
    create_table(&tx)?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO plays (ts_ms, track_id, track_name, artist_id, device, country,
                reason_start, reason_end, ms_played, duration_ms, shuffle,
                speechiness, energy, danceability, valence, popularity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        )?;

        for play in table.plays() {
            let audio = play.audio;
            stmt.execute(rusqlite::params![
                play.timestamp.timestamp_millis(),
                play.track_id,
                play.track_name,
                play.artist_id,
                play.device,
                play.country,
                play.reason_start,
                play.reason_end,
                to_sql_int(play.ms_played),
                play.duration_ms.map(to_sql_int),
                play.shuffle,
                audio.map(|a| a.speechiness),
                audio.map(|a| a.energy),
                audio.map(|a| a.danceability),
                audio.map(|a| a.valence),
                audio.map(|a| a.popularity),
            ])
            .with_context(|| format!("Invalid SQL statement when INSERTing play: {play:?}"))?;
        }
    }

    tx.commit().context("Commiting SQL transaction failed.")?;
    trace!("Wrote {} plays to {}", table.len(), path.display());
    Ok(table.len())
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// A row as stored, before conversion
struct CachedRow {
    ts_ms: i64,
    track_id: String,
    track_name: Option<String>,
    artist_id: String,
    device: String,
    country: String,
    reason_start: String,
    reason_end: String,
    ms_played: i64,
    duration_ms: Option<i64>,
    shuffle: bool,
    audio: [Option<f64>; 5],
}

impl CachedRow {
    fn into_play(self) -> Result<PlayEvent> {
        let timestamp = DateTime::from_timestamp_millis(self.ts_ms)
            .with_context(|| format!("Cached timestamp out of range: {}", self.ts_ms))?;

        let mut play = PlayEvent::new(timestamp, self.track_id, self.artist_id, self.device)
            .with_country(self.country)
            .with_reasons(self.reason_start, self.reason_end)
            .with_playback(
                from_sql_int(self.ms_played),
                self.duration_ms.map(from_sql_int),
            )
            .with_shuffle(self.shuffle);
        if let Some(name) = self.track_name {
            play = play.with_track_name(name);
        }
        if let [Some(speechiness), Some(energy), Some(danceability), Some(valence), Some(popularity)] =
            self.audio
        {
            play = play.with_audio(AudioFeatures {
                speechiness,
                energy,
                danceability,
                valence,
                popularity,
            });
        }
        Ok(play)
    }
}

/// Load the cached table from `path`.
pub fn load_table(path: &Path) -> Result<FeatureTable> {
    if !path.exists() {
        anyhow::bail!(
            "No cache at {}. Run `muse-patterns import` first.",
            path.display()
        );
    }
    let conn = connect(path)?;

    let exists: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'plays'",
            [],
            |row| row.get(0),
        )
        .optional()
        .context("Cannot inspect cache schema.")?;
    if exists.is_none() {
        anyhow::bail!("Cache at {} has no plays table.", path.display());
    }

    let mut stmt = conn
        .prepare(
            "SELECT ts_ms, track_id, track_name, artist_id, device, country, reason_start,
                reason_end, ms_played, duration_ms, shuffle,
                speechiness, energy, danceability, valence, popularity
             FROM plays ORDER BY id",
        )
        .context("Invalid SQL statement when SELECTing FROM plays.")?;

    let rows = stmt
        .query_map([], |row| {
            Ok(CachedRow {
                ts_ms: row.get(0)?,
                track_id: row.get(1)?,
                track_name: row.get(2)?,
                artist_id: row.get(3)?,
                device: row.get(4)?,
                country: row.get(5)?,
                reason_start: row.get(6)?,
                reason_end: row.get(7)?,
                ms_played: row.get(8)?,
                duration_ms: row.get(9)?,
                shuffle: row.get(10)?,
                audio: [row.get(11)?, row.get(12)?, row.get(13)?, row.get(14)?, row.get(15)?],
            })
        })
        .context("Cannot query plays.")?;

    let mut plays = Vec::new();
    for row in rows {
        let row = row.context("Queried play unwrap failed.")?;
        plays.push(row.into_play()?);
    }
    trace!("Loaded {} plays from {}", plays.len(), path.display());

    Ok(FeatureTable::new(plays))
}
