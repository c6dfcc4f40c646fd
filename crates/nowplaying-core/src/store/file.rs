//! Flat-file store.
//!
//! ## Layout (inside the data directory)
//!
//!   history.tsv    append-only, one row per recorded play:
//!                  station_url  artist  song  played_at (RFC 3339)
//!   stations.json  station registry + last-played table, rewritten on change
//!
//! A play is appended to history.tsv before stations.json is rewritten.  If
//! the process dies in between, the newer history row wins at the next load.
//!
//! Memory holds only the newest `tail_rows` plays per station.  Pages past
//! that tail are read back from history.tsv.  The snapshot rewrite is
//! proportional to the number of stations, not to the history length.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info, warn};

use super::memory::{entry, read, write, Tables};
use super::{HistoryEntry, HistoryStore, LastPlayed, StationInfo};
use crate::error::Result;

const HISTORY_FILE: &str = "history.tsv";
const SNAPSHOT_FILE: &str = "stations.json";
const HISTORY_HEADER: &str = "station_url\tartist\tsong\tplayed_at\n";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    stations: BTreeSet<String>,
    #[serde(default)]
    last_played: HashMap<String, LastPlayed>,
}

pub struct FileStore {
    tables: RwLock<Tables>,
    history_path: PathBuf,
    snapshot_path: PathBuf,
}

impl FileStore {
    /// Open (or create) the store in `dir`, keeping at most `tail_rows`
    /// history rows per station in memory.
    pub fn open(dir: &Path, tail_rows: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let history_path = dir.join(HISTORY_FILE);
        let snapshot_path = dir.join(SNAPSHOT_FILE);

        let snapshot = load_snapshot(&snapshot_path)?;
        let mut tables = Tables::with_tail(tail_rows);
        tables.stations = snapshot.stations;
        tables.last_played = snapshot.last_played;

        let mut row_count = 0;
        for_each_row(&history_path, |row| {
            row_count += 1;
            tables.push_history(row);
        })?;
        reconcile(&mut tables);

        info!(
            "[store] Loaded {} stations, {} history rows from {}",
            tables.stations.len(),
            row_count,
            dir.display()
        );

        Ok(Self {
            tables: RwLock::new(tables),
            history_path,
            snapshot_path,
        })
    }

    fn append_row(&self, row: &HistoryEntry) -> Result<()> {
        let exists = self.history_path.exists();
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history_path)?;
        if !exists {
            f.write_all(HISTORY_HEADER.as_bytes())?;
        }
        f.write_all(encode_row(row).as_bytes())?;
        Ok(())
    }

    fn save_snapshot(&self, tables: &Tables) -> Result<()> {
        let snapshot = Snapshot {
            stations: tables.stations.clone(),
            last_played: tables.last_played.clone(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;
        let tmp = self.snapshot_path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.snapshot_path)?;
        Ok(())
    }

    /// The history row is already durable when this runs, so a failed
    /// snapshot only costs a reconcile at the next load.
    fn save_snapshot_after_append(&self, tables: &Tables) {
        if let Err(e) = self.save_snapshot(tables) {
            warn!("[store] Failed to rewrite {}: {}", self.snapshot_path.display(), e);
        }
    }
}

impl HistoryStore for FileStore {
    fn last_played(&self, url: &str) -> Result<Option<LastPlayed>> {
        Ok(read(&self.tables)?.last_played.get(url).cloned())
    }

    fn append_history(&self, url: &str, artist: &str, song: &str, at: DateTime<Utc>) -> Result<()> {
        let mut t = write(&self.tables)?;
        let row = entry(url, artist, song, t.next_played_at(url, at));
        self.append_row(&row)?;
        t.push_history(row);
        Ok(())
    }

    fn upsert_last_played(
        &self,
        url: &str,
        artist: &str,
        song: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut t = write(&self.tables)?;
        let at = t.next_played_at(url, at);
        t.set_last_played(url, artist, song, at);
        self.save_snapshot(&t)
    }

    fn record_play(
        &self,
        url: &str,
        artist: &str,
        song: &str,
        at: DateTime<Utc>,
    ) -> Result<HistoryEntry> {
        let mut t = write(&self.tables)?;
        let row = entry(url, artist, song, t.next_played_at(url, at));
        self.append_row(&row)?;
        t.push_history(row.clone());
        t.set_last_played(url, artist, song, row.played_at);
        self.save_snapshot_after_append(&t);
        debug!("[store] Recorded {} | {} - {}", url, artist, song);
        Ok(row)
    }

    fn list_history(&self, url: &str, limit: usize, offset: usize) -> Result<Vec<HistoryEntry>> {
        let t = read(&self.tables)?;
        if t.covers(url, limit, offset) {
            return Ok(t.history_page(url, limit, offset));
        }
        // Appends take the write lock, so the file is stable while we scan.
        debug!("[store] Scanning {} for {} (offset {})", HISTORY_FILE, url, offset);
        scan_page(&self.history_path, url, limit, offset)
    }

    fn list_stations(&self) -> Result<Vec<String>> {
        Ok(read(&self.tables)?.stations.iter().cloned().collect())
    }

    fn register_station(&self, url: &str) -> Result<bool> {
        let mut t = write(&self.tables)?;
        if !t.stations.insert(url.to_string()) {
            return Ok(false);
        }
        if let Err(e) = self.save_snapshot(&t) {
            t.stations.remove(url);
            return Err(e);
        }
        info!("[store] Registered station {}", url);
        Ok(true)
    }

    fn station_info(&self, url: &str, limit: usize) -> Result<StationInfo> {
        let t = read(&self.tables)?;
        if t.covers(url, limit, 0) {
            return Ok(t.info(url, limit));
        }
        Ok(StationInfo {
            last_played: t.last_played.get(url).cloned(),
            history: scan_page(&self.history_path, url, limit, 0)?,
        })
    }
}

/// Bring last-played and the registry in line with the history rows.
fn reconcile(tables: &mut Tables) {
    let newest: Vec<HistoryEntry> = tables
        .history
        .values()
        .filter_map(|rows| rows.back().cloned())
        .collect();

    for row in newest {
        tables.stations.insert(row.station_url.clone());
        let stale = tables
            .last_played
            .get(&row.station_url)
            .map(|l| l.played_at < row.played_at)
            .unwrap_or(true);
        if stale {
            debug!("[store] Rebuilt last-played for {} from history", row.station_url);
            tables.set_last_played(&row.station_url, &row.artist, &row.song, row.played_at);
        }
    }
}

fn load_snapshot(path: &Path) -> Result<Snapshot> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Snapshot::default()),
        Err(e) => Err(e.into()),
    }
}

/// Stream every well-formed row of history.tsv, oldest first.
fn for_each_row<F: FnMut(HistoryEntry)>(path: &Path, mut f: F) -> Result<()> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() || line.starts_with("station_url\t") {
            continue;
        }
        match parse_row(&line) {
            Some(row) => f(row),
            None => warn!("[store] Skipping malformed history line {}", n + 1),
        }
    }
    Ok(())
}

/// Newest-first page for `url`, holding at most `offset + limit` rows.
fn scan_page(path: &Path, url: &str, limit: usize, offset: usize) -> Result<Vec<HistoryEntry>> {
    let keep = offset.saturating_add(limit);
    if keep == 0 {
        return Ok(Vec::new());
    }
    let mut window: VecDeque<HistoryEntry> = VecDeque::new();
    for_each_row(path, |row| {
        if row.station_url == url {
            if window.len() == keep {
                window.pop_front();
            }
            window.push_back(row);
        }
    })?;
    Ok(window.into_iter().rev().skip(offset).take(limit).collect())
}

fn encode_row(row: &HistoryEntry) -> String {
    format!(
        "{}\t{}\t{}\t{}\n",
        esc(&row.station_url),
        esc(&row.artist),
        esc(&row.song),
        row.played_at.to_rfc3339(),
    )
}

fn parse_row(line: &str) -> Option<HistoryEntry> {
    let cols: Vec<&str> = line.splitn(4, '\t').collect();
    if cols.len() < 4 {
        return None;
    }
    let played_at = DateTime::parse_from_rfc3339(cols[3].trim())
        .ok()?
        .with_timezone(&Utc);
    Some(entry(cols[0], cols[1], cols[2], played_at))
}

fn esc(s: &str) -> String {
    s.replace('\t', " ").replace('\n', " ").replace('\r', "")
}
