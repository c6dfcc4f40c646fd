use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{HistoryEntry, HistoryStore, LastPlayed, StationInfo};
use crate::error::{Error, Result};

/// The three tables, shared with `FileStore` which persists them.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub stations: BTreeSet<String>,
    pub last_played: HashMap<String, LastPlayed>,
    /// Per station, in insertion (= `played_at`) order.  Only the newest
    /// `tail_rows` are kept when a cap is set.
    pub history: HashMap<String, VecDeque<HistoryEntry>>,
    /// Rows ever recorded per station, including evicted ones.
    pub totals: HashMap<String, usize>,
    pub tail_rows: Option<usize>,
}

impl Tables {
    pub fn with_tail(tail_rows: usize) -> Self {
        Self {
            tail_rows: Some(tail_rows.max(1)),
            ..Self::default()
        }
    }

    /// Clamp `at` so a station's timeline never runs backwards.
    pub fn next_played_at(&self, url: &str, at: DateTime<Utc>) -> DateTime<Utc> {
        let newest_history = self
            .history
            .get(url)
            .and_then(|rows| rows.back())
            .map(|e| e.played_at);
        let newest_last = self.last_played.get(url).map(|l| l.played_at);
        [Some(at), newest_history, newest_last]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(at)
    }

    pub fn push_history(&mut self, entry: HistoryEntry) {
        *self.totals.entry(entry.station_url.clone()).or_default() += 1;
        let rows = self.history.entry(entry.station_url.clone()).or_default();
        rows.push_back(entry);
        if let Some(cap) = self.tail_rows {
            while rows.len() > cap {
                rows.pop_front();
            }
        }
    }

    /// True when the in-memory tail holds every row of the requested page.
    pub fn covers(&self, url: &str, limit: usize, offset: usize) -> bool {
        let held = self.history.get(url).map_or(0, VecDeque::len);
        let total = self.totals.get(url).copied().unwrap_or(0);
        held >= total || offset.saturating_add(limit) <= held
    }

    pub fn set_last_played(&mut self, url: &str, artist: &str, song: &str, at: DateTime<Utc>) {
        self.last_played.insert(
            url.to_string(),
            LastPlayed {
                artist: artist.to_string(),
                song: song.to_string(),
                played_at: at,
            },
        );
    }

    pub fn history_page(&self, url: &str, limit: usize, offset: usize) -> Vec<HistoryEntry> {
        self.history
            .get(url)
            .map(|rows| rows.iter().rev().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn info(&self, url: &str, limit: usize) -> StationInfo {
        StationInfo {
            last_played: self.last_played.get(url).cloned(),
            history: self.history_page(url, limit, 0),
        }
    }
}

pub(crate) fn entry(url: &str, artist: &str, song: &str, at: DateTime<Utc>) -> HistoryEntry {
    HistoryEntry {
        station_url: url.to_string(),
        artist: artist.to_string(),
        song: song.to_string(),
        played_at: at,
    }
}

pub(crate) fn read(lock: &RwLock<Tables>) -> Result<RwLockReadGuard<'_, Tables>> {
    lock.read()
        .map_err(|_| Error::Store("history tables lock poisoned".to_string()))
}

pub(crate) fn write(lock: &RwLock<Tables>) -> Result<RwLockWriteGuard<'_, Tables>> {
    lock.write()
        .map_err(|_| Error::Store("history tables lock poisoned".to_string()))
}

/// Process-local store.  Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryStore {
    fn last_played(&self, url: &str) -> Result<Option<LastPlayed>> {
        Ok(read(&self.tables)?.last_played.get(url).cloned())
    }

    fn append_history(&self, url: &str, artist: &str, song: &str, at: DateTime<Utc>) -> Result<()> {
        let mut t = write(&self.tables)?;
        let at = t.next_played_at(url, at);
        t.push_history(entry(url, artist, song, at));
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
        Ok(())
    }

    fn record_play(
        &self,
        url: &str,
        artist: &str,
        song: &str,
        at: DateTime<Utc>,
    ) -> Result<HistoryEntry> {
        let mut t = write(&self.tables)?;
        let at = t.next_played_at(url, at);
        let row = entry(url, artist, song, at);
        t.push_history(row.clone());
        t.set_last_played(url, artist, song, at);
        Ok(row)
    }

    fn list_history(&self, url: &str, limit: usize, offset: usize) -> Result<Vec<HistoryEntry>> {
        Ok(read(&self.tables)?.history_page(url, limit, offset))
    }

    fn list_stations(&self) -> Result<Vec<String>> {
        Ok(read(&self.tables)?.stations.iter().cloned().collect())
    }

    fn register_station(&self, url: &str) -> Result<bool> {
        Ok(write(&self.tables)?.stations.insert(url.to_string()))
    }

    fn station_info(&self, url: &str, limit: usize) -> Result<StationInfo> {
        Ok(read(&self.tables)?.info(url, limit))
    }
}
