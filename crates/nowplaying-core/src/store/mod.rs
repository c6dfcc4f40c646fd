//! Persistence seam for stations, last-played rows and play history.
//!
//! The monitor for a station is the only writer for that station.  Readers
//! (the HTTP query path) may run at any time, so `record_play` must publish
//! the history row and the last-played update together.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Error, Result};

/// What a station is playing right now, as far as the history knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastPlayed {
    pub artist: String,
    pub song: String,
    pub played_at: DateTime<Utc>,
}

/// One recorded play.  Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub station_url: String,
    pub artist: String,
    pub song: String,
    pub played_at: DateTime<Utc>,
}

/// Snapshot returned to the query path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationInfo {
    pub last_played: Option<LastPlayed>,
    pub history: Vec<HistoryEntry>,
}

pub trait HistoryStore: Send + Sync {
    fn last_played(&self, url: &str) -> Result<Option<LastPlayed>>;

    fn append_history(&self, url: &str, artist: &str, song: &str, at: DateTime<Utc>) -> Result<()>;

    fn upsert_last_played(
        &self,
        url: &str,
        artist: &str,
        song: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Append a history row and update last-played as one unit.  Returns the
    /// entry as stored (`played_at` never goes backwards for a station).
    fn record_play(
        &self,
        url: &str,
        artist: &str,
        song: &str,
        at: DateTime<Utc>,
    ) -> Result<HistoryEntry>;

    /// Most recent first.
    fn list_history(&self, url: &str, limit: usize, offset: usize) -> Result<Vec<HistoryEntry>>;

    fn list_stations(&self) -> Result<Vec<String>>;

    /// Idempotent.  Returns true when the station was not known before.
    fn register_station(&self, url: &str) -> Result<bool>;

    /// Last-played row and the newest `limit` history rows, read together.
    fn station_info(&self, url: &str, limit: usize) -> Result<StationInfo>;
}

/// Run a store call on tokio's blocking pool.  `FileStore` writes to disk
/// under its lock; async callers go through here so a slow disk never
/// stalls a runtime worker.
pub async fn run_blocking<T, F>(store: &Arc<dyn HistoryStore>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn HistoryStore) -> Result<T> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| Error::Store(format!("store task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "http://radio.example/stream";

    #[tokio::test]
    async fn test_run_blocking_returns_store_result() {
        let store: Arc<dyn HistoryStore> = Arc::new(MemoryStore::new());
        assert!(run_blocking(&store, |s| s.register_station(URL)).await.unwrap());
        assert!(!run_blocking(&store, |s| s.register_station(URL)).await.unwrap());
        let stations = run_blocking(&store, |s| s.list_stations()).await.unwrap();
        assert_eq!(stations, vec![URL.to_string()]);
    }

    #[tokio::test]
    async fn test_run_blocking_surfaces_a_panicking_call() {
        let store: Arc<dyn HistoryStore> = Arc::new(MemoryStore::new());
        let res: Result<()> = run_blocking(&store, |_| panic!("disk on fire")).await;
        assert!(matches!(res, Err(Error::Store(_))));
    }
}
