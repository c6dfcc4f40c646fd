//! Album art and track details from the iTunes Search API.
//!
//! Best effort only: every failure is logged and turned into `None`, so a
//! title query still answers with artist and song.

use nowplaying_core::config::LookupConfig;
use nowplaying_core::Error;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackDetails {
    pub art_url: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub duration_ms: Option<u64>,
    pub track_url: Option<String>,
}

pub struct ItunesLookup {
    client: Client,
    endpoint: String,
    enabled: bool,
}

impl ItunesLookup {
    pub fn new(config: &LookupConfig) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            enabled: config.enabled,
        })
    }

    pub async fn lookup(&self, artist: &str, song: &str) -> Option<TrackDetails> {
        if !self.enabled || (artist.is_empty() && song.is_empty()) {
            return None;
        }
        match self.search(artist, song).await {
            Ok(details) => details,
            Err(e) => {
                warn!("[lookup] {} - {}: {}", artist, song, e);
                None
            }
        }
    }

    async fn search(&self, artist: &str, song: &str) -> Result<Option<TrackDetails>, Error> {
        let term = format!("{} {}", artist, song);
        debug!("[lookup] Searching for {:?}", term.trim());
        let json: Value = self
            .client
            .get(&self.endpoint)
            .query(&[("term", term.trim()), ("media", "music"), ("limit", "1")])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::LookupFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::LookupFailed(e.to_string()))?;
        Ok(details_from_search(&json))
    }
}

/// First search hit, with the 100px artwork swapped for the 512px one.
pub fn details_from_search(json: &Value) -> Option<TrackDetails> {
    let hit = json["results"].as_array()?.first()?;
    let text = |key: &str| {
        hit[key]
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    Some(TrackDetails {
        art_url: text("artworkUrl100").map(|u| u.replace("100x100bb", "512x512bb")),
        album: text("collectionName"),
        genre: text("primaryGenreName"),
        duration_ms: hit["trackTimeMillis"].as_u64(),
        track_url: text("trackViewUrl"),
    })
}
