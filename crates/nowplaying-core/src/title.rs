//! `StreamTitle` payload → (artist, song).

use serde::{Deserialize, Serialize};

/// One artist/song pair read from a stream.  An empty artist means the
/// station did not use the `Artist - Title` convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub artist: String,
    pub song: String,
}

impl Observation {
    pub fn new(artist: impl Into<String>, song: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            song: song.into(),
        }
    }

    /// Decode a raw payload.  Never fails: invalid UTF-8 is replaced.
    pub fn parse(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        let (artist, song) = split_title(&text);
        Self {
            artist: artist.to_string(),
            song: song.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.artist.is_empty() && self.song.is_empty()
    }
}

/// Split "Artist - Title" on the first ` - `.  Without a separator the whole
/// text is the song and the artist is empty.
pub fn split_title(title: &str) -> (&str, &str) {
    let s = strip_quotes(title.trim_matches(char::from(0)).trim());
    match s.split_once(" - ") {
        Some((artist, song)) => (artist.trim(), song.trim()),
        None => ("", s.trim()),
    }
}

/// Drop at most one leading and one trailing apostrophe.  The marker scan
/// usually leaves the closing quote of `StreamTitle='...'` attached.
fn strip_quotes(s: &str) -> &str {
    let s = s.strip_prefix('\'').unwrap_or(s);
    s.strip_suffix('\'').unwrap_or(s)
}
