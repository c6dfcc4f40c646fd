//! ICY ("SHOUTcast") metadata reader.
//!
//! A server that honours `Icy-MetaData: 1` advertises `icy-metaint: N` and
//! then interleaves N bytes of audio with a metadata block.  The block is
//! framed by a one-byte length (in units of 16 bytes), but real servers do
//! not always get that length right.  The default `Framing::MarkerScan`
//! therefore ignores the framing: it skips N audio bytes and scans the next
//! `window_size` bytes for `StreamTitle='`.  This is a best-effort window,
//! not a protocol guarantee.  `Framing::Strict` reads the block by its
//! length prefix instead.
//!
//! Audio bytes are dropped as they arrive and never inspected.

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{Framing, StreamConfig};
use crate::error::{Error, Result};
use crate::title::Observation;

pub const TITLE_MARKER: &[u8] = b"StreamTitle='";
pub const TITLE_TERMINATOR: u8 = b';';

/// Anything outside this range is not a real interleave interval.
const MAX_METAINT: usize = 256_000;

/// Outcome of one metadata read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataRead {
    /// Raw bytes between `StreamTitle='` and the next `;`.
    Title(Vec<u8>),
    /// The window had no title marker this time.
    NoTitle,
    /// The stream carries no ICY metadata at all.  Terminal.
    Unsupported,
}

/// Shared HTTP client for stream sessions.  No overall request timeout:
/// a stream body never ends, so reads are bounded one chunk at a time.
pub fn build_client(config: &StreamConfig) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .connect_timeout(config.connect_timeout())
        // Icecast mounts commonly redirect to a relay
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
}

/// An open stream connection.  Dropping it closes the socket.
pub struct StreamSession {
    url: String,
    response: reqwest::Response,
    metaint: Option<usize>,
    pending: Vec<u8>,
    eof: bool,
    read_timeout: Duration,
    framing: Framing,
}

impl StreamSession {
    /// Request `url` with ICY metadata enabled.  A missing `icy-metaint` is
    /// not an error here; the session opens and reports `Unsupported`.
    pub async fn open(
        client: &Client,
        url: &str,
        extra_headers: &HeaderMap,
        config: &StreamConfig,
    ) -> Result<Self> {
        let mut req = client
            .get(url)
            .header("Icy-MetaData", HeaderValue::from_static("1"));
        if let Ok(ua) = HeaderValue::from_str(&config.user_agent) {
            req = req.header(USER_AGENT, ua);
        }
        let req = req.headers(extra_headers.clone());

        let response = tokio::time::timeout(config.read_timeout(), req.send())
            .await
            .map_err(|_| Error::Timeout)??;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::StreamUnavailable(format!("HTTP {}", status)));
        }

        let metaint = parse_metaint(response.headers())?;
        match metaint {
            Some(n) => debug!("icy: {} opened, metaint={}", url, n),
            None => info!("icy: {} has no icy-metaint header", url),
        }

        Ok(Self {
            url: url.to_string(),
            response,
            metaint,
            pending: Vec::new(),
            eof: false,
            read_timeout: config.read_timeout(),
            framing: config.framing,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn metaint(&self) -> Option<usize> {
        self.metaint
    }

    pub fn supports_metadata(&self) -> bool {
        self.metaint.is_some()
    }

    /// Skip one audio block, then pull the next title payload.
    pub async fn read_next_metadata(&mut self, window_size: usize) -> Result<MetadataRead> {
        let Some(metaint) = self.metaint else {
            return Ok(MetadataRead::Unsupported);
        };

        self.discard(metaint).await?;

        let block = match self.framing {
            Framing::MarkerScan => {
                let window = self.read_up_to(window_size).await?;
                if window.is_empty() {
                    return Err(Error::StreamUnavailable("stream ended".to_string()));
                }
                window
            }
            Framing::Strict => {
                let len = self.read_exact(1).await?[0] as usize * 16;
                if len == 0 {
                    return Ok(MetadataRead::NoTitle);
                }
                self.read_exact(len).await?
            }
        };

        Ok(match extract_stream_title(&block) {
            Some(raw) => MetadataRead::Title(raw.to_vec()),
            None => MetadataRead::NoTitle,
        })
    }

    /// Pull one more network chunk into `pending`.  False at end of stream.
    async fn fill(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let next = tokio::time::timeout(self.read_timeout, self.response.chunk())
            .await
            .map_err(|_| Error::Timeout)??;
        match next {
            Some(chunk) => {
                self.pending.extend_from_slice(&chunk);
                Ok(true)
            }
            None => {
                self.eof = true;
                Ok(false)
            }
        }
    }

    async fn discard(&mut self, mut remaining: usize) -> Result<()> {
        while remaining > 0 {
            if self.pending.is_empty() && !self.fill().await? {
                return Err(Error::StreamUnavailable(
                    "stream ended inside an audio block".to_string(),
                ));
            }
            let take = remaining.min(self.pending.len());
            self.pending.drain(..take);
            remaining -= take;
        }
        Ok(())
    }

    /// Up to `n` bytes; fewer only when the stream ends.
    async fn read_up_to(&mut self, n: usize) -> Result<Vec<u8>> {
        while self.pending.len() < n {
            if !self.fill().await? {
                break;
            }
        }
        let take = n.min(self.pending.len());
        Ok(self.pending.drain(..take).collect())
    }

    async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let buf = self.read_up_to(n).await?;
        if buf.len() < n {
            return Err(Error::StreamUnavailable(
                "stream ended inside a metadata block".to_string(),
            ));
        }
        Ok(buf)
    }
}

/// `icy-metaint` as an interleave interval.  Header names are matched
/// case-insensitively by `HeaderMap`.
pub fn parse_metaint(headers: &HeaderMap) -> Result<Option<usize>> {
    let Some(value) = headers.get("icy-metaint") else {
        return Ok(None);
    };
    let n = value
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .ok_or_else(|| Error::StreamUnavailable(format!("malformed icy-metaint: {:?}", value)))?;
    if !(1..=MAX_METAINT).contains(&n) {
        return Ok(None);
    }
    Ok(Some(n))
}

/// Bytes after `StreamTitle='` up to the first `;`, or to the end of the
/// buffer when the terminator is not in it.
pub fn extract_stream_title(buf: &[u8]) -> Option<&[u8]> {
    let start = buf
        .windows(TITLE_MARKER.len())
        .position(|w| w == TITLE_MARKER)?
        + TITLE_MARKER.len();
    let rest = &buf[start..];
    let end = rest
        .iter()
        .position(|&b| b == TITLE_TERMINATOR)
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

/// One-shot query: connect, read up to `one_shot_max_windows` windows and
/// return the first title found.  Independent of any running monitor.
pub async fn fetch_current_title(
    client: &Client,
    url: &str,
    config: &StreamConfig,
    window_size: usize,
) -> Result<Observation> {
    let mut session = StreamSession::open(client, url, &HeaderMap::new(), config).await?;
    for _ in 0..config.one_shot_max_windows.max(1) {
        match session.read_next_metadata(window_size).await? {
            MetadataRead::Title(raw) => return Ok(Observation::parse(&raw)),
            MetadataRead::NoTitle => continue,
            MetadataRead::Unsupported => return Err(Error::NoMetadataSupported),
        }
    }
    Err(Error::TitleNotFound)
}
