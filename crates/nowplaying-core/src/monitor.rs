//! Per-station monitor loop.
//!
//! ```text
//!   Idle ──spawn──▶ Running ──cancel──▶ Stopped
//!                      │
//!                      └──no icy-metaint──▶ Failed(reason)
//! ```
//!
//! Each iteration acquires a session, reads one metadata window, runs the
//! title through the policy and records it.  The session is closed before the
//! poll sleep: a connection left idle keeps buffering audio, so every later
//! window would come from an older part of the stream and the server would
//! eventually drop us as a slow client.  The network read and the poll sleep
//! both race the cancellation token, so `stop` closes the connection without
//! waiting for a stalled server.

use chrono::Utc;
use rand::Rng;
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{MonitorConfig, StreamConfig};
use crate::error::Result;
use crate::icy::{MetadataRead, StreamSession};
use crate::policy::should_record;
use crate::store::{run_blocking, HistoryEntry, HistoryStore};
use crate::title::Observation;

pub const NO_METADATA_REASON: &str = "this stream does not provide metadata";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum MonitorState {
    Idle,
    Running,
    Stopped,
    Failed(String),
}

impl MonitorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MonitorState::Stopped | MonitorState::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            MonitorState::Idle => "idle",
            MonitorState::Running => "running",
            MonitorState::Stopped => "stopped",
            MonitorState::Failed(_) => "failed",
        }
    }
}

/// What one loop iteration achieved.
#[derive(Debug)]
enum Poll {
    Recorded(HistoryEntry),
    Unchanged,
    NoTitle,
    Unsupported,
}

pub struct StationMonitor {
    url: String,
    client: Client,
    store: Arc<dyn HistoryStore>,
    monitor: MonitorConfig,
    stream: StreamConfig,
    cancel: CancellationToken,
    state_tx: watch::Sender<MonitorState>,
}

impl StationMonitor {
    pub fn new(
        url: String,
        client: Client,
        store: Arc<dyn HistoryStore>,
        monitor: MonitorConfig,
        stream: StreamConfig,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<MonitorState>) {
        let (state_tx, state_rx) = watch::channel(MonitorState::Idle);
        let m = Self {
            url,
            client,
            store,
            monitor,
            stream,
            cancel,
            state_tx,
        };
        (m, state_rx)
    }

    pub async fn run(self) {
        self.set_state(MonitorState::Running);
        let end = self.run_loop().await;
        self.set_state(end);
    }

    fn set_state(&self, state: MonitorState) {
        info!("monitor {}: {}", self.url, state.label());
        if let MonitorState::Failed(reason) = &state {
            warn!("monitor {}: giving up: {}", self.url, reason);
        }
        self.state_tx.send_replace(state);
    }

    async fn run_loop(&self) -> MonitorState {
        let mut failures: u32 = 0;

        loop {
            let polled = tokio::select! {
                _ = self.cancel.cancelled() => return MonitorState::Stopped,
                r = self.poll_once() => r,
            };

            match polled {
                Ok(Poll::Unsupported) => {
                    return MonitorState::Failed(NO_METADATA_REASON.to_string());
                }
                Ok(Poll::Recorded(e)) => {
                    info!("monitor {}: now playing {} - {}", self.url, e.artist, e.song);
                    failures = 0;
                }
                Ok(Poll::Unchanged) | Ok(Poll::NoTitle) => failures = 0,
                Err(e) if e.is_transient() => {
                    failures += 1;
                    warn!(
                        "monitor {}: {} (consecutive failures: {})",
                        self.url, e, failures
                    );
                }
                Err(e) => warn!("monitor {}: {}", self.url, e),
            }

            let mut delay = poll_delay(
                self.monitor.poll_interval(),
                self.monitor.backoff_ceiling(),
                failures,
                self.monitor.backoff_after_failures,
            );
            if delay > self.monitor.poll_interval() {
                delay = jitter(delay);
                warn!(
                    "monitor {}: backing off, next attempt in {:.1}s",
                    self.url,
                    delay.as_secs_f64()
                );
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return MonitorState::Stopped,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One cycle on its own connection, which is dropped before returning.
    async fn poll_once(&self) -> Result<Poll> {
        debug!("monitor {}: connecting", self.url);
        let mut session =
            StreamSession::open(&self.client, &self.url, &HeaderMap::new(), &self.stream).await?;
        let read = session.read_next_metadata(self.stream.window_size).await?;
        drop(session);

        let raw = match read {
            MetadataRead::Title(raw) => raw,
            MetadataRead::NoTitle => {
                debug!("monitor {}: no title in window", self.url);
                return Ok(Poll::NoTitle);
            }
            MetadataRead::Unsupported => return Ok(Poll::Unsupported),
        };

        let obs = Observation::parse(&raw);
        let url = self.url.clone();
        let min_interval = self.monitor.min_history_interval();
        let recorded = run_blocking(&self.store, move |store| {
            apply_observation(store, &url, &obs, min_interval)
        })
        .await?;
        Ok(match recorded {
            Some(entry) => Poll::Recorded(entry),
            None => Poll::Unchanged,
        })
    }
}

/// Check `obs` against the station's last play and record it if the policy
/// allows.  Empty titles (stations blank the field between songs) are
/// ignored.
pub fn apply_observation(
    store: &dyn HistoryStore,
    url: &str,
    obs: &Observation,
    min_interval: Duration,
) -> Result<Option<HistoryEntry>> {
    apply_observation_at(store, url, obs, Utc::now(), min_interval)
}

pub fn apply_observation_at(
    store: &dyn HistoryStore,
    url: &str,
    obs: &Observation,
    now: chrono::DateTime<Utc>,
    min_interval: Duration,
) -> Result<Option<HistoryEntry>> {
    if obs.is_empty() {
        return Ok(None);
    }
    let last = store.last_played(url)?;
    if !should_record(last.as_ref(), obs, now, min_interval) {
        return Ok(None);
    }
    store
        .record_play(url, &obs.artist, &obs.song, now)
        .map(Some)
}

/// Delay before the next attempt.  Flat `base` until `threshold`
/// consecutive failures, then doubling per failure up to `ceiling`.
pub fn poll_delay(base: Duration, ceiling: Duration, failures: u32, threshold: u32) -> Duration {
    let threshold = threshold.max(1);
    if failures < threshold {
        return base;
    }
    let exp = (failures - threshold + 1).min(16);
    base.saturating_mul(1u32 << exp).min(ceiling.max(base))
}

/// ±10% so monitors that failed together do not retry in lockstep.
fn jitter(d: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.9..=1.1);
    d.mul_f64(factor)
}
