//! Owns every running station monitor, keyed by station URL.
//!
//! All check-then-spawn and stop sequences run under one async mutex, so a
//! URL never has two live monitors even when activation requests race.

use reqwest::{Client, Url};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{MonitorConfig, StreamConfig};
use crate::error::{Error, Result};
use crate::monitor::{MonitorState, StationMonitor};
use crate::store::{run_blocking, HistoryStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StartOutcome {
    pub already_running: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorStatus {
    pub url: String,
    #[serde(flatten)]
    pub state: MonitorState,
}

struct MonitorHandle {
    cancel: CancellationToken,
    state: watch::Receiver<MonitorState>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    fn is_live(&self) -> bool {
        !self.task.is_finished() && !self.state.borrow().is_terminal()
    }

    fn state(&self) -> MonitorState {
        self.state.borrow().clone()
    }

    async fn shut_down(self, url: &str) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("monitor {}: task ended abnormally: {}", url, e);
        }
    }
}

struct Inner {
    client: Client,
    store: Arc<dyn HistoryStore>,
    monitor: MonitorConfig,
    stream: StreamConfig,
    handles: Mutex<HashMap<String, MonitorHandle>>,
}

/// Cheaply cloneable; clones share the same monitor table.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        client: Client,
        store: Arc<dyn HistoryStore>,
        monitor: MonitorConfig,
        stream: StreamConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                store,
                monitor,
                stream,
                handles: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.inner.store
    }

    /// Begin monitoring `url` unless a live monitor already exists for it.
    pub async fn start(&self, url: &str) -> Result<StartOutcome> {
        let url = validate_station_url(url)?;

        let mut handles = self.inner.handles.lock().await;
        if let Some(existing) = handles.get(&url) {
            if existing.is_live() {
                debug!("monitor {}: already running", url);
                return Ok(StartOutcome {
                    already_running: true,
                });
            }
        }

        let key = url.clone();
        run_blocking(&self.inner.store, move |s| s.register_station(&key)).await?;
        let handle = self.spawn(url.clone());
        if let Some(old) = handles.insert(url.clone(), handle) {
            info!("monitor {}: replacing {} monitor", url, old.state().label());
            old.cancel.cancel();
        }

        Ok(StartOutcome {
            already_running: false,
        })
    }

    /// Cancel the monitor for `url` and wait for it to exit.  The table lock
    /// is held until then, so a concurrent `start` cannot overlap the old
    /// writer.  Returns false when nothing was being monitored.
    pub async fn stop(&self, url: &str) -> bool {
        let url = url.trim();
        let mut handles = self.inner.handles.lock().await;
        let Some(handle) = handles.remove(url) else {
            return false;
        };
        handle.shut_down(url).await;
        info!("monitor {}: removed", url);
        true
    }

    /// Restart monitoring for every registered station.  Returns how many
    /// monitors were spawned.
    pub async fn resume_all(&self) -> Result<usize> {
        let stations = self.inner.store.list_stations()?;
        let mut started = 0;
        for url in &stations {
            match self.start(url).await {
                Ok(StartOutcome {
                    already_running: false,
                }) => started += 1,
                Ok(_) => {}
                Err(e) => warn!("monitor {}: not resumed: {}", url, e),
            }
        }
        info!("Resumed {} of {} registered stations", started, stations.len());
        Ok(started)
    }

    /// Stop every monitor.
    pub async fn shutdown(&self) {
        let mut handles = self.inner.handles.lock().await;
        let drained: Vec<_> = handles.drain().collect();
        for (_, h) in &drained {
            h.cancel.cancel();
        }
        for (url, h) in drained {
            h.shut_down(&url).await;
        }
        info!("All monitors stopped");
    }

    pub async fn status(&self, url: &str) -> Option<MonitorState> {
        self.inner
            .handles
            .lock()
            .await
            .get(url.trim())
            .map(MonitorHandle::state)
    }

    pub async fn statuses(&self) -> Vec<MonitorStatus> {
        let handles = self.inner.handles.lock().await;
        let mut out: Vec<_> = handles
            .iter()
            .map(|(url, h)| MonitorStatus {
                url: url.clone(),
                state: h.state(),
            })
            .collect();
        out.sort_by(|a, b| a.url.cmp(&b.url));
        out
    }

    /// Number of monitors that are currently live.
    pub async fn live_count(&self) -> usize {
        self.inner
            .handles
            .lock()
            .await
            .values()
            .filter(|h| h.is_live())
            .count()
    }

    /// A receiver that follows the state of the monitor for `url`.
    pub async fn watch(&self, url: &str) -> Option<watch::Receiver<MonitorState>> {
        self.inner
            .handles
            .lock()
            .await
            .get(url.trim())
            .map(|h| h.state.clone())
    }

    fn spawn(&self, url: String) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let (monitor, state) = StationMonitor::new(
            url.clone(),
            self.inner.client.clone(),
            self.inner.store.clone(),
            self.inner.monitor.clone(),
            self.inner.stream.clone(),
            cancel.clone(),
        );
        info!("monitor {}: spawning", url);
        let task = tokio::spawn(monitor.run());
        MonitorHandle {
            cancel,
            state,
            task,
        }
    }
}

/// Accept only absolute http(s) URLs with a host.  The trimmed input is the
/// station key.
pub fn validate_station_url(url: &str) -> Result<String> {
    let url = url.trim();
    let parsed =
        Url::parse(url).map_err(|e| Error::InvalidInput(format!("invalid station URL: {}", e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::InvalidInput(format!(
            "unsupported scheme: {}",
            parsed.scheme()
        )));
    }
    if parsed.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(Error::InvalidInput("station URL has no host".to_string()));
    }
    Ok(url.to_string())
}
