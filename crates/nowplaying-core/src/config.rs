use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub lookup: LookupConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allow any origin, method and header (the public API is read-mostly).
    #[serde(default = "default_true")]
    pub cors_permissive: bool,
}

/// Station monitor timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Pause between two metadata reads on a healthy stream.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// A changed title is only recorded once this much time has passed
    /// since the previous recorded play.
    #[serde(default = "default_min_history_interval_secs")]
    pub min_history_interval_secs: u64,
    /// Consecutive transient failures before the poll delay starts growing.
    #[serde(default = "default_backoff_after_failures")]
    pub backoff_after_failures: u32,
    #[serde(default = "default_backoff_ceiling_secs")]
    pub backoff_ceiling_secs: u64,
    /// Restart a monitor for every registered station at startup.
    #[serde(default = "default_true")]
    pub recover_on_startup: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    /// Scan a fixed-size window after the audio block for the title marker.
    #[default]
    MarkerScan,
    /// Honour the 1-byte length prefix and scan only the metadata block.
    Strict,
}

/// ICY reader parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Bytes scanned for `StreamTitle='` after each audio block.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Deadline for each individual network read.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub framing: Framing,
    /// Windows a one-shot title query reads before giving up.
    #[serde(default = "default_one_shot_max_windows")]
    pub one_shot_max_windows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_limit")]
    pub default_limit: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// History rows per station kept in memory by the file store.  Older
    /// pages are read back from disk.
    #[serde(default = "default_cached_rows")]
    pub cached_rows: usize,
}

/// Album-art / track-details lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_lookup_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_lookup_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Holds stations.json, history.tsv and daemon.log.
    #[serde(default = "platform::data_dir")]
    pub data_dir: PathBuf,
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn min_history_interval(&self) -> Duration {
        Duration::from_secs(self.min_history_interval_secs)
    }

    pub fn backoff_ceiling(&self) -> Duration {
        Duration::from_secs(self.backoff_ceiling_secs)
    }
}

impl StreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl LookupConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
            cors_permissive: true,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            min_history_interval_secs: default_min_history_interval_secs(),
            backoff_after_failures: default_backoff_after_failures(),
            backoff_ceiling_secs: default_backoff_ceiling_secs(),
            recover_on_startup: true,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            user_agent: default_user_agent(),
            framing: Framing::default(),
            one_shot_max_windows: default_one_shot_max_windows(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_history_limit(),
            page_size: default_page_size(),
            cached_rows: default_cached_rows(),
        }
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_lookup_endpoint(),
            timeout_secs: default_lookup_timeout_secs(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: platform::data_dir(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_min_history_interval_secs() -> u64 {
    30
}

fn default_backoff_after_failures() -> u32 {
    3
}

fn default_backoff_ceiling_secs() -> u64 {
    300
}

fn default_window_size() -> usize {
    19200
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_read_timeout_secs() -> u64 {
    15
}

fn default_user_agent() -> String {
    platform::BROWSER_USER_AGENT.to_string()
}

fn default_one_shot_max_windows() -> usize {
    8
}

fn default_history_limit() -> usize {
    5
}

fn default_page_size() -> usize {
    10
}

fn default_cached_rows() -> usize {
    200
}

fn default_lookup_endpoint() -> String {
    "https://itunes.apple.com/search".to_string()
}

fn default_lookup_timeout_secs() -> u64 {
    5
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
