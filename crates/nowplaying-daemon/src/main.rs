mod http;
mod lookup;

use std::sync::Arc;

use nowplaying_core::config::Config;
use nowplaying_core::icy::build_client;
use nowplaying_core::store::{FileStore, HistoryStore};
use nowplaying_core::supervisor::Supervisor;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::http::HttpState;
use crate::lookup::ItunesLookup;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    // File logging next to the history, plus stderr
    let data_dir = config.paths.data_dir.clone();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "info,nowplaying_daemon=debug,nowplaying_core=debug",
                )
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);
    info!("Config loaded from: {:?}", Config::config_path());

    let store: Arc<dyn HistoryStore> = Arc::new(FileStore::open(
        &data_dir,
        config.history.cached_rows,
    )?);
    let client = build_client(&config.stream)?;
    let supervisor = Supervisor::new(
        client.clone(),
        store.clone(),
        config.monitor.clone(),
        config.stream.clone(),
    );

    if config.monitor.recover_on_startup {
        if let Err(e) = supervisor.resume_all().await {
            warn!("Could not resume monitors: {}", e);
        }
    }

    let _http_handle = if config.http.enabled {
        let state = HttpState {
            supervisor: supervisor.clone(),
            store,
            client,
            stream: config.stream.clone(),
            history: config.history.clone(),
            lookup: Arc::new(ItunesLookup::new(&config.lookup)?),
        };
        Some(http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            config.http.cors_permissive,
            state,
        ))
    } else {
        info!("HTTP API disabled");
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    supervisor.shutdown().await;
    Ok(())
}
