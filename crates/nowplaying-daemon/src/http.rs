use crate::lookup::{ItunesLookup, TrackDetails};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Redirect, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use nowplaying_core::config::{HistoryConfig, StreamConfig};
use nowplaying_core::icy::fetch_current_title;
use nowplaying_core::store::{run_blocking, HistoryEntry, HistoryStore};
use nowplaying_core::supervisor::{MonitorStatus, Supervisor};
use nowplaying_core::Error;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

/// Largest scan window a caller may ask for on `/get_stream_title`.
const MAX_WINDOW: usize = 1 << 20;

#[derive(Clone)]
pub struct HttpState {
    pub supervisor: Supervisor,
    pub store: Arc<dyn HistoryStore>,
    pub client: Client,
    pub stream: StreamConfig,
    pub history: HistoryConfig,
    pub lookup: Arc<ItunesLookup>,
}

/// Core errors as HTTP responses with a short JSON body.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            Error::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Error::NoMetadataSupported => (
                StatusCode::NOT_FOUND,
                "stream does not provide metadata".to_string(),
            ),
            Error::TitleNotFound => (StatusCode::NOT_FOUND, "stream title not found".to_string()),
            Error::StreamUnavailable(_) => {
                (StatusCode::BAD_GATEWAY, "stream unavailable".to_string())
            }
            Error::Timeout => (StatusCode::BAD_GATEWAY, "stream timed out".to_string()),
            Error::LookupFailed(_) | Error::Store(_) => {
                error!("HTTP API: {}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Deserialize)]
struct StationQuery {
    radio_url: String,
}

#[derive(Deserialize)]
struct TitleQuery {
    url: String,
    interval: Option<usize>,
}

#[derive(Deserialize)]
struct InfoQuery {
    radio_url: String,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    radio_url: String,
    limit: Option<usize>,
    page: Option<usize>,
}

#[derive(Serialize)]
struct StartResponse {
    message: String,
    already_running: bool,
}

#[derive(Serialize)]
struct StopResponse {
    stopped: bool,
}

#[derive(Serialize)]
struct TitleResponse {
    artist: String,
    song: String,
    art: Option<String>,
    details: Option<TrackDetails>,
}

/// Every field is null until the station has a recorded play.
#[derive(Serialize, Default)]
struct LastPlayedView {
    artist: Option<String>,
    song: Option<String>,
    played_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct PlayView {
    artist: String,
    song: String,
    played_at: DateTime<Utc>,
}

impl From<HistoryEntry> for PlayView {
    fn from(e: HistoryEntry) -> Self {
        Self {
            artist: e.artist,
            song: e.song,
            played_at: e.played_at,
        }
    }
}

#[derive(Serialize)]
struct InfoResponse {
    last_played: LastPlayedView,
    history: Vec<PlayView>,
}

#[derive(Serialize)]
struct HistoryResponse {
    radio_url: String,
    page: usize,
    limit: usize,
    history: Vec<PlayView>,
}

pub fn router(state: HttpState, cors_permissive: bool) -> Router {
    let app = Router::new()
        .route("/", get(|| async { Redirect::temporary("/api/monitors") }))
        .route("/start_monitoring", get(start_monitoring))
        .route("/stop_monitoring", get(stop_monitoring))
        .route("/get_stream_title", get(get_stream_title))
        .route("/radio_info", get(radio_info))
        .route("/radio_history", get(radio_history))
        .route("/api/monitors", get(list_monitors))
        .with_state(state);
    if cors_permissive {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

pub fn start_server(
    bind_address: String,
    port: u16,
    cors_permissive: bool,
    state: HttpState,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state, cors_permissive);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn start_monitoring(
    State(state): State<HttpState>,
    Query(q): Query<StationQuery>,
) -> ApiResult<StartResponse> {
    info!("HTTP API: Start monitoring {}", q.radio_url);
    let outcome = state.supervisor.start(&q.radio_url).await?;
    let message = if outcome.already_running {
        "Monitoring already running for this station"
    } else {
        "Monitoring started"
    };
    Ok(Json(StartResponse {
        message: message.to_string(),
        already_running: outcome.already_running,
    }))
}

async fn stop_monitoring(
    State(state): State<HttpState>,
    Query(q): Query<StationQuery>,
) -> Json<StopResponse> {
    info!("HTTP API: Stop monitoring {}", q.radio_url);
    let stopped = state.supervisor.stop(&q.radio_url).await;
    Json(StopResponse { stopped })
}

async fn get_stream_title(
    State(state): State<HttpState>,
    Query(q): Query<TitleQuery>,
) -> ApiResult<TitleResponse> {
    let url = nowplaying_core::supervisor::validate_station_url(&q.url)?;
    let window = q
        .interval
        .unwrap_or(state.stream.window_size)
        .clamp(1, MAX_WINDOW);

    let obs = fetch_current_title(&state.client, &url, &state.stream, window).await?;
    let details = state.lookup.lookup(&obs.artist, &obs.song).await;
    Ok(Json(TitleResponse {
        art: details.as_ref().and_then(|d| d.art_url.clone()),
        artist: obs.artist,
        song: obs.song,
        details,
    }))
}

async fn radio_info(
    State(state): State<HttpState>,
    Query(q): Query<InfoQuery>,
) -> ApiResult<InfoResponse> {
    let url = q.radio_url.trim().to_string();
    let limit = q.limit.unwrap_or(state.history.default_limit);
    let info = run_blocking(&state.store, move |s| s.station_info(&url, limit)).await?;
    let last_played = info
        .last_played
        .map(|lp| LastPlayedView {
            artist: Some(lp.artist),
            song: Some(lp.song),
            played_at: Some(lp.played_at),
        })
        .unwrap_or_default();
    Ok(Json(InfoResponse {
        last_played,
        history: info.history.into_iter().map(PlayView::from).collect(),
    }))
}

async fn radio_history(
    State(state): State<HttpState>,
    Query(q): Query<HistoryQuery>,
) -> ApiResult<HistoryResponse> {
    let url = q.radio_url.trim();
    let limit = q.limit.unwrap_or(state.history.page_size);
    let page = q.page.unwrap_or(1);
    if page == 0 {
        return Err(Error::InvalidInput("page starts at 1".to_string()).into());
    }
    let offset = (page - 1).saturating_mul(limit);
    let key = url.to_string();
    let history =
        run_blocking(&state.store, move |s| s.list_history(&key, limit, offset)).await?;
    Ok(Json(HistoryResponse {
        radio_url: url.to_string(),
        page,
        limit,
        history: history.into_iter().map(PlayView::from).collect(),
    }))
}

async fn list_monitors(State(state): State<HttpState>) -> Json<Vec<MonitorStatus>> {
    Json(state.supervisor.statuses().await)
}
