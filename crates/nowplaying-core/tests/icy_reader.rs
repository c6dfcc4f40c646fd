mod common;

use std::time::{Duration, Instant};

use common::mock_station::{dead_url, test_config, Behaviour, MockStation, METAINT};
use nowplaying_core::config::Framing;
use nowplaying_core::icy::{build_client, fetch_current_title, MetadataRead, StreamSession};
use nowplaying_core::title::Observation;
use nowplaying_core::Error;
use reqwest::header::{HeaderMap, HeaderValue};

fn queen() -> Behaviour {
    Behaviour::Icy {
        title: "Queen - Bohemian Rhapsody".to_string(),
    }
}

#[tokio::test]
async fn marker_scan_reads_title_and_sends_icy_headers() {
    let station = MockStation::spawn(queen()).await;
    let config = test_config(Framing::MarkerScan);
    let client = build_client(&config.stream).unwrap();

    let mut extra = HeaderMap::new();
    extra.insert("x-probe", HeaderValue::from_static("yes"));
    let mut session = StreamSession::open(&client, &station.url, &extra, &config.stream)
        .await
        .unwrap();
    assert_eq!(session.metaint(), Some(METAINT));

    let read = session
        .read_next_metadata(config.stream.window_size)
        .await
        .unwrap();
    match read {
        MetadataRead::Title(raw) => {
            assert_eq!(
                Observation::parse(&raw),
                Observation::new("Queen", "Bohemian Rhapsody")
            );
        }
        other => panic!("expected a title, got {:?}", other),
    }

    let head = station.last_request().unwrap();
    assert!(head.contains("icy-metadata: 1"), "request head: {}", head);
    assert!(head.contains("user-agent: mozilla/5.0"), "request head: {}", head);
    assert!(head.contains("x-probe: yes"), "request head: {}", head);
}

#[tokio::test]
async fn session_keeps_reading_across_windows() {
    let station = MockStation::spawn(queen()).await;
    let config = test_config(Framing::MarkerScan);
    let client = build_client(&config.stream).unwrap();
    let mut session = StreamSession::open(&client, &station.url, &HeaderMap::new(), &config.stream)
        .await
        .unwrap();

    for _ in 0..5 {
        let read = session
            .read_next_metadata(config.stream.window_size)
            .await
            .unwrap();
        assert!(matches!(read, MetadataRead::Title(_)), "got {:?}", read);
    }
    assert_eq!(station.connections(), 1);
}

#[tokio::test]
async fn strict_framing_reads_length_prefixed_block() {
    let station = MockStation::spawn(queen()).await;
    let config = test_config(Framing::Strict);
    let client = build_client(&config.stream).unwrap();
    let mut session = StreamSession::open(&client, &station.url, &HeaderMap::new(), &config.stream)
        .await
        .unwrap();

    for _ in 0..3 {
        let read = session.read_next_metadata(0).await.unwrap();
        assert_eq!(
            read,
            MetadataRead::Title(b"Queen - Bohemian Rhapsody'".to_vec())
        );
    }
}

#[tokio::test]
async fn missing_metaint_reports_unsupported_without_blocking() {
    let station = MockStation::spawn(Behaviour::NoMetaint).await;
    let config = test_config(Framing::MarkerScan);
    let client = build_client(&config.stream).unwrap();
    let mut session = StreamSession::open(&client, &station.url, &HeaderMap::new(), &config.stream)
        .await
        .unwrap();
    assert!(!session.supports_metadata());

    let started = Instant::now();
    let read = session.read_next_metadata(19200).await.unwrap();
    assert_eq!(read, MetadataRead::Unsupported);
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn http_error_status_is_stream_unavailable() {
    let station = MockStation::spawn(Behaviour::Status(404)).await;
    let config = test_config(Framing::MarkerScan);
    let client = build_client(&config.stream).unwrap();
    let res = StreamSession::open(&client, &station.url, &HeaderMap::new(), &config.stream).await;
    assert!(matches!(res, Err(Error::StreamUnavailable(_))));
}

#[tokio::test]
async fn refused_connection_is_stream_unavailable() {
    let config = test_config(Framing::MarkerScan);
    let client = build_client(&config.stream).unwrap();
    let url = dead_url().await;
    let res = StreamSession::open(&client, &url, &HeaderMap::new(), &config.stream).await;
    assert!(
        matches!(res, Err(ref e) if e.is_transient()),
        "expected a transient error"
    );
}

#[tokio::test]
async fn stalled_stream_times_out() {
    let station = MockStation::spawn(Behaviour::Stall).await;
    let mut config = test_config(Framing::MarkerScan);
    config.stream.read_timeout_secs = 1;
    let client = build_client(&config.stream).unwrap();
    let mut session = StreamSession::open(&client, &station.url, &HeaderMap::new(), &config.stream)
        .await
        .unwrap();
    let res = session.read_next_metadata(64).await;
    assert!(matches!(res, Err(Error::Timeout)));
}

#[tokio::test]
async fn one_shot_query_returns_artist_and_song() {
    let station = MockStation::spawn(queen()).await;
    let config = test_config(Framing::MarkerScan);
    let client = build_client(&config.stream).unwrap();
    let obs = fetch_current_title(&client, &station.url, &config.stream, config.stream.window_size)
        .await
        .unwrap();
    assert_eq!(obs.artist, "Queen");
    assert_eq!(obs.song, "Bohemian Rhapsody");
}

#[tokio::test]
async fn one_shot_query_without_metadata() {
    let station = MockStation::spawn(Behaviour::NoMetaint).await;
    let config = test_config(Framing::MarkerScan);
    let client = build_client(&config.stream).unwrap();
    let res = fetch_current_title(&client, &station.url, &config.stream, 19200).await;
    assert!(matches!(res, Err(Error::NoMetadataSupported)));
}

#[tokio::test]
async fn one_shot_query_gives_up_when_no_marker() {
    let station = MockStation::spawn(Behaviour::Icy {
        title: String::new(),
    })
    .await;
    let config = test_config(Framing::MarkerScan);
    let client = build_client(&config.stream).unwrap();
    let res = fetch_current_title(&client, &station.url, &config.stream, 64).await;
    assert!(matches!(res, Err(Error::TitleNotFound)));
}

/// Real-world probe.  Set NOWPLAYING_PROBE_URL to an ICY stream.
#[tokio::test]
#[ignore = "network diagnostic; run explicitly with --ignored --nocapture"]
async fn probe_real_station() {
    let url = std::env::var("NOWPLAYING_PROBE_URL")
        .unwrap_or_else(|_| "http://ice1.somafm.com/groovesalad-128-mp3".to_string());
    let config = nowplaying_core::config::Config::default();
    let client = build_client(&config.stream).unwrap();
    let started = Instant::now();
    let res = fetch_current_title(&client, &url, &config.stream, config.stream.window_size).await;
    println!("url: {}", url);
    println!("elapsed_ms: {}", started.elapsed().as_millis());
    match res {
        Ok(obs) => println!("artist: {:?}\nsong: {:?}", obs.artist, obs.song),
        Err(e) => println!("error: {}", e),
    }
}
