#![allow(dead_code)]

//! In-process radio server speaking just enough HTTP/ICY for the reader.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use nowplaying_core::config::{Config, Framing};

pub const METAINT: usize = 32;

#[derive(Debug, Clone)]
pub enum Behaviour {
    /// `icy-metaint: METAINT`, then audio/metadata blocks every 10 ms.
    Icy { title: String },
    /// Like `Icy`, but the title is `Live - N` where N counts 10 ms ticks
    /// since the station started, on every connection alike.
    Live,
    /// A plain audio stream with no `icy-metaint` header.
    NoMetaint,
    /// Headers only, then silence.
    Stall,
    /// A fixed status line and an empty body.
    Status(u16),
}

pub struct MockStation {
    pub url: String,
    started: Instant,
    connects: Arc<Mutex<Vec<Instant>>>,
    last_request: Arc<Mutex<Option<String>>>,
    task: JoinHandle<()>,
}

impl MockStation {
    pub async fn spawn(behaviour: Behaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let started = Instant::now();
        let connects = Arc::new(Mutex::new(Vec::new()));
        let last_request = Arc::new(Mutex::new(None));

        let conns = connects.clone();
        let last = last_request.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                conns.lock().unwrap().push(Instant::now());
                let b = behaviour.clone();
                let last = last.clone();
                tokio::spawn(async move {
                    serve(stream, b, last, started).await;
                });
            }
        });

        Self {
            url: format!("http://{}/live.mp3", addr),
            started,
            connects,
            last_request,
            task,
        }
    }

    pub fn connections(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    /// When each connection was accepted.
    pub fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().unwrap().clone()
    }

    /// The `Live` tick being broadcast right now.
    pub fn live_tick(&self) -> u64 {
        live_tick(self.started)
    }

    /// Raw request head of the most recent connection, lowercased.
    pub fn last_request(&self) -> Option<String> {
        self.last_request.lock().unwrap().clone()
    }
}

impl Drop for MockStation {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn live_tick(started: Instant) -> u64 {
    (started.elapsed().as_millis() / 10) as u64
}

async fn serve(
    mut stream: TcpStream,
    behaviour: Behaviour,
    last: Arc<Mutex<Option<String>>>,
    started: Instant,
) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    *last.lock().unwrap() = Some(String::from_utf8_lossy(&head).to_ascii_lowercase());

    match behaviour {
        Behaviour::Icy { title } => {
            let headers = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\nicy-name: Mock FM\r\nicy-metaint: {}\r\nConnection: close\r\n\r\n",
                METAINT
            );
            if stream.write_all(headers.as_bytes()).await.is_err() {
                return;
            }
            let block = icy_block(&title);
            loop {
                if stream.write_all(&block).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
        Behaviour::Live => {
            let headers = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\nicy-metaint: {}\r\nConnection: close\r\n\r\n",
                METAINT
            );
            if stream.write_all(headers.as_bytes()).await.is_err() {
                return;
            }
            loop {
                let block = icy_block(&format!("Live - {}", live_tick(started)));
                if stream.write_all(&block).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
        Behaviour::NoMetaint => {
            let headers = "HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\nConnection: close\r\n\r\n";
            if stream.write_all(headers.as_bytes()).await.is_err() {
                return;
            }
            loop {
                if stream.write_all(&[0xAA; 256]).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
        Behaviour::Stall => {
            let headers = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\nicy-metaint: {}\r\nConnection: close\r\n\r\n",
                METAINT
            );
            let _ = stream.write_all(headers.as_bytes()).await;
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Behaviour::Status(code) => {
            let resp = format!(
                "HTTP/1.1 {} Mock\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                code
            );
            let _ = stream.write_all(resp.as_bytes()).await;
        }
    }
}

/// METAINT audio bytes, a length byte, then the padded metadata payload.
pub fn icy_block(title: &str) -> Vec<u8> {
    let mut meta = if title.is_empty() {
        b"StreamUrl='';".to_vec()
    } else {
        format!("StreamTitle='{}';StreamUrl='';", title).into_bytes()
    };
    let padded = meta.len().div_ceil(16) * 16;
    meta.resize(padded, 0);

    let mut block = vec![0xAA; METAINT];
    block.push((padded / 16) as u8);
    block.extend_from_slice(&meta);
    block
}

/// A URL nothing is listening on.
pub async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/stream", addr)
}

/// Short intervals so monitors cycle quickly under test.
pub fn test_config(framing: Framing) -> Config {
    let mut config = Config::default();
    config.monitor.poll_interval_secs = 1;
    config.monitor.min_history_interval_secs = 30;
    config.monitor.backoff_ceiling_secs = 4;
    config.stream.connect_timeout_secs = 2;
    config.stream.read_timeout_secs = 2;
    config.stream.framing = framing;
    // Two full blocks, so a window always holds one complete title.
    config.stream.window_size = 2 * icy_block("Queen - Bohemian Rhapsody").len();
    config.stream.one_shot_max_windows = 4;
    config
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_for<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}
