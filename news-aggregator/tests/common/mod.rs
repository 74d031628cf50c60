#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use news_aggregator::{
    Article, ArticleCache, CacheSettings, FetchConfig, FetchError, RawItem, Source, SourceFetcher,
    SourceKind,
};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tempfile::TempDir;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// A database path inside a fresh temp dir. Keep the `TempDir` alive for
/// as long as the database is in use; dropping it removes the files.
pub fn temp_db() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("cache.db");
    (dir, path)
}

pub async fn open_cache(path: &PathBuf) -> Arc<ArticleCache> {
    open_cache_with(path, CacheSettings::default()).await
}

pub async fn open_cache_with(path: &PathBuf, settings: CacheSettings) -> Arc<ArticleCache> {
    Arc::new(ArticleCache::open(path, settings).await.expect("open cache"))
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn feed_source(name: &str, category: &str) -> Source {
    Source::new(name, SourceKind::Feed, format!("https://{}.test/rss", name)).in_category(category)
}

/// A raw item published `minutes_ago` minutes before `base_time()`.
pub fn raw_item(title: &str, link: &str, minutes_ago: i64) -> RawItem {
    RawItem {
        title: title.to_string(),
        link: Some(link.to_string()),
        summary: Some(format!("Summary of {}", title)),
        published_at: Some(base_time() - ChronoDuration::minutes(minutes_ago)),
        ..Default::default()
    }
}

/// `count` items from `source`, newest first, with distinct links.
pub fn raw_items(source: &str, count: usize) -> Vec<RawItem> {
    (0..count)
        .map(|i| {
            raw_item(
                &format!("{} story {}", source, i),
                &format!("https://{}.test/story/{}", source, i),
                i as i64 * 10,
            )
        })
        .collect()
}

pub fn article(
    key: &str,
    title: &str,
    source: &str,
    categories: &[&str],
    minutes_ago: i64,
) -> Article {
    Article {
        key: key.to_string(),
        title: title.to_string(),
        summary: String::new(),
        content_preview: None,
        url: Some(format!("https://{}.test/{}", source, key)),
        image_url: None,
        author: None,
        published_at: Some(base_time() - ChronoDuration::minutes(minutes_ago)),
        source: source.to_string(),
        categories: categories.iter().map(|c| c.to_string()).collect::<BTreeSet<_>>(),
        read_time_minutes: 1,
        fetched_at: Utc::now(),
        tags: Vec::new(),
        score: None,
        is_read: false,
        is_bookmarked: false,
    }
}

/// Fast retry settings for tests that talk to the local HTTP server.
pub fn test_fetch_config() -> FetchConfig {
    FetchConfig {
        timeout: Duration::from_millis(500),
        max_retries: 2,
        retry_delay: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        default_rate_limit: Duration::from_millis(1),
        ..FetchConfig::default()
    }
}

/// `SourceFetcher` with canned per-source results that counts its calls.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, Result<Vec<RawItem>, FetchError>>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: AtomicUsize,
    calls_by_source: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, source: &str, result: Result<Vec<RawItem>, FetchError>) -> Self {
        self.set(source, result);
        self
    }

    pub fn with_delay(self, source: &str, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(source.to_string(), delay);
        self
    }

    pub fn set(&self, source: &str, result: Result<Vec<RawItem>, FetchError>) {
        self.scripts.lock().unwrap().insert(source.to_string(), result);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, source: &str) -> usize {
        self.calls_by_source.lock().unwrap().get(source).copied().unwrap_or(0)
    }

    /// Most calls that were running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for ScriptedFetcher {
    async fn fetch(&self, source: &Source) -> Result<Vec<RawItem>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        *self
            .calls_by_source
            .lock()
            .unwrap()
            .entry(source.name.clone())
            .or_default() += 1;

        let delay = self.delays.lock().unwrap().get(&source.name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = self
            .scripts
            .lock()
            .unwrap()
            .get(&source.name)
            .cloned()
            .unwrap_or_else(|| {
                Err(FetchError::Unreachable(format!("no script for {}", source.name)))
            });
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[derive(Clone)]
pub struct CannedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub delay: Duration,
    pub chunked: bool,
}

impl CannedResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            delay: Duration::ZERO,
            chunked: false,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Send the body with chunked transfer encoding and no Content-Length.
    pub fn chunked(mut self) -> Self {
        self.chunked = true;
        self
    }
}

/// Minimal HTTP/1.1 server on localhost. Each path serves its queued
/// responses in order and repeats the last one; unknown paths get 404.
pub struct MockServer {
    pub base_url: String,
    routes: Arc<Mutex<HashMap<String, VecDeque<CannedResponse>>>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let routes: Arc<Mutex<HashMap<String, VecDeque<CannedResponse>>>> = Arc::default();
        let hits: Arc<Mutex<HashMap<String, usize>>> = Arc::default();

        let (r, h) = (routes.clone(), hits.clone());
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let (routes, hits) = (r.clone(), h.clone());
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let mut read = 0;
                    while read < buf.len() {
                        match socket.read(&mut buf[read..]).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => read += n,
                        }
                        if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    let request = String::from_utf8_lossy(&buf[..read]);
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                    *hits.lock().unwrap().entry(path.clone()).or_default() += 1;

                    let response = {
                        let mut routes = routes.lock().unwrap();
                        match routes.get_mut(&path) {
                            Some(queue) if queue.len() > 1 => queue.pop_front(),
                            Some(queue) => queue.front().cloned(),
                            None => None,
                        }
                    }
                    .unwrap_or_else(|| CannedResponse::status(404, "not found"));

                    if !response.delay.is_zero() {
                        tokio::time::sleep(response.delay).await;
                    }

                    let mut head =
                        format!("HTTP/1.1 {} Canned\r\nConnection: close\r\n", response.status);
                    if response.chunked {
                        head.push_str("Transfer-Encoding: chunked\r\n");
                    } else {
                        head.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
                    }
                    for (name, value) in &response.headers {
                        head.push_str(&format!("{}: {}\r\n", name, value));
                    }
                    head.push_str("\r\n");
                    let _ = socket.write_all(head.as_bytes()).await;

                    if response.chunked {
                        for chunk in response.body.as_bytes().chunks(64 * 1024) {
                            let size = format!("{:x}\r\n", chunk.len());
                            let _ = socket.write_all(size.as_bytes()).await;
                            let _ = socket.write_all(chunk).await;
                            let _ = socket.write_all(b"\r\n").await;
                        }
                        let _ = socket.write_all(b"0\r\n\r\n").await;
                    } else {
                        let _ = socket.write_all(response.body.as_bytes()).await;
                    }
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self {
            base_url: format!("http://{}", addr),
            routes,
            hits,
        }
    }

    pub fn route(&self, path: &str, responses: Vec<CannedResponse>) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), responses.into_iter().collect());
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

pub fn rss(items: &[(&str, &str)]) -> String {
    let body: String = items
        .iter()
        .map(|(title, link)| {
            format!(
                "<item><title>{}</title><link>{}</link><pubDate>Wed, 01 May 2024 10:00:00 GMT</pubDate></item>",
                title, link
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title><link>https://x.test</link><description>d</description>{}</channel></rss>"#,
        body
    )
}
