use crate::parser::FeedParser;
use crate::rate_limit::RateLimiter;
use crate::robots::RobotsCache;
use crate::scrape;
use crate::traits::SourceFetcher;
use crate::types::{FetchConfig, FetchError, RawItem, Result, Source, SourceKind};
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff, SystemClock};
use reqwest::header::{ACCEPT, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// How a single attempt failed, which decides whether to try again.
enum AttemptError {
    Transient(FetchError),
    RateLimited(Option<Duration>),
    Fatal(FetchError),
}

pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    robots_cache: RobotsCache,
    rate_limiter: RateLimiter,
    // Scrape sources that have yielded items at least once.
    working_scrapes: Arc<RwLock<HashSet<String>>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            config,
            robots_cache: RobotsCache::new(),
            rate_limiter: RateLimiter::new(),
            working_scrapes: Arc::new(RwLock::new(HashSet::new())),
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn rate_interval(&self, source: &Source) -> Duration {
        if source.rate_limit.is_zero() {
            self.config.default_rate_limit
        } else {
            source.rate_limit
        }
    }

    fn backoff(&self) -> ExponentialBackoff<SystemClock> {
        ExponentialBackoff {
            current_interval: self.config.retry_delay,
            initial_interval: self.config.retry_delay,
            max_interval: self.config.max_backoff,
            multiplier: 2.0,
            randomization_factor: 0.2,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Jitter can push a draw past `max_interval`, so clamp it.
    fn next_delay(&self, backoff: &mut ExponentialBackoff<SystemClock>) -> Duration {
        backoff
            .next_backoff()
            .unwrap_or(self.config.max_backoff)
            .min(self.config.max_backoff)
    }

    pub async fn fetch_source(
        &self,
        source: &Source,
    ) -> std::result::Result<Vec<RawItem>, FetchError> {
        let start_time = Instant::now();
        debug!("Fetching source: {} ({})", source.name, source.url);

        if source.kind == SourceKind::Scrape && self.config.respect_robots_txt {
            self.robots_cache
                .check(&self.client, &self.config.user_agent, &source.url)
                .await?;
        }

        let interval = self.rate_interval(source);
        let mut backoff = self.backoff();
        let mut last_error = FetchError::Unreachable("no attempt made".to_string());

        for attempt in 0..=self.config.max_retries {
            self.rate_limiter.acquire(&source.name, interval).await;

            match self.attempt(source).await {
                Ok(body) => {
                    let items = self.parse(source, &body).await?;
                    info!(
                        source = %source.name,
                        items = items.len(),
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Fetched source"
                    );
                    return Ok(items);
                }
                Err(AttemptError::Fatal(e)) => {
                    warn!(source = %source.name, error = %e, "Fetch failed without retry");
                    return Err(e);
                }
                Err(AttemptError::RateLimited(retry_after)) => {
                    let delay = retry_after
                        .unwrap_or(self.config.max_backoff)
                        .min(self.config.max_backoff);
                    warn!(
                        source = %source.name,
                        attempt = attempt + 1,
                        ?delay,
                        "Rate limited by server"
                    );
                    self.rate_limiter.penalize(&source.name, interval, delay).await;
                    last_error = FetchError::RateLimited { retry_after };
                }
                Err(AttemptError::Transient(e)) => {
                    if attempt < self.config.max_retries {
                        let delay = self.next_delay(&mut backoff);
                        warn!(
                            source = %source.name,
                            attempt = attempt + 1,
                            ?delay,
                            error = %e,
                            "Attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = e;
                }
            }
        }

        warn!(
            source = %source.name,
            attempts = self.config.max_retries + 1,
            error = %last_error,
            "Giving up on source"
        );
        Err(last_error)
    }

    async fn attempt(&self, source: &Source) -> std::result::Result<String, AttemptError> {
        let mut request = self.client.get(&source.url).header(ACCEPT, accept_header(source.kind));
        if source.kind == SourceKind::Api {
            if let Some(key) = &source.api_key {
                request = request.header("X-Api-Key", key);
            }
        }

        let max_bytes = (self.config.max_feed_size_mb * 1024 * 1024) as u64;
        let timeout = self.config.timeout;
        let exchange = async {
            let response = request.send().await.map_err(|e| classify_request_error(e, timeout))?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                return Err(AttemptError::RateLimited(retry_after));
            }
            if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
                let error = FetchError::Unreachable(format!("HTTP {}", status));
                return Err(AttemptError::Transient(error));
            }
            if !status.is_success() {
                let error = FetchError::Unreachable(format!("HTTP {}", status));
                return Err(AttemptError::Fatal(error));
            }
            if let Some(len) = response.content_length() {
                if len > max_bytes {
                    return Err(AttemptError::Fatal(FetchError::ParseError(format!(
                        "body of {} bytes exceeds limit",
                        len
                    ))));
                }
            }

            read_capped(response, max_bytes, timeout).await
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(AttemptError::Transient(FetchError::Timeout(timeout))),
        }
    }

    async fn parse(
        &self,
        source: &Source,
        body: &str,
    ) -> std::result::Result<Vec<RawItem>, FetchError> {
        let max_items = source.max_items.unwrap_or(self.config.max_items_per_source);
        match source.kind {
            SourceKind::Feed => FeedParser::parse_feed(body, max_items),
            SourceKind::Api => FeedParser::parse_api(body, max_items),
            SourceKind::Scrape => {
                let selectors = source.selectors.as_ref().ok_or_else(|| {
                    let reason = format!("scrape source {} has no selectors", source.name);
                    FetchError::ParseError(reason)
                })?;
                let items = scrape::parse_page(body, &source.url, selectors, max_items)?;

                if items.is_empty() {
                    if self.working_scrapes.read().await.contains(&source.name) {
                        return Err(FetchError::ParseError(format!(
                            "selector {:?} matched nothing on a previously working page",
                            selectors.title
                        )));
                    }
                } else {
                    self.working_scrapes.write().await.insert(source.name.clone());
                }
                Ok(items)
            }
        }
    }
}

/// Content-Length can be absent, so the cap is enforced on the bytes read.
async fn read_capped(
    mut response: reqwest::Response,
    max_bytes: u64,
    timeout: Duration,
) -> std::result::Result<String, AttemptError> {
    let mut body: Vec<u8> = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| classify_request_error(e, timeout))?
    {
        if (body.len() + chunk.len()) as u64 > max_bytes {
            return Err(AttemptError::Fatal(FetchError::ParseError(format!(
                "body exceeds limit of {} bytes",
                max_bytes
            ))));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

fn accept_header(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Feed => concat!(
            "application/rss+xml, application/atom+xml, ",
            "application/xml;q=0.9, text/xml;q=0.8, */*;q=0.5"
        ),
        SourceKind::Scrape => "text/html, application/xhtml+xml;q=0.9, */*;q=0.5",
        SourceKind::Api => "application/json",
    }
}

fn classify_request_error(e: reqwest::Error, timeout: Duration) -> AttemptError {
    let error = if e.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Unreachable(e.to_string())
    };
    // A request that could not even be built will fail the same way again.
    if e.is_builder() || !error.is_transient() {
        AttemptError::Fatal(error)
    } else {
        AttemptError::Transient(error)
    }
}

#[async_trait]
impl SourceFetcher for Fetcher {
    async fn fetch(&self, source: &Source) -> std::result::Result<Vec<RawItem>, FetchError> {
        self.fetch_source(source).await
    }
}
