use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub use interfaces::defs::{Article, ScrapeSelectors, Source, SourceKind};

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    /// Bound on a single HTTP attempt, connect through body.
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub max_backoff: Duration,
    pub respect_robots_txt: bool,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
    /// Used when a source does not configure its own delay.
    pub default_rate_limit: Duration,
    pub max_items_per_source: usize,
    /// Global ceiling on simultaneous source fetches in one refresh.
    pub max_concurrent_fetches: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "news-aggregator/0.1".to_string(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            respect_robots_txt: true,
            max_feed_size_mb: 10,
            max_redirects: 5,
            default_rate_limit: Duration::from_secs(1),
            max_items_per_source: 20,
            max_concurrent_fetches: 8,
        }
    }
}

/// One entry as it came off the wire, before canonicalisation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawItem {
    pub title: String,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub score: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("source unreachable: {0}")]
    Unreachable(String),

    #[error("malformed content: {0}")]
    ParseError(String),

    #[error("robots.txt disallows {0}")]
    Disallowed(String),

    #[error("rate limited by server")]
    RateLimited { retry_after: Option<Duration> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Timeout,
    Unreachable,
    ParseError,
    Disallowed,
    RateLimited,
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Timeout(_) => FetchErrorKind::Timeout,
            FetchError::Unreachable(_) => FetchErrorKind::Unreachable,
            FetchError::ParseError(_) => FetchErrorKind::ParseError,
            FetchError::Disallowed(_) => FetchErrorKind::Disallowed,
            FetchError::RateLimited { .. } => FetchErrorKind::RateLimited,
        }
    }

    /// Timeouts, connection failures and throttling may clear up on their own;
    /// malformed content and robots denials will not. HTTP 4xx responses are
    /// reported as `Unreachable` but never reach the retry loop.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(_) | FetchError::Unreachable(_) | FetchError::RateLimited { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source: String,
    pub kind: FetchErrorKind,
    pub message: String,
}

/// Result of one refresh cycle for one category. Partial failure is
/// reported here rather than raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshOutcome {
    pub category: String,
    pub run_id: Uuid,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: Vec<SourceFailure>,
    pub articles: usize,
    pub written: bool,
    pub cancelled: bool,
    pub write_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RefreshOutcome {
    pub fn new(category: &str) -> Self {
        let now = Utc::now();
        Self {
            category: category.to_string(),
            run_id: Uuid::new_v4(),
            attempted: 0,
            succeeded: 0,
            failed: Vec::new(),
            articles: 0,
            written: false,
            cancelled: false,
            write_error: None,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn all_failed(&self) -> bool {
        self.attempted > 0 && self.succeeded == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("cache write failed: {0}")]
    WriteFailed(String),

    #[error("cached entry for {category} is corrupted: {reason}")]
    ReadCorrupted { category: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, AggregatorError>;
