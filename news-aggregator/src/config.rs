//! YAML application configuration.
//!
//! The file is optional: a missing file yields the built-in defaults, which
//! carry a starter list of public feeds. Durations are written as plain
//! integers with the unit in the key name.

use crate::cache::CacheSettings;
use crate::registry::{CategorySettings, SourceRegistry, DEFAULT_REFRESH_INTERVAL};
use crate::relatedness::RelatednessSettings;
use crate::types::{AggregatorError, FetchConfig, Result, Source, SourceKind};
use interfaces::view::ConfigEdit;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub location: PathBuf,
    pub ttl_secs: u64,
    pub retention_secs: u64,
    pub max_articles_per_category: usize,
    pub eviction_interval_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            location: PathBuf::from(".newsapp/cache.db"),
            ttl_secs: 24 * 3600,
            retention_secs: 7 * 24 * 3600,
            max_articles_per_category: 1000,
            eviction_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_backoff_ms: u64,
    pub max_concurrent_fetches: usize,
    pub respect_robots_txt: bool,
    pub default_rate_limit_ms: u64,
    pub max_items_per_source: usize,
    pub max_feed_size_mb: usize,
}

impl Default for FetchSection {
    fn default() -> Self {
        let fetch = FetchConfig::default();
        Self {
            user_agent: fetch.user_agent,
            timeout_secs: fetch.timeout.as_secs(),
            max_retries: fetch.max_retries,
            retry_delay_ms: fetch.retry_delay.as_millis() as u64,
            max_backoff_ms: fetch.max_backoff.as_millis() as u64,
            max_concurrent_fetches: fetch.max_concurrent_fetches,
            respect_robots_txt: fetch.respect_robots_txt,
            default_rate_limit_ms: fetch.default_rate_limit.as_millis() as u64,
            max_items_per_source: fetch.max_items_per_source,
            max_feed_size_mb: fetch.max_feed_size_mb,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelatednessSection {
    pub window_hours: u64,
    pub min_shared_tokens: usize,
}

impl Default for RelatednessSection {
    fn default() -> Self {
        Self {
            window_hours: 48,
            min_shared_tokens: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorySection {
    pub refresh_interval_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

impl Default for CategorySection {
    fn default() -> Self {
        Self {
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL.as_secs(),
            ttl_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheSection,
    pub fetch: FetchSection,
    pub relatedness: RelatednessSection,
    pub categories: BTreeMap<String, CategorySection>,
    /// Key used by `api` sources that do not carry their own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub sources: Vec<Source>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache: CacheSection::default(),
            fetch: FetchSection::default(),
            relatedness: RelatednessSection::default(),
            categories: BTreeMap::new(),
            api_key: None,
            sources: default_sources(),
        }
    }
}

fn feed(name: &str, url: &str, categories: &[&str]) -> Source {
    categories
        .iter()
        .fold(Source::new(name, SourceKind::Feed, url), |s, c| s.in_category(*c))
}

fn default_sources() -> Vec<Source> {
    vec![
        feed("hackernews", "https://news.ycombinator.com/rss", &["tech", "business"]),
        feed("github_trending", "https://github.com/trending.atom", &["tech"]),
        feed("techcrunch", "https://techcrunch.com/feed/", &["tech", "business"]),
        feed("bbc_tech", "https://feeds.bbci.co.uk/news/technology/rss.xml", &["tech"]),
        feed(
            "bbc_us",
            "https://feeds.bbci.co.uk/news/world/us_and_canada/rss.xml",
            &["us", "world"],
        ),
        feed("bbc_world", "https://feeds.bbci.co.uk/news/world/rss.xml", &["world"]),
        feed("bbc_business", "https://feeds.bbci.co.uk/news/business/rss.xml", &["business"]),
        feed(
            "bbc_science",
            "https://feeds.bbci.co.uk/news/science_and_environment/rss.xml",
            &["science"],
        ),
        feed("bbc_sport", "https://feeds.bbci.co.uk/sport/rss.xml", &["sports"]),
        feed(
            "bbc_entertainment",
            "https://feeds.bbci.co.uk/news/entertainment_and_arts/rss.xml",
            &["entertainment"],
        ),
        feed("npr_news", "https://feeds.npr.org/1001/rss.xml", &["us", "world"]),
        feed(
            "reuters_world",
            "https://www.reutersagency.com/feed/?taxonomy=best-topics&post_type=best",
            &["world", "business"],
        ),
        feed("reddit_worldnews", "https://www.reddit.com/r/worldnews/.rss", &["world"]),
        feed("reddit_news", "https://www.reddit.com/r/news/.rss", &["us"]),
        feed("reddit_technology", "https://www.reddit.com/r/technology/.rss", &["tech"]),
    ]
}

impl AppConfig {
    /// Read and validate `path`; a missing file gives the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = match tokio::fs::read_to_string(path).await {
            Ok(raw) => {
                let config: AppConfig = serde_yaml::from_str(&raw)?;
                info!("Configuration loaded from {}", path.display());
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file not found at {}, using defaults", path.display());
                AppConfig::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.validate()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_yaml::to_string(self)?).await?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(AggregatorError::Config("source with empty name".to_string()));
            }
            if !names.insert(source.name.as_str()) {
                return Err(AggregatorError::Config(format!(
                    "duplicate source name {:?}",
                    source.name
                )));
            }

            let parsed = url::Url::parse(&source.url)?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AggregatorError::Config(format!(
                    "source {:?} uses unsupported scheme {:?}",
                    source.name,
                    parsed.scheme()
                )));
            }

            if source.categories.is_empty() {
                return Err(AggregatorError::Config(format!(
                    "source {:?} has no category",
                    source.name
                )));
            }

            match source.kind {
                SourceKind::Scrape => {
                    let has_title = source
                        .selectors
                        .as_ref()
                        .is_some_and(|s| !s.title.trim().is_empty());
                    if !has_title {
                        return Err(AggregatorError::Config(format!(
                            "scrape source {:?} needs a title selector",
                            source.name
                        )));
                    }
                }
                SourceKind::Api => {
                    if source.api_key.is_none() && self.api_key.is_none() {
                        return Err(AggregatorError::Config(format!(
                            "api source {:?} has no api key",
                            source.name
                        )));
                    }
                }
                SourceKind::Feed => {}
            }
        }

        for (category, settings) in &self.categories {
            if settings.refresh_interval_secs == 0 {
                return Err(AggregatorError::Config(format!(
                    "category {:?} has a zero refresh interval",
                    category
                )));
            }
        }
        Ok(())
    }

    /// Enabled sources grouped by category, with the shared API key filled in.
    pub fn registry(&self) -> SourceRegistry {
        let sources = self
            .sources
            .iter()
            .filter(|s| s.enabled)
            .cloned()
            .map(|mut s| {
                if s.kind == SourceKind::Api && s.api_key.is_none() {
                    s.api_key = self.api_key.clone();
                }
                s
            })
            .collect();

        let settings = self
            .categories
            .iter()
            .map(|(name, c)| {
                (
                    name.clone(),
                    CategorySettings {
                        refresh_interval: Duration::from_secs(c.refresh_interval_secs),
                        ttl: c.ttl_secs.map(Duration::from_secs),
                    },
                )
            })
            .collect();

        SourceRegistry::new(sources, settings)
    }

    pub fn fetch_config(&self) -> FetchConfig {
        let f = &self.fetch;
        FetchConfig {
            user_agent: f.user_agent.clone(),
            timeout: Duration::from_secs(f.timeout_secs),
            max_retries: f.max_retries,
            retry_delay: Duration::from_millis(f.retry_delay_ms),
            max_backoff: Duration::from_millis(f.max_backoff_ms),
            respect_robots_txt: f.respect_robots_txt,
            max_feed_size_mb: f.max_feed_size_mb,
            default_rate_limit: Duration::from_millis(f.default_rate_limit_ms),
            max_items_per_source: f.max_items_per_source,
            max_concurrent_fetches: f.max_concurrent_fetches,
            ..FetchConfig::default()
        }
    }

    pub fn cache_settings(&self) -> CacheSettings {
        let ttl_overrides: HashMap<String, Duration> = self
            .categories
            .iter()
            .filter_map(|(name, c)| c.ttl_secs.map(|t| (name.clone(), Duration::from_secs(t))))
            .collect();

        CacheSettings {
            ttl: Duration::from_secs(self.cache.ttl_secs),
            retention: Duration::from_secs(self.cache.retention_secs),
            ttl_overrides,
            max_articles_per_category: self.cache.max_articles_per_category,
        }
    }

    pub fn relatedness_settings(&self) -> RelatednessSettings {
        RelatednessSettings {
            window: Duration::from_secs(self.relatedness.window_hours * 3600),
            min_shared_tokens: self.relatedness.min_shared_tokens,
            ..RelatednessSettings::default()
        }
    }

    /// Apply an edit requested from the settings screen. The config is left
    /// unchanged when the result would not validate.
    pub fn apply_edit(&mut self, edit: ConfigEdit) -> Result<()> {
        let mut next = self.clone();
        match edit {
            ConfigEdit::AddSource(source) => next.sources.push(source),
            ConfigEdit::RemoveSource { name } => {
                let before = next.sources.len();
                next.sources.retain(|s| s.name != name);
                if next.sources.len() == before {
                    return Err(AggregatorError::Config(format!("no source named {:?}", name)));
                }
            }
            ConfigEdit::SetSourceEnabled { name, enabled } => {
                let source = next
                    .sources
                    .iter_mut()
                    .find(|s| s.name == name)
                    .ok_or_else(|| AggregatorError::Config(format!("no source named {:?}", name)))?;
                source.enabled = enabled;
            }
            ConfigEdit::SetRefreshInterval { category, secs } => {
                next.categories.entry(category).or_default().refresh_interval_secs = secs;
            }
        }
        next.validate()?;
        *self = next;
        Ok(())
    }
}
