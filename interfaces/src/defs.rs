use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Feed,
    Scrape,
    Api,
}

/// CSS selectors used to pull items out of a scraped page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeSelectors {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub kind: SourceKind,
    pub url: String,
    pub categories: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectors: Option<ScrapeSelectors>,
    /// Minimum delay between two requests to this source.
    #[serde(default, with = "millis", rename = "rate_limit_ms")]
    pub rate_limit: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl Source {
    pub fn new(name: impl Into<String>, kind: SourceKind, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            url: url.into(),
            categories: BTreeSet::new(),
            selectors: None,
            rate_limit: Duration::ZERO,
            api_key: None,
            max_items: None,
            enabled: true,
        }
    }

    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.categories.insert(category.into());
        self
    }

    pub fn with_rate_limit(mut self, delay: Duration) -> Self {
        self.rate_limit = delay;
        self
    }

    pub fn with_selectors(mut self, selectors: ScrapeSelectors) -> Self {
        self.selectors = Some(selectors);
        self
    }

    pub fn belongs_to(&self, category: &str) -> bool {
        self.categories.contains(category)
    }
}

/// A merged, cached news item. `key` is the deduplication identity and never
/// changes once the article has been stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub key: String,
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub content_preview: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    pub source: String,
    pub categories: BTreeSet<String>,
    pub read_time_minutes: u32,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_bookmarked: bool,
}

impl Article {
    pub fn shares_category_with(&self, other: &Article) -> bool {
        self.categories.iter().any(|c| other.categories.contains(c))
    }
}

// Durations travel through config files as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
