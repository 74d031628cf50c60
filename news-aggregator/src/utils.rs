use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Deduplication identity for an article: the normalised URL when the item
/// has a usable one, otherwise a digest of title, source and the published
/// time truncated to the minute.
pub fn canonical_key(
    link: Option<&str>,
    title: &str,
    source: &str,
    published_at: Option<DateTime<Utc>>,
) -> String {
    if let Some(normalized) = link.and_then(url::normalize) {
        return format!("url:{}", normalized);
    }

    let minute = published_at
        .map(|dt| time::truncate_to_minute(dt).to_rfc3339())
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(text::collapse_whitespace(title).to_lowercase().as_bytes());
    hasher.update([0x1f]);
    hasher.update(source.as_bytes());
    hasher.update([0x1f]);
    hasher.update(minute.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("hash:{}", hex)
}

/// URL utilities for article links
pub mod url {
    use url::Url;

    const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid", "ref", "cmpid"];

    /// Canonical form of an http(s) URL: no fragment, no tracking parameters,
    /// sorted query, no trailing slash. Anything else is considered unreliable.
    pub fn normalize(raw: &str) -> Option<String> {
        let mut url = Url::parse(raw.trim()).ok()?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return None;
        }
        url.host_str()?;
        url.set_fragment(None);

        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| {
                let key: &str = k;
                !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key)
            })
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        pairs.sort();
        if pairs.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }

        let path = url.path().to_string();
        if path.len() > 1 && path.ends_with('/') {
            url.set_path(path.trim_end_matches('/'));
        }

        // Both schemes serve the same article.
        let mut out = url.to_string();
        if let Some(rest) = out.strip_prefix("http://") {
            out = format!("https://{}", rest);
        }
        Some(out)
    }

    /// Resolve a possibly relative link against the page it was found on.
    pub fn resolve(base: &str, href: &str) -> Option<String> {
        let base = Url::parse(base).ok()?;
        base.join(href.trim()).ok().map(|u| u.to_string())
    }

    pub fn is_http(url_str: &str) -> bool {
        matches!(Url::parse(url_str), Ok(u) if u.scheme() == "http" || u.scheme() == "https")
    }
}

/// Text processing utilities
pub mod text {
    use once_cell::sync::Lazy;
    use regex::Regex;
    use std::collections::BTreeSet;

    static TAGS: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>|</?[^>]+>").unwrap()
    });

    /// Words per minute used for read-time estimates.
    pub const READING_SPEED_WPM: usize = 200;

    pub fn collapse_whitespace(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Strip tags, decode entities and collapse whitespace.
    pub fn strip_html(text: &str) -> String {
        let without_tags = TAGS.replace_all(text, " ");
        let decoded = html_escape::decode_html_entities(&without_tags);
        collapse_whitespace(&decoded)
    }

    /// Truncate to at most `max_chars` characters, preferring a word boundary.
    pub fn truncate_chars(text: &str, max_chars: usize) -> String {
        if text.chars().count() <= max_chars {
            return text.to_string();
        }
        let cut: String = text.chars().take(max_chars).collect();
        match cut.rfind(' ') {
            Some(idx) if idx > max_chars / 2 => cut[..idx].trim_end().to_string(),
            _ => cut,
        }
    }

    pub fn word_count(text: &str) -> usize {
        text.split_whitespace().count()
    }

    pub fn read_time_minutes(words: usize) -> u32 {
        words.div_ceil(READING_SPEED_WPM).max(1) as u32
    }

    /// Lowercase alphanumeric tokens longer than three characters that are
    /// not stop words.
    pub fn significant_tokens(text: &str) -> BTreeSet<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| word.chars().count() > 3)
            .filter(|word| !is_stop_word(word))
            .map(str::to_string)
            .collect()
    }

    /// Check if a word is a common stop word
    pub fn is_stop_word(word: &str) -> bool {
        matches!(
            word,
            "about" | "after" | "again" | "also" | "been" | "before" | "being" | "could" | "does" |
            "from" | "have" | "here" | "into" | "just" | "more" | "most" | "much" | "only" |
            "over" | "said" | "says" | "should" | "some" | "such" | "than" | "that" | "their" |
            "them" | "then" | "there" | "these" | "they" | "this" | "those" | "very" | "were" |
            "what" | "when" | "where" | "which" | "while" | "will" | "with" | "would" | "your" |
            "news" | "today"
        )
    }
}

/// Time utilities
pub mod time {
    use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub enum Precision {
        Day,
        Minute,
        Second,
        SubSecond,
    }

    pub fn truncate_to_minute(dt: DateTime<Utc>) -> DateTime<Utc> {
        dt.duration_trunc(Duration::minutes(1)).unwrap_or(dt)
    }

    /// How precise a timestamp looks, judged from its trailing zero fields.
    pub fn precision(dt: DateTime<Utc>) -> Precision {
        if dt.nanosecond() != 0 {
            Precision::SubSecond
        } else if dt.second() != 0 {
            Precision::Second
        } else if dt.minute() != 0 || dt.hour() != 0 {
            Precision::Minute
        } else {
            Precision::Day
        }
    }

    /// Keep the first-seen publication time unless the newer one is strictly
    /// more precise.
    pub fn merge_published(
        existing: Option<DateTime<Utc>>,
        incoming: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        match (existing, incoming) {
            (None, other) => other,
            (Some(old), None) => Some(old),
            (Some(old), Some(new)) if precision(new) > precision(old) => Some(new),
            (Some(old), Some(_)) => Some(old),
        }
    }

    /// Format duration in human-readable form
    pub fn format_duration(duration: std::time::Duration) -> String {
        let total_seconds = duration.as_secs();

        if total_seconds < 60 {
            format!("{}s", total_seconds)
        } else if total_seconds < 3600 {
            format!("{}m", total_seconds / 60)
        } else if total_seconds < 86400 {
            format!("{}h", total_seconds / 3600)
        } else {
            format!("{}d", total_seconds / 86400)
        }
    }
}
