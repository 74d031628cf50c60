use crate::types::{Article, RawItem, Source};
use crate::utils::{canonical_key, text, time, url};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;

pub const MAX_TITLE_CHARS: usize = 300;
pub const MAX_SUMMARY_CHARS: usize = 1000;
pub const PREVIEW_CHARS: usize = 500;

/// Newest first; undated articles last; then source name, title and key so
/// the order is total.
pub fn compare_articles(a: &Article, b: &Article) -> Ordering {
    match (a.published_at, b.published_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.source.cmp(&b.source))
    .then_with(|| a.title.cmp(&b.title))
    .then_with(|| a.key.cmp(&b.key))
}

pub fn sort_articles(articles: &mut [Article]) {
    articles.sort_by(compare_articles);
}

pub fn build_article(raw: RawItem, source: &Source, fetched_at: DateTime<Utc>) -> Article {
    let title = text::truncate_chars(&text::strip_html(&raw.title), MAX_TITLE_CHARS);
    let content = raw
        .content
        .as_deref()
        .map(text::strip_html)
        .filter(|c| !c.is_empty());
    let summary_source = raw.summary.as_deref().or(raw.content.as_deref()).unwrap_or("");
    let summary = text::truncate_chars(&text::strip_html(summary_source), MAX_SUMMARY_CHARS);

    let words = content
        .as_deref()
        .map(text::word_count)
        .unwrap_or_else(|| text::word_count(&summary) + text::word_count(&title));

    let link = raw.link.filter(|l| url::is_http(l));
    let key = canonical_key(link.as_deref(), &title, &source.name, raw.published_at);

    Article {
        key,
        title,
        summary,
        content_preview: content.map(|c| text::truncate_chars(&c, PREVIEW_CHARS)),
        url: link,
        image_url: raw.image_url.filter(|l| url::is_http(l)),
        author: raw.author.map(|a| a.trim().to_string()).filter(|a| !a.is_empty()),
        published_at: raw.published_at,
        source: source.name.clone(),
        categories: source.categories.clone(),
        read_time_minutes: text::read_time_minutes(words),
        fetched_at,
        tags: raw.tags,
        score: raw.score,
        is_read: false,
        is_bookmarked: false,
    }
}

/// Turn per-source results into one deduplicated, ordered article list.
/// Sources are visited in name order so the surviving copy of a duplicate
/// does not depend on which fetch finished first.
pub fn merge_source_results(
    mut results: Vec<(Source, Vec<RawItem>)>,
    fetched_at: DateTime<Utc>,
) -> Vec<Article> {
    results.sort_by(|a, b| a.0.name.cmp(&b.0.name));

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<Article> = Vec::new();
    for (source, items) in results {
        for raw in items {
            let article = build_article(raw, &source, fetched_at);
            match index.get(&article.key) {
                Some(&i) => {
                    let kept = &mut merged[i];
                    kept.categories.extend(article.categories);
                    kept.published_at =
                        time::merge_published(kept.published_at, article.published_at);
                    if kept.image_url.is_none() {
                        kept.image_url = article.image_url;
                    }
                }
                None => {
                    index.insert(article.key.clone(), merged.len());
                    merged.push(article);
                }
            }
        }
    }

    sort_articles(&mut merged);
    merged
}

/// Fold a freshly merged set over what was stored before. The result holds
/// exactly the incoming keys; for keys seen before, incoming mutable fields
/// win while the first-seen publication time and user flags are kept.
pub fn merge_into_existing(existing: &[Article], incoming: Vec<Article>) -> Vec<Article> {
    let previous: HashMap<&str, &Article> = existing.iter().map(|a| (a.key.as_str(), a)).collect();

    let mut merged: Vec<Article> = incoming
        .into_iter()
        .map(|mut article| {
            if let Some(old) = previous.get(article.key.as_str()) {
                article.published_at =
                    time::merge_published(old.published_at, article.published_at);
                article.categories.extend(old.categories.iter().cloned());
                if article.image_url.is_none() {
                    article.image_url = old.image_url.clone();
                }
                if article.content_preview.is_none() {
                    article.content_preview = old.content_preview.clone();
                }
                article.is_read = old.is_read;
                article.is_bookmarked = old.is_bookmarked;
            }
            article
        })
        .collect();

    sort_articles(&mut merged);
    merged
}
