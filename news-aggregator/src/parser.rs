use crate::types::{FetchError, RawItem};
use chrono::{DateTime, Utc};
use feed_rs::parser;
use serde::Deserialize;
use tracing::debug;

pub struct FeedParser;

impl FeedParser {
    /// Parse an RSS/Atom document into at most `max_items` raw items, in
    /// document order.
    pub fn parse_feed(content: &str, max_items: usize) -> Result<Vec<RawItem>, FetchError> {
        let feed = parser::parse(content.as_bytes())
            .map_err(|e| FetchError::ParseError(format!("Failed to parse feed: {}", e)))?;

        let items: Vec<RawItem> = feed
            .entries
            .into_iter()
            .filter_map(Self::parse_entry)
            .take(max_items)
            .collect();

        debug!("Parsed feed with {} entries", items.len());
        Ok(items)
    }

    fn parse_entry(entry: feed_rs::model::Entry) -> Option<RawItem> {
        let title = entry.title.map(|t| t.content).unwrap_or_default();
        let link = entry.links.first().map(|l| l.href.clone());
        // Nothing to show and nothing to key on.
        if title.trim().is_empty() && link.is_none() {
            return None;
        }

        let summary = entry.summary.map(|s| s.content);
        let content = entry.content.and_then(|c| c.body);
        let author = entry.authors.first().map(|a| a.name.clone());
        let published_at = entry.published.or(entry.updated).map(|dt| dt.with_timezone(&Utc));

        let image_url = entry.media.iter().find_map(|m| {
            m.thumbnails
                .first()
                .map(|t| t.image.uri.clone())
                .or_else(|| {
                    m.content.iter().find_map(|c| {
                        let is_image = c
                            .content_type
                            .as_ref()
                            .map_or(true, |t| t.type_() == "image");
                        c.url.as_ref().filter(|_| is_image).map(|u| u.to_string())
                    })
                })
        });

        let tags = entry.categories.into_iter().map(|c| c.term).collect();

        Some(RawItem {
            title,
            link,
            summary,
            content,
            image_url,
            author,
            published_at,
            tags,
            score: None,
        })
    }

    /// Parse a NewsAPI-style JSON body.
    pub fn parse_api(body: &str, max_items: usize) -> Result<Vec<RawItem>, FetchError> {
        let response: ApiResponse = serde_json::from_str(body)
            .map_err(|e| FetchError::ParseError(format!("Failed to parse API response: {}", e)))?;

        Ok(response
            .articles
            .into_iter()
            .filter(|a| !a.title.trim().is_empty())
            .take(max_items)
            .map(|a| RawItem {
                title: a.title,
                link: a.url,
                summary: a.description,
                content: a.content,
                image_url: a.url_to_image,
                author: a.author,
                published_at: a.published_at,
                tags: Vec::new(),
                score: None,
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    articles: Vec<ApiArticle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiArticle {
    #[serde(default)]
    title: String,
    description: Option<String>,
    url: Option<String>,
    url_to_image: Option<String>,
    author: Option<String>,
    published_at: Option<DateTime<Utc>>,
    content: Option<String>,
}
