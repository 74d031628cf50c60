//! HTML scraping for sources without a feed.
//!
//! Each source names CSS selectors for the title (required), link, image and
//! score. Title matches drive extraction: the n-th title pairs with the n-th
//! match of every other selector. When the title element is itself a link, or
//! contains one, that link wins over the link selector.

use crate::types::{FetchError, RawItem, ScrapeSelectors};
use crate::utils::{text, url};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

fn compile(selector: &str) -> Result<Selector, FetchError> {
    Selector::parse(selector)
        .map_err(|e| FetchError::ParseError(format!("invalid selector {:?}: {}", selector, e)))
}

fn element_text(element: &ElementRef<'_>) -> String {
    text::collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

fn own_or_nested_href(element: &ElementRef<'_>, anchor: &Selector) -> Option<String> {
    if element.value().name() == "a" {
        return element.value().attr("href").map(str::to_string);
    }
    element
        .select(anchor)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string)
}

/// Extract up to `max_items` items from `html`, resolving relative links and
/// images against `page_url`.
pub fn parse_page(
    html: &str,
    page_url: &str,
    selectors: &ScrapeSelectors,
    max_items: usize,
) -> Result<Vec<RawItem>, FetchError> {
    let document = Html::parse_document(html);
    let title_sel = compile(&selectors.title)?;
    let link_sel = selectors.link.as_deref().map(compile).transpose()?;
    let image_sel = selectors.image.as_deref().map(compile).transpose()?;
    let score_sel = selectors.score.as_deref().map(compile).transpose()?;
    let anchor = compile("a[href]")?;

    let links: Vec<ElementRef<'_>> = link_sel
        .as_ref()
        .map(|s| document.select(s).collect())
        .unwrap_or_default();
    let images: Vec<ElementRef<'_>> = image_sel
        .as_ref()
        .map(|s| document.select(s).collect())
        .unwrap_or_default();
    let scores: Vec<ElementRef<'_>> = score_sel
        .as_ref()
        .map(|s| document.select(s).collect())
        .unwrap_or_default();

    let mut items = Vec::new();
    for (i, title_el) in document.select(&title_sel).enumerate() {
        if items.len() >= max_items {
            break;
        }
        let title = element_text(&title_el);
        if title.is_empty() {
            continue;
        }

        let href = own_or_nested_href(&title_el, &anchor).or_else(|| {
            links.get(i).and_then(|l| own_or_nested_href(l, &anchor))
        });
        let link = href.and_then(|h| url::resolve(page_url, &h));

        let image_url = images
            .get(i)
            .and_then(|img| img.value().attr("src").or_else(|| img.value().attr("data-src")))
            .and_then(|src| url::resolve(page_url, src));

        let score = scores.get(i).and_then(|s| {
            element_text(s)
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '-')
                .collect::<String>()
                .parse::<i64>()
                .ok()
        });

        items.push(RawItem {
            title,
            link,
            image_url,
            score,
            ..Default::default()
        });
    }

    debug!("Scraped {} items from {}", items.len(), page_url);
    Ok(items)
}
