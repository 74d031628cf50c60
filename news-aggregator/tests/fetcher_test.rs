mod common;

use common::*;
use news_aggregator::{
    FetchConfig, FetchError, Fetcher, Result, ScrapeSelectors, Source, SourceFetcher, SourceKind,
};
use std::time::{Duration, Instant};

fn feed_at(server: &MockServer, path: &str) -> Source {
    Source::new("local", SourceKind::Feed, server.url(path)).in_category("tech")
}

fn scrape_at(server: &MockServer, path: &str) -> Source {
    Source::new("local-scrape", SourceKind::Scrape, server.url(path))
        .in_category("tech")
        .with_selectors(ScrapeSelectors {
            title: "h2.title a".to_string(),
            ..Default::default()
        })
}

const PAGE: &str = r#"<html><body>
<h2 class="title"><a href="/a">First headline</a></h2>
<h2 class="title"><a href="/b">Second headline</a></h2>
</body></html>"#;

#[tokio::test]
async fn test_retries_server_errors_then_succeeds() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    server.route(
        "/rss",
        vec![
            CannedResponse::status(500, "boom"),
            CannedResponse::status(503, "busy"),
            CannedResponse::ok(rss(&[("One", "https://x.test/1"), ("Two", "https://x.test/2")])),
        ],
    );

    let fetcher = Fetcher::new(test_fetch_config())?;
    let items = fetcher.fetch(&feed_at(&server, "/rss")).await.expect("feed after retries");

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].title, "One");
    assert_eq!(server.hits("/rss"), 3);
    Ok(())
}

#[tokio::test]
async fn test_gives_up_after_retry_budget() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    server.route("/rss", vec![CannedResponse::status(502, "bad gateway")]);

    let fetcher = Fetcher::new(test_fetch_config())?;
    let err = fetcher.fetch(&feed_at(&server, "/rss")).await.unwrap_err();

    assert!(matches!(err, FetchError::Unreachable(_)));
    // One attempt plus two retries.
    assert_eq!(server.hits("/rss"), 3);
    Ok(())
}

#[tokio::test]
async fn test_client_errors_fail_without_retry() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;

    let fetcher = Fetcher::new(test_fetch_config())?;
    let err = fetcher.fetch(&feed_at(&server, "/missing")).await.unwrap_err();

    assert!(matches!(err, FetchError::Unreachable(ref m) if m.contains("404")));
    assert_eq!(server.hits("/missing"), 1);
    Ok(())
}

#[tokio::test]
async fn test_malformed_feed_is_not_retried() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    server.route("/rss", vec![CannedResponse::ok("<html>definitely not a feed")]);

    let fetcher = Fetcher::new(test_fetch_config())?;
    let err = fetcher.fetch(&feed_at(&server, "/rss")).await.unwrap_err();

    assert!(matches!(err, FetchError::ParseError(_)));
    assert_eq!(server.hits("/rss"), 1);
    Ok(())
}

#[tokio::test]
async fn test_too_many_requests_backs_off_and_retries() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    server.route(
        "/rss",
        vec![
            CannedResponse::status(429, "slow down").header("Retry-After", "0"),
            CannedResponse::ok(rss(&[("One", "https://x.test/1")])),
        ],
    );

    let fetcher = Fetcher::new(test_fetch_config())?;
    let items = fetcher.fetch(&feed_at(&server, "/rss")).await.expect("feed after 429");

    assert_eq!(items.len(), 1);
    assert_eq!(server.hits("/rss"), 2);
    Ok(())
}

#[tokio::test]
async fn test_slow_source_times_out() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    server.route(
        "/rss",
        vec![CannedResponse::ok(rss(&[("Late", "https://x.test/late")]))
            .delayed(Duration::from_secs(3))],
    );

    let config = FetchConfig {
        timeout: Duration::from_millis(200),
        max_retries: 1,
        ..test_fetch_config()
    };
    let fetcher = Fetcher::new(config)?;
    let err = fetcher.fetch(&feed_at(&server, "/rss")).await.unwrap_err();

    assert_eq!(err, FetchError::Timeout(Duration::from_millis(200)));
    assert_eq!(server.hits("/rss"), 2);
    Ok(())
}

#[tokio::test]
async fn test_requests_to_one_source_are_spaced() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    server.route("/rss", vec![CannedResponse::ok(rss(&[("One", "https://x.test/1")]))]);

    let fetcher = Fetcher::new(test_fetch_config())?;
    let source = feed_at(&server, "/rss").with_rate_limit(Duration::from_millis(300));

    let started = Instant::now();
    fetcher.fetch(&source).await.expect("first");
    fetcher.fetch(&source).await.expect("second");
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(server.hits("/rss"), 2);
    Ok(())
}

#[tokio::test]
async fn test_scrape_extracts_items() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    server.route("/robots.txt", vec![CannedResponse::ok("User-agent: *\nDisallow: /private\n")]);
    server.route("/front", vec![CannedResponse::ok(PAGE)]);

    let fetcher = Fetcher::new(test_fetch_config())?;
    let items = fetcher.fetch(&scrape_at(&server, "/front")).await.expect("scrape");

    assert_eq!(items.len(), 2);
    assert_eq!(items[1].title, "Second headline");
    assert_eq!(items[1].link.as_deref(), Some(server.url("/b").as_str()));
    Ok(())
}

#[tokio::test]
async fn test_robots_disallow_fails_closed_before_fetching() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    server.route("/robots.txt", vec![CannedResponse::ok("User-agent: *\nDisallow: /private\n")]);
    server.route("/private/page", vec![CannedResponse::ok(PAGE)]);

    let fetcher = Fetcher::new(test_fetch_config())?;
    let err = fetcher.fetch(&scrape_at(&server, "/private/page")).await.unwrap_err();

    assert!(matches!(err, FetchError::Disallowed(_)));
    assert_eq!(server.hits("/private/page"), 0);

    // The host's rules are fetched once per process.
    let _ = fetcher.fetch(&scrape_at(&server, "/private/page")).await;
    assert_eq!(server.hits("/robots.txt"), 1);
    Ok(())
}

#[tokio::test]
async fn test_robots_server_error_fails_closed() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    server.route("/robots.txt", vec![CannedResponse::status(500, "oops")]);
    server.route("/front", vec![CannedResponse::ok(PAGE)]);

    let fetcher = Fetcher::new(test_fetch_config())?;
    let err = fetcher.fetch(&scrape_at(&server, "/front")).await.unwrap_err();

    assert!(matches!(err, FetchError::Disallowed(_)));
    assert_eq!(server.hits("/front"), 0);
    Ok(())
}

#[tokio::test]
async fn test_scrape_that_stops_matching_is_a_parse_error() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    server.route(
        "/front",
        vec![
            CannedResponse::ok(PAGE),
            CannedResponse::ok("<html><body><p>redesigned</p></body></html>"),
        ],
    );

    let fetcher = Fetcher::new(test_fetch_config())?;
    let source = scrape_at(&server, "/front");
    assert_eq!(fetcher.fetch(&source).await.expect("first scrape").len(), 2);

    let err = fetcher.fetch(&source).await.unwrap_err();
    assert!(matches!(err, FetchError::ParseError(_)));
    assert_eq!(server.hits("/front"), 2);
    Ok(())
}

#[tokio::test]
async fn test_api_source_parses_json() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    server.route(
        "/v2/top-headlines",
        vec![CannedResponse::ok(
            r#"{"status":"ok","articles":[{"title":"Api story","url":"https://api.test/1","publishedAt":"2024-05-01T10:00:00Z"}]}"#,
        )],
    );

    let mut source = Source::new("api", SourceKind::Api, server.url("/v2/top-headlines"))
        .in_category("world");
    source.api_key = Some("secret".to_string());

    let fetcher = Fetcher::new(test_fetch_config())?;
    let items = fetcher.fetch(&source).await.expect("api");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].title, "Api story");
    Ok(())
}

#[tokio::test]
async fn test_body_size_cap_applies_without_content_length() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    let padding = "x".repeat(2 * 1024 * 1024);
    let oversized = rss(&[("Huge", "https://x.test/huge")])
        .replace("<title>T</title>", &format!("<title>{}</title>", padding));
    server.route("/huge", vec![CannedResponse::ok(oversized).chunked()]);
    server.route(
        "/small",
        vec![CannedResponse::ok(rss(&[("One", "https://x.test/1")])).chunked()],
    );

    let config = FetchConfig {
        max_feed_size_mb: 1,
        ..test_fetch_config()
    };
    let fetcher = Fetcher::new(config)?;

    let err = fetcher.fetch(&feed_at(&server, "/huge")).await.unwrap_err();
    assert!(matches!(err, FetchError::ParseError(ref m) if m.contains("limit")));
    assert_eq!(server.hits("/huge"), 1);

    let items = fetcher.fetch(&feed_at(&server, "/small")).await.expect("small chunked feed");
    assert_eq!(items.len(), 1);
    Ok(())
}
