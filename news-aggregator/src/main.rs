use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use news_aggregator::config::DEFAULT_CONFIG_PATH;
use news_aggregator::utils::time::format_duration;
use news_aggregator::{
    Aggregator, AppConfig, Article, ArticleCache, CacheLookup, Fetcher, RefreshOutcome,
    RefreshScheduler, RelatednessEngine,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "news-aggregator", about = "Fetch, merge and cache news by category")]
struct Cli {
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Refresh one category now
    Refresh { category: String },
    /// Print the cached articles of a category
    Show {
        category: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print articles related to the n-th article of a category
    Related {
        category: String,
        index: usize,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Keep every category refreshed until Ctrl-C
    Watch,
    /// Purge articles past the retention window
    Evict,
    /// Empty every category, forcing a refresh on next read
    Clear,
    /// Bookmark an article by key
    Bookmark {
        key: String,
        #[arg(long)]
        remove: bool,
    },
    /// List bookmarked articles
    Bookmarks {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// List configured categories with their cache state
    Categories,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)
        .await
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    let cache = Arc::new(
        ArticleCache::open(&config.cache.location, config.cache_settings())
            .await
            .with_context(|| format!("opening cache at {}", config.cache.location.display()))?,
    );
    let fetcher = Arc::new(Fetcher::new(config.fetch_config()).context("building HTTP client")?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let aggregator = Arc::new(
        Aggregator::new(
            fetcher,
            cache.clone(),
            config.registry(),
            config.fetch.max_concurrent_fetches,
        )
        .with_shutdown(shutdown_rx.clone()),
    );
    let eviction_interval = Duration::from_secs(config.cache.eviction_interval_secs);
    let scheduler = Arc::new(
        RefreshScheduler::new(aggregator.clone()).with_eviction_interval(eviction_interval),
    );

    match cli.command {
        Command::Refresh { category } => {
            ensure_category(&aggregator, &category).await?;
            let outcome = scheduler.request_refresh(&category).await;
            print_outcome(&outcome);
        }
        Command::Show { category, limit } => {
            ensure_category(&aggregator, &category).await?;
            match cache.get(&category).await {
                CacheLookup::Empty => {
                    println!("No cached articles for {} yet; run `refresh {}`", category, category)
                }
                CacheLookup::Entry(entry) => {
                    let state = if entry.is_fresh() { "fresh" } else { "stale" };
                    println!(
                        "{} ({} articles, {}, refreshed {} ago)",
                        category,
                        entry.articles.len(),
                        state,
                        format_duration(entry.age())
                    );
                    for (i, article) in entry.articles.iter().take(limit).enumerate() {
                        print_article(i, article);
                    }
                }
            }
        }
        Command::Related { category, index, limit } => {
            let lookup = cache.get(&category).await;
            let Some(article) = lookup.articles().get(index) else {
                bail!("no article #{} in {}", index, category);
            };
            let engine = RelatednessEngine::new(cache.clone(), config.relatedness_settings());
            println!("Related to: {}", article.title);
            let edges = engine.related_edges(article, limit).await;
            if edges.is_empty() {
                println!("  (nothing related)");
            }
            for edge in edges {
                if let Some(related) = cache.find(&edge.candidate_key).await {
                    println!(
                        "  {:>5.2}  {:?}  {} [{}]",
                        edge.score, edge.reason, related.title, related.source
                    );
                }
            }
        }
        Command::Watch => {
            let handles = scheduler.clone().spawn(shutdown_rx).await;
            info!("Watching {} categories; press Ctrl-C to stop", handles.len().saturating_sub(1));

            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            info!("Shutting down");
            shutdown_tx.send_replace(true);
            for handle in handles {
                if let Err(e) = handle.await {
                    error!("Background task failed: {}", e);
                }
            }
        }
        Command::Evict => {
            let removed = cache.evict_expired().await?;
            println!("Evicted {} articles", removed);
        }
        Command::Clear => {
            cache.clear().await?;
            println!("Cache cleared");
        }
        Command::Bookmark { key, remove } => {
            let Some(article) = cache.find(&key).await else {
                bail!("no cached article with key {}", key);
            };
            cache.mark_bookmarked(&key, !remove).await?;
            let verb = if remove { "Removed bookmark from" } else { "Bookmarked" };
            println!("{} {}", verb, article.title);
        }
        Command::Bookmarks { limit } => {
            for (i, article) in cache.bookmarked(limit).await.iter().enumerate() {
                print_article(i, article);
            }
        }
        Command::Categories => {
            let registry = aggregator.registry().await;
            for category in registry.categories() {
                let sources = registry.sources_for(&category).len();
                let state = match cache.get(&category).await {
                    CacheLookup::Empty => "empty".to_string(),
                    CacheLookup::Entry(entry) => format!(
                        "{} articles, {}",
                        entry.articles.len(),
                        if entry.is_fresh() { "fresh" } else { "stale" }
                    ),
                };
                println!("{:<16} {:>2} sources  {}", category, sources, state);
            }
        }
    }

    Ok(())
}

async fn ensure_category(aggregator: &Aggregator, category: &str) -> anyhow::Result<()> {
    let registry = aggregator.registry().await;
    if !registry.has_category(category) {
        bail!(
            "unknown category {:?} (known: {})",
            category,
            registry.categories().join(", ")
        );
    }
    Ok(())
}

fn print_outcome(outcome: &RefreshOutcome) {
    println!(
        "{}: {} sources, {} ok, {} failed, {} articles, {}",
        outcome.category,
        outcome.attempted,
        outcome.succeeded,
        outcome.failed_count(),
        outcome.articles,
        if outcome.written { "cached" } else { "cache unchanged" }
    );
    for failure in &outcome.failed {
        println!("  {} ({:?}): {}", failure.source, failure.kind, failure.message);
    }
    if let Some(e) = &outcome.write_error {
        println!("  write failed: {}", e);
    }
}

fn print_article(index: usize, article: &Article) {
    let published = article
        .published_at
        .map(|p| p.format("%b %d, %H:%M").to_string())
        .unwrap_or_else(|| "undated".to_string());
    let marker = if article.is_bookmarked { "*" } else { " " };
    println!(
        "{:>3}{} {} [{}] {} · {} min",
        index, marker, article.title, article.source, published, article.read_time_minutes
    );
    if let Some(url) = &article.url {
        println!("      {}", url);
    }
    println!("      key: {}", article.key);
}
