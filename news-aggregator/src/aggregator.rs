use crate::cache::ArticleCache;
use crate::merge;
use crate::registry::SourceRegistry;
use crate::traits::SourceFetcher;
use crate::types::{FetchError, RawItem, RefreshOutcome, Source, SourceFailure};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

/// Runs refresh cycles: fetch every source of a category concurrently, merge
/// what came back and hand the result to the cache.
pub struct Aggregator {
    fetcher: Arc<dyn SourceFetcher>,
    cache: Arc<ArticleCache>,
    registry: RwLock<Arc<SourceRegistry>>,
    max_concurrency: usize,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Aggregator {
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        cache: Arc<ArticleCache>,
        registry: SourceRegistry,
        max_concurrency: usize,
    ) -> Self {
        Self {
            fetcher,
            cache,
            registry: RwLock::new(Arc::new(registry)),
            max_concurrency: max_concurrency.max(1),
            shutdown: None,
        }
    }

    /// Abandon in-flight refreshes once `shutdown` turns true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn cache(&self) -> &Arc<ArticleCache> {
        &self.cache
    }

    pub async fn registry(&self) -> Arc<SourceRegistry> {
        self.registry.read().await.clone()
    }

    /// Swap in a new source list. Cycles already running finish with the
    /// registry they started with.
    pub async fn reload(&self, registry: SourceRegistry) {
        info!(sources = registry.len(), "Reloading source registry");
        *self.registry.write().await = Arc::new(registry);
    }

    pub async fn refresh(&self, category: &str) -> RefreshOutcome {
        let mut outcome = RefreshOutcome::new(category);
        let run_id = outcome.run_id;
        let registry = self.registry().await;
        let sources = registry.sources_for(category);
        outcome.attempted = sources.len();

        if sources.is_empty() {
            warn!(%run_id, category, "No sources configured for category");
            outcome.finished_at = Utc::now();
            return outcome;
        }

        info!(%run_id, category, sources = sources.len(), "Starting refresh");

        let results = match self.fetch_all(sources).await {
            Some(results) => results,
            None => {
                warn!(%run_id, category, "Refresh cancelled; keeping cached entry");
                outcome.cancelled = true;
                outcome.finished_at = Utc::now();
                return outcome;
            }
        };

        let mut successes: Vec<(Source, Vec<RawItem>)> = Vec::new();
        for (source, result) in results {
            match result {
                Ok(items) => successes.push((source, items)),
                Err(e) => {
                    warn!(
                        %run_id,
                        category,
                        source = %source.name,
                        error = %e,
                        transient = e.is_transient(),
                        "Source failed"
                    );
                    outcome.failed.push(SourceFailure {
                        source: source.name.clone(),
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }
        outcome.failed.sort_by(|a, b| a.source.cmp(&b.source));
        outcome.succeeded = successes.len();

        if successes.is_empty() {
            warn!(%run_id, category, "All sources failed; keeping cached entry");
            outcome.finished_at = Utc::now();
            return outcome;
        }

        let articles = merge::merge_source_results(successes, Utc::now());
        outcome.articles = articles.len();

        match self.cache.put(category, articles).await {
            Ok(_) => outcome.written = true,
            Err(e) => {
                error!(%run_id, category, error = %e, "Failed to write refreshed articles");
                outcome.write_error = Some(e.to_string());
            }
        }

        outcome.finished_at = Utc::now();
        info!(
            %run_id,
            category,
            succeeded = outcome.succeeded,
            failed = outcome.failed_count(),
            articles = outcome.articles,
            written = outcome.written,
            "Refresh finished"
        );
        outcome
    }

    /// Fetch every source with at most `max_concurrency` requests in flight.
    /// `None` means shutdown was signalled first; in-flight fetches are
    /// dropped with it.
    async fn fetch_all(
        &self,
        sources: Vec<Source>,
    ) -> Option<Vec<(Source, Result<Vec<RawItem>, FetchError>)>> {
        let fetches = stream::iter(sources)
            .map(|source| {
                let fetcher = self.fetcher.clone();
                async move {
                    let result = fetcher.fetch(&source).await;
                    (source, result)
                }
            })
            .buffer_unordered(self.max_concurrency)
            .collect::<Vec<_>>();

        match self.shutdown.clone() {
            Some(mut shutdown) => {
                if *shutdown.borrow() {
                    return None;
                }
                tokio::select! {
                    results = fetches => Some(results),
                    _ = shutdown_signalled(&mut shutdown) => None,
                }
            }
            None => Some(fetches.await),
        }
    }
}

/// Resolves once the channel carries `true`. A dropped sender never resolves.
pub(crate) async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
