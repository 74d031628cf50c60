use crate::aggregator::{shutdown_signalled, Aggregator};
use crate::cache::CacheLookup;
use crate::types::RefreshOutcome;
use crate::utils::time::format_duration;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryState {
    Idle,
    Refreshing,
}

/// Drives refreshes on a timer and on demand, with at most one run per
/// category in flight. Later requests for a running category wait on the
/// run already in progress.
pub struct RefreshScheduler {
    aggregator: Arc<Aggregator>,
    in_flight: Arc<Mutex<HashMap<String, SharedRefresh>>>,
    eviction_interval: Duration,
}

fn lock(
    map: &Mutex<HashMap<String, SharedRefresh>>,
) -> MutexGuard<'_, HashMap<String, SharedRefresh>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RefreshScheduler {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self {
            aggregator,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            eviction_interval: DEFAULT_EVICTION_INTERVAL,
        }
    }

    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn state(&self, category: &str) -> CategoryState {
        if lock(&self.in_flight).contains_key(category) {
            CategoryState::Refreshing
        } else {
            CategoryState::Idle
        }
    }

    /// Refresh `category`, or join the refresh already running for it. The
    /// run lives in its own task, so dropping the returned future does not
    /// abort it.
    pub async fn request_refresh(&self, category: &str) -> RefreshOutcome {
        self.start_or_join(category).await
    }

    fn start_or_join(&self, category: &str) -> SharedRefresh {
        let mut in_flight = lock(&self.in_flight);
        if let Some(running) = in_flight.get(category) {
            debug!(category, "Joining in-flight refresh");
            return running.clone();
        }

        let aggregator = self.aggregator.clone();
        let registry = self.in_flight.clone();
        let owned = category.to_string();
        // The map lock is held until the entry is inserted, so the task
        // cannot remove it before it exists.
        let handle: JoinHandle<RefreshOutcome> = tokio::spawn(async move {
            let outcome = aggregator.refresh(&owned).await;
            lock(&registry).remove(&owned);
            outcome
        });

        let registry = self.in_flight.clone();
        let owned = category.to_string();
        let refresh = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(category = %owned, error = %e, "Refresh task failed");
                    lock(&registry).remove(&owned);
                    let mut outcome = RefreshOutcome::new(&owned);
                    outcome.cancelled = true;
                    outcome
                }
            }
        }
        .boxed()
        .shared();

        in_flight.insert(category.to_string(), refresh.clone());
        refresh
    }

    /// Read the cache for `category` without waiting on the network. A
    /// stale, empty or unreadable entry starts a background refresh.
    pub async fn snapshot(&self, category: &str) -> CacheLookup {
        let lookup = self.aggregator.cache().get(category).await;
        let needs_refresh = match &lookup {
            CacheLookup::Empty => true,
            CacheLookup::Entry(entry) => !entry.is_fresh(),
        };

        if needs_refresh && self.aggregator.registry().await.has_category(category) {
            debug!(category, "Entry stale or missing, refreshing in background");
            drop(self.start_or_join(category));
        }
        lookup
    }

    /// Start the periodic refresh task for every configured category and the
    /// retention eviction task. All of them exit when `shutdown` turns true.
    pub async fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let registry = self.aggregator.registry().await;
        let mut handles = Vec::new();

        for category in registry.categories() {
            let interval = registry.settings(&category).refresh_interval;
            info!(
                category = %category,
                interval = %format_duration(interval),
                "Scheduling periodic refresh"
            );
            let task = self.clone().run_category(category, interval, shutdown.clone());
            handles.push(tokio::spawn(task));
        }

        handles.push(tokio::spawn(self.clone().run_eviction(shutdown)));
        handles
    }

    async fn run_category(
        self: Arc<Self>,
        category: String,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut first = true;

        loop {
            tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            // The first tick fires at once; a fresh entry can wait a period.
            if std::mem::take(&mut first) && self.aggregator.cache().is_fresh(&category).await {
                continue;
            }

            tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => break,
                outcome = self.request_refresh(&category) => {
                    if outcome.all_failed() {
                        warn!(
                            category = %category,
                            failed = outcome.failed_count(),
                            "Scheduled refresh produced nothing"
                        );
                    }
                }
            }
        }
        debug!(category = %category, "Periodic refresh stopped");
    }

    async fn run_eviction(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.eviction_interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.aggregator.cache().evict_expired().await {
                error!(error = %e, "Eviction failed");
            }
            for category in self.aggregator.cache().take_corrupted().await {
                warn!(category = %category, "Refreshing corrupted entry");
                drop(self.start_or_join(&category));
            }
        }
        debug!("Eviction task stopped");
    }
}
