//! Durable per-category article store.
//!
//! Each category is one row in `category_entries`, holding the article set as
//! JSON together with its last refresh time and TTL. A refresh replaces the
//! row with a single UPSERT inside a transaction, so readers see either the
//! old set or the new one. Committed entries are mirrored in memory; `get`
//! serves from that snapshot and falls back to the database after a restart.

use crate::merge;
use crate::types::{Article, CacheError, Result};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Row;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Age after which an entry is stale and should be re-fetched.
    pub ttl: Duration,
    /// Age (by fetch time) after which an article is purged.
    pub retention: Duration,
    pub ttl_overrides: HashMap<String, Duration>,
    pub max_articles_per_category: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
            retention: Duration::from_secs(7 * 24 * 3600),
            ttl_overrides: HashMap::new(),
            max_articles_per_category: 1000,
        }
    }
}

impl CacheSettings {
    pub fn ttl_for(&self, category: &str) -> Duration {
        self.ttl_overrides.get(category).copied().unwrap_or(self.ttl)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub category: String,
    pub articles: Vec<Article>,
    pub last_refreshed: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.last_refreshed);
        match ChronoDuration::from_std(self.ttl) {
            Ok(ttl) => age < ttl,
            Err(_) => true,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }

    pub fn age(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.last_refreshed)
            .to_std()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Never populated, or the stored record could not be read.
    Empty,
    Entry(Arc<CacheEntry>),
}

impl CacheLookup {
    pub fn entry(&self) -> Option<&Arc<CacheEntry>> {
        match self {
            CacheLookup::Empty => None,
            CacheLookup::Entry(entry) => Some(entry),
        }
    }

    pub fn articles(&self) -> &[Article] {
        self.entry().map(|e| e.articles.as_slice()).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CacheLookup::Empty)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Flags {
    is_read: bool,
    is_bookmarked: bool,
}

pub struct ArticleCache {
    pool: SqlitePool,
    settings: CacheSettings,
    snapshots: RwLock<HashMap<String, Arc<CacheEntry>>>,
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    corrupted: Mutex<HashSet<String>>,
}

impl ArticleCache {
    /// Open (creating if needed) the SQLite database at `path`.
    pub async fn open(path: impl AsRef<Path>, settings: CacheSettings) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let cache = Self {
            pool,
            settings,
            snapshots: RwLock::new(HashMap::new()),
            write_locks: Mutex::new(HashMap::new()),
            corrupted: Mutex::new(HashSet::new()),
        };
        cache.setup_schema().await?;
        info!("Opened article cache at {}", path.display());
        Ok(cache)
    }

    async fn setup_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS category_entries (
                category TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                last_refreshed_ms INTEGER NOT NULL,
                ttl_secs INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS article_flags (
                key TEXT PRIMARY KEY,
                is_read INTEGER NOT NULL DEFAULT 0,
                is_bookmarked INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    async fn write_lock(&self, category: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().await;
        locks
            .entry(category.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Current entry for `category`. Never touches the network and never
    /// fails: an unreadable record is reported as `Empty` and remembered so
    /// the scheduler can refresh it.
    pub async fn get(&self, category: &str) -> CacheLookup {
        if let Some(entry) = self.snapshots.read().await.get(category) {
            return CacheLookup::Entry(entry.clone());
        }

        match self.load(category).await {
            Ok(Some(mut entry)) => {
                let mut snapshots = self.snapshots.write().await;
                // A put that committed while we were loading takes precedence.
                if let Some(current) = snapshots.get(category) {
                    return CacheLookup::Entry(current.clone());
                }
                match self.load_flags().await {
                    Ok(flags) => apply_flags(&mut entry.articles, &flags),
                    Err(e) => warn!(category, error = %e, "Failed to read article flags"),
                }
                let entry = Arc::new(entry);
                snapshots.insert(category.to_string(), entry.clone());
                CacheLookup::Entry(entry)
            }
            Ok(None) => CacheLookup::Empty,
            Err(e @ CacheError::ReadCorrupted { .. }) => {
                warn!(category, error = %e, "Treating corrupted cache entry as empty");
                self.corrupted.lock().await.insert(category.to_string());
                CacheLookup::Empty
            }
            Err(e) => {
                warn!(category, error = %e, "Cache read failed");
                CacheLookup::Empty
            }
        }
    }

    async fn load(&self, category: &str) -> std::result::Result<Option<CacheEntry>, CacheError> {
        let row = sqlx::query(
            "SELECT payload, last_refreshed_ms, ttl_secs FROM category_entries WHERE category = ?1",
        )
        .bind(category)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| corrupted(category, e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: String = row.try_get("payload").map_err(|e| corrupted(category, e))?;
        let last_refreshed_ms: i64 = row
            .try_get("last_refreshed_ms")
            .map_err(|e| corrupted(category, e))?;
        let ttl_secs: i64 = row.try_get("ttl_secs").map_err(|e| corrupted(category, e))?;

        let articles: Vec<Article> =
            serde_json::from_str(&payload).map_err(|e| corrupted(category, e))?;
        let last_refreshed = Utc
            .timestamp_millis_opt(last_refreshed_ms)
            .single()
            .ok_or_else(|| corrupted(category, "timestamp out of range"))?;

        Ok(Some(CacheEntry {
            category: category.to_string(),
            articles,
            last_refreshed,
            ttl: Duration::from_secs(ttl_secs.max(0) as u64),
        }))
    }

    async fn load_flags(&self) -> std::result::Result<HashMap<String, Flags>, sqlx::Error> {
        let rows = sqlx::query("SELECT key, is_read, is_bookmarked FROM article_flags")
            .fetch_all(&self.pool)
            .await?;

        let mut flags = HashMap::with_capacity(rows.len());
        for row in rows {
            flags.insert(
                row.try_get::<String, _>("key")?,
                Flags {
                    is_read: row.try_get("is_read")?,
                    is_bookmarked: row.try_get("is_bookmarked")?,
                },
            );
        }
        Ok(flags)
    }

    /// Replace the article set of `category`, merging with what was stored
    /// before. Returns the committed entry; on error the previous entry is
    /// still the one readers see.
    pub async fn put(
        &self,
        category: &str,
        articles: Vec<Article>,
    ) -> std::result::Result<Arc<CacheEntry>, CacheError> {
        let lock = self.write_lock(category).await;
        let _guard = lock.lock().await;

        let previous = match self.get(category).await {
            CacheLookup::Entry(entry) => entry.articles.clone(),
            CacheLookup::Empty => Vec::new(),
        };

        let mut merged = merge::merge_into_existing(&previous, articles);
        merged.truncate(self.settings.max_articles_per_category);

        let entry = CacheEntry {
            category: category.to_string(),
            articles: merged,
            last_refreshed: Utc::now(),
            ttl: self.settings.ttl_for(category),
        };
        let entry = self.commit(entry).await?;

        self.corrupted.lock().await.remove(category);
        debug!(category, articles = entry.articles.len(), "Cache entry replaced");
        Ok(entry)
    }

    /// Write `entry` durably, then publish it to readers.
    async fn commit(
        &self,
        mut entry: CacheEntry,
    ) -> std::result::Result<Arc<CacheEntry>, CacheError> {
        let payload = serde_json::to_string(&entry.articles)
            .map_err(|e| CacheError::WriteFailed(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(write_failed)?;
        sqlx::query(
            r#"
            INSERT INTO category_entries (category, payload, last_refreshed_ms, ttl_secs)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (category)
            DO UPDATE SET
                payload = excluded.payload,
                last_refreshed_ms = excluded.last_refreshed_ms,
                ttl_secs = excluded.ttl_secs
            "#,
        )
        .bind(&entry.category)
        .bind(&payload)
        .bind(entry.last_refreshed.timestamp_millis())
        .bind(entry.ttl.as_secs() as i64)
        .execute(&mut *tx)
        .await
        .map_err(write_failed)?;
        tx.commit().await.map_err(write_failed)?;

        // Flag writers update snapshots under this lock, so reading flags
        // while holding it cannot miss one.
        let mut snapshots = self.snapshots.write().await;
        if let Ok(flags) = self.load_flags().await {
            apply_flags(&mut entry.articles, &flags);
        }
        let entry = Arc::new(entry);
        snapshots.insert(entry.category.clone(), entry.clone());
        Ok(entry)
    }

    pub async fn is_fresh(&self, category: &str) -> bool {
        match self.get(category).await {
            CacheLookup::Entry(entry) => entry.is_fresh(),
            CacheLookup::Empty => false,
        }
    }

    /// Categories that read as corrupted since the last call.
    pub async fn take_corrupted(&self) -> Vec<String> {
        let mut corrupted = self.corrupted.lock().await;
        let mut categories: Vec<String> = corrupted.drain().collect();
        categories.sort();
        categories
    }

    /// Every category with a stored entry, sorted.
    pub async fn categories(&self) -> Vec<String> {
        let rows = match sqlx::query("SELECT category FROM category_entries ORDER BY category")
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Failed to list cached categories");
                return Vec::new();
            }
        };
        rows.iter()
            .filter_map(|r| r.try_get::<String, _>("category").ok())
            .collect()
    }

    /// Drop articles fetched longer ago than the retention window, in every
    /// category. Freshness is left untouched. Returns the number removed.
    pub async fn evict_expired(&self) -> std::result::Result<usize, CacheError> {
        let retention = ChronoDuration::from_std(self.settings.retention)
            .map_err(|e| CacheError::WriteFailed(e.to_string()))?;
        let cutoff = Utc::now() - retention;
        let mut removed = 0;

        for category in self.categories().await {
            let lock = self.write_lock(&category).await;
            let _guard = lock.lock().await;

            let CacheLookup::Entry(entry) = self.get(&category).await else {
                continue;
            };
            let kept: Vec<Article> = entry
                .articles
                .iter()
                .filter(|a| a.fetched_at >= cutoff)
                .cloned()
                .collect();
            let dropped = entry.articles.len() - kept.len();
            if dropped == 0 {
                continue;
            }

            self.commit(CacheEntry {
                articles: kept,
                ..(*entry).clone()
            })
            .await?;
            debug!(category = %category, dropped, "Evicted expired articles");
            removed += dropped;
        }

        if removed > 0 {
            info!("Evicted {} expired articles", removed);
        }
        Ok(removed)
    }

    /// Empty every category in place. Entries stay, marked stale, so the
    /// next read schedules a refresh.
    pub async fn clear(&self) -> std::result::Result<(), CacheError> {
        let epoch = Utc.timestamp_millis_opt(0).single().unwrap_or_else(Utc::now);
        for category in self.categories().await {
            let lock = self.write_lock(&category).await;
            let _guard = lock.lock().await;

            let ttl = match self.get(&category).await {
                CacheLookup::Entry(entry) => entry.ttl,
                CacheLookup::Empty => self.settings.ttl_for(&category),
            };
            self.commit(CacheEntry {
                category: category.clone(),
                articles: Vec::new(),
                last_refreshed: epoch,
                ttl,
            })
            .await?;
        }
        info!("Cleared article cache");
        Ok(())
    }

    pub async fn mark_read(&self, key: &str, read: bool) -> std::result::Result<(), CacheError> {
        sqlx::query(
            r#"
            INSERT INTO article_flags (key, is_read) VALUES (?1, ?2)
            ON CONFLICT (key) DO UPDATE SET is_read = excluded.is_read
            "#,
        )
        .bind(key)
        .bind(read)
        .execute(&self.pool)
        .await
        .map_err(write_failed)?;

        self.update_snapshots(key, |a| a.is_read = read).await;
        Ok(())
    }

    pub async fn mark_bookmarked(
        &self,
        key: &str,
        bookmarked: bool,
    ) -> std::result::Result<(), CacheError> {
        sqlx::query(
            r#"
            INSERT INTO article_flags (key, is_bookmarked) VALUES (?1, ?2)
            ON CONFLICT (key) DO UPDATE SET is_bookmarked = excluded.is_bookmarked
            "#,
        )
        .bind(key)
        .bind(bookmarked)
        .execute(&self.pool)
        .await
        .map_err(write_failed)?;

        self.update_snapshots(key, |a| a.is_bookmarked = bookmarked).await;
        Ok(())
    }

    async fn update_snapshots(&self, key: &str, update: impl Fn(&mut Article)) {
        let mut snapshots = self.snapshots.write().await;
        for entry in snapshots.values_mut() {
            if entry.articles.iter().any(|a| a.key == key) {
                let mut changed = (**entry).clone();
                changed.articles.iter_mut().filter(|a| a.key == key).for_each(&update);
                *entry = Arc::new(changed);
            }
        }
    }

    /// Bookmarked articles across all categories, newest first.
    pub async fn bookmarked(&self, limit: usize) -> Vec<Article> {
        let mut seen = HashSet::new();
        let mut articles = Vec::new();
        for category in self.categories().await {
            if let CacheLookup::Entry(entry) = self.get(&category).await {
                articles.extend(
                    entry
                        .articles
                        .iter()
                        .filter(|a| a.is_bookmarked && seen.insert(a.key.clone()))
                        .cloned(),
                );
            }
        }
        merge::sort_articles(&mut articles);
        articles.truncate(limit);
        articles
    }

    /// Articles cached under any of `categories`, each key once.
    pub async fn articles_in<'a>(
        &self,
        categories: impl IntoIterator<Item = &'a String>,
    ) -> Vec<Article> {
        let mut seen = HashSet::new();
        let mut articles = Vec::new();
        for category in categories {
            if let CacheLookup::Entry(entry) = self.get(category).await {
                articles.extend(
                    entry
                        .articles
                        .iter()
                        .filter(|a| seen.insert(a.key.clone()))
                        .cloned(),
                );
            }
        }
        articles
    }

    pub async fn find(&self, key: &str) -> Option<Article> {
        for category in self.categories().await {
            if let CacheLookup::Entry(entry) = self.get(&category).await {
                if let Some(article) = entry.articles.iter().find(|a| a.key == key) {
                    return Some(article.clone());
                }
            }
        }
        None
    }
}

fn apply_flags(articles: &mut [Article], flags: &HashMap<String, Flags>) {
    for article in articles {
        let f = flags.get(&article.key).copied().unwrap_or_default();
        article.is_read = f.is_read;
        article.is_bookmarked = f.is_bookmarked;
    }
}

fn corrupted(category: &str, reason: impl std::fmt::Display) -> CacheError {
    CacheError::ReadCorrupted {
        category: category.to_string(),
        reason: reason.to_string(),
    }
}

fn write_failed(e: sqlx::Error) -> CacheError {
    CacheError::WriteFailed(e.to_string())
}
