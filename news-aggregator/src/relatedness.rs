//! Query-time "related articles" scoring over the cached article sets.

use crate::cache::ArticleCache;
use crate::merge;
use crate::types::Article;
use crate::utils::text;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RelatednessSettings {
    /// Publication gap at which time proximity stops counting.
    pub window: Duration,
    /// Keyword overlap below this many shared tokens scores nothing.
    pub min_shared_tokens: usize,
    pub same_source_weight: f64,
    pub per_shared_category: f64,
    pub category_cap: f64,
    pub per_shared_token: f64,
    pub keyword_cap: f64,
    pub time_weight: f64,
}

impl Default for RelatednessSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(48 * 3600),
            min_shared_tokens: 2,
            same_source_weight: 2.0,
            per_shared_category: 0.5,
            category_cap: 1.0,
            per_shared_token: 1.0,
            keyword_cap: 3.0,
            time_weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationReason {
    SameSource,
    SameCategory,
    KeywordOverlap,
    TimeProximity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatednessEdge {
    pub article_key: String,
    pub candidate_key: String,
    pub score: f64,
    pub reason: RelationReason,
}

struct Scored<'a> {
    edge: RelatednessEdge,
    candidate: &'a Article,
}

/// Stateless: every call reads the cache afresh.
pub struct RelatednessEngine {
    cache: Arc<ArticleCache>,
    settings: RelatednessSettings,
}

impl RelatednessEngine {
    pub fn new(cache: Arc<ArticleCache>, settings: RelatednessSettings) -> Self {
        Self { cache, settings }
    }

    pub fn settings(&self) -> &RelatednessSettings {
        &self.settings
    }

    pub async fn related(&self, article: &Article, limit: usize) -> Vec<Article> {
        let pool = self.cache.articles_in(&article.categories).await;
        let by_key: HashMap<&str, &Article> = pool.iter().map(|a| (a.key.as_str(), a)).collect();
        self.rank(article, &pool, limit)
            .into_iter()
            .filter_map(|edge| by_key.get(edge.candidate_key.as_str()).map(|a| (*a).clone()))
            .collect()
    }

    pub async fn related_edges(&self, article: &Article, limit: usize) -> Vec<RelatednessEdge> {
        let pool = self.cache.articles_in(&article.categories).await;
        self.rank(article, &pool, limit)
    }

    /// Rank `pool` against `article`: highest score first, then newest.
    /// The article itself and anything outside its categories are skipped.
    pub fn rank(&self, article: &Article, pool: &[Article], limit: usize) -> Vec<RelatednessEdge> {
        if limit == 0 {
            return Vec::new();
        }
        let tokens = tokens_of(article);

        let mut scored: Vec<Scored<'_>> = pool
            .iter()
            .filter(|c| c.key != article.key && c.shares_category_with(article))
            .filter_map(|candidate| {
                self.score_with_tokens(article, &tokens, candidate)
                    .map(|edge| Scored { edge, candidate })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.edge
                .score
                .total_cmp(&a.edge.score)
                .then_with(|| merge::compare_articles(a.candidate, b.candidate))
        });

        scored.into_iter().take(limit).map(|s| s.edge).collect()
    }

    /// Score one pair; `None` when nothing relates them.
    pub fn score(&self, article: &Article, candidate: &Article) -> Option<RelatednessEdge> {
        self.score_with_tokens(article, &tokens_of(article), candidate)
    }

    fn score_with_tokens(
        &self,
        article: &Article,
        tokens: &BTreeSet<String>,
        candidate: &Article,
    ) -> Option<RelatednessEdge> {
        let s = &self.settings;

        let same_source = if article.source == candidate.source {
            s.same_source_weight
        } else {
            0.0
        };

        let shared_categories = article.categories.intersection(&candidate.categories).count();
        let same_category = (shared_categories as f64 * s.per_shared_category).min(s.category_cap);

        let shared_tokens = tokens.intersection(&tokens_of(candidate)).count();
        let keyword = if shared_tokens >= s.min_shared_tokens {
            (shared_tokens as f64 * s.per_shared_token).min(s.keyword_cap)
        } else {
            0.0
        };

        let time = match (article.published_at, candidate.published_at) {
            (Some(a), Some(b)) => {
                let gap = (a - b).num_milliseconds().unsigned_abs() as f64;
                let window = s.window.as_millis() as f64;
                if window > 0.0 && gap < window {
                    s.time_weight * (1.0 - gap / window)
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        // Listed in tie-break order.
        let contributions = [
            (RelationReason::SameSource, same_source),
            (RelationReason::SameCategory, same_category),
            (RelationReason::KeywordOverlap, keyword),
            (RelationReason::TimeProximity, time),
        ];
        let score: f64 = contributions.iter().map(|(_, v)| v).sum();
        if score <= 0.0 {
            return None;
        }

        let mut reason = contributions[0];
        for c in &contributions[1..] {
            if c.1.partial_cmp(&reason.1) == Some(Ordering::Greater) {
                reason = *c;
            }
        }

        Some(RelatednessEdge {
            article_key: article.key.clone(),
            candidate_key: candidate.key.clone(),
            score,
            reason: reason.0,
        })
    }
}

fn tokens_of(article: &Article) -> BTreeSet<String> {
    text::significant_tokens(&format!("{} {}", article.title, article.summary))
}
