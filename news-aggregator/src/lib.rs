pub mod types;
pub mod utils;
pub mod traits;
pub mod robots;
pub mod rate_limit;
pub mod parser;
pub mod scrape;
pub mod fetcher;
pub mod merge;
pub mod cache;
pub mod registry;
pub mod aggregator;
pub mod relatedness;
pub mod scheduler;
pub mod config;

pub use types::*;
pub use traits::SourceFetcher;
pub use fetcher::Fetcher;
pub use parser::FeedParser;
pub use cache::{ArticleCache, CacheEntry, CacheLookup, CacheSettings};
pub use registry::{CategorySettings, SourceRegistry};
pub use aggregator::Aggregator;
pub use relatedness::{RelatednessEdge, RelatednessEngine, RelatednessSettings, RelationReason};
pub use scheduler::{CategoryState, RefreshScheduler};
pub use config::AppConfig;
