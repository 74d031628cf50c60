use crate::types::{FetchError, RawItem, Source};
use async_trait::async_trait;

/// Retrieves the current items of one source. Implementations own their
/// rate limiting, timeouts and retries; callers see only the final result.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &Source) -> Result<Vec<RawItem>, FetchError>;
}
