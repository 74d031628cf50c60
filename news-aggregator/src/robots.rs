use crate::types::FetchError;
use reqwest::{Client, StatusCode};
use robotstxt::DefaultMatcher;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

/// What one host's robots.txt says about our crawler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RobotsPolicy {
    AllowAll,
    DisallowAll,
    Rules(String),
}

impl RobotsPolicy {
    /// Matching is by product token, so `news-aggregator/0.1` obeys a
    /// `User-agent: news-aggregator` group.
    pub fn allows(&self, user_agent: &str, url: &str) -> bool {
        match self {
            RobotsPolicy::AllowAll => true,
            RobotsPolicy::DisallowAll => false,
            RobotsPolicy::Rules(body) => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(body, product_token(user_agent), url)
            }
        }
    }
}

fn product_token(user_agent: &str) -> &str {
    user_agent.split('/').next().unwrap_or(user_agent).trim()
}

/// Per-host robots.txt decisions, fetched once per process lifetime.
#[derive(Clone, Default)]
pub struct RobotsCache {
    hosts: Arc<RwLock<HashMap<String, Arc<RobotsPolicy>>>>,
}

impl RobotsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails closed: a disallowed path, or a robots.txt that cannot be read
    /// because of a server or network error, yields `Disallowed`.
    pub async fn check(
        &self,
        client: &Client,
        user_agent: &str,
        url: &str,
    ) -> Result<(), FetchError> {
        let parsed =
            Url::parse(url).map_err(|e| FetchError::ParseError(format!("{}: {}", url, e)))?;
        let host_key = format!(
            "{}://{}",
            parsed.scheme(),
            parsed[url::Position::BeforeHost..url::Position::AfterPort].to_ascii_lowercase()
        );

        let cached = {
            let hosts = self.hosts.read().await;
            hosts.get(&host_key).cloned()
        };

        let policy = match cached {
            Some(policy) => policy,
            None => {
                let policy = Arc::new(self.fetch_policy(client, &host_key).await?);
                // Concurrent first lookups all compute the same answer; keep the first.
                let mut hosts = self.hosts.write().await;
                hosts.entry(host_key.clone()).or_insert(policy).clone()
            }
        };

        if policy.allows(user_agent, url) {
            Ok(())
        } else {
            debug!("robots.txt disallows {} on {}", parsed.path(), host_key);
            Err(FetchError::Disallowed(url.to_string()))
        }
    }

    async fn fetch_policy(
        &self,
        client: &Client,
        host_key: &str,
    ) -> Result<RobotsPolicy, FetchError> {
        let robots_url = format!("{}/robots.txt", host_key);
        let response = client.get(&robots_url).send().await.map_err(|e| {
            warn!("robots.txt unreachable for {}: {}", host_key, e);
            FetchError::Disallowed(format!("{} (robots.txt unreachable)", host_key))
        })?;

        let status = response.status();
        if status.is_success() {
            let body = response.text().await.map_err(|e| {
                FetchError::Disallowed(format!("{} (robots.txt unreadable: {})", host_key, e))
            })?;
            info!("Loaded robots.txt for {}", host_key);
            Ok(RobotsPolicy::Rules(body))
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Ok(RobotsPolicy::DisallowAll)
        } else if status.is_client_error() {
            debug!("No robots.txt for {} ({}), allowing", host_key, status);
            Ok(RobotsPolicy::AllowAll)
        } else {
            warn!("robots.txt for {} returned {}, failing closed", host_key, status);
            Err(FetchError::Disallowed(format!("{} (robots.txt status {})", host_key, status)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROBOTS: &str = "\
User-agent: *
Disallow: /private
Allow: /private/open
Disallow: /*.pdf$

User-agent: news-aggregator
Disallow: /scrape-me-not
";

    fn allowed(body: &str, agent: &str, path: &str) -> bool {
        RobotsPolicy::Rules(body.to_string()).allows(agent, &format!("https://site.test{}", path))
    }

    #[test]
    fn specific_group_overrides_wildcard() {
        assert!(!allowed(ROBOTS, "news-aggregator/0.1", "/scrape-me-not/page"));
        assert!(allowed(ROBOTS, "news-aggregator/0.1", "/private"));
    }

    #[test]
    fn wildcard_group_longest_match() {
        assert!(!allowed(ROBOTS, "SomeBot/2.0", "/private/data"));
        assert!(allowed(ROBOTS, "SomeBot/2.0", "/private/open/index.html"));
        assert!(!allowed(ROBOTS, "SomeBot/2.0", "/files/report.pdf"));
        assert!(allowed(ROBOTS, "SomeBot/2.0", "/files/report.pdf.html"));
        assert!(allowed(ROBOTS, "SomeBot/2.0", "/"));
    }

    #[test]
    fn empty_disallow_allows_everything() {
        assert!(allowed("User-agent: *\nDisallow:\n", "bot", "/anything"));
    }

    #[test]
    fn own_group_with_empty_disallow_beats_wildcard_block() {
        let body = "User-agent: *\nDisallow: /\n\nUser-agent: news-aggregator\nDisallow:\n";
        assert!(allowed(body, "news-aggregator/0.1", "/page"));
        assert!(!allowed(body, "OtherBot/1.0", "/page"));
    }

    #[test]
    fn fixed_policies() {
        assert!(RobotsPolicy::AllowAll.allows("bot", "https://site.test/x"));
        assert!(!RobotsPolicy::DisallowAll.allows("bot", "https://site.test/"));
    }
}
