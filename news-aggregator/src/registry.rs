use crate::types::Source;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq)]
pub struct CategorySettings {
    pub refresh_interval: Duration,
    /// Overrides the cache-wide TTL for this category.
    pub ttl: Option<Duration>,
}

impl Default for CategorySettings {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            ttl: None,
        }
    }
}

/// The configured sources, grouped by category. Immutable once built; a
/// config reload builds a new registry.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Source>,
    settings: BTreeMap<String, CategorySettings>,
}

impl SourceRegistry {
    pub fn new(mut sources: Vec<Source>, settings: BTreeMap<String, CategorySettings>) -> Self {
        sources.sort_by(|a, b| a.name.cmp(&b.name));
        Self { sources, settings }
    }

    pub fn from_sources(sources: Vec<Source>) -> Self {
        Self::new(sources, BTreeMap::new())
    }

    pub fn sources_for(&self, category: &str) -> Vec<Source> {
        self.sources
            .iter()
            .filter(|s| s.belongs_to(category))
            .cloned()
            .collect()
    }

    /// Every category named by a source or by category settings.
    pub fn categories(&self) -> Vec<String> {
        let mut categories: BTreeSet<String> = self.settings.keys().cloned().collect();
        for source in &self.sources {
            categories.extend(source.categories.iter().cloned());
        }
        categories.into_iter().collect()
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.settings.contains_key(category) || self.sources.iter().any(|s| s.belongs_to(category))
    }

    pub fn settings(&self, category: &str) -> CategorySettings {
        self.settings.get(category).cloned().unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceKind;

    #[test]
    fn groups_sources_by_category() {
        let registry = SourceRegistry::from_sources(vec![
            Source::new("b", SourceKind::Feed, "https://b.test/rss").in_category("tech"),
            Source::new("a", SourceKind::Feed, "https://a.test/rss")
                .in_category("tech")
                .in_category("science"),
        ]);

        let tech: Vec<String> = registry.sources_for("tech").into_iter().map(|s| s.name).collect();
        assert_eq!(tech, vec!["a", "b"]);
        assert_eq!(registry.sources_for("science").len(), 1);
        assert!(registry.sources_for("sports").is_empty());
        assert_eq!(registry.categories(), vec!["science", "tech"]);
        assert_eq!(registry.settings("tech"), CategorySettings::default());
    }
}
