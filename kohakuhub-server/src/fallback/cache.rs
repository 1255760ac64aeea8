// Copyright 2025 KohakuHub Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! TTL cache for repo → source mappings. Negative results are cached
//! too, so a burst of requests for a nonexistent repo probes the
//! mirrors once per TTL, not once per request.

use std::time::Duration;

use kohakuhub_core::RepoType;

/// What we learned about a repo from the mirrors.
#[derive(Debug, Clone)]
pub struct CachedSource {
    pub source_url: String,
    pub source_name: String,
    pub source_type: String,
    pub exists: bool,
    pub checked_at: i64,
}

pub struct FallbackCache {
    cache: moka::sync::Cache<String, CachedSource>,
    ttl_seconds: u64,
}

fn cache_key(repo_type: RepoType, namespace: &str, name: &str) -> String {
    format!("fallback:repo:{}:{namespace}/{name}", repo_type.as_str())
}

impl FallbackCache {
    pub fn new(ttl_seconds: u64, max_entries: u64) -> Self {
        Self {
            cache: moka::sync::Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(Duration::from_secs(ttl_seconds))
                .build(),
            ttl_seconds,
        }
    }

    pub fn get(&self, repo_type: RepoType, namespace: &str, name: &str) -> Option<CachedSource> {
        let hit = self.cache.get(&cache_key(repo_type, namespace, name));
        match &hit {
            Some(cached) => tracing::debug!(
                "fallback cache HIT: {}/{namespace}/{name} -> {}",
                repo_type.as_str(),
                cached.source_name
            ),
            None => tracing::debug!(
                "fallback cache MISS: {}/{namespace}/{name}",
                repo_type.as_str()
            ),
        }
        hit
    }

    pub fn set(
        &self,
        repo_type: RepoType,
        namespace: &str,
        name: &str,
        source: CachedSource,
    ) {
        tracing::debug!(
            "fallback cache SET: {}/{namespace}/{name} -> {} (TTL={}s)",
            repo_type.as_str(),
            source.source_name,
            self.ttl_seconds
        );
        self.cache.insert(cache_key(repo_type, namespace, name), source);
    }

    pub fn invalidate(&self, repo_type: RepoType, namespace: &str, name: &str) {
        self.cache.invalidate(&cache_key(repo_type, namespace, name));
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    pub fn stats(&self) -> (u64, u64) {
        (self.cache.entry_count(), self.ttl_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, exists: bool) -> CachedSource {
        CachedSource {
            source_url: format!("https://{name}.example"),
            source_name: name.to_string(),
            source_type: "huggingface".to_string(),
            exists,
            checked_at: 0,
        }
    }

    #[test]
    fn hit_after_set_and_invalidate() {
        let cache = FallbackCache::new(300, 100);
        assert!(cache.get(RepoType::Model, "foreign", "bar").is_none());

        cache.set(RepoType::Model, "foreign", "bar", entry("hf", true));
        let hit = cache.get(RepoType::Model, "foreign", "bar").unwrap();
        assert_eq!(hit.source_name, "hf");
        assert!(hit.exists);

        // Type is part of the key.
        assert!(cache.get(RepoType::Dataset, "foreign", "bar").is_none());

        cache.invalidate(RepoType::Model, "foreign", "bar");
        assert!(cache.get(RepoType::Model, "foreign", "bar").is_none());
    }

    #[test]
    fn negative_entries_are_cached() {
        let cache = FallbackCache::new(300, 100);
        cache.set(RepoType::Model, "ns", "gone", entry("hf", false));
        let hit = cache.get(RepoType::Model, "ns", "gone").unwrap();
        assert!(!hit.exists);
    }
}
