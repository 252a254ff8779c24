// Copyright 2025 AgentReplay (https://github.com/agentreplay)
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

//! Caching layer for metric results

use crate::{Metric, MetricResult};
use convoeval_core::TestCase;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cache of metric results keyed by test case content and metric identity
pub struct EvalCache {
    cache: Cache<CacheKey, MetricResult>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl EvalCache {
    /// Create a new cache with specified TTL in seconds
    pub fn new(ttl_secs: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self {
            cache,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get cached result
    pub async fn get(&self, key: &CacheKey) -> Option<MetricResult> {
        match self.cache.get(key).await {
            Some(result) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(result)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Set cache entry
    pub async fn set(&self, key: CacheKey, value: MetricResult) {
        self.cache.insert(key, value).await;
    }

    pub async fn invalidate(&self, key: &CacheKey) {
        self.cache.invalidate(key).await;
    }

    /// Clear entire cache
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
            entry_count: self.cache.entry_count(),
        }
    }
}

impl Default for EvalCache {
    fn default() -> Self {
        Self::new(3600)
    }
}

/// Cache key based on test case content and metric configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    test_case_hash: u64,
    metric_hash: u64,
}

impl CacheKey {
    pub fn new(test_case: &TestCase, metric: &dyn Metric) -> Self {
        let mut hasher = DefaultHasher::new();
        metric.cache_id().hash(&mut hasher);

        Self {
            test_case_hash: test_case.content_hash(),
            metric_hash: hasher.finish(),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entry_count: u64,
}
