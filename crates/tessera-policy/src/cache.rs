//! Per-app policy cache.
//!
//! Keeps the active policies of each app in memory, ordered by priority, and
//! reloads them from storage when the TTL expires or when a cache-bust
//! signal ([`PolicyCache::invalidate`]) arrives after an admin change.
//!
//! # Example
//!
//! ```ignore
//! use tessera_policy::cache::PolicyCache;
//! use std::sync::Arc;
//! use time::Duration;
//!
//! let storage: Arc<dyn PolicyStorage> = /* ... */;
//! let cache = PolicyCache::new(storage, Duration::minutes(5));
//!
//! let matched = cache.matched_policies("app-1", "GET", "/documents/42").await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;

use crate::PolicyResult;
use crate::config::PolicyCacheConfig;
use crate::context::MatchedPolicy;
use crate::resources::Policy;
use crate::storage::PolicyStorage;

// =============================================================================
// Cached Policies
// =============================================================================

/// Cached policies of one app.
struct CachedApp {
    /// Active policies ordered by priority.
    policies: Vec<Policy>,

    /// When the entry was loaded.
    loaded_at: OffsetDateTime,
}

// =============================================================================
// Policy Cache
// =============================================================================

/// In-memory cache of active policies, keyed by app.
pub struct PolicyCache {
    /// Underlying policy storage.
    storage: Arc<dyn PolicyStorage>,

    /// Cached entries protected by a read-write lock.
    apps: RwLock<HashMap<String, CachedApp>>,

    /// Time-to-live for cached entries.
    ttl: Duration,

    /// When `false` every lookup goes to storage.
    enabled: bool,

    hits: AtomicU64,
    misses: AtomicU64,
    refreshes: AtomicU64,
}

impl PolicyCache {
    /// Create a new policy cache.
    ///
    /// # Arguments
    ///
    /// * `storage` - Policy storage backend
    /// * `ttl` - How long cached data remains valid
    #[must_use]
    pub fn new(storage: Arc<dyn PolicyStorage>, ttl: Duration) -> Self {
        Self {
            storage,
            apps: RwLock::new(HashMap::new()),
            ttl,
            enabled: true,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Create a policy cache from configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the TTL is out of range.
    pub fn from_config(
        storage: Arc<dyn PolicyStorage>,
        config: &PolicyCacheConfig,
    ) -> PolicyResult<Self> {
        let mut cache = Self::new(storage, config.ttl()?);
        cache.enabled = config.enabled;
        Ok(cache)
    }

    /// Get the active policies of an app, ordered by priority.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry is stale and reloading it fails.
    pub async fn policies_for(&self, app_id: &str) -> PolicyResult<Vec<Policy>> {
        if self.enabled {
            let apps = self.apps.read().await;
            if let Some(entry) = apps.get(app_id)
                && !self.is_stale(entry)
            {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.policies.clone());
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        self.refresh(app_id).await
    }

    /// Get the policies of an app that apply to `verb path`, reduced to
    /// their matching rules, in priority order.
    ///
    /// # Errors
    ///
    /// Returns an error if loading the app's policies fails.
    pub async fn matched_policies(
        &self,
        app_id: &str,
        verb: &str,
        path: &str,
    ) -> PolicyResult<Vec<MatchedPolicy>> {
        let policies = self.policies_for(app_id).await?;
        Ok(policies
            .iter()
            .filter_map(|policy| policy.matched_for(verb, path))
            .collect())
    }

    /// Force a reload of an app's policies from storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage fetch fails.
    pub async fn refresh(&self, app_id: &str) -> PolicyResult<Vec<Policy>> {
        let mut policies = self.storage.list_active(app_id).await?;
        policies.retain(|p| p.active && p.app_id == app_id);
        policies.sort_by_key(|p| p.priority);

        self.refreshes.fetch_add(1, Ordering::Relaxed);
        tracing::info!(app_id, policies = policies.len(), "Policy cache refreshed");

        if self.enabled {
            let mut apps = self.apps.write().await;
            apps.insert(
                app_id.to_string(),
                CachedApp {
                    policies: policies.clone(),
                    loaded_at: OffsetDateTime::now_utc(),
                },
            );
        }

        Ok(policies)
    }

    /// Drop an app's entry, forcing a reload on next access.
    ///
    /// Call this after policy changes (create, update, delete).
    pub async fn invalidate(&self, app_id: &str) {
        let removed = self.apps.write().await.remove(app_id).is_some();
        tracing::debug!(app_id, removed, "Policy cache invalidated");
    }

    /// Drop every entry.
    pub async fn invalidate_all(&self) {
        let mut apps = self.apps.write().await;
        let count = apps.len();
        apps.clear();
        tracing::debug!(apps = count, "Policy cache cleared");
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> PolicyCacheStats {
        let apps = self.apps.read().await;
        PolicyCacheStats {
            app_count: apps.len(),
            policy_count: apps.values().map(|a| a.policies.len()).sum(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            ttl: self.ttl,
        }
    }

    fn is_stale(&self, entry: &CachedApp) -> bool {
        entry.loaded_at + self.ttl < OffsetDateTime::now_utc()
    }
}

// =============================================================================
// Cache Statistics
// =============================================================================

/// Statistics about the policy cache.
#[derive(Debug, Clone)]
pub struct PolicyCacheStats {
    /// Number of apps with a cached entry.
    pub app_count: usize,

    /// Number of policies across all cached entries.
    pub policy_count: usize,

    /// Lookups served from the cache.
    pub hits: u64,

    /// Lookups that went to storage.
    pub misses: u64,

    /// Successful reloads from storage.
    pub refreshes: u64,

    /// Cache TTL.
    pub ttl: Duration,
}

// =============================================================================
// Tests
// =============================================================================
