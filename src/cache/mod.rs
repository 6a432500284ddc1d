//! In-process host routing cache
//!
//! Producers attach routing identifiers (app, env, deployment, billing user)
//! to every record they enqueue. Resolving them for each request would hit
//! the routing service on every hit, so resolved routes are cached per host
//! name with a TTL. The cache is an explicit object injected where needed;
//! expired entries are removed by a replica-safe purge job.
//!
//! # Example
//!
//! ```rust,ignore
//! use replicore::cache::{HostCache, HostRoute};
//!
//! let cache = Arc::new(HostCache::new(Duration::from_secs(300)));
//! cache.insert("shop.example.com", route).await;
//! let route = cache.get("shop.example.com").await;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::scheduler::{job_fn, Job};

/// Routing identifiers resolved for a host name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRoute {
    pub app_id: String,
    pub env_id: String,
    pub deployment_id: String,
    pub billing_user_id: String,
}

/// Resolves a host name on cache miss
#[async_trait]
pub trait RouteResolver: Send + Sync {
    /// `Ok(None)` when the host is unknown
    async fn resolve(&self, host: &str) -> anyhow::Result<Option<HostRoute>>;
}

#[derive(Debug, Clone)]
struct CachedRoute {
    route: HostRoute,
    expires_at: Instant,
}

/// Host name → route map with per-entry expiry
#[derive(Debug)]
pub struct HostCache {
    entries: RwLock<HashMap<String, CachedRoute>>,
    ttl: Duration,
}

impl HostCache {
    /// Create an empty cache whose entries live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Entry lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached route for `host`, if present and not expired
    pub async fn get(&self, host: &str) -> Option<HostRoute> {
        let entries = self.entries.read().await;
        entries
            .get(host)
            .filter(|cached| cached.expires_at > Instant::now())
            .map(|cached| cached.route.clone())
    }

    /// Cache `route` for `host`, replacing any previous entry
    pub async fn insert(&self, host: impl Into<String>, route: HostRoute) {
        let cached = CachedRoute {
            route,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().await.insert(host.into(), cached);
    }

    /// Drop the entry for `host`
    pub async fn invalidate(&self, host: &str) -> bool {
        self.entries.write().await.remove(host).is_some()
    }

    /// Cached route, or resolve and cache it on miss
    pub async fn get_or_resolve(
        &self,
        host: &str,
        resolver: &dyn RouteResolver,
    ) -> anyhow::Result<Option<HostRoute>> {
        if let Some(route) = self.get(host).await {
            return Ok(Some(route));
        }

        let resolved = resolver.resolve(host).await?;
        if let Some(route) = &resolved {
            self.insert(host, route.clone()).await;
        }
        Ok(resolved)
    }

    /// Remove expired entries, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, cached| cached.expires_at > now);
        before - entries.len()
    }

    /// Number of entries, expired ones included
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Replica-safe job that purges expired entries
pub fn purge_job(cache: Arc<HostCache>) -> Arc<dyn Job> {
    job_fn("host-cache-purge", move |_ctx| {
        let cache = Arc::clone(&cache);
        async move {
            let purged = cache.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "Purged expired host routes");
            }
            Ok(())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::JobContext;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn route(app: &str) -> HostRoute {
        HostRoute {
            app_id: app.to_string(),
            env_id: "env-1".to_string(),
            deployment_id: "dep-1".to_string(),
            billing_user_id: "user-1".to_string(),
        }
    }

    struct CountingResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RouteResolver for CountingResolver {
        async fn resolve(&self, host: &str) -> anyhow::Result<Option<HostRoute>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((host == "known.example.com").then(|| route("app-1")))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = HostCache::new(Duration::from_secs(60));
        cache.insert("a.example.com", route("a")).await;
        assert_eq!(cache.get("a.example.com").await, Some(route("a")));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get("a.example.com").await, None);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.purge_expired().await, 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_or_resolve_caches_hits() {
        let cache = HostCache::new(Duration::from_secs(60));
        let resolver = CountingResolver {
            calls: AtomicUsize::new(0),
        };

        let first = cache.get_or_resolve("known.example.com", &resolver).await.unwrap();
        let second = cache.get_or_resolve("known.example.com", &resolver).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

        assert!(cache
            .get_or_resolve("unknown.example.com", &resolver)
            .await
            .unwrap()
            .is_none());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = HostCache::new(Duration::from_secs(60));
        cache.insert("a.example.com", route("a")).await;
        assert!(cache.invalidate("a.example.com").await);
        assert!(!cache.invalidate("a.example.com").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_job() {
        let cache = Arc::new(HostCache::new(Duration::from_secs(1)));
        cache.insert("a.example.com", route("a")).await;
        tokio::time::advance(Duration::from_secs(2)).await;

        purge_job(Arc::clone(&cache))
            .run(JobContext::detached())
            .await
            .unwrap();
        assert!(cache.is_empty().await);
    }
}
