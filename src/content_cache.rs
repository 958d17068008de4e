use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::models::{CacheKey, CachedModule, LearningModule};
use crate::retry::with_deadline;

const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Durable storage behind the content cache. One record per (user, topic).
#[async_trait]
pub trait ModuleStore: Send + Sync {
    async fn load_module(&self, key: &CacheKey) -> Result<Option<CachedModule>>;

    /// Insert or overwrite the record for `record.key()`.
    async fn upsert_module(&self, record: &CachedModule) -> Result<()>;

    /// Bump `access_count` and `last_accessed_at`, returning the updated record.
    async fn record_module_access(&self, key: &CacheKey, at: DateTime<Utc>) -> Result<Option<CachedModule>>;
}

/// Decides whether a stored record may be served.
pub trait Validity: Send + Sync {
    fn is_valid(&self, record: &CachedModule) -> bool;
}

impl<F> Validity for F
where
    F: Fn(&CachedModule) -> bool + Send + Sync,
{
    fn is_valid(&self, record: &CachedModule) -> bool {
        self(record)
    }
}

/// A record is valid only while it was generated from the caller's current evidence.
#[derive(Debug, Clone, Copy)]
pub struct EvidenceMatch<'a>(pub &'a str);

impl Validity for EvidenceMatch<'_> {
    fn is_valid(&self, record: &CachedModule) -> bool {
        record.evidence_hash == self.0
    }
}

/// Hash-invalidated cache of generated learning modules. There is no TTL;
/// a record stays servable until the learner's evidence changes.
///
/// Every store call is bounded by `store_timeout`; a timed-out call fails like any other.
#[derive(Clone)]
pub struct ContentCache {
    store: Arc<dyn ModuleStore>,
    store_timeout: Duration,
}

impl ContentCache {
    pub fn new(store: Arc<dyn ModuleStore>) -> Self {
        Self {
            store,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// Return the stored module when `validity` accepts it, bumping its access stats.
    /// Store failures and timeouts are treated as a miss.
    pub async fn get(&self, key: &CacheKey, validity: &dyn Validity) -> Option<CachedModule> {
        let record = match with_deadline(self.store_timeout, "load_module", self.store.load_module(key)).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(topic_id = %key.topic_id, "Module cache miss");
                return None;
            }
            Err(e) => {
                warn!(
                    topic_id = %key.topic_id,
                    error = %crate::logging::sanitize_for_log(&e.to_string()),
                    "Module cache lookup failed, treating as miss"
                );
                return None;
            }
        };

        if !validity.is_valid(&record) {
            debug!(
                topic_id = %key.topic_id,
                stored_evidence_count = record.evidence_count,
                "Cached module is stale for current evidence"
            );
            return None;
        }

        match with_deadline(
            self.store_timeout,
            "record_module_access",
            self.store.record_module_access(key, Utc::now()),
        )
        .await
        {
            Ok(Some(updated)) => {
                debug!(topic_id = %key.topic_id, access_count = updated.access_count, "Module cache hit");
                Some(updated)
            }
            Ok(None) => Some(record),
            Err(e) => {
                warn!(
                    topic_id = %key.topic_id,
                    error = %crate::logging::sanitize_for_log(&e.to_string()),
                    "Failed to record module access, serving cached content anyway"
                );
                Some(record)
            }
        }
    }

    /// Store freshly generated content, replacing whatever was cached for `key`.
    pub async fn put(
        &self,
        key: &CacheKey,
        content: &LearningModule,
        evidence_hash: &str,
        evidence_count: u32,
    ) -> Result<CachedModule> {
        let now = Utc::now();
        let record = CachedModule {
            user_id: key.user_id.clone(),
            topic_id: key.topic_id.clone(),
            content: content.clone(),
            evidence_hash: evidence_hash.to_string(),
            evidence_count,
            access_count: 1,
            last_accessed_at: now,
            created_at: now,
        };

        with_deadline(self.store_timeout, "upsert_module", self.store.upsert_module(&record)).await?;
        debug!(topic_id = %key.topic_id, evidence_count = evidence_count, "Cached generated module");
        Ok(record)
    }
}

/// Process-local [`ModuleStore`], used in tests and when running without a database.
#[derive(Debug, Clone, Default)]
pub struct InMemoryModuleStore {
    records: Arc<RwLock<HashMap<CacheKey, CachedModule>>>,
}

impl InMemoryModuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ModuleStore for InMemoryModuleStore {
    async fn load_module(&self, key: &CacheKey) -> Result<Option<CachedModule>> {
        let records = self.records.read().await;
        Ok(records.get(key).cloned())
    }

    async fn upsert_module(&self, record: &CachedModule) -> Result<()> {
        let mut records = self.records.write().await;
        let created_at = records
            .get(&record.key())
            .map(|existing| existing.created_at)
            .unwrap_or(record.created_at);

        let mut stored = record.clone();
        stored.created_at = created_at;
        records.insert(record.key(), stored);
        Ok(())
    }

    async fn record_module_access(&self, key: &CacheKey, at: DateTime<Utc>) -> Result<Option<CachedModule>> {
        let mut records = self.records.write().await;
        Ok(records.get_mut(key).map(|record| {
            record.access_count += 1;
            record.last_accessed_at = at;
            record.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Explanation, Machote};

    fn module(title: &str) -> LearningModule {
        LearningModule {
            title: title.to_string(),
            explanation: Explanation {
                validation: "Es normal que cueste".to_string(),
                analogy: "Como una receta".to_string(),
                core_concept: "Multiplicar antes de sumar".to_string(),
            },
            machote: Machote {
                title: "El machote".to_string(),
                steps: vec!["Paso 1".to_string()],
                common_mistakes: vec![],
            },
        }
    }

    struct FailingStore;

    #[async_trait]
    impl ModuleStore for FailingStore {
        async fn load_module(&self, _key: &CacheKey) -> Result<Option<CachedModule>> {
            Err(anyhow::anyhow!("database is locked"))
        }

        async fn upsert_module(&self, _record: &CachedModule) -> Result<()> {
            Err(anyhow::anyhow!("database is locked"))
        }

        async fn record_module_access(&self, _key: &CacheKey, _at: DateTime<Utc>) -> Result<Option<CachedModule>> {
            Err(anyhow::anyhow!("database is locked"))
        }
    }

    /// Reads succeed immediately; writes and access bumps never finish.
    struct StallingStore(InMemoryModuleStore);

    #[async_trait]
    impl ModuleStore for StallingStore {
        async fn load_module(&self, key: &CacheKey) -> Result<Option<CachedModule>> {
            self.0.load_module(key).await
        }

        async fn upsert_module(&self, _record: &CachedModule) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }

        async fn record_module_access(&self, _key: &CacheKey, _at: DateTime<Utc>) -> Result<Option<CachedModule>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_repeated_get_returns_same_content_and_counts_access() {
        let cache = ContentCache::new(Arc::new(InMemoryModuleStore::new()));
        let key = CacheKey::new("user-1", "topic-1");
        cache.put(&key, &module("Proporciones"), "hash-a", 2).await.unwrap();

        let first = cache.get(&key, &EvidenceMatch("hash-a")).await.unwrap();
        let second = cache.get(&key, &EvidenceMatch("hash-a")).await.unwrap();

        assert_eq!(first.content, second.content);
        assert_eq!(first.access_count, 2);
        assert_eq!(second.access_count, 3);
        assert!(second.last_accessed_at >= first.last_accessed_at);
    }

    #[tokio::test]
    async fn test_changed_evidence_forces_miss() {
        let cache = ContentCache::new(Arc::new(InMemoryModuleStore::new()));
        let key = CacheKey::new("user-1", "topic-1");
        cache.put(&key, &module("Proporciones"), "hash-a", 2).await.unwrap();

        assert!(cache.get(&key, &EvidenceMatch("hash-b")).await.is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites_existing_record() {
        let store = Arc::new(InMemoryModuleStore::new());
        let cache = ContentCache::new(store.clone());
        let key = CacheKey::new("user-1", "topic-1");

        cache.put(&key, &module("Primera versión"), "hash-a", 1).await.unwrap();
        cache.get(&key, &EvidenceMatch("hash-a")).await.unwrap();
        cache.put(&key, &module("Segunda versión"), "hash-b", 2).await.unwrap();

        assert_eq!(store.len().await, 1);
        let current = cache.get(&key, &EvidenceMatch("hash-b")).await.unwrap();
        assert_eq!(current.content.title, "Segunda versión");
        assert_eq!(current.evidence_count, 2);
        assert_eq!(current.access_count, 2);
    }

    #[tokio::test]
    async fn test_closure_validity() {
        let cache = ContentCache::new(Arc::new(InMemoryModuleStore::new()));
        let key = CacheKey::new("user-1", "topic-1");
        cache.put(&key, &module("Proporciones"), "hash-a", 3).await.unwrap();

        let at_least_three = |record: &CachedModule| record.evidence_count >= 3;
        assert!(cache.get(&key, &at_least_three).await.is_some());
    }

    #[tokio::test]
    async fn test_store_failures_degrade_to_miss() {
        let cache = ContentCache::new(Arc::new(FailingStore));
        let key = CacheKey::new("user-1", "topic-1");

        assert!(cache.get(&key, &EvidenceMatch("hash-a")).await.is_none());
        assert!(cache.put(&key, &module("x"), "hash-a", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_stalled_store_calls_time_out() {
        let inner = InMemoryModuleStore::new();
        let key = CacheKey::new("user-1", "topic-1");
        ContentCache::new(Arc::new(inner.clone()))
            .put(&key, &module("Proporciones"), "hash-a", 1)
            .await
            .unwrap();

        let cache = ContentCache::new(Arc::new(StallingStore(inner))).with_timeout(Duration::from_millis(50));

        let served = tokio::time::timeout(Duration::from_secs(2), cache.get(&key, &EvidenceMatch("hash-a")))
            .await
            .expect("stalled access bump must not block the read");
        assert_eq!(served.unwrap().access_count, 1);

        let write = tokio::time::timeout(Duration::from_secs(2), cache.put(&key, &module("x"), "hash-b", 2))
            .await
            .expect("stalled write must give up");
        assert!(write.is_err());
    }
}
