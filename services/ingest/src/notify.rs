//! Change notifications
//!
//! After an ingestion the orchestrator announces which record set changed
//! and for which scope. Views holding fetched rows drop them and refetch.
//!
//! A `RowCache` must be invalidated in the same call that publishes the
//! change (see the API's notifier), so a read issued after `notify`
//! returns never sees the old rows. The broadcast feed is for observers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::fields::RecordKind;
use crate::store::Scope;

const FEED_CAPACITY: usize = 64;

/// Record set a view is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Records(RecordKind),
    Rejected,
    Audit,
}

impl Topic {
    /// Scope the topic's rows actually vary by.
    ///
    /// Kinds stored without a project column ignore the project; the audit
    /// log is global.
    pub fn effective_scope(self, scope: &Scope) -> Scope {
        match self {
            Self::Records(kind) if kind.project_column().is_none() => {
                Scope::new(scope.company_id, None)
            }
            Self::Audit => Scope::new(Uuid::nil(), None),
            _ => scope.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    pub topic: Topic,
    pub scope: Scope,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, topic: Topic, scope: &Scope);
}

/// Broadcast channel of invalidations
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<Invalidation>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.tx.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for ChangeFeed {
    fn notify(&self, topic: Topic, scope: &Scope) {
        let invalidation = Invalidation {
            topic,
            scope: scope.clone(),
        };
        // no subscribers is fine
        if let Ok(n) = self.tx.send(invalidation) {
            debug!(?topic, subscribers = n, "published invalidation");
        }
    }
}

// =============================================================================
// ROW CACHE
// =============================================================================

#[derive(Debug)]
struct CacheInner<T> {
    entries: HashMap<(Topic, Scope), Arc<Vec<T>>>,
    /// Bumped by every invalidation
    generation: u64,
}

/// Fetched rows per (topic, scope), dropped on invalidation.
///
/// Read-through usage: take `generation()`, fetch, then `put` with that
/// generation. A fetch that raced an invalidation is returned to the caller
/// but not cached.
#[derive(Debug)]
pub struct RowCache<T> {
    inner: RwLock<CacheInner<T>>,
}

impl<T> Default for RowCache<T> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                entries: HashMap::new(),
                generation: 0,
            }),
        }
    }
}

impl<T> RowCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.inner.read().map(|i| i.generation).unwrap_or(u64::MAX)
    }

    pub fn get(&self, topic: Topic, scope: &Scope) -> Option<Arc<Vec<T>>> {
        let key = (topic, topic.effective_scope(scope));
        self.inner.read().ok()?.entries.get(&key).cloned()
    }

    /// Cache rows fetched at `generation`, unless an invalidation has
    /// happened since
    pub fn put(&self, topic: Topic, scope: &Scope, rows: Vec<T>, generation: u64) -> Arc<Vec<T>> {
        let rows = Arc::new(rows);
        if let Ok(mut inner) = self.inner.write() {
            if inner.generation == generation {
                let key = (topic, topic.effective_scope(scope));
                inner.entries.insert(key, Arc::clone(&rows));
            }
        }
        rows
    }

    /// Drop the topic for the scope and for any wider scope of the same tenant
    pub fn invalidate(&self, invalidation: &Invalidation) {
        let topic = invalidation.topic;
        let target = topic.effective_scope(&invalidation.scope);
        if let Ok(mut inner) = self.inner.write() {
            inner.generation = inner.generation.wrapping_add(1);
            inner.entries.retain(|(t, scope), _| {
                !(*t == topic
                    && scope.company_id == target.company_id
                    && (scope.project.is_none() || scope.project == target.project))
            });
        }
    }
}

// =============================================================================
// OBSERVERS
// =============================================================================

/// Log every invalidation from the feed until it closes
pub fn spawn_change_log(mut rx: broadcast::Receiver<Invalidation>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut seen = 0;
        loop {
            match rx.recv().await {
                Ok(invalidation) => {
                    seen += 1;
                    info!(
                        topic = ?invalidation.topic,
                        company_id = %invalidation.scope.company_id,
                        project = ?invalidation.scope.project,
                        "views invalidated"
                    );
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "change feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        seen
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(project: Option<&str>) -> Scope {
        Scope::new(Uuid::nil(), project.map(str::to_string))
    }

    fn invalidation(topic: Topic, project: Option<&str>) -> Invalidation {
        Invalidation {
            topic,
            scope: scope(project),
        }
    }

    #[tokio::test]
    async fn test_feed_delivers_invalidation() {
        let feed = ChangeFeed::new();
        let mut rx = feed.subscribe();
        feed.notify(Topic::Records(RecordKind::Ocr), &scope(Some("imotorbike")));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.topic, Topic::Records(RecordKind::Ocr));
        assert_eq!(got.scope.project.as_deref(), Some("imotorbike"));
    }

    #[test]
    fn test_notify_without_subscribers_is_silent() {
        ChangeFeed::new().notify(Topic::Audit, &scope(None));
    }

    // -------------------------------------------------------------------------
    // CACHE TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_cache_invalidation_is_topic_and_scope_bound() {
        let cache: RowCache<u32> = RowCache::new();
        let billing = Topic::Records(RecordKind::InsurerBilling);
        let g = cache.generation();
        cache.put(billing, &scope(Some("imotorbike")), vec![], g);
        cache.put(billing, &scope(None), vec![], g);
        cache.put(billing, &scope(Some("other")), vec![], g);
        cache.put(Topic::Rejected, &scope(Some("imotorbike")), vec![], g);

        cache.invalidate(&invalidation(billing, Some("imotorbike")));

        assert!(cache.get(billing, &scope(Some("imotorbike"))).is_none());
        assert!(cache.get(billing, &scope(None)).is_none());
        assert!(cache.get(billing, &scope(Some("other"))).is_some());
        assert!(cache.get(Topic::Rejected, &scope(Some("imotorbike"))).is_some());
    }

    #[test]
    fn test_projectless_kind_ignores_project() {
        let cache: RowCache<u32> = RowCache::new();
        let issuance = Topic::Records(RecordKind::Issuance);
        cache.put(issuance, &scope(Some("other")), vec![1], cache.generation());
        assert_eq!(cache.get(issuance, &scope(None)).map(|r| r.len()), Some(1));

        cache.invalidate(&invalidation(issuance, Some("imotorbike")));
        assert!(cache.get(issuance, &scope(Some("other"))).is_none());
    }

    #[test]
    fn test_audit_is_global() {
        let cache: RowCache<u32> = RowCache::new();
        let other_tenant = Scope::new(Uuid::from_u128(7), Some("p".into()));
        cache.put(Topic::Audit, &other_tenant, vec![1], cache.generation());

        assert!(cache.get(Topic::Audit, &scope(None)).is_some());

        cache.invalidate(&invalidation(Topic::Audit, Some("imotorbike")));
        assert!(cache.get(Topic::Audit, &other_tenant).is_none());
    }

    #[test]
    fn test_put_after_invalidation_is_not_cached() {
        let cache: RowCache<u32> = RowCache::new();
        let ocr = Topic::Records(RecordKind::Ocr);

        let before = cache.generation();
        cache.invalidate(&invalidation(ocr, Some("p")));
        let rows = cache.put(ocr, &scope(Some("p")), vec![1, 2], before);

        assert_eq!(rows.len(), 2);
        assert!(cache.get(ocr, &scope(Some("p"))).is_none());

        cache.put(ocr, &scope(Some("p")), vec![1, 2, 3], cache.generation());
        assert_eq!(cache.get(ocr, &scope(Some("p"))).map(|r| r.len()), Some(3));
    }

    #[tokio::test]
    async fn test_change_log_drains_until_feed_closes() {
        let feed = ChangeFeed::new();
        let handle = spawn_change_log(feed.subscribe());

        feed.notify(Topic::Rejected, &scope(Some("p")));
        feed.notify(Topic::Audit, &scope(Some("p")));
        drop(feed);

        assert_eq!(handle.await.unwrap(), 2);
    }
}
