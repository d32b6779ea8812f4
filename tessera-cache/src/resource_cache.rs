//! LRU resource cache with single-flight fetch.
//!
//! Entries are keyed `interface::object_type::remote_key`. A second table maps
//! `interface::object_type::logical_id` to a remote key once both are known;
//! it only grows, since a stale mapping is verified by the read it leads to.

use crate::gate::Gate;
use crate::stats::{CacheStats, Counters};
use async_trait::async_trait;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use tessera_core::{AccessError, AccessResult, CacheError, OpContext, RemoteObject};

/// Remote operations the cache needs to fill an entry.
///
/// Implemented by the resource client; tests supply in-memory fakes.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Find the remote key of the object whose logical id is known.
    ///
    /// `Ok(None)` means no remote object carries that logical id.
    async fn lookup_key(&self, ctx: &OpContext, obj: &RemoteObject)
        -> AccessResult<Option<String>>;

    /// Read the object by remote key. `Ok(None)` means "not found".
    async fn read(&self, ctx: &OpContext, obj: &RemoteObject)
        -> AccessResult<Option<RemoteObject>>;
}

#[derive(Debug, Clone)]
enum EntryState {
    Empty,
    Found(RemoteObject),
    NotFound,
    Failed(AccessError),
}

/// One cached object plus the gate that serializes its fetch.
#[derive(Debug)]
pub struct CacheEntry {
    gate: Gate,
    state: Mutex<EntryState>,
}

impl CacheEntry {
    fn new() -> Self {
        Self {
            gate: Gate::new(),
            state: Mutex::new(EntryState::Empty),
        }
    }

    /// An entry already holding `obj`; its gate counts as fired.
    fn with_object(obj: RemoteObject) -> Self {
        Self {
            gate: Gate::fired(),
            state: Mutex::new(EntryState::Found(obj)),
        }
    }

    fn state(&self) -> AccessResult<MutexGuard<'_, EntryState>> {
        self.state
            .lock()
            .map_err(|_| CacheError::LockPoisoned.into())
    }

    fn snapshot(&self) -> AccessResult<EntryState> {
        Ok(self.state()?.clone())
    }

    fn set(&self, state: EntryState) -> AccessResult<()> {
        *self.state()? = state;
        Ok(())
    }

    /// The cached object, if the entry holds one.
    pub fn object(&self) -> AccessResult<Option<RemoteObject>> {
        Ok(match &*self.state()? {
            EntryState::Found(obj) => Some(obj.clone()),
            _ => None,
        })
    }

    /// A fetch for this entry has completed.
    pub fn is_fetched(&self) -> bool {
        self.gate.is_fired()
    }
}

#[derive(Debug)]
struct CacheInner {
    entries: LruCache<String, Arc<CacheEntry>>,
    logical_ids: HashMap<String, String>,
}

/// Process-wide cache of remote objects.
#[derive(Debug)]
pub struct ResourceCache {
    inner: Mutex<CacheInner>,
    counters: Counters,
}

fn cache_key(obj: &RemoteObject, id: &str) -> String {
    let d = obj.descriptor();
    format!("{}::{}::{}", d.interface, d.object_type, id)
}

impl ResourceCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                logical_ids: HashMap::new(),
            }),
            counters: Counters::default(),
        }
    }

    fn lock(&self) -> AccessResult<MutexGuard<'_, CacheInner>> {
        self.inner
            .lock()
            .map_err(|_| CacheError::LockPoisoned.into())
    }

    fn restkey_locked(inner: &CacheInner, obj: &RemoteObject) -> Option<String> {
        if let Some(key) = obj.rest_key() {
            return Some(cache_key(obj, key));
        }
        let logical_id = obj.logical_id()?;
        inner
            .logical_ids
            .get(&cache_key(obj, logical_id))
            .map(|key| cache_key(obj, key))
    }

    fn insert_locked(&self, inner: &mut CacheInner, key: String, entry: Arc<CacheEntry>) {
        if let Some((evicted, _)) = inner.entries.push(key.clone(), entry) {
            if evicted != key {
                Counters::bump(&self.counters.evictions);
                tracing::debug!(key = %evicted, "evicted cache entry");
            }
        }
    }

    fn record_logical_id_locked(inner: &mut CacheInner, obj: &RemoteObject) {
        if let (Some(logical_id), Some(key)) = (obj.logical_id(), obj.rest_key()) {
            inner
                .logical_ids
                .insert(cache_key(obj, logical_id), key.to_string());
        }
    }

    /// Canonical cache key for `obj`, or `None` if it cannot be cached yet.
    pub fn restkey(&self, obj: &RemoteObject) -> AccessResult<Option<String>> {
        let inner = self.lock()?;
        Ok(Self::restkey_locked(&inner, obj))
    }

    /// Replace the entry for `obj` with a fresh, armed one.
    pub fn reset(&self, obj: &RemoteObject) -> AccessResult<Option<Arc<CacheEntry>>> {
        let mut inner = self.lock()?;
        let Some(key) = Self::restkey_locked(&inner, obj) else {
            return Ok(None);
        };
        let entry = Arc::new(CacheEntry::new());
        self.insert_locked(&mut inner, key, Arc::clone(&entry));
        Ok(Some(entry))
    }

    /// Store `obj` under its key without disturbing an in-flight fetch.
    ///
    /// Also records the logical-id mapping when both ids are known.
    pub fn add(&self, obj: &RemoteObject) -> AccessResult<()> {
        let mut inner = self.lock()?;
        Self::record_logical_id_locked(&mut inner, obj);
        let Some(key) = Self::restkey_locked(&inner, obj) else {
            return Ok(());
        };
        match inner.entries.get(&key) {
            Some(entry) => entry.set(EntryState::Found(obj.clone()))?,
            None => {
                let entry = Arc::new(CacheEntry::with_object(obj.clone()));
                self.insert_locked(&mut inner, key, entry);
            }
        }
        Ok(())
    }

    /// The entry for `obj`, if any. Never fetches.
    pub fn get(&self, obj: &RemoteObject) -> AccessResult<Option<Arc<CacheEntry>>> {
        let mut inner = self.lock()?;
        let Some(key) = Self::restkey_locked(&inner, obj) else {
            return Ok(None);
        };
        Ok(inner.entries.get(&key).cloned())
    }

    /// Evict the entry for `obj`. The logical-id mapping is kept.
    pub fn remove(&self, obj: &RemoteObject) -> AccessResult<()> {
        let mut inner = self.lock()?;
        if let Some(key) = Self::restkey_locked(&inner, obj) {
            inner.entries.pop(&key);
        }
        Ok(())
    }

    /// Record `logical_id → remote_key`. No-op when either is empty.
    pub fn update_logical_id(
        &self,
        interface: &str,
        object_type: &str,
        logical_id: &str,
        remote_key: &str,
    ) -> AccessResult<()> {
        if logical_id.is_empty() || remote_key.is_empty() {
            return Ok(());
        }
        let mut inner = self.lock()?;
        inner.logical_ids.insert(
            format!("{}::{}::{}", interface, object_type, logical_id),
            remote_key.to_string(),
        );
        Ok(())
    }

    /// Remote key recorded for the object's logical id.
    pub fn resolve_logical_id(&self, obj: &RemoteObject) -> AccessResult<Option<String>> {
        let Some(logical_id) = obj.logical_id() else {
            return Ok(None);
        };
        let inner = self.lock()?;
        Ok(inner.logical_ids.get(&cache_key(obj, logical_id)).cloned())
    }

    fn entry_or_reset(&self, key: &str) -> AccessResult<Arc<CacheEntry>> {
        let mut inner = self.lock()?;
        if let Some(entry) = inner.entries.get(key) {
            return Ok(Arc::clone(entry));
        }
        let entry = Arc::new(CacheEntry::new());
        self.insert_locked(&mut inner, key.to_string(), Arc::clone(&entry));
        Ok(entry)
    }

    /// Drop `entry` unless it has already been replaced.
    fn discard(&self, key: &str, entry: &Arc<CacheEntry>) -> AccessResult<()> {
        let mut inner = self.lock()?;
        if inner
            .entries
            .peek(key)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            inner.entries.pop(key);
        }
        Ok(())
    }

    /// Resolve, fetch and cache `obj`, with at most one fetch per key in flight.
    ///
    /// Concurrent callers for the same key wait for the first caller's fetch
    /// and share its result. A failed fetch is handed to the callers that
    /// waited for it and then dropped, so the next `find` fetches again.
    pub async fn find<F>(
        &self,
        ctx: &OpContext,
        obj: &RemoteObject,
        fetcher: &F,
    ) -> AccessResult<Option<RemoteObject>>
    where
        F: RemoteFetcher + ?Sized,
    {
        // A key recorded for the logical id is as good as an explicit one.
        let resolved;
        let obj = match (obj.rest_key(), self.resolve_logical_id(obj)?) {
            (None, Some(key)) => {
                resolved = obj.clone().with_rest_key(key);
                &resolved
            }
            _ => obj,
        };

        loop {
            let Some(key) = self.restkey(obj)? else {
                // Nothing to key on until the logical id resolves.
                Counters::bump(&self.counters.misses);
                Counters::bump(&self.counters.fetches);
                let found = self.fetch(ctx, obj, fetcher).await?;
                if let Some(found) = &found {
                    self.add(found)?;
                }
                return Ok(found);
            };

            let entry = self.entry_or_reset(&key)?;
            if let Some(found) = entry.object()? {
                Counters::bump(&self.counters.hits);
                return Ok(Some(found));
            }
            Counters::bump(&self.counters.misses);

            let stored = ctx
                .run(entry.gate.call_once(|| async {
                    Counters::bump(&self.counters.fetches);
                    let state = match self.fetch(ctx, obj, fetcher).await {
                        Ok(Some(found)) => EntryState::Found(found),
                        Ok(None) => EntryState::NotFound,
                        Err(e) => EntryState::Failed(e),
                    };
                    self.store(&entry, state)
                }))
                .await?;
            if let Some(Err(err)) = stored {
                self.discard(&key, &entry)?;
                return Err(err);
            }

            match entry.snapshot()? {
                EntryState::Found(found) => return Ok(Some(found)),
                EntryState::NotFound => return Ok(None),
                EntryState::Failed(err) => {
                    self.discard(&key, &entry)?;
                    // Another caller's cancellation is not ours to report.
                    if matches!(err, AccessError::Context(_)) && !ctx.is_done() {
                        continue;
                    }
                    tracing::debug!(key = %key, error = %err, "cache fetch failed");
                    return Err(err);
                }
                EntryState::Empty => continue,
            }
        }
    }

    /// Publish a fetch result to `entry` and record its logical id.
    fn store(&self, entry: &CacheEntry, state: EntryState) -> AccessResult<()> {
        if let EntryState::Found(found) = &state {
            let mut inner = self.lock()?;
            Self::record_logical_id_locked(&mut inner, found);
        }
        entry.set(state)
    }

    async fn fetch<F>(
        &self,
        ctx: &OpContext,
        obj: &RemoteObject,
        fetcher: &F,
    ) -> AccessResult<Option<RemoteObject>>
    where
        F: RemoteFetcher + ?Sized,
    {
        let mut target = obj.clone();
        if target.rest_key().is_none() {
            let logical_id = target.logical_id().map(str::to_string);
            if let Some(logical_id) = logical_id {
                if target.descriptor().logical_id_is_key() {
                    target = target.with_rest_key(logical_id);
                } else if let Some(key) = fetcher.lookup_key(ctx, &target).await? {
                    target = target.with_rest_key(key);
                } else {
                    tracing::warn!(
                        object_type = %target.object_type(),
                        logical_id = %logical_id,
                        "logical id did not resolve; trying it as the remote key"
                    );
                    target = target.with_rest_key(logical_id);
                }
            }
        }
        fetcher.read(ctx, &target).await
    }

    pub fn stats(&self) -> AccessResult<CacheStats> {
        let inner = self.lock()?;
        Ok(self.counters.snapshot(inner.entries.len() as u64))
    }

    pub fn len(&self) -> AccessResult<usize> {
        Ok(self.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> AccessResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop every entry and logical-id mapping.
    pub fn clear(&self) -> AccessResult<()> {
        let mut inner = self.lock()?;
        inner.entries.clear();
        inner.logical_ids.clear();
        Ok(())
    }
}
