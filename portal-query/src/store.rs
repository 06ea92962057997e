//! The shared query cache.
//!
//! [`QueryStore`] maps [`QueryKey`]s to typed entries. Each entry owns its
//! [`QueryState`] and a revision channel that is bumped on every state
//! transition, so readers can wait for an outstanding fetch without polling.
//! Fetches run as detached tasks: a reader that stops waiting does not
//! cancel the fetch, and its result still lands in the entry.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::error::{FetchError, FetchResult};
use crate::key::{QueryFilter, QueryKey};
use crate::state::{
    FetchStatus, Observed, QueryState, QueryStatus, QueryStatusSnapshot, Resolution,
};

/// Produces a fresh fetch future for one key.
pub type FetchFn<T> = Arc<dyn Fn() -> BoxFuture<'static, FetchResult<T>> + Send + Sync>;

/// Configuration for a [`QueryStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Capacity of the state-change event channel.
    pub event_capacity: usize,
    /// Whether fetches may start immediately.
    pub start_online: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            start_online: true,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn with_online(mut self, online: bool) -> Self {
        self.start_online = online;
        self
    }
}

/// State transition published on [`QueryStore::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryEvent {
    pub key: QueryKey,
    pub status: QueryStatus,
    pub fetch_status: FetchStatus,
    pub generation: u64,
}

struct Entry<T> {
    key: QueryKey,
    state: Mutex<QueryState<T>>,
    revision: watch::Sender<u64>,
}

impl<T> Entry<T> {
    fn new(key: QueryKey) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            key,
            state: Mutex::new(QueryState::default()),
            revision,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueryState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn event(&self, state: &QueryState<T>) -> QueryEvent {
        QueryEvent {
            key: self.key.clone(),
            status: state.status(),
            fetch_status: state.fetch_status(),
            generation: state.generation(),
        }
    }
}

/// Type-erased access to an entry, for operations that span value types.
trait ErasedEntry: Send + Sync {
    fn snapshot(&self) -> QueryStatusSnapshot;
    fn mark_invalidated(&self) -> QueryEvent;
    fn bump(&self);
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Send + Sync + 'static> ErasedEntry for Entry<T> {
    fn snapshot(&self) -> QueryStatusSnapshot {
        self.lock().snapshot()
    }

    fn mark_invalidated(&self) -> QueryEvent {
        let mut state = self.lock();
        state.invalidate();
        self.event(&state)
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

struct StoreInner {
    entries: Mutex<HashMap<QueryKey, Arc<dyn ErasedEntry>>>,
    events: broadcast::Sender<QueryEvent>,
    online: watch::Sender<bool>,
}

/// Keyed, de-duplicating query cache shared by every handle of a client.
///
/// Cloning is cheap and clones share the same entries.
#[derive(Clone)]
pub struct QueryStore {
    inner: Arc<StoreInner>,
}

impl Default for QueryStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl std::fmt::Debug for QueryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryStore")
            .field("entries", &self.len())
            .field("online", &self.is_online())
            .finish()
    }
}

impl QueryStore {
    pub fn new(config: StoreConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (online, _) = watch::channel(config.start_online);
        Self {
            inner: Arc::new(StoreInner {
                entries: Mutex::new(HashMap::new()),
                events,
                online,
            }),
        }
    }

    /// Receive every state transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<QueryEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }

    /// Switch network mode. Paused fetches resume when going online.
    pub fn set_online(&self, online: bool) {
        let changed = self.inner.online.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
        if changed {
            info!(online, "query store network mode changed");
        }
    }

    /// Number of keys with an entry.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        self.entries().keys().cloned().collect()
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.entries().contains_key(key)
    }

    /// Both status axes of `key`; a key never read is pending and idle.
    pub fn status(&self, key: &QueryKey) -> QueryStatusSnapshot {
        let entry = self.entries().get(key).cloned();
        entry.map(|e| e.snapshot()).unwrap_or_default()
    }

    /// Copy of the state stored under `key`, if any.
    pub fn get_state<T>(&self, key: &QueryKey) -> FetchResult<Option<QueryState<T>>>
    where
        T: Send + Sync + 'static,
    {
        let Some(entry) = self.entries().get(key).cloned() else {
            return Ok(None);
        };
        let entry = downcast::<T>(key, entry)?;
        let state = entry.lock().clone();
        Ok(Some(state))
    }

    /// Store `value` under `key` as a successful result.
    pub fn set_data<T>(&self, key: &QueryKey, value: T) -> FetchResult<()>
    where
        T: Send + Sync + 'static,
    {
        let entry = self.entry::<T>(key)?;
        let event = {
            let mut state = entry.lock();
            state.seed(value);
            entry.event(&state)
        };
        entry.bump();
        self.publish(event);
        Ok(())
    }

    /// Mark every matching entry stale. The next read of each refetches.
    ///
    /// Returns the number of entries marked.
    pub fn invalidate(&self, filter: &QueryFilter) -> usize {
        let matched: Vec<_> = self
            .entries()
            .iter()
            .filter(|(key, _)| filter.matches(key))
            .map(|(_, entry)| Arc::clone(entry))
            .collect();

        for entry in &matched {
            let event = entry.mark_invalidated();
            entry.bump();
            self.publish(event);
        }
        info!(matched = matched.len(), ?filter, "invalidate");
        matched.len()
    }

    /// Non-blocking read of `key`.
    ///
    /// Starts a fetch when the entry is empty or invalidated and returns
    /// [`Resolution::Suspended`] until it settles. Must be called from
    /// within a Tokio runtime.
    pub fn try_read<T>(&self, key: &QueryKey, fetch: &FetchFn<T>) -> Resolution<T>
    where
        T: Send + Sync + 'static,
    {
        let entry = match self.entry::<T>(key) {
            Ok(entry) => entry,
            Err(err) => return Resolution::Rejected(err),
        };
        match self.observe(&entry, fetch) {
            Observed::Ready(value) => Resolution::Resolved(value),
            Observed::Failed(err) => Resolution::Rejected(err),
            Observed::InFlight | Observed::Claimed { .. } => Resolution::Suspended,
        }
    }

    /// Read `key`, waiting for an outstanding or newly started fetch.
    ///
    /// Concurrent readers of the same key share one fetch.
    pub async fn read<T>(&self, key: &QueryKey, fetch: &FetchFn<T>) -> FetchResult<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let entry = self.entry::<T>(key)?;
        // Subscribe before inspecting so no transition is missed.
        let mut changes = entry.revision.subscribe();
        loop {
            match self.observe(&entry, fetch) {
                Observed::Ready(value) => return Ok(value),
                Observed::Failed(err) => return Err(err),
                Observed::InFlight | Observed::Claimed { .. } => {}
            }
            // The entry owns the sender, so the channel cannot close here.
            let _ = changes.changed().await;
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<QueryKey, Arc<dyn ErasedEntry>>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn entry<T>(&self, key: &QueryKey) -> FetchResult<Arc<Entry<T>>>
    where
        T: Send + Sync + 'static,
    {
        let erased = {
            let mut entries = self.entries();
            Arc::clone(entries.entry(key.clone()).or_insert_with(|| {
                let entry: Arc<dyn ErasedEntry> = Arc::new(Entry::<T>::new(key.clone()));
                entry
            }))
        };
        downcast(key, erased)
    }

    fn observe<T>(&self, entry: &Arc<Entry<T>>, fetch: &FetchFn<T>) -> Observed<T>
    where
        T: Send + Sync + 'static,
    {
        let online = self.is_online();
        let (observed, event) = {
            let mut state = entry.lock();
            let observed = state.observe_or_claim(online);
            let event = matches!(observed, Observed::Claimed { .. }).then(|| entry.event(&state));
            (observed, event)
        };

        if let (Observed::Claimed { generation, paused }, Some(event)) = (&observed, event) {
            entry.bump();
            self.publish(event);
            self.spawn_fetch(Arc::clone(entry), *generation, *paused, Arc::clone(fetch));
        }
        observed
    }

    fn spawn_fetch<T>(&self, entry: Arc<Entry<T>>, generation: u64, paused: bool, fetch: FetchFn<T>)
    where
        T: Send + Sync + 'static,
    {
        let store = self.clone();
        tokio::spawn(async move {
            if paused {
                debug!(query = %entry.key, generation, "fetch: paused");
                let mut online = store.inner.online.subscribe();
                // The store owns the sender and this task holds the store.
                let _ = online.wait_for(|online| *online).await;
                let event = {
                    let mut state = entry.lock();
                    state.resume(generation).then(|| entry.event(&state))
                };
                if let Some(event) = event {
                    entry.bump();
                    store.publish(event);
                }
            }

            debug!(query = %entry.key, generation, "fetch: start");
            // Covers fetchers that panic before returning their future.
            let result = std::panic::AssertUnwindSafe(async move { fetch().await })
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(FetchError::Panicked {
                        name: entry.key.name().to_string(),
                        message: panic_message(panic),
                    })
                });

            match &result {
                Ok(_) => debug!(query = %entry.key, generation, "fetch: ok"),
                Err(err) => warn!(query = %entry.key, generation, error = %err, "fetch: err"),
            }

            let event = {
                let mut state = entry.lock();
                state.settle(generation, result).then(|| entry.event(&state))
            };
            match event {
                Some(event) => {
                    entry.bump();
                    store.publish(event);
                }
                None => warn!(query = %entry.key, generation, "fetch: superseded, result dropped"),
            }
        });
    }

    fn publish(&self, event: QueryEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

fn downcast<T>(key: &QueryKey, entry: Arc<dyn ErasedEntry>) -> FetchResult<Arc<Entry<T>>>
where
    T: Send + Sync + 'static,
{
    entry
        .into_any()
        .downcast::<Entry<T>>()
        .map_err(|_| FetchError::TypeMismatch {
            name: key.name().to_string(),
        })
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(calls: Arc<AtomicUsize>, value: u32) -> FetchFn<u32> {
        Arc::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(value) }.boxed()
        })
    }

    #[tokio::test]
    async fn test_read_fetches_once_then_caches() {
        let store = QueryStore::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting(Arc::clone(&calls), 42);
        let key = QueryKey::named("catalogs");

        assert!(store.try_read(&key, &fetch).is_suspended());
        assert_eq!(*store.read(&key, &fetch).await.unwrap(), 42);
        assert_eq!(*store.read(&key, &fetch).await.unwrap(), 42);
        assert_eq!(store.try_read(&key, &fetch).value().map(|v| **v), Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_type_mismatch() {
        let store = QueryStore::default();
        let key = QueryKey::named("catalogs");
        store.set_data(&key, 1u32).unwrap();
        let err = store.get_state::<String>(&key).unwrap_err();
        assert!(matches!(err, FetchError::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_set_data_resolves_without_fetch() {
        let store = QueryStore::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting(Arc::clone(&calls), 1);
        let key = QueryKey::named("catalogs");
        store.set_data(&key, 9u32).unwrap();
        assert_eq!(*store.read(&key, &fetch).await.unwrap(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    async fn explode() -> FetchResult<u32> {
        panic!("exploded")
    }

    #[tokio::test]
    async fn test_panicking_fetch_rejects() {
        let store = QueryStore::default();
        let key = QueryKey::named("boom");
        let fetch: FetchFn<u32> = Arc::new(|| explode().boxed());
        let err = store.read(&key, &fetch).await.unwrap_err();
        match err {
            FetchError::Panicked { name, message } => {
                assert_eq!(name, "boom");
                assert_eq!(message, "exploded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fetcher_panicking_before_future_rejects() {
        let store = QueryStore::default();
        let key = QueryKey::named("boom");
        let fetch: FetchFn<u32> =
            Arc::new(|| -> BoxFuture<'static, FetchResult<u32>> { panic!("no future") });
        let err = tokio::time::timeout(std::time::Duration::from_secs(5), store.read(&key, &fetch))
            .await
            .expect("read settles")
            .unwrap_err();
        assert_eq!(
            err,
            FetchError::Panicked {
                name: "boom".to_string(),
                message: "no future".to_string(),
            }
        );
        let snapshot = store.status(&key);
        assert_eq!(snapshot.status, QueryStatus::Error);
        assert_eq!(snapshot.fetch_status, FetchStatus::Idle);
    }

    #[tokio::test]
    async fn test_status_defaults_for_unknown_key() {
        let store = QueryStore::default();
        let snapshot = store.status(&QueryKey::named("nothing"));
        assert_eq!(snapshot.status, QueryStatus::Pending);
        assert_eq!(snapshot.fetch_status, FetchStatus::Idle);
        assert!(store.is_empty());
    }
}
