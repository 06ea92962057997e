//! Query definitions bound to application state.
//!
//! [`QueryClient::create_query`] turns a resource name, a params projection
//! and a fetcher into a pair of handles. The data handle derives its key
//! from the current application state on every read, so changing the
//! selection moves reads to a different cache entry without touching the
//! previous one.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::watch;

use crate::error::FetchResult;
use crate::key::{QueryFilter, QueryKey};
use crate::state::{FetchStatus, QueryState, QueryStatusSnapshot, Resolution};
use crate::store::{FetchFn, QueryStore};

type ParamsFn<S, P> = dyn Fn(&S) -> P + Send + Sync;
type FetcherFn<P, T> = dyn Fn(P) -> BoxFuture<'static, FetchResult<T>> + Send + Sync;

/// Entry point for defining queries over application state `S`.
pub struct QueryClient<S> {
    store: QueryStore,
    app: watch::Receiver<S>,
}

impl<S> Clone for QueryClient<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            app: self.app.clone(),
        }
    }
}

impl<S> QueryClient<S>
where
    S: Send + Sync + 'static,
{
    pub fn new(store: QueryStore, app: watch::Receiver<S>) -> Self {
        Self { store, app }
    }

    pub fn store(&self) -> &QueryStore {
        &self.store
    }

    /// Define a query named `name`.
    ///
    /// `params_of` projects the application state onto the query params;
    /// the cache key is `(name, params)`. `fetcher` is called with the
    /// params whenever an entry needs a value.
    pub fn create_query<P, T, PF, F, Fut>(
        &self,
        name: impl Into<Arc<str>>,
        params_of: PF,
        fetcher: F,
    ) -> (QueryHandle<S, P, T>, StatusHandle<S, P, T>)
    where
        P: Serialize + Clone + Send + Sync + 'static,
        T: Send + Sync + 'static,
        PF: Fn(&S) -> P + Send + Sync + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult<T>> + Send + 'static,
    {
        let def = Arc::new(QueryDef {
            name: name.into(),
            params_of: Box::new(params_of),
            fetcher: Arc::new(move |params| fetcher(params).boxed()),
        });
        let handle = QueryHandle {
            def,
            store: self.store.clone(),
            app: self.app.clone(),
        };
        let status = StatusHandle {
            query: handle.clone(),
        };
        (handle, status)
    }

    /// Mark every matching entry stale.
    pub fn invalidate(&self, filter: &QueryFilter) -> usize {
        self.store.invalidate(filter)
    }

    pub fn set_online(&self, online: bool) {
        self.store.set_online(online);
    }
}

struct QueryDef<S, P, T> {
    name: Arc<str>,
    params_of: Box<ParamsFn<S, P>>,
    fetcher: Arc<FetcherFn<P, T>>,
}

/// Data handle of a query.
///
/// Reads resolve against the key derived from the application state at the
/// time of the read.
pub struct QueryHandle<S, P, T> {
    def: Arc<QueryDef<S, P, T>>,
    store: QueryStore,
    app: watch::Receiver<S>,
}

impl<S, P, T> Clone for QueryHandle<S, P, T> {
    fn clone(&self) -> Self {
        Self {
            def: Arc::clone(&self.def),
            store: self.store.clone(),
            app: self.app.clone(),
        }
    }
}

impl<S, P, T> QueryHandle<S, P, T>
where
    S: Send + Sync + 'static,
    P: Serialize + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn store(&self) -> &QueryStore {
        &self.store
    }

    /// Params for the current application state.
    pub fn params(&self) -> P {
        (self.def.params_of)(&self.app.borrow())
    }

    /// Key for the current application state.
    pub fn key(&self) -> FetchResult<QueryKey> {
        QueryKey::new(Arc::clone(&self.def.name), &self.params())
    }

    /// Non-blocking read. Starts a fetch if the current key needs one.
    pub fn try_read(&self) -> Resolution<T> {
        match self.bind() {
            Ok((key, fetch)) => self.store.try_read(&key, &fetch),
            Err(err) => Resolution::Rejected(err),
        }
    }

    /// Read the current key, waiting for its first resolution.
    ///
    /// The key is fixed when the read starts; a selection change while
    /// waiting does not redirect this read.
    pub async fn read(&self) -> FetchResult<Arc<T>> {
        let (key, fetch) = self.bind()?;
        self.store.read(&key, &fetch).await
    }

    /// State of the current key, if it has an entry.
    pub fn state(&self) -> FetchResult<Option<QueryState<T>>> {
        let key = self.key()?;
        self.store.get_state(&key)
    }

    /// Most recent successful value for the current key.
    pub fn last_success(&self) -> Option<Arc<T>> {
        self.state()
            .ok()
            .flatten()
            .and_then(|state| state.last_success().cloned())
    }

    /// Invalidate every entry of this query, whatever its params.
    pub fn invalidate(&self) -> usize {
        self.store.invalidate(&QueryFilter::name(self.name()))
    }

    fn bind(&self) -> FetchResult<(QueryKey, FetchFn<T>)> {
        let params = self.params();
        let key = QueryKey::new(Arc::clone(&self.def.name), &params)?;
        let fetcher = Arc::clone(&self.def.fetcher);
        let fetch: FetchFn<T> = Arc::new(move || fetcher(params.clone()));
        Ok((key, fetch))
    }
}

/// Status handle of a query: fetch progress for the current key.
///
/// Reading status never starts a fetch.
pub struct StatusHandle<S, P, T> {
    query: QueryHandle<S, P, T>,
}

impl<S, P, T> Clone for StatusHandle<S, P, T> {
    fn clone(&self) -> Self {
        Self {
            query: self.query.clone(),
        }
    }
}

impl<S, P, T> StatusHandle<S, P, T>
where
    S: Send + Sync + 'static,
    P: Serialize + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// Fetch status of the current key; idle when it has no entry.
    pub fn fetch_status(&self) -> FetchStatus {
        self.snapshot().fetch_status
    }

    pub fn snapshot(&self) -> QueryStatusSnapshot {
        match self.query.key() {
            Ok(key) => self.query.store.status(&key),
            Err(_) => QueryStatusSnapshot::default(),
        }
    }
}
