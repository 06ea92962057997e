//! Stale-while-revalidate view over a data handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::client::QueryHandle;
use crate::error::FetchResult;
use crate::state::Resolution;

/// Serves the last good value while the underlying handle is suspended.
///
/// When the selection moves to a key that has not resolved yet, readers keep
/// seeing the value from the previous key instead of blocking. Errors are
/// never masked.
pub struct SwrView<S, P, T> {
    handle: QueryHandle<S, P, T>,
    last: Mutex<Option<Arc<T>>>,
    revalidating: AtomicBool,
}

impl<S, P, T> SwrView<S, P, T>
where
    S: Send + Sync + 'static,
    P: Serialize + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub fn new(handle: QueryHandle<S, P, T>) -> Self {
        Self {
            handle,
            last: Mutex::new(None),
            revalidating: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> &QueryHandle<S, P, T> {
        &self.handle
    }

    /// Current value, or the previous one while the current key is pending.
    ///
    /// Suspends only when no value has ever been produced.
    pub fn try_read(&self) -> Resolution<T> {
        match self.handle.try_read() {
            Resolution::Resolved(value) => {
                self.remember(&value);
                self.revalidating.store(false, Ordering::Release);
                Resolution::Resolved(value)
            }
            Resolution::Rejected(err) => {
                self.revalidating.store(false, Ordering::Release);
                Resolution::Rejected(err)
            }
            Resolution::Suspended => match self.fallback() {
                Some(previous) => {
                    self.revalidating.store(true, Ordering::Release);
                    Resolution::Resolved(previous)
                }
                None => Resolution::Suspended,
            },
        }
    }

    /// Like [`try_read`](Self::try_read), waiting only when there is
    /// nothing to fall back to.
    pub async fn read(&self) -> FetchResult<Arc<T>> {
        match self.try_read() {
            Resolution::Resolved(value) => Ok(value),
            Resolution::Rejected(err) => Err(err),
            Resolution::Suspended => {
                let value = self.handle.read().await?;
                self.remember(&value);
                Ok(value)
            }
        }
    }

    /// Returns true if the last read served a stale value.
    pub fn is_revalidating(&self) -> bool {
        self.revalidating.load(Ordering::Acquire)
    }

    /// The value this view would fall back to.
    pub fn last_value(&self) -> Option<Arc<T>> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn fallback(&self) -> Option<Arc<T>> {
        self.last_value().or_else(|| self.handle.last_success())
    }

    fn remember(&self, value: &Arc<T>) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(value));
    }
}
