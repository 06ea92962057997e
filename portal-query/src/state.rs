//! Per-key query state and the views readers get of it.
//!
//! A query entry tracks two independent axes, mirroring what a UI needs:
//! whether a value has been obtained ([`QueryStatus`]) and whether a network
//! fetch is currently in progress ([`FetchStatus`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::FetchError;

/// Whether a value has been obtained for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    /// No value yet for the current fetch generation.
    #[default]
    Pending,
    /// The latest fetch produced a value.
    Success,
    /// The latest fetch failed.
    Error,
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryStatus::Pending => "pending",
            QueryStatus::Success => "success",
            QueryStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Whether a network fetch is in progress for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    #[default]
    Idle,
    Fetching,
    /// A fetch was requested while the store is offline.
    Paused,
}

impl FetchStatus {
    /// Returns true while a fetch is outstanding (running or paused).
    pub fn is_in_flight(&self) -> bool {
        !matches!(self, FetchStatus::Idle)
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FetchStatus::Idle => "idle",
            FetchStatus::Fetching => "fetching",
            FetchStatus::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// Both status axes of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueryStatusSnapshot {
    pub status: QueryStatus,
    pub fetch_status: FetchStatus,
}

impl QueryStatusSnapshot {
    pub fn is_fetching(&self) -> bool {
        self.fetch_status.is_in_flight()
    }
}

/// Cache entry state for one query key.
///
/// `last_success` survives refetches and failures; it is what a
/// stale-while-revalidate view falls back to.
#[derive(Debug)]
pub struct QueryState<T> {
    status: QueryStatus,
    fetch_status: FetchStatus,
    data: Option<Arc<T>>,
    error: Option<FetchError>,
    last_success: Option<Arc<T>>,
    generation: u64,
    invalidated: bool,
    updated_at: Option<DateTime<Utc>>,
}

// Manual impl: cloning shares the Arc'd values, T need not be Clone.
impl<T> Clone for QueryState<T> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            fetch_status: self.fetch_status,
            data: self.data.clone(),
            error: self.error.clone(),
            last_success: self.last_success.clone(),
            generation: self.generation,
            invalidated: self.invalidated,
            updated_at: self.updated_at,
        }
    }
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            status: QueryStatus::Pending,
            fetch_status: FetchStatus::Idle,
            data: None,
            error: None,
            last_success: None,
            generation: 0,
            invalidated: false,
            updated_at: None,
        }
    }
}

/// What a reader should do after looking at an entry.
pub(crate) enum Observed<T> {
    Ready(Arc<T>),
    Failed(FetchError),
    InFlight,
    /// The reader claimed a new fetch generation and must run the fetch.
    Claimed { generation: u64, paused: bool },
}

impl<T> QueryState<T> {
    pub fn status(&self) -> QueryStatus {
        self.status
    }

    pub fn fetch_status(&self) -> FetchStatus {
        self.fetch_status
    }

    pub fn snapshot(&self) -> QueryStatusSnapshot {
        QueryStatusSnapshot {
            status: self.status,
            fetch_status: self.fetch_status,
        }
    }

    /// Value of the current generation, if it succeeded.
    pub fn data(&self) -> Option<&Arc<T>> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&FetchError> {
        self.error.as_ref()
    }

    /// Most recent successful value across all generations.
    pub fn last_success(&self) -> Option<&Arc<T>> {
        self.last_success.as_ref()
    }

    /// Number of fetches started for this key.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns true if the next read must refetch.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Current resolution as seen by a non-blocking reader.
    pub fn resolution(&self) -> Resolution<T> {
        match (&self.status, self.invalidated) {
            (QueryStatus::Success, false) => match &self.data {
                Some(value) => Resolution::Resolved(Arc::clone(value)),
                None => Resolution::Suspended,
            },
            (QueryStatus::Error, false) => match &self.error {
                Some(err) => Resolution::Rejected(err.clone()),
                None => Resolution::Suspended,
            },
            _ => Resolution::Suspended,
        }
    }

    /// Inspect the entry, claiming a fetch when one is needed.
    ///
    /// A settled, non-invalidated entry answers directly. An outstanding
    /// fetch is joined. Otherwise a new generation starts, so at most one
    /// fetch is ever in flight per key.
    pub(crate) fn observe_or_claim(&mut self, online: bool) -> Observed<T> {
        if self.fetch_status.is_in_flight() {
            return Observed::InFlight;
        }
        if !self.invalidated {
            match self.resolution() {
                Resolution::Resolved(value) => return Observed::Ready(value),
                Resolution::Rejected(err) => return Observed::Failed(err),
                Resolution::Suspended => {}
            }
        }
        self.generation += 1;
        self.status = QueryStatus::Pending;
        self.fetch_status = if online {
            FetchStatus::Fetching
        } else {
            FetchStatus::Paused
        };
        self.data = None;
        self.error = None;
        self.invalidated = false;
        Observed::Claimed {
            generation: self.generation,
            paused: !online,
        }
    }

    /// Move a paused fetch to fetching. Returns false if nothing changed.
    pub(crate) fn resume(&mut self, generation: u64) -> bool {
        if self.generation != generation || self.fetch_status != FetchStatus::Paused {
            return false;
        }
        self.fetch_status = FetchStatus::Fetching;
        true
    }

    /// Record the outcome of `generation`'s fetch.
    ///
    /// Returns false, leaving the state untouched, if the generation has
    /// been superseded.
    pub(crate) fn settle(&mut self, generation: u64, result: Result<T, FetchError>) -> bool {
        if self.generation != generation {
            return false;
        }
        match result {
            Ok(value) => {
                let value = Arc::new(value);
                self.status = QueryStatus::Success;
                self.last_success = Some(Arc::clone(&value));
                self.data = Some(value);
                self.error = None;
            }
            Err(err) => {
                self.status = QueryStatus::Error;
                self.data = None;
                self.error = Some(err);
            }
        }
        self.fetch_status = FetchStatus::Idle;
        self.updated_at = Some(Utc::now());
        true
    }

    /// Write a value directly, as if a fetch had just succeeded.
    pub(crate) fn seed(&mut self, value: T) {
        let value = Arc::new(value);
        self.status = QueryStatus::Success;
        self.last_success = Some(Arc::clone(&value));
        self.data = Some(value);
        self.error = None;
        self.invalidated = false;
        self.updated_at = Some(Utc::now());
    }

    /// Mark the entry so the next read refetches.
    pub(crate) fn invalidate(&mut self) {
        self.invalidated = true;
    }
}

/// Non-blocking view of a query read.
#[derive(Debug)]
pub enum Resolution<T> {
    Resolved(Arc<T>),
    Rejected(FetchError),
    /// No value is available yet; a fetch is outstanding or about to start.
    Suspended,
}

impl<T> Clone for Resolution<T> {
    fn clone(&self) -> Self {
        match self {
            Resolution::Resolved(value) => Resolution::Resolved(Arc::clone(value)),
            Resolution::Rejected(err) => Resolution::Rejected(err.clone()),
            Resolution::Suspended => Resolution::Suspended,
        }
    }
}

impl<T> Resolution<T> {
    pub fn is_suspended(&self) -> bool {
        matches!(self, Resolution::Suspended)
    }

    pub fn value(&self) -> Option<&Arc<T>> {
        match self {
            Resolution::Resolved(value) => Some(value),
            _ => None,
        }
    }

    /// `None` while suspended.
    pub fn into_result(self) -> Option<Result<Arc<T>, FetchError>> {
        match self {
            Resolution::Resolved(value) => Some(Ok(value)),
            Resolution::Rejected(err) => Some(Err(err)),
            Resolution::Suspended => None,
        }
    }
}
