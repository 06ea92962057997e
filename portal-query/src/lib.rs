//! Portal Query - Keyed Async Query Cache
//!
//! Reactive data loading for the portal: queries are keyed by a resource
//! name plus params derived from application state, fetched at most once
//! per key until invalidated, and observable through a data handle, a
//! status handle and a stale-while-revalidate view.
//!
//! # Example
//!
//! ```no_run
//! use portal_query::{QueryClient, QueryStore, SwrView};
//! use tokio::sync::watch;
//!
//! # async fn demo() -> portal_query::FetchResult<()> {
//! let (_selection, app) = watch::channel(Some("infra".to_string()));
//! let client = QueryClient::new(QueryStore::default(), app);
//! let (runs, status) = client.create_query(
//!     "catalogs-{catalog}-runs",
//!     |catalog: &Option<String>| catalog.clone(),
//!     |catalog: Option<String>| async move { Ok(vec![catalog]) },
//! );
//! let view = SwrView::new(runs);
//! let rows = view.read().await?;
//! println!("{} rows, {}", rows.len(), status.fetch_status());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod key;
pub mod state;
pub mod store;
pub mod swr;

pub use client::{QueryClient, QueryHandle, StatusHandle};
pub use error::{FetchError, FetchResult};
pub use key::{QueryFilter, QueryKey};
pub use state::{FetchStatus, QueryState, QueryStatus, QueryStatusSnapshot, Resolution};
pub use store::{FetchFn, QueryEvent, QueryStore, StoreConfig};
pub use swr::SwrView;
