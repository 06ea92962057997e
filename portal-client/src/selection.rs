//! Application selection state the portal queries are derived from.

use std::sync::Arc;
use tokio::sync::watch;

/// What the user has selected and typed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub catalog: Option<String>,
    pub service: Option<String>,
    pub search: String,
}

/// Shared, observable [`Selection`].
///
/// Every setter notifies subscribers only when the value actually changes.
#[derive(Clone)]
pub struct SelectionState {
    tx: Arc<watch::Sender<Selection>>,
}

impl Default for SelectionState {
    fn default() -> Self {
        Self::new(Selection::default())
    }
}

impl SelectionState {
    pub fn new(initial: Selection) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<Selection> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Selection {
        self.tx.borrow().clone()
    }

    /// Select a catalog. Switching to a different catalog clears the
    /// selected service.
    pub fn select_catalog(&self, catalog: Option<&str>) {
        self.tx.send_if_modified(|selection| {
            if selection.catalog.as_deref() == catalog {
                return false;
            }
            selection.catalog = catalog.map(str::to_string);
            selection.service = None;
            true
        });
    }

    pub fn select_service(&self, catalog: &str, service: &str) {
        self.tx.send_if_modified(|selection| {
            let changed = selection.catalog.as_deref() != Some(catalog)
                || selection.service.as_deref() != Some(service);
            selection.catalog = Some(catalog.to_string());
            selection.service = Some(service.to_string());
            changed
        });
    }

    pub fn set_search(&self, search: &str) {
        self.tx.send_if_modified(|selection| {
            if selection.search == search {
                return false;
            }
            selection.search = search.to_string();
            true
        });
    }
}
