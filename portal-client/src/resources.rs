//! Portal resources: the catalog and run queries, derived views and the
//! service execution mutation.

use std::sync::{Arc, Mutex, PoisonError};

use portal_core::{
    filtered_catalogs, selected_service, Catalog, PortalError, RunSummary, SchemaMemo, Service,
    ServiceRun, Validator,
};
use portal_query::{
    FetchError, FetchResult, QueryClient, QueryFilter, QueryStore, Resolution, StatusHandle,
    SwrView,
};
use serde_json::{Map, Value};
use tracing::info;

use crate::api_client::PortalApi;
use crate::error::ClientResult;
use crate::selection::{Selection, SelectionState};

pub const CATALOGS: &str = "catalogs";
pub const CATALOGS_RUNS: &str = "catalogs-runs";
pub const CATALOG_RUNS: &str = "catalogs-{catalog}-runs";

pub type Catalogs = Vec<Catalog>;
pub type Runs = Vec<ServiceRun>;

/// The portal's queries over one store and one selection.
pub struct PortalResources {
    api: Arc<dyn PortalApi>,
    client: QueryClient<Selection>,
    selection: SelectionState,
    catalogs: SwrView<Selection, (), Catalogs>,
    catalogs_status: StatusHandle<Selection, (), Catalogs>,
    runs: SwrView<Selection, (), Runs>,
    runs_status: StatusHandle<Selection, (), Runs>,
    catalog_runs: SwrView<Selection, Option<String>, Runs>,
    catalog_runs_status: StatusHandle<Selection, Option<String>, Runs>,
    schemas: Mutex<SchemaMemo>,
}

impl PortalResources {
    pub fn new(api: Arc<dyn PortalApi>, store: QueryStore, selection: SelectionState) -> Self {
        let client = QueryClient::new(store, selection.subscribe());

        let catalogs_api = Arc::clone(&api);
        let (catalogs, catalogs_status) =
            client.create_query(CATALOGS, |_: &Selection| (), move |_: ()| {
                let api = Arc::clone(&catalogs_api);
                async move { api.list_catalogs().await.map_err(FetchError::from) }
            });

        let runs_api = Arc::clone(&api);
        let (runs, runs_status) =
            client.create_query(CATALOGS_RUNS, |_: &Selection| (), move |_: ()| {
                let api = Arc::clone(&runs_api);
                async move { api.list_runs().await.map_err(FetchError::from) }
            });

        let catalog_runs_api = Arc::clone(&api);
        let (catalog_runs, catalog_runs_status) = client.create_query(
            CATALOG_RUNS,
            |selection: &Selection| selection.catalog.clone(),
            move |catalog: Option<String>| {
                let api = Arc::clone(&catalog_runs_api);
                async move {
                    match catalog {
                        Some(catalog) => api
                            .list_catalog_runs(&catalog)
                            .await
                            .map_err(FetchError::from),
                        None => Ok(Vec::new()),
                    }
                }
            },
        );

        Self {
            api,
            client,
            selection,
            catalogs: SwrView::new(catalogs),
            catalogs_status,
            runs: SwrView::new(runs),
            runs_status,
            catalog_runs: SwrView::new(catalog_runs),
            catalog_runs_status,
            schemas: Mutex::new(SchemaMemo::new()),
        }
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn store(&self) -> &QueryStore {
        self.client.store()
    }

    pub fn catalogs(&self) -> &SwrView<Selection, (), Catalogs> {
        &self.catalogs
    }

    pub fn catalogs_status(&self) -> &StatusHandle<Selection, (), Catalogs> {
        &self.catalogs_status
    }

    pub fn runs(&self) -> &SwrView<Selection, (), Runs> {
        &self.runs
    }

    pub fn runs_status(&self) -> &StatusHandle<Selection, (), Runs> {
        &self.runs_status
    }

    pub fn catalog_runs(&self) -> &SwrView<Selection, Option<String>, Runs> {
        &self.catalog_runs
    }

    pub fn catalog_runs_status(&self) -> &StatusHandle<Selection, Option<String>, Runs> {
        &self.catalog_runs_status
    }

    /// Catalogs with actions narrowed to the current search text.
    pub async fn filtered_catalogs(&self) -> FetchResult<Catalogs> {
        let catalogs = self.catalogs.read().await?;
        Ok(filtered_catalogs(&catalogs, &self.selection.current().search))
    }

    /// The selected service, once the catalog list has loaded.
    pub fn selected_service(&self) -> Option<Service> {
        let Resolution::Resolved(catalogs) = self.catalogs.try_read() else {
            return None;
        };
        let selection = self.selection.current();
        selected_service(
            &catalogs,
            selection.catalog.as_deref(),
            selection.service.as_deref(),
        )
        .cloned()
    }

    /// Validator for `service`, rebuilt only when its field list changes.
    pub fn validator_for(&self, service: &Service) -> Arc<Validator> {
        self.schemas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .validator_for(&service.fields)
    }

    /// Run history for the selected catalog, or for all catalogs.
    pub async fn run_summaries(&self) -> FetchResult<Vec<RunSummary>> {
        let runs = match self.selection.current().catalog {
            Some(_) => self.catalog_runs.read().await?,
            None => self.runs.read().await?,
        };
        Ok(runs.iter().map(RunSummary::from_run).collect())
    }

    /// Validate `form` and execute the selected service.
    pub async fn execute_selected(&self, form: &Map<String, Value>) -> ClientResult<Value> {
        let selection = self.selection.current();
        let catalog = selection
            .catalog
            .ok_or(PortalError::NothingSelected { what: "catalog" })?;
        if selection.service.is_none() {
            return Err(PortalError::NothingSelected { what: "service" }.into());
        }
        let catalogs = self.catalogs.read().await?;
        let service = selected_service(&catalogs, Some(&catalog), selection.service.as_deref())
            .cloned()
            .ok_or_else(|| PortalError::ServiceNotFound {
                catalog: catalog.clone(),
                service: selection.service.clone().unwrap_or_default(),
            })?;
        self.execute_service(&catalog, &service, form).await
    }

    /// Validate `form` against `service` and POST it.
    ///
    /// On success every cached run list is invalidated.
    pub async fn execute_service(
        &self,
        catalog: &str,
        service: &Service,
        form: &Map<String, Value>,
    ) -> ClientResult<Value> {
        let validator = self.validator_for(service);
        let payload = validator.validate(form)?;
        let response = self
            .api
            .execute_service(catalog, &service.slug, &payload)
            .await?;

        let invalidated = self.client.invalidate(&QueryFilter::name(CATALOGS_RUNS))
            + self.client.invalidate(&QueryFilter::name(CATALOG_RUNS));
        info!(
            catalog,
            service = %service.slug,
            fields = payload.len(),
            invalidated,
            "service executed"
        );
        Ok(response)
    }
}
