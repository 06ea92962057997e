//! Portal CLI entry point.

use std::sync::Arc;

use portal_client::cli::{parse_args, run_command};
use portal_client::config::PortalConfig;
use portal_client::error::ClientError;
use portal_client::resources::PortalResources;
use portal_client::selection::SelectionState;
use portal_client::telemetry::init_tracing;
use portal_client::RestClient;
use portal_query::{QueryStore, StoreConfig};

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    let command = parse_args(std::env::args().skip(1))?;
    let config = PortalConfig::load()?;
    init_tracing(config.logging.as_ref())?;

    let api = RestClient::new(&config)?;
    tracing::debug!(base_url = api.base_url(), "API client ready");
    let store = QueryStore::new(StoreConfig::new().with_event_capacity(config.query.event_capacity));
    let resources = PortalResources::new(Arc::new(api), store, SelectionState::default());

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run_command(command, &resources, &mut out).await
}
