//! Portal client library exports.

pub mod api_client;
pub mod cli;
pub mod config;
pub mod error;
pub mod resources;
pub mod selection;
pub mod telemetry;

pub use api_client::{ApiClientError, PortalApi, RestClient};
pub use cli::{parse_args, run_command, Command};
pub use config::{ConfigError, PortalConfig};
pub use error::{ClientError, ClientResult};
pub use resources::PortalResources;
pub use selection::{Selection, SelectionState};
