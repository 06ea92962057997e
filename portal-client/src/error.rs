//! Error types for the portal client.

use crate::api_client::ApiClientError;
use crate::config::ConfigError;
use portal_core::{PortalError, ValidationErrors};
use portal_query::FetchError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiClientError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Portal(#[from] PortalError),
    #[error("Failed to init subscriber: {0}")]
    Telemetry(String),
    #[error("Usage error: {0}")]
    Usage(String),
}

impl From<ValidationErrors> for ClientError {
    fn from(err: ValidationErrors) -> Self {
        Self::Portal(PortalError::Validation(err))
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
