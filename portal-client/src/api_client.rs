//! REST client for the self-service backend.

use crate::config::{AuthConfig, PortalConfig};
use async_trait::async_trait;
use portal_core::{Catalog, ExecutePayload, ExecuteRequest, ResultsResponse, ServiceRun};
use portal_query::FetchError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Config error: {0}")]
    Config(String),
}

impl From<ApiClientError> for FetchError {
    fn from(err: ApiClientError) -> Self {
        match err {
            ApiClientError::Http(e) if e.is_decode() => FetchError::decode(e.to_string()),
            ApiClientError::Http(e) => FetchError::transport(e.to_string()),
            ApiClientError::Serde(e) => FetchError::decode(e.to_string()),
            ApiClientError::Status { status, message } => FetchError::Status { status, message },
            ApiClientError::Config(message) => FetchError::Transport { message },
        }
    }
}

/// Backend operations the portal resources depend on.
#[async_trait]
pub trait PortalApi: Send + Sync + 'static {
    async fn list_catalogs(&self) -> Result<Vec<Catalog>, ApiClientError>;

    async fn list_runs(&self) -> Result<Vec<ServiceRun>, ApiClientError>;

    async fn list_catalog_runs(&self, catalog: &str) -> Result<Vec<ServiceRun>, ApiClientError>;

    async fn execute_service(
        &self,
        catalog: &str,
        service: &str,
        payload: &ExecutePayload,
    ) -> Result<serde_json::Value, ApiClientError>;
}

#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: Url,
    auth_header: HeaderMap,
}

impl RestClient {
    pub fn new(config: &PortalConfig) -> Result<Self, ApiClientError> {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        let auth_header = match &config.auth {
            Some(auth) => build_auth_headers(auth)?,
            None => HeaderMap::new(),
        };
        let raw = service_base_url(&config.api_base_url, &config.self_service_path);
        let base_url = Url::parse(&raw).map_err(|e| ApiClientError::Config(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiClientError::Config(format!(
                "api_base_url cannot carry a path: {raw}"
            )));
        }
        Ok(Self {
            client,
            base_url,
            auth_header,
        })
    }

    /// Root of the self-service API, without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    pub fn catalogs_url(&self) -> Url {
        self.endpoint(&[])
    }

    pub fn runs_url(&self) -> Url {
        self.endpoint(&["runs"])
    }

    pub fn catalog_runs_url(&self, catalog: &str) -> Url {
        self.endpoint(&[catalog, "runs"])
    }

    pub fn execute_url(&self, catalog: &str, service: &str) -> Url {
        self.endpoint(&[catalog, "actions", service, "execute"])
    }

    /// Base URL with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // `new` rejects bases that cannot carry path segments.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T>(&self, url: Url) -> Result<T, ApiClientError>
    where
        T: serde::de::DeserializeOwned,
    {
        debug!(%url, "GET");
        let response = self
            .client
            .get(url)
            .headers(self.auth_header.clone())
            .send()
            .await?;
        self.parse_response(response).await
    }

    async fn post_json<B>(&self, url: Url, body: &B) -> Result<serde_json::Value, ApiClientError>
    where
        B: serde::Serialize + ?Sized,
    {
        debug!(%url, "POST");
        let response = self
            .client
            .post(url)
            .headers(self.auth_header.clone())
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), &text));
        }
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ApiClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let text = response.text().await?;
            Err(status_error(status.as_u16(), &text))
        }
    }
}

#[async_trait]
impl PortalApi for RestClient {
    async fn list_catalogs(&self) -> Result<Vec<Catalog>, ApiClientError> {
        let body: ResultsResponse<Catalog> = self.get_json(self.catalogs_url()).await?;
        Ok(body.results)
    }

    async fn list_runs(&self) -> Result<Vec<ServiceRun>, ApiClientError> {
        let body: ResultsResponse<ServiceRun> = self.get_json(self.runs_url()).await?;
        Ok(body.results)
    }

    async fn list_catalog_runs(&self, catalog: &str) -> Result<Vec<ServiceRun>, ApiClientError> {
        let body: ResultsResponse<ServiceRun> =
            self.get_json(self.catalog_runs_url(catalog)).await?;
        Ok(body.results)
    }

    async fn execute_service(
        &self,
        catalog: &str,
        service: &str,
        payload: &ExecutePayload,
    ) -> Result<serde_json::Value, ApiClientError> {
        let body = ExecuteRequest {
            payload: payload.clone(),
        };
        self.post_json(self.execute_url(catalog, service), &body)
            .await
    }
}

/// Join the API base URL and the self-service mount path.
pub fn service_base_url(api_base_url: &str, self_service_path: &str) -> String {
    format!(
        "{}/{}",
        api_base_url.trim().trim_end_matches('/'),
        self_service_path.trim_matches('/')
    )
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    detail: Option<serde_json::Value>,
}

fn status_error(status: u16, text: &str) -> ApiClientError {
    let message = serde_json::from_str::<ErrorBody>(text)
        .ok()
        .and_then(|body| {
            body.message.or_else(|| {
                body.detail.map(|detail| match detail {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
            })
        })
        .unwrap_or_else(|| text.to_string());
    ApiClientError::Status { status, message }
}

fn build_auth_headers(auth: &AuthConfig) -> Result<HeaderMap, ApiClientError> {
    let mut headers = HeaderMap::new();
    if let Some(api_key) = &auth.api_key {
        headers.insert(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_str(api_key).map_err(|e| ApiClientError::Config(e.to_string()))?,
        );
    }
    if let Some(jwt) = &auth.jwt {
        let value = format!("Bearer {}", jwt);
        headers.insert(
            HeaderName::from_static("authorization"),
            HeaderValue::from_str(&value).map_err(|e| ApiClientError::Config(e.to_string()))?,
        );
    }
    Ok(headers)
}
