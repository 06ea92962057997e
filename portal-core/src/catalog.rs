//! Catalog entities as returned by the portal backend.

use crate::field::FieldDescriptor;
use crate::schema::ExecutePayload;
use crate::wire::{null_as_default, null_as_empty_slice};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A group of runnable services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub slug: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub actions: Vec<Service>,
}

impl Catalog {
    pub fn service(&self, slug: &str) -> Option<&Service> {
        self.actions.iter().find(|service| service.slug == slug)
    }
}

/// A runnable action with its input fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub slug: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_color: Option<String>,
    /// Shared so that validators can be memoized on list identity.
    #[serde(default = "no_fields", deserialize_with = "null_as_empty_slice")]
    pub fields: Arc<[FieldDescriptor]>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub validate: Vec<Command>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub post_validate: Vec<Command>,
}

fn no_fields() -> Arc<[FieldDescriptor]> {
    Arc::from(Vec::new())
}

/// A validation command attached to a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(default, deserialize_with = "null_as_default")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_model: Option<String>,
}

/// List envelope used by every read endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultsResponse<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub results: Vec<T>,
}

/// Body of `POST {base}/{catalog}/actions/{service}/execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub payload: ExecutePayload,
}
