//! Error types for portal operations

use crate::schema::RuleKind;
use thiserror::Error;

/// A single field value failing its synthesized rule.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: expected {expected}, got {value}")]
    TypeMismatch {
        field: String,
        expected: RuleKind,
        value: String,
    },
}

impl ValidationError {
    /// Slug of the field this error belongs to.
    pub fn field(&self) -> &str {
        match self {
            Self::RequiredFieldMissing { field } | Self::TypeMismatch { field, .. } => field,
        }
    }
}

/// Every failing field of one validation pass, in descriptor order.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{} field(s) failed validation", .errors.len())]
pub struct ValidationErrors {
    pub errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn new(errors: Vec<ValidationError>) -> Self {
        Self { errors }
    }

    /// Errors reported for one field slug.
    pub fn for_field<'a>(&'a self, slug: &'a str) -> impl Iterator<Item = &'a ValidationError> + 'a {
        self.errors.iter().filter(move |err| err.field() == slug)
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A descriptor whose type tag has no known rule or widget.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported field type: {type_name}")]
pub struct UnsupportedFieldType {
    pub slug: String,
    pub type_name: String,
}

/// Master error type for portal domain operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortalError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Catalog not found: {slug}")]
    CatalogNotFound { slug: String },

    #[error("Service {service} not found in catalog {catalog}")]
    ServiceNotFound { catalog: String, service: String },

    #[error("No {what} selected")]
    NothingSelected { what: &'static str },
}

/// Result type alias for portal domain operations.
pub type PortalResult<T> = Result<T, PortalError>;
