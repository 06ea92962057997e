//! Portal Core - Catalog Types and Field Schemas
//!
//! Data structures fetched from the self-service backend, plus the pure
//! derivations built on them: field schema synthesis, widget dispatch,
//! catalog filtering and run summaries.

pub mod catalog;
pub mod error;
pub mod field;
pub mod filter;
pub mod run;
pub mod schema;
mod wire;

pub use catalog::{Catalog, Command, ExecuteRequest, ResultsResponse, Service};
pub use error::{
    PortalError, PortalResult, UnsupportedFieldType, ValidationError, ValidationErrors,
};
pub use field::{initial_values, FieldDescriptor, FieldType, Widget};
pub use filter::{filtered_catalogs, selected_service};
pub use run::{format_duration_ms, PostValidateOutput, RunStatus, RunSummary, RunTask, ServiceRun};
pub use schema::{
    synthesize, ExecutePayload, FieldRule, PayloadValue, RuleKind, SchemaMemo, Validator,
};
