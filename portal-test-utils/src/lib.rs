//! Portal Test Utilities
//!
//! Shared test infrastructure for the portal workspace:
//! - A scripted fetcher with per-params gates and call counting
//! - Proptest generators for catalog and run types
//! - Fixtures for the sample catalogs used across test suites
//! - Assertions over query resolutions

pub use portal_core::{
    Catalog, FieldDescriptor, FieldType, PayloadValue, RunStatus, RunTask, Service, ServiceRun,
};
pub use portal_query::{FetchError, FetchResult, Resolution};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;

// ============================================================================
// SCRIPTED FETCHER
// ============================================================================

/// Fetcher double keyed by a string rendering of the params.
///
/// Responses are scripted per params. A gated params value blocks every
/// fetch for it until [`release`](Self::release) is called, which lets
/// tests hold a fetch in flight.
pub struct ScriptedFetcher<T> {
    responses: Mutex<HashMap<String, FetchResult<T>>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    calls: Mutex<Vec<String>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> ScriptedFetcher<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Script the result returned for `params`.
    pub fn respond(&self, params: &str, result: FetchResult<T>) {
        locked(&self.responses).insert(params.to_string(), result);
    }

    /// Hold fetches for `params` until released.
    pub fn gate(&self, params: &str) {
        locked(&self.gates).insert(params.to_string(), Arc::new(Semaphore::new(0)));
    }

    /// Let every current and future fetch for `params` complete.
    pub fn release(&self, params: &str) {
        if let Some(gate) = locked(&self.gates).remove(params) {
            gate.close();
        }
    }

    /// Total number of fetcher invocations.
    pub fn calls(&self) -> usize {
        locked(&self.calls).len()
    }

    /// Number of fetcher invocations for `params`.
    pub fn calls_for(&self, params: &str) -> usize {
        locked(&self.calls).iter().filter(|p| p.as_str() == params).count()
    }

    /// Start a fetch for `params`.
    pub fn fetch(self: &Arc<Self>, params: impl Into<String>) -> BoxFuture<'static, FetchResult<T>> {
        let params = params.into();
        locked(&self.calls).push(params.clone());
        let gate = locked(&self.gates).get(&params).cloned();
        let this = Arc::clone(self);
        async move {
            if let Some(gate) = gate {
                // Closing the semaphore wakes every waiter with an error.
                let _ = gate.acquire().await;
            }
            let scripted = locked(&this.responses).get(&params).cloned();
            scripted.unwrap_or_else(|| Err(FetchError::status(404, format!("no response for {params}"))))
        }
        .boxed()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for portal types.

    use super::*;
    use proptest::prelude::*;
    use serde_json::{Map, Value};

    /// Generate a slug (lowercase, dash-separated).
    pub fn arb_slug() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9]{0,8}(-[a-z0-9]{1,6}){0,2}"
    }

    /// Generate a FieldType, including unsupported names.
    pub fn arb_field_type() -> impl Strategy<Value = FieldType> {
        prop_oneof![
            Just(FieldType::Text),
            Just(FieldType::Number),
            Just(FieldType::Textarea),
            Just(FieldType::Boolean),
            prop::sample::select(vec!["date", "select", "file", "json"])
                .prop_map(|name| FieldType::Unsupported(name.to_string())),
        ]
    }

    /// Generate a FieldDescriptor.
    pub fn arb_field_descriptor() -> impl Strategy<Value = FieldDescriptor> {
        (
            arb_slug(),
            arb_field_type(),
            any::<bool>(),
            proptest::option::of("[A-Za-z ]{1,20}"),
            proptest::option::of(prop_oneof![
                Just("true".to_string()),
                Just("false".to_string()),
                "[a-z0-9]{0,8}",
            ]),
        )
            .prop_map(|(slug, field_type, required, title, default)| {
                let mut field = FieldDescriptor::new(slug, field_type);
                field.required = required;
                field.title = title;
                field.default = default;
                field
            })
    }

    /// Generate a list of descriptors with distinct slugs.
    pub fn arb_field_list() -> impl Strategy<Value = Vec<FieldDescriptor>> {
        prop::collection::vec(arb_field_descriptor(), 0..8).prop_map(|fields| {
            let mut seen = std::collections::HashSet::new();
            fields
                .into_iter()
                .filter(|field| seen.insert(field.slug.clone()))
                .collect()
        })
    }

    /// Generate a form value a user could have typed for `field_type`.
    pub fn arb_form_value(field_type: FieldType) -> BoxedStrategy<Value> {
        match field_type {
            FieldType::Boolean => any::<bool>().prop_map(Value::Bool).boxed(),
            FieldType::Number => prop_oneof![
                any::<i32>().prop_map(Value::from),
                any::<i32>().prop_map(|n| Value::String(n.to_string())),
            ]
            .boxed(),
            _ => "[a-zA-Z0-9 ]{1,16}".prop_map(Value::String).boxed(),
        }
    }

    /// Generate descriptors plus a form that satisfies every rule.
    pub fn arb_valid_form() -> impl Strategy<Value = (Vec<FieldDescriptor>, Map<String, Value>)> {
        arb_field_list().prop_flat_map(|fields| {
            let values: Vec<_> = fields
                .iter()
                .map(|field| arb_form_value(field.field_type.clone()))
                .collect();
            (Just(fields), values).prop_map(|(fields, values)| {
                let form = fields
                    .iter()
                    .zip(values)
                    .map(|(field, value)| (field.slug.clone(), value))
                    .collect();
                (fields, form)
            })
        })
    }

    /// Generate a Service with a few fields.
    pub fn arb_service() -> impl Strategy<Value = Service> {
        (arb_slug(), "[A-Z][a-z]{2,10}( [a-z]{2,8})?", arb_field_list()).prop_map(
            |(slug, name, fields)| Service {
                slug,
                name,
                description: String::new(),
                icon: None,
                icon_color: None,
                fields: fields.into(),
                validate: Vec::new(),
                post_validate: Vec::new(),
            },
        )
    }

    /// Generate a Catalog with up to four services.
    pub fn arb_catalog() -> impl Strategy<Value = Catalog> {
        (
            arb_slug(),
            "[A-Z][a-z]{2,10}",
            prop::collection::vec(arb_service(), 0..4),
        )
            .prop_map(|(slug, name, actions)| Catalog {
                slug,
                name,
                description: String::new(),
                actions,
            })
    }

    /// Generate a RunStatus variant.
    pub fn arb_run_status() -> impl Strategy<Value = RunStatus> {
        prop_oneof![
            Just(RunStatus::Queued),
            Just(RunStatus::Running),
            Just(RunStatus::Success),
            Just(RunStatus::Failure),
        ]
    }

    /// Generate a RunTask with an optional execution time.
    pub fn arb_run_task() -> impl Strategy<Value = RunTask> {
        (arb_run_status(), proptest::option::of(0u64..600_000)).prop_map(|(status, millis)| {
            RunTask {
                status,
                post_validate_output: millis.map(|ms| portal_core::PostValidateOutput {
                    execution_time_in_millis: Some(ms),
                }),
            }
        })
    }

    /// Generate a ServiceRun.
    pub fn arb_service_run() -> impl Strategy<Value = ServiceRun> {
        (
            arb_run_status(),
            arb_slug(),
            prop::collection::vec(arb_run_task(), 0..6),
            1577836800i64..1893456000i64,
        )
            .prop_map(|(status, name, tasks, secs)| {
                let created = chrono::DateTime::from_timestamp(secs, 0)
                    .unwrap_or_else(chrono::Utc::now)
                    .to_rfc3339();
                ServiceRun {
                    id: uuid::Uuid::now_v7().to_string(),
                    created_at: created.clone(),
                    updated_at: created,
                    status,
                    input_payload: serde_json::json!({ "name": name }),
                    tasks,
                }
            })
    }

    /// Generate JSON params of the shapes queries are keyed by.
    pub fn arb_params() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i16>().prop_map(Value::from),
            "[a-z]{0,6}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test data for common scenarios.

    use super::*;
    use portal_core::PostValidateOutput;

    fn service(slug: &str, name: &str, fields: Vec<FieldDescriptor>) -> Service {
        Service {
            slug: slug.to_string(),
            name: name.to_string(),
            description: String::new(),
            icon: None,
            icon_color: None,
            fields: fields.into(),
            validate: Vec::new(),
            post_validate: Vec::new(),
        }
    }

    /// The "infra" catalog: a database service with every supported
    /// field kind, and a bucket service with an unsupported field.
    pub fn infra_catalog() -> Catalog {
        Catalog {
            slug: "infra".to_string(),
            name: "Infrastructure".to_string(),
            description: "Provision infrastructure".to_string(),
            actions: vec![
                service(
                    "new-db",
                    "New Database",
                    vec![
                        FieldDescriptor::new("name", FieldType::Text)
                            .required()
                            .with_title("Name"),
                        FieldDescriptor::new("ttl", FieldType::Number)
                            .required()
                            .with_title("TTL (hours)"),
                        FieldDescriptor::new("seed", FieldType::Boolean)
                            .with_title("Seed data")
                            .with_default("false"),
                        FieldDescriptor::new("notes", FieldType::Textarea),
                    ],
                ),
                service(
                    "new-bucket",
                    "New Bucket",
                    vec![
                        FieldDescriptor::new("bucket", FieldType::Text).required(),
                        FieldDescriptor::new("expires", FieldType::Unsupported("date".to_string()))
                            .required(),
                    ],
                ),
            ],
        }
    }

    /// The "data" catalog with a single backfill service.
    pub fn data_catalog() -> Catalog {
        Catalog {
            slug: "data".to_string(),
            name: "Data".to_string(),
            description: String::new(),
            actions: vec![service(
                "backfill",
                "Backfill table",
                vec![
                    FieldDescriptor::new("table", FieldType::Text).required(),
                    FieldDescriptor::new("dry-run", FieldType::Boolean).with_default("TRUE"),
                ],
            )],
        }
    }

    pub fn sample_catalogs() -> Vec<Catalog> {
        vec![infra_catalog(), data_catalog()]
    }

    /// A finished run of `service` with the given task outcomes.
    pub fn finished_run(service: &str, tasks: &[(RunStatus, u64)]) -> ServiceRun {
        let status = if tasks.iter().all(|(s, _)| *s == RunStatus::Success) {
            RunStatus::Success
        } else {
            RunStatus::Failure
        };
        ServiceRun {
            id: uuid::Uuid::now_v7().to_string(),
            created_at: "2024-03-01T10:15:30Z".to_string(),
            updated_at: "2024-03-01T10:16:00Z".to_string(),
            status,
            input_payload: serde_json::json!({ "name": service }),
            tasks: tasks
                .iter()
                .map(|(status, ms)| RunTask {
                    status: *status,
                    post_validate_output: Some(PostValidateOutput {
                        execution_time_in_millis: Some(*ms),
                    }),
                })
                .collect(),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over query resolutions.

    use super::*;

    /// Assert that a read resolved, returning the value.
    #[track_caller]
    pub fn assert_resolved<T: std::fmt::Debug>(resolution: Resolution<T>) -> Arc<T> {
        match resolution {
            Resolution::Resolved(value) => value,
            other => panic!("Expected Resolved, got: {:?}", other),
        }
    }

    /// Assert that a read is suspended.
    #[track_caller]
    pub fn assert_suspended<T: std::fmt::Debug>(resolution: &Resolution<T>) {
        assert!(
            resolution.is_suspended(),
            "Expected Suspended, got: {:?}",
            resolution
        );
    }

    /// Assert that a read was rejected with an HTTP status error.
    #[track_caller]
    pub fn assert_status_error<T: std::fmt::Debug>(resolution: &Resolution<T>, expected: u16) {
        match resolution {
            Resolution::Rejected(FetchError::Status { status, .. }) => {
                assert_eq!(*status, expected, "Wrong HTTP status");
            }
            other => panic!("Expected HTTP {} error, got: {:?}", expected, other),
        }
    }
}
