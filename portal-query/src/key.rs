//! Composite query keys and invalidation filters.
//!
//! A [`QueryKey`] is a resource name plus the JSON form of the parameters
//! derived from application state. Keys compare structurally: two keys are
//! equal when their names match and their params are deeply equal, whatever
//! the insertion order of object members.

use crate::error::{FetchError, FetchResult};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Key of one logical query in the store.
#[derive(Debug, Clone)]
pub struct QueryKey {
    name: Arc<str>,
    params: Value,
    /// Order-independent rendering of `params`, used for Eq and Hash.
    canonical: Arc<str>,
}

impl QueryKey {
    /// Build a key from any serializable params.
    pub fn new<P>(name: impl Into<Arc<str>>, params: &P) -> FetchResult<Self>
    where
        P: Serialize + ?Sized,
    {
        let name = name.into();
        let params = serde_json::to_value(params).map_err(|e| FetchError::InvalidKey {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_value(name, params))
    }

    /// Build a key from already-serialized params.
    pub fn from_value(name: impl Into<Arc<str>>, params: Value) -> Self {
        let mut canonical = String::new();
        write_canonical(&params, &mut canonical);
        Self {
            name: name.into(),
            params,
            canonical: canonical.into(),
        }
    }

    /// Key with no params.
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Self::from_value(name, Value::Null)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &Value {
        &self.params
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.canonical == other.canonical
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.canonical.hash(state);
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.canonical)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut members: Vec<_> = map.iter().collect();
            members.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (i, (k, v)) in members.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Selects cache entries for invalidation.
///
/// With no name every entry matches. A params filter matches partially:
/// every member of a filter object must match the same member of the key's
/// params (recursively); any other filter value must be equal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    name: Option<String>,
    params: Option<Value>,
}

impl QueryFilter {
    /// Match every entry in the store.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match every entry with this name.
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            params: None,
        }
    }

    /// Restrict the filter to params matching `params`.
    pub fn with_params<P>(mut self, params: &P) -> FetchResult<Self>
    where
        P: Serialize + ?Sized,
    {
        let value = serde_json::to_value(params).map_err(|e| FetchError::InvalidKey {
            name: self.name.clone().unwrap_or_default(),
            reason: e.to_string(),
        })?;
        self.params = Some(value);
        Ok(self)
    }

    pub fn with_params_value(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn matches(&self, key: &QueryKey) -> bool {
        if let Some(name) = &self.name {
            if name != key.name() {
                return false;
            }
        }
        match &self.params {
            Some(filter) => partial_match(filter, key.params()),
            None => true,
        }
    }
}

fn partial_match(filter: &Value, params: &Value) -> bool {
    match (filter, params) {
        (Value::Object(wanted), Value::Object(actual)) => wanted.iter().all(|(k, v)| {
            actual
                .get(k)
                .is_some_and(|actual_value| partial_match(v, actual_value))
        }),
        _ => filter == params,
    }
}
