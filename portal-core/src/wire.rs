//! Deserialization helpers for backend payloads.
//!
//! The backend serializes unset optional members as explicit `null`.

use serde::{Deserialize, Deserializer};
use std::sync::Arc;

/// Decode `null` as the type's default.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decode a possibly-`null` list into a shared slice.
pub(crate) fn null_as_empty_slice<'de, D, T>(deserializer: D) -> Result<Arc<[T]>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let items = Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(items.into())
}
