use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::error;

use crate::errors::{CoreError, Result};

/// Serializes a value to pretty JSON with canonical error handling.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|err| CoreError::Serialization(err.to_string()))
}

/// Deserializes a JSON string into the provided type with shared error semantics.
pub fn from_json_str<T: DeserializeOwned>(input: &str) -> Result<T> {
    serde_json::from_str(input).map_err(|err| CoreError::Deserialization(err.to_string()))
}

/// Deserializes JSON bytes.
pub fn from_json_bytes<T: DeserializeOwned>(input: &[u8]) -> Result<T> {
    serde_json::from_slice(input).map_err(|err| CoreError::Deserialization(err.to_string()))
}

/// Converts between two types sharing a JSON shape.
///
/// Fields missing from `source` fall back to the destination's serde
/// defaults; extra fields are dropped.
pub fn map_loose<S: Serialize, D: DeserializeOwned>(source: &S) -> Result<D> {
    let value = serde_json::to_value(source).map_err(|err| {
        error!(method = "map_loose", error = %err, "failed to serialize source");
        CoreError::Serialization(err.to_string())
    })?;

    serde_json::from_value(value).map_err(|err| {
        error!(method = "map_loose", error = %err, "failed to deserialize into destination");
        CoreError::Deserialization(err.to_string())
    })
}
