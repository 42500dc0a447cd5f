//! Key-value context carried across service boundaries.
//!
//! [`Metadata`] travels with a request: it is created empty when the request
//! starts, merged on every update and encoded when it has to cross a transport
//! that only accepts bytes or text (RPC headers, HTTP headers).

use std::collections::{btree_map, BTreeMap, HashMap};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::collections::string_map_merge;
use crate::structured_error::{ErrorKind, StructuredError, ERROR_DOMAIN};

const ERROR_SUB_DOMAIN: &str = "metadata";

/// Sub domain code raised when binary metadata cannot be decoded.
pub const ERROR_DECODE_METADATA_FROM_BINARY_FAILED: &str = "decode_metadata_from_binary_failed";
/// Sub domain code raised when the text form is not valid base64.
pub const ERROR_DECODE_BINARY_FROM_BASE64_FAILED: &str = "decode_binary_from_base64_failed";
/// Sub domain code raised when `user_id` is missing from the metadata.
pub const ERROR_USER_ID_NOT_IN_META: &str = "user_id_not_set_in_metadata";

/// Well-known key holding the authenticated user.
pub const USER_ID_KEY: &str = "user_id";

/// Ordered string-to-string bag. Keys are stored verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value stored under `key`, or an empty string.
    pub fn get(&self, key: &str) -> &str {
        self.0.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// Returns a copy of `self` with `additional` overlaid on top.
    pub fn merged_with(&self, additional: Option<&Metadata>) -> Metadata {
        merge(Some(self), additional)
    }

    /// Single-key variant of [`Self::merged_with`].
    pub fn with(&self, key: impl Into<String>, value: impl Into<String>) -> Metadata {
        let mut update = Metadata::new();
        update.insert(key, value);
        self.merged_with(Some(&update))
    }

    /// Canonical binary form: compact JSON object of the sorted map.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.0).unwrap_or_else(|_| b"{}".to_vec())
    }

    /// Decodes the binary form. Empty input is a valid, empty carrier.
    pub fn from_bytes(data: &[u8]) -> Result<Metadata, StructuredError> {
        if data.is_empty() {
            return Ok(Metadata::new());
        }

        serde_json::from_slice::<BTreeMap<String, String>>(data)
            .map(Metadata)
            .map_err(|err| {
                error!(error = %err, "failed to decode metadata from binary payload");
                decode_error(ERROR_DECODE_METADATA_FROM_BINARY_FAILED)
            })
    }

    /// Printable form: standard base64 of [`Self::to_bytes`].
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    /// Decodes the printable form. An empty string is a valid, empty carrier.
    pub fn from_base64(data: &str) -> Result<Metadata, StructuredError> {
        if data.is_empty() {
            return Ok(Metadata::new());
        }

        let bytes = STANDARD.decode(data).map_err(|err| {
            error!(error = %err, data, "failed to decode metadata bytes from base64");
            decode_error(ERROR_DECODE_BINARY_FROM_BASE64_FAILED)
        })?;

        Metadata::from_bytes(&bytes)
    }

    /// Reads the authenticated user, failing when it was never set.
    pub fn user_id(&self, error_domain: &str) -> Result<&str, StructuredError> {
        match self.get(USER_ID_KEY) {
            "" => Err(StructuredError::new(
                500,
                error_domain,
                ERROR_SUB_DOMAIN,
                ERROR_USER_ID_NOT_IN_META,
                None,
            )),
            user_id => Ok(user_id),
        }
    }
}

/// Copy-merges two carriers; keys of `additional` win.
pub fn merge(base: Option<&Metadata>, additional: Option<&Metadata>) -> Metadata {
    let base = base.map(|meta| meta.0.clone()).unwrap_or_default();
    let additional = additional.map(|meta| meta.0.clone()).unwrap_or_default();
    Metadata(string_map_merge(base, additional))
}

fn decode_error(sub_domain_code: &str) -> StructuredError {
    StructuredError::new(400, ERROR_DOMAIN, ERROR_SUB_DOMAIN, sub_domain_code, None)
        .with_kind(ErrorKind::DecodeFailure)
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Metadata(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, String>> for Metadata {
    fn from(value: BTreeMap<String, String>) -> Self {
        Metadata(value)
    }
}

impl From<HashMap<String, String>> for Metadata {
    fn from(value: HashMap<String, String>) -> Self {
        value.into_iter().collect()
    }
}

impl From<Metadata> for BTreeMap<String, String> {
    fn from(value: Metadata) -> Self {
        value.0
    }
}

impl IntoIterator for Metadata {
    type Item = (String, String);
    type IntoIter = btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Metadata {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
