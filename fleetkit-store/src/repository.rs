//! Named-collection document access.
//!
//! Documents are JSON objects addressed by `(collection, id)`. Lookups use
//! top-level equality filters built with [`Query`]. Repository calls fail with
//! [`StructuredError`]s whose sub domain is the caller supplied method name,
//! so a missing order looked up by `get_order` reads
//! `<domain>/get_order/no_entity/`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use fleetkit_core::sanitize::Sanitizable;
use fleetkit_core::serde_utils::map_loose;
use fleetkit_core::structured_error::{StructuredError, ERROR_DOMAIN};
use fleetkit_core::Metadata;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

const ERROR_SUB_DOMAIN: &str = "store";

pub const ERROR_UNKNOWN_COLLECTION: &str = "unknown_collection";
pub const ERROR_NO_ENTITY: &str = "no_entity";
pub const ERROR_CANT_FETCH_ENTITY: &str = "can_t_fetch_entity";
pub const ERROR_CANT_SAVE_ENTITY: &str = "can_t_save_entity";
pub const ERROR_CANT_COUNT_ENTITIES: &str = "can_t_count_entities";
pub const ERROR_CANT_DELETE_ENTITY: &str = "can_t_delete_entity";
pub const ERROR_DECODE_ERROR: &str = "decode_error";

/// Field holding the document id inside every stored body.
pub const ID_FIELD: &str = "_id";

/// Top-level equality filter. Null and empty-string values are dropped.
///
/// A filter value must equal the whole stored field: arrays and objects are
/// not matched by containment, numbers compare by value (`1` equals `1.0`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query(BTreeMap<String, Value>);

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query matching the document with the given id.
    pub fn by_id(id: &str) -> Self {
        Self::new().filter(ID_FIELD, id)
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        if !is_blank(&value) {
            self.0.insert(field.into(), value);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Filter as a JSON object, for logging.
    pub fn to_json(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect())
    }

    /// Whether every filtered field of `document` equals the filter value.
    pub fn matches(&self, document: &Value) -> bool {
        self.0
            .iter()
            .all(|(field, expected)| document.get(field).is_some_and(|actual| json_eq(actual, expected)))
    }
}

/// JSON equality with numbers compared by value, like JSONB `=`.
fn json_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(a, b)| json_eq(a, b))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter().all(|(key, a)| b.get(key).is_some_and(|b| json_eq(a, b)))
        }
        _ => left == right,
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Query {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Query::new(), |query, (field, value)| query.filter(field, value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortBy {
    pub field: String,
    pub ascending: bool,
}

/// Sorting and paging for [`DocumentRepository::get_multiple`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub sort: Option<SortBy>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.sort = Some(SortBy {
            field: field.into(),
            ascending,
        });
        self
    }

    /// Zero means no limit.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = (limit > 0).then_some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = (skip > 0).then_some(skip);
        self
    }
}

/// Storage of JSON documents in named collections.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Error domain of the failures raised by this repository.
    fn domain(&self) -> &str;

    /// First document matching `query`.
    ///
    /// No match is `Ok(None)` when `accepts_empty_result` is set and
    /// `404 no_entity` otherwise.
    async fn get_one(
        &self,
        collection: &str,
        query: &Query,
        accepts_empty_result: bool,
        method_name: &str,
    ) -> Result<Option<Value>, StructuredError>;

    async fn get_multiple(
        &self,
        collection: &str,
        query: &Query,
        options: &FindOptions,
        method_name: &str,
    ) -> Result<Vec<Value>, StructuredError>;

    /// Inserts the document or merges its top-level fields into the stored one.
    async fn save(
        &self,
        collection: &str,
        id: &str,
        entity: Value,
        method_name: &str,
    ) -> Result<(), StructuredError>;

    async fn count(&self, collection: &str, query: &Query, method_name: &str) -> Result<u64, StructuredError>;

    /// Removing an absent document is not an error.
    async fn delete(&self, collection: &str, id: &str, method_name: &str) -> Result<(), StructuredError>;
}

pub(crate) fn unknown_collection(collection: &str) -> StructuredError {
    error!(collection, "collection is not registered");
    StructuredError::new(
        500,
        ERROR_DOMAIN,
        ERROR_SUB_DOMAIN,
        ERROR_UNKNOWN_COLLECTION,
        Some(Metadata::from_iter([("collection", collection)])),
    )
}

pub(crate) fn method_error(domain: &str, code: u16, method_name: &str, sub_domain_code: &str) -> StructuredError {
    StructuredError::new(code, domain, method_name, sub_domain_code, None)
}

/// Copy of `entity` carrying its id, ready to be stored.
pub(crate) fn prepare_document(
    domain: &str,
    id: &str,
    entity: Value,
    method_name: &str,
) -> Result<serde_json::Map<String, Value>, StructuredError> {
    match entity {
        Value::Object(mut body) => {
            body.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
            Ok(body)
        }
        other => {
            error!(method_name, id, kind = ?other, "only JSON objects can be stored");
            Err(method_error(domain, 500, method_name, ERROR_CANT_SAVE_ENTITY))
        }
    }
}

/// Total order used when sorting documents by a field: missing and null
/// first, then booleans, numbers, strings and finally structured values.
pub(crate) fn compare_field(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) | Some(Value::Object(_)) => 4,
        }
    }

    match (left, right) {
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        _ => rank(left).cmp(&rank(right)),
    }
}

/// Sanitizes `entity` in place, then saves it under `id`.
pub async fn save_entity<R, T>(
    repository: &R,
    collection: &str,
    id: &str,
    entity: &mut T,
    method_name: &str,
) -> Result<(), StructuredError>
where
    R: DocumentRepository + ?Sized,
    T: Sanitizable + Serialize + Send + Sync,
{
    entity.sanitize();

    let value = serde_json::to_value(&*entity).map_err(|err| {
        error!(method_name, id, error = %err, "failed to encode entity");
        method_error(repository.domain(), 500, method_name, ERROR_CANT_SAVE_ENTITY)
    })?;

    repository.save(collection, id, value, method_name).await
}

/// Typed variant of [`DocumentRepository::get_one`].
pub async fn get_one_as<R, T>(
    repository: &R,
    collection: &str,
    query: &Query,
    accepts_empty_result: bool,
    method_name: &str,
) -> Result<Option<T>, StructuredError>
where
    R: DocumentRepository + ?Sized,
    T: DeserializeOwned,
{
    repository
        .get_one(collection, query, accepts_empty_result, method_name)
        .await?
        .map(|document| decode(repository.domain(), &document, query, method_name))
        .transpose()
}

/// Typed variant of [`DocumentRepository::get_multiple`].
pub async fn get_multiple_as<R, T>(
    repository: &R,
    collection: &str,
    query: &Query,
    options: &FindOptions,
    method_name: &str,
) -> Result<Vec<T>, StructuredError>
where
    R: DocumentRepository + ?Sized,
    T: DeserializeOwned,
{
    repository
        .get_multiple(collection, query, options, method_name)
        .await?
        .into_iter()
        .map(|document| decode(repository.domain(), &document, query, method_name))
        .collect()
}

fn decode<T: DeserializeOwned>(
    domain: &str,
    document: &Value,
    query: &Query,
    method_name: &str,
) -> Result<T, StructuredError> {
    map_loose(document).map_err(|err| {
        error!(method_name, query = %query.to_json(), error = %err, "failed to decode document");
        method_error(domain, 500, method_name, ERROR_DECODE_ERROR)
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    #[test]
    fn blank_filters_are_dropped() {
        let query = Query::new()
            .filter("status", "open")
            .filter("customer", "")
            .filter("deleted_at", Value::Null)
            .filter("priority", 0);

        assert_eq!(query.to_json(), json!({"status": "open", "priority": 0}));
    }

    #[test]
    fn query_from_iterator_applies_the_same_rules() {
        let query: Query = [("a", json!("x")), ("b", json!(""))].into_iter().collect();
        assert_eq!(query, Query::new().filter("a", "x"));
    }

    #[test]
    fn matches_top_level_fields() {
        let document = json!({"_id": "o-1", "status": "open", "lines": [1, 2]});

        assert!(Query::new().matches(&document));
        assert!(Query::by_id("o-1").matches(&document));
        assert!(Query::new().filter("status", "open").matches(&document));
        assert!(!Query::new().filter("status", "closed").matches(&document));
        assert!(!Query::new().filter("missing", 1).matches(&document));
    }

    #[test]
    fn structured_filters_need_the_whole_field() {
        let document = json!({"tags": ["a", "b"], "addr": {"city": "X", "zip": "1000"}, "qty": 1});

        assert!(!Query::new().filter("tags", json!(["a"])).matches(&document));
        assert!(Query::new().filter("tags", json!(["a", "b"])).matches(&document));
        assert!(!Query::new().filter("tags", json!(["b", "a"])).matches(&document));
        assert!(!Query::new().filter("addr", json!({"city": "X"})).matches(&document));
        assert!(Query::new()
            .filter("addr", json!({"zip": "1000", "city": "X"}))
            .matches(&document));
    }

    #[test]
    fn numbers_match_by_value() {
        let document = json!({"qty": 1, "price": 2.5});

        assert!(Query::new().filter("qty", json!(1.0)).matches(&document));
        assert!(Query::new().filter("price", json!(2.50)).matches(&document));
        assert!(!Query::new().filter("qty", json!("1")).matches(&document));
    }

    #[test]
    fn find_options_treat_zero_as_unset() {
        let options = FindOptions::new().sort_by("created_at", false).limit(0).skip(5);
        assert_eq!(options.limit, None);
        assert_eq!(options.skip, Some(5));
        assert_eq!(options.sort.map(|sort| sort.ascending), Some(false));
    }

    #[test_case(json!(1), json!(2), Ordering::Less)]
    #[test_case(json!(2.5), json!(2), Ordering::Greater)]
    #[test_case(json!("b"), json!("a"), Ordering::Greater)]
    #[test_case(json!(null), json!(0), Ordering::Less)]
    #[test_case(json!("1"), json!(1), Ordering::Greater)]
    fn field_ordering(left: Value, right: Value, expected: Ordering) {
        assert_eq!(compare_field(Some(&left), Some(&right)), expected);
    }

    #[test]
    fn only_objects_can_be_stored() {
        let body = prepare_document("orders", "o-1", json!({"total": 3}), "save_order").expect("object");
        assert_eq!(body.get(ID_FIELD), Some(&json!("o-1")));

        let err = prepare_document("orders", "o-1", json!([1]), "save_order").expect_err("array");
        assert_eq!(err.detail_string(), "orders/save_order/can_t_save_entity/");
    }
}
