use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use fleetkit_core::structured_error::{StructuredError, ERROR_DOMAIN};
use parking_lot::RwLock;
use serde_json::Value;

use crate::repository::{
    compare_field, method_error, prepare_document, unknown_collection, DocumentRepository,
    FindOptions, Query, ERROR_NO_ENTITY,
};

/// In-process [`DocumentRepository`] for tests and local tooling.
///
/// Documents of a collection are kept ordered by id, which is also the
/// tie-break order when sorting.
#[derive(Debug)]
pub struct MemoryRepository {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    domain: String,
}

impl MemoryRepository {
    pub fn new<I, S>(collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            collections: RwLock::new(
                collections
                    .into_iter()
                    .map(|name| (name.into(), BTreeMap::new()))
                    .collect(),
            ),
            domain: ERROR_DOMAIN.to_string(),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    fn matching(&self, collection: &str, query: &Query) -> Result<Vec<Value>, StructuredError> {
        let collections = self.collections.read();
        let documents = collections
            .get(collection)
            .ok_or_else(|| unknown_collection(collection))?;

        Ok(documents
            .values()
            .filter(|document| query.matches(document))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DocumentRepository for MemoryRepository {
    fn domain(&self) -> &str {
        &self.domain
    }

    async fn get_one(
        &self,
        collection: &str,
        query: &Query,
        accepts_empty_result: bool,
        method_name: &str,
    ) -> Result<Option<Value>, StructuredError> {
        match self.matching(collection, query)?.into_iter().next() {
            Some(document) => Ok(Some(document)),
            None if accepts_empty_result => Ok(None),
            None => Err(method_error(&self.domain, 404, method_name, ERROR_NO_ENTITY)),
        }
    }

    async fn get_multiple(
        &self,
        collection: &str,
        query: &Query,
        options: &FindOptions,
        _method_name: &str,
    ) -> Result<Vec<Value>, StructuredError> {
        let mut documents = self.matching(collection, query)?;

        if let Some(sort) = &options.sort {
            documents.sort_by(|left, right| {
                let ordering = compare_field(left.get(&sort.field), right.get(&sort.field));
                if sort.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }

        let skip = options.skip.unwrap_or(0) as usize;
        let limit = options.limit.map_or(usize::MAX, |limit| limit as usize);
        Ok(documents.into_iter().skip(skip).take(limit).collect())
    }

    async fn save(
        &self,
        collection: &str,
        id: &str,
        entity: Value,
        method_name: &str,
    ) -> Result<(), StructuredError> {
        let mut collections = self.collections.write();
        let documents = collections
            .get_mut(collection)
            .ok_or_else(|| unknown_collection(collection))?;
        let body = prepare_document(&self.domain, id, entity, method_name)?;

        match documents.get_mut(id) {
            Some(Value::Object(stored)) => stored.extend(body),
            _ => {
                documents.insert(id.to_string(), Value::Object(body));
            }
        }
        Ok(())
    }

    async fn count(&self, collection: &str, query: &Query, _method_name: &str) -> Result<u64, StructuredError> {
        Ok(self.matching(collection, query)?.len() as u64)
    }

    async fn delete(&self, collection: &str, id: &str, _method_name: &str) -> Result<(), StructuredError> {
        let mut collections = self.collections.write();
        let documents = collections
            .get_mut(collection)
            .ok_or_else(|| unknown_collection(collection))?;
        documents.remove(id);
        Ok(())
    }
}
