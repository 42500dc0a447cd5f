use std::collections::HashSet;

use async_trait::async_trait;
use fleetkit_core::structured_error::{StructuredError, ERROR_DOMAIN};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};
use tracing::{debug, error};

use crate::db::DatabasePool;
use crate::repository::{
    method_error, prepare_document, unknown_collection, DocumentRepository, FindOptions, Query,
    ERROR_CANT_COUNT_ENTITIES, ERROR_CANT_DELETE_ENTITY, ERROR_CANT_FETCH_ENTITY,
    ERROR_CANT_SAVE_ENTITY, ERROR_NO_ENTITY,
};

/// [`DocumentRepository`] backed by the `documents` JSONB table.
///
/// Each filter compares the whole top-level field with JSONB equality
/// (`body -> field = value`), matching [`Query::matches`].
#[derive(Debug, Clone)]
pub struct PostgresRepository {
    pool: DatabasePool,
    collections: HashSet<String>,
    domain: String,
}

impl PostgresRepository {
    pub fn new<I, S>(pool: DatabasePool, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pool,
            collections: collections.into_iter().map(Into::into).collect(),
            domain: ERROR_DOMAIN.to_string(),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// `<select> FROM documents WHERE collection = .. AND body -> .. = ..`
    fn filtered(select: &str, collection: &str, query: &Query) -> QueryBuilder<'static, Postgres> {
        let mut builder = QueryBuilder::new(select);
        builder.push(" FROM documents WHERE collection = ");
        builder.push_bind(collection.to_string());

        for (field, value) in query.iter() {
            builder.push(" AND body -> ");
            builder.push_bind(field.clone());
            builder.push(" = ");
            builder.push_bind(Json(value.clone()));
        }
        builder
    }

    fn check_collection(&self, collection: &str) -> Result<(), StructuredError> {
        if self.collections.contains(collection) {
            Ok(())
        } else {
            Err(unknown_collection(collection))
        }
    }
}

#[async_trait]
impl DocumentRepository for PostgresRepository {
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
        self.check_collection(collection)?;

        let mut builder = Self::filtered("SELECT body", collection, query);
        builder.push(" ORDER BY id LIMIT 1");

        let found = builder
            .build_query_scalar::<Json<Value>>()
            .fetch_optional(self.pool.inner())
            .await
            .map_err(|err| {
                error!(collection, method_name, error = %err, "failed to fetch document");
                method_error(&self.domain, 500, method_name, ERROR_CANT_FETCH_ENTITY)
            })?;

        match found {
            Some(Json(document)) => Ok(Some(document)),
            None if accepts_empty_result => Ok(None),
            None => {
                debug!(collection, method_name, query = %query.to_json(), "no document matched");
                Err(method_error(&self.domain, 404, method_name, ERROR_NO_ENTITY))
            }
        }
    }

    async fn get_multiple(
        &self,
        collection: &str,
        query: &Query,
        options: &FindOptions,
        method_name: &str,
    ) -> Result<Vec<Value>, StructuredError> {
        self.check_collection(collection)?;

        let mut builder = Self::filtered("SELECT body", collection, query);

        builder.push(" ORDER BY ");
        if let Some(sort) = &options.sort {
            builder.push("body -> ");
            builder.push_bind(sort.field.clone());
            builder.push(if sort.ascending {
                " ASC NULLS FIRST, "
            } else {
                " DESC NULLS LAST, "
            });
        }
        builder.push("id");

        if let Some(limit) = options.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit.min(i64::MAX as u64) as i64);
        }

        if let Some(skip) = options.skip {
            builder.push(" OFFSET ");
            builder.push_bind(skip.min(i64::MAX as u64) as i64);
        }

        let rows = builder
            .build_query_scalar::<Json<Value>>()
            .fetch_all(self.pool.inner())
            .await
            .map_err(|err| {
                error!(collection, method_name, error = %err, "failed to fetch documents");
                method_error(&self.domain, 500, method_name, ERROR_CANT_FETCH_ENTITY)
            })?;

        Ok(rows.into_iter().map(|Json(document)| document).collect())
    }

    async fn save(
        &self,
        collection: &str,
        id: &str,
        entity: Value,
        method_name: &str,
    ) -> Result<(), StructuredError> {
        self.check_collection(collection)?;
        let body = prepare_document(&self.domain, id, entity, method_name)?;

        sqlx::query(
            "INSERT INTO documents (collection, id, body) VALUES ($1, $2, $3) \
             ON CONFLICT (collection, id) DO UPDATE \
             SET body = documents.body || EXCLUDED.body, updated_at = now()",
        )
        .bind(collection)
        .bind(id)
        .bind(Json(Value::Object(body)))
        .execute(self.pool.inner())
        .await
        .map_err(|err| {
            error!(collection, id, method_name, error = %err, "failed to save document");
            method_error(&self.domain, 500, method_name, ERROR_CANT_SAVE_ENTITY)
        })?;

        Ok(())
    }

    async fn count(&self, collection: &str, query: &Query, method_name: &str) -> Result<u64, StructuredError> {
        self.check_collection(collection)?;

        let count = Self::filtered("SELECT COUNT(*)", collection, query)
            .build_query_scalar::<i64>()
            .fetch_one(self.pool.inner())
            .await
            .map_err(|err| {
                error!(collection, method_name, error = %err, "failed to count documents");
                method_error(&self.domain, 500, method_name, ERROR_CANT_COUNT_ENTITIES)
            })?;

        Ok(count.max(0) as u64)
    }

    async fn delete(&self, collection: &str, id: &str, method_name: &str) -> Result<(), StructuredError> {
        self.check_collection(collection)?;

        sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(self.pool.inner())
            .await
            .map_err(|err| {
                error!(collection, id, method_name, error = %err, "failed to delete document");
                method_error(&self.domain, 500, method_name, ERROR_CANT_DELETE_ENTITY)
            })?;

        Ok(())
    }
}
