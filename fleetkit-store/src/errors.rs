use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Setup failures of the document store (connections, schema).
///
/// Failures of individual repository calls are `StructuredError`s.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}
