//! Document persistence for fleetkit services.
//!
//! [`DocumentRepository`] is implemented by [`PostgresRepository`] (JSONB rows
//! in a single `documents` table) and by [`MemoryRepository`].

pub mod db;
pub mod errors;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use db::{run_migrations, DatabaseMigrator, DatabasePool, DocumentsMigrator};
pub use errors::{Result, StoreError};
pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;
pub use repository::{
    get_multiple_as, get_one_as, save_entity, DocumentRepository, FindOptions, Query, SortBy,
};
