use std::time::Duration;

use async_trait::async_trait;
use fleetkit_core::config::StoreConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tracing::info;

use crate::errors::Result;

/// Wrapper around the Postgres connection pool backing the document store.
#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: Pool<Postgres>,
}

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

fn pool_options(max_connections: u32) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
}

impl DatabasePool {
    /// Connects with the store settings, applying the document schema when
    /// `run_migrations` is set.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = Self {
            pool: pool_options(config.max_connections)
                .connect(&config.database_url)
                .await?,
        };

        if config.run_migrations {
            run_migrations(&pool, &[Box::new(DocumentsMigrator)]).await?;
        }
        Ok(pool)
    }

    /// Connects without touching the schema.
    pub async fn connect_with_url(database_url: &str) -> Result<Self> {
        let pool = pool_options(DEFAULT_MAX_CONNECTIONS).connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Pool that only opens connections on first use.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = pool_options(DEFAULT_MAX_CONNECTIONS).connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    pub fn inner(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

/// Schema owner that knows how to bring its tables up to date.
#[async_trait]
pub trait DatabaseMigrator {
    async fn run_migrations(&self, pool: &DatabasePool) -> Result<()>;
}

/// Creates the `documents` table used by [`crate::PostgresRepository`].
pub struct DocumentsMigrator;

#[async_trait]
impl DatabaseMigrator for DocumentsMigrator {
    async fn run_migrations(&self, pool: &DatabasePool) -> Result<()> {
        sqlx::migrate!("./migrations").run(pool.inner()).await?;
        info!("document store migrations applied");
        Ok(())
    }
}

/// Applies each migrator in order, stopping at the first failure.
pub async fn run_migrations(
    pool: &DatabasePool,
    migrators: &[Box<dyn DatabaseMigrator + Send + Sync>],
) -> Result<()> {
    for migrator in migrators {
        migrator.run_migrations(pool).await?;
    }
    Ok(())
}
