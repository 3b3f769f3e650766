//! Postgres access of the [`PostgresStore`](crate::store::PostgresStore).
//!
//! Every query function takes a [`GenericClient`] so that it can run both on
//! a pooled connection and inside a transaction.

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use thiserror::Error;
use tokio_postgres::NoTls;

pub use deadpool_postgres::{GenericClient, PoolError};

pub use self::{
    association::*, catalog::*, delegation::*, identity::*, invitation::*, ledger::*, usage::*,
};

pub mod association;
pub mod catalog;
pub mod delegation;
pub mod identity;
pub mod invitation;
pub mod ledger;
pub mod usage;

#[cfg(test)]
pub mod tests_postgres;

pub type DbPool = Pool;

/// The whole schema. Every statement is idempotent.
pub static SCHEMA: &str = include_str!("../schema.sql");

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid database URL: {0}")]
    Url(#[source] tokio_postgres::Error),
    #[error("Building the pool: {0}")]
    Build(#[from] deadpool_postgres::BuildError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Builds the connection pool. No connection is opened until the first
/// query.
pub fn postgres_connection(database_url: &str, max_size: usize) -> Result<DbPool, Error> {
    let config: tokio_postgres::Config = database_url.parse().map_err(Error::Url)?;

    postgres_pool(config, max_size)
}

pub fn postgres_pool(config: tokio_postgres::Config, max_size: usize) -> Result<DbPool, Error> {
    let manager = Manager::from_config(
        config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );

    Ok(Pool::builder(manager).max_size(max_size).build()?)
}

/// Creates the tables that do not exist yet.
pub async fn setup_schema(pool: &DbPool) -> Result<(), PoolError> {
    let client = pool.get().await?;
    client.batch_execute(SCHEMA).await?;

    Ok(())
}

/// Locking clause appended to the `SELECT`s that read a record in order to
/// change it.
pub(crate) fn lock_clause(for_update: bool) -> &'static str {
    if for_update {
        " FOR UPDATE"
    } else {
        ""
    }
}
