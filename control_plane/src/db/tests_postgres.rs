//! Postgres for the database tests.
//!
//! Every [`TestDatabase`] gets a schema of its own on the database of
//! [`TEST_DATABASE_URL`], so tests running in parallel never see each
//! other's rows. Without the variable there is no database and the tests
//! return early.

use uuid::Uuid;

use super::{postgres_connection, postgres_pool, setup_schema, DbPool};

/// Environment variable with the URL of the database the tests may use.
pub const TEST_DATABASE_URL: &str = "TEST_DATABASE_URL";

const POOL_SIZE: usize = 8;

pub struct TestDatabase {
    pub pool: DbPool,
    pub schema: String,
    database_url: String,
}

impl TestDatabase {
    /// Drops the schema and every row in it.
    pub async fn teardown(self) {
        let admin = postgres_connection(&self.database_url, 1).expect("Should build the pool");
        let client = admin.get().await.expect("Should connect");

        client
            .batch_execute(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema))
            .await
            .expect("Should drop the schema");
    }
}

/// A fresh schema with every table created, or `None` when
/// [`TEST_DATABASE_URL`] is not set.
pub async fn setup_test_database() -> Option<TestDatabase> {
    let database_url = std::env::var(TEST_DATABASE_URL).ok()?;
    let schema = format!("test_{}", Uuid::new_v4().simple());

    let admin = postgres_connection(&database_url, 1).expect("Should build the pool");
    admin
        .get()
        .await
        .expect("Should connect")
        .batch_execute(&format!("CREATE SCHEMA {schema}"))
        .await
        .expect("Should create the schema");

    let mut config: tokio_postgres::Config = database_url.parse().expect("Valid database URL");
    config.options(&format!("-c search_path={schema}"));
    let pool = postgres_pool(config, POOL_SIZE).expect("Should build the pool");

    setup_schema(&pool)
        .await
        .expect("Schema setup should succeed");

    Some(TestDatabase {
        pool,
        schema,
        database_url,
    })
}
