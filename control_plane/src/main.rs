#![deny(clippy::all)]
#![deny(rust_2018_idioms)]

use std::sync::Arc;

use clap::{crate_version, Arg, Command};
use slog::{error, info, warn};
use tokio_util::sync::CancellationToken;

use adapter::dummy::Dummy;
use control_plane::{
    application::Config,
    cipher::Cipher,
    db::{postgres_connection, setup_schema},
    services::usage::NoTraffic,
    store::{MemoryStore, PostgresStore, Store},
    worker::Worker,
    Application,
};
use primitives::util::logging::new_logger;

/// Connections of the Postgres pool.
const POOL_SIZE: usize = 16;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Command::new("Control plane")
        .version(crate_version!())
        .arg(
            Arg::new("memory")
                .long("memory")
                .help("Runs on the in-memory store instead of Postgres"),
        )
        .arg(
            Arg::new("no-worker")
                .long("no-worker")
                .help("Does not start the daily usage worker"),
        )
        .get_matches();

    let config = Config::from_env()?;
    let logger = new_logger("control_plane", config.env);

    let store: Arc<dyn Store> = if cli.is_present("memory") {
        info!(&logger, "Using the in-memory store, nothing will be persisted");

        Arc::new(MemoryStore::new())
    } else {
        let pool = postgres_connection(&config.database_url, POOL_SIZE)?;
        setup_schema(&pool).await?;
        info!(&logger, "Database schema is up to date");

        Arc::new(PostgresStore::new(pool))
    };

    let cipher = config
        .encryption_key
        .as_deref()
        .map(Cipher::from_base64_key)
        .transpose()?;
    if cipher.is_none() {
        warn!(
            &logger,
            "ENCRYPTION_KEY is not set, payment method details are stored in plain text"
        );
    }
    if !config.payments_secret_key.is_empty() {
        warn!(
            &logger,
            "No payments provider is built in, PAYMENTS_SECRET_KEY is ignored and the Dummy gateway is used"
        );
    }

    let run_worker = !cli.is_present("no-worker");
    let grace = config.shutdown_grace();
    let app = Arc::new(Application::new(
        config,
        logger.clone(),
        store,
        Dummy::new(),
        Arc::new(NoTraffic),
        cipher,
    ));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        let logger = logger.clone();

        async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(&logger, "Listening for the shutdown signal failed"; "error" => %err, "main" => "main");
            }
            shutdown.cancel();
        }
    });

    let worker = run_worker.then(|| {
        let worker = Worker::new(app.clone());
        let shutdown = shutdown.clone();

        tokio::spawn(async move { worker.infinite(shutdown).await })
    });

    let served = app.run(shutdown.clone()).await;

    shutdown.cancel();
    if let Some(worker) = worker {
        match tokio::time::timeout(grace, worker).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(&logger, "Usage worker panicked"; "error" => %err, "main" => "main")
            }
            Err(_) => {
                warn!(&logger, "Usage worker did not stop within {:?}, abandoning it", grace; "main" => "main")
            }
        }
    }

    Ok(served?)
}
