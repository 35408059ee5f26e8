mod cli;

use crate::cli::{StorageBackendArg, CLI};
use anyhow::Context;
use clap::Parser;
use pinhole_core::{Repository, ShortKey};
use pinhole_gateway::{App, AppState, SignedTokenProvider};
use pinhole_generator::RandomGenerator;
use pinhole_shortener::{BatchDeletionConfig, ShortenerService};
use pinhole_storage::{FileRepository, PostgresRepository, StoragePaths};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::try_parse()?;

    pinhole_telemetry::init(config.log_format.into())?;

    info!(
        listen_addr = %config.listen_addr,
        base_url = %config.base_url(),
        storage_backend = %config.storage,
        "starting gateway"
    );

    let default_key = config
        .default_key
        .as_deref()
        .map(ShortKey::new)
        .transpose()
        .context("invalid default key")?;

    let repository: Arc<dyn Repository> = match config.storage {
        StorageBackendArg::File => {
            let paths = match config.associations_file.clone() {
                Some(associations) => StoragePaths::new(config.records_file.clone(), associations),
                None => StoragePaths::from_records_path(config.records_file.clone()),
            };
            Arc::new(FileRepository::open(paths)?)
        }
        StorageBackendArg::Postgres => {
            let dsn = config
                .postgres_dsn
                .as_deref()
                .context("postgres dsn is required when storage backend is postgres")?;
            let repository = PostgresRepository::connect(dsn).await?;
            repository.ensure_schema().await?;
            Arc::new(repository)
        }
    };

    let deletion = BatchDeletionConfig::builder()
        .workers(config.deletion_workers)
        .deadline(Duration::from_secs(config.deletion_deadline_secs))
        .build();

    let shortener = ShortenerService::with_deletion_config(repository, RandomGenerator::new(), deletion)
        .with_default_key(default_key);
    let identity = SignedTokenProvider::new(config.auth_secret.as_bytes())?;
    let state = AppState::new(Arc::new(shortener), Arc::new(identity), config.base_url());

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!(listen_addr = %listener.local_addr()?, "gateway listening");

    axum::serve(listener, App::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
    }
}
