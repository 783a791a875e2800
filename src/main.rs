//! # Airbridge service entry point

use airbridge::{
    config::ConfigLoader,
    db::init_pool,
    migration::{Migrator, MigratorTrait},
    server::run_server,
    telemetry::init_tracing,
};
use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;
    init_tracing(&config)?;

    match config.redacted_json() {
        Ok(redacted) => tracing::info!(profile = %config.profile, config = %redacted, "Loaded configuration"),
        Err(err) => tracing::warn!(error = %err, "Could not render configuration"),
    }

    let db = init_pool(&config).await?;
    Migrator::up(&db, None)
        .await
        .context("failed to apply migrations")?;

    run_server(config, db).await
}
