use std::sync::Arc;

use anyhow::Context;
use streamvault::config::AppConfig;
use streamvault::database::{self, SqliteJobStore};
use streamvault::logging::init_logging;
use streamvault::services::ServiceContainer;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config_path = AppConfig::path_from_env();
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let (logging, _guard) = init_logging(&config.log_dir)?;
    logging.apply_configured_filter(config.log_filter.as_deref());

    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;
    let store = Arc::new(SqliteJobStore::new(pool.clone()));

    let container = ServiceContainer::new(&config, store)?;
    let interrupted = container.registry.restore().await?;
    if interrupted > 0 {
        info!("{} jobs were interrupted by the last shutdown", interrupted);
    }

    logging.start_retention_cleanup(container.cancellation_token());
    container.start();
    info!("streamvault started");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    container.shutdown().await?;
    pool.close().await;
    Ok(())
}
