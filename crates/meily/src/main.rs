use std::{sync::Arc, time::Duration};

use anyhow::Context;
use meily_core::config::Config;
use meily_store::SqliteStateStore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const PURGE_EVERY: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    meily_core::logging::init("meily")?;

    let cfg = Arc::new(Config::load()?);
    let pool = meily_store::connect(&cfg.database_url)
        .await
        .context("failed to open database")?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("ctrl-c received, shutting down");
                    shutdown.cancel();
                }
                Err(e) => warn!(error = %e, "failed to listen for ctrl-c"),
            }
        });
    }

    tokio::spawn(purge_states(
        SqliteStateStore::new(pool.clone(), cfg.state_ttl),
        shutdown.clone(),
    ));

    meily_telegram::router::run_polling(cfg, pool, shutdown.clone())
        .await
        .context("telegram bot failed")?;

    shutdown.cancel();
    Ok(())
}

async fn purge_states(store: SqliteStateStore, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(PURGE_EVERY);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = store.purge_expired().await {
                    warn!(error = %e, "state purge failed");
                }
            }
        }
    }
}
