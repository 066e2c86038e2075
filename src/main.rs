//! alarmd server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - ALARMD_CONFIG: Explicit config file path (default: searched)
//! - ALARMD_FCM_API_KEY: Overrides the FCM key from the config file
//! - ALARMD_TELEGRAM_API_KEY: Overrides the Telegram key from the config file
//! - RUST_LOG: Log level (default: info)

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use alarmd::channel::ChannelSet;
use alarmd::checker::AlarmChecker;
use alarmd::config::ServiceConfig;
use alarmd::contacter::{Contacter, Dispatcher};
use alarmd::state::StateStore;
use alarmd::store::{AlarmRegistry, ConditionStore, SqliteConditionStore, SqliteRegistry};
use alarmd::worker::CheckerWorker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "alarmd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = match std::env::var("ALARMD_CONFIG") {
        Ok(path) => PathBuf::from(path),
        Err(_) => ServiceConfig::discover().ok_or(
            "cannot find config file, are you running the program from the right path?",
        )?,
    };
    tracing::info!(path = %config_path.display(), "using config");
    let config = ServiceConfig::load(&config_path)?;

    tracing::info!("alarmd configuration:");
    tracing::info!("  Check interval: {:?}", config.check_interval());
    tracing::info!("  Registry db: {}", config.config_db.display());
    tracing::info!("  Condition db: {}", config.cnr_db.display());
    tracing::info!("  State file: {}", config.state_path.display());

    let registry: Arc<dyn AlarmRegistry> = Arc::new(SqliteRegistry::open(&config.config_db)?);
    let conditions: Arc<dyn ConditionStore> =
        Arc::new(SqliteConditionStore::open(&config.cnr_db)?);

    let channels = ChannelSet::from_config(&config.contacter, config.send_timeout());
    tracing::info!("  Notification channels: {:?}", channels.kinds());
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(Contacter::new(channels));

    let checker = Arc::new(AlarmChecker::new(
        registry,
        conditions,
        dispatcher,
        StateStore::new(&config.state_path),
    )?);

    let mut worker = CheckerWorker::new(
        checker,
        config.check_interval(),
        config.cycle_ceiling(),
        config.shutdown_grace(),
    );
    worker.start();

    println!(
        "alarmd v{} - alarm evaluation & notification dispatch",
        env!("CARGO_PKG_VERSION")
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, stopping checker...");
    worker.stop().await;

    tracing::info!("alarmd stopped");
    Ok(())
}
