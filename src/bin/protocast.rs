//! protocast: prototype availability notifier
//!
//! Single process: event log, dispatcher, delivery workers and HTTP API.
//!
//! ## Configuration
//! - `--config <path>` or `PROTOCAST_CONFIG`: YAML config file
//! - `PROTOCAST__*`: overrides, e.g. `PROTOCAST__DELIVERY__MAX_RETRIES=3`
//! - `PROTOCAST_LOG`: tracing filter (default `info`)

use std::sync::Arc;

use tracing::{error, info};

use protocast::api;
use protocast::config::Config;
use protocast::delivery::HttpTransport;
use protocast::dlq::create_publisher;
use protocast::storage::init_storage;
use protocast::utils::bootstrap::{init_tracing, parse_config_path, shutdown_signal};
use protocast::Notifier;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting protocast");

    let stores = init_storage(&config.storage).await?;
    info!("Storage initialized");

    let transport = HttpTransport::new(config.delivery.attempt_timeout())?;
    let notifier = Arc::new(Notifier::new(
        &config,
        stores,
        Arc::new(transport),
        create_publisher(&config.dlq),
    ));

    let recovery = notifier.start().await?;
    if recovery.inconsistent > 0 {
        error!(
            inconsistent = recovery.inconsistent,
            "Dispatch halted at startup; inspect /operator/status"
        );
    }

    let result = api::serve(notifier.clone(), &config.server, shutdown_signal()).await;

    info!("Shutting down");
    notifier.shutdown().await;
    result
}
