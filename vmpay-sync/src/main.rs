//! VM Pay sync binary.
//!
//! Loads the configuration, initializes tracing and runs the configured job against the
//! VM Pay API and BigQuery. Exits with a non-zero status when the job fails.

use anyhow::anyhow;
use ::config::shared::SyncConfig;
use telemetry::init_tracing;
use tracing::error;

use crate::config::load_sync_config;
use crate::core::start_sync_with_config;

mod config;
mod core;

fn main() -> anyhow::Result<()> {
    let sync_config = load_sync_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    // BigQuery and the VM Pay client share the aws-lc-rs provider.
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install default crypto provider"))?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(sync_config))?;

    Ok(())
}

async fn async_main(sync_config: SyncConfig) -> anyhow::Result<()> {
    if let Err(err) = start_sync_with_config(sync_config).await {
        error!("{err:#}");
        return Err(err);
    }

    Ok(())
}
