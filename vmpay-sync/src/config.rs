use config::load_config;
use config::shared::SyncConfig;

/// Loads and validates the sync configuration.
///
/// Uses the standard configuration loading mechanism from [`config`] and validates the
/// resulting [`SyncConfig`] against the configured job before returning it.
pub fn load_sync_config() -> anyhow::Result<SyncConfig> {
    let config = load_config::<SyncConfig>()?;
    config.validate()?;

    Ok(config)
}
