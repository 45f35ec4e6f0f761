use config::shared::{BigQueryConfig, BigQueryCredentials, PipelineConfig, SyncConfig, VmPayConfig};
use etl::bigquery::{BigQueryClient, BigQueryLoader};
use etl::pipeline::Pipeline;
use etl::source::VmPayClient;
use secrecy::ExposeSecret;
use tracing::{debug, info};

/// Runs the configured job once.
///
/// The VM Pay client and the BigQuery loader are only built when the job uses them, so
/// local jobs run without credentials or network access.
pub async fn start_sync_with_config(config: SyncConfig) -> anyhow::Result<()> {
    info!("starting vmpay sync");

    log_config(&config);

    let source = match &config.source {
        Some(source) if config.job.needs_source() => Some(VmPayClient::new(source)?),
        _ => None,
    };

    let destination = match &config.destination {
        Some(destination) if config.job.needs_destination() => {
            Some(init_loader(destination).await?)
        }
        _ => None,
    };

    let pipeline = Pipeline::new(config.pipeline, source, destination);
    pipeline.run(&config.job).await?;

    info!("vmpay sync completed");

    Ok(())
}

async fn init_loader(config: &BigQueryConfig) -> anyhow::Result<BigQueryLoader> {
    let project_id = config.project_id.clone();

    let client = match config.credentials() {
        BigQueryCredentials::Key(key) => {
            BigQueryClient::new_with_key(project_id, key.expose_secret()).await?
        }
        BigQueryCredentials::KeyPath(path) => {
            BigQueryClient::new_with_key_path(project_id, &path.to_string_lossy()).await?
        }
        BigQueryCredentials::ApplicationDefault => BigQueryClient::new_with_adc(project_id).await?,
    };

    Ok(BigQueryLoader::new(client, config.dataset_id.clone()))
}

fn log_config(config: &SyncConfig) {
    debug!(job = ?config.job, "using job config");

    if let Some(source) = &config.source {
        log_source_config(source);
    }
    if let Some(destination) = &config.destination {
        log_destination_config(destination);
    }
    log_pipeline_config(&config.pipeline);
}

fn log_source_config(config: &VmPayConfig) {
    debug!(
        base_url = config.base_url,
        per_page = config.per_page,
        page_delay_ms = config.page_delay_ms,
        request_timeout_secs = config.request_timeout_secs,
        max_attempts = config.retry.max_attempts,
        "using vmpay source config"
    );
}

fn log_destination_config(config: &BigQueryConfig) {
    let credentials = match config.credentials() {
        BigQueryCredentials::Key(_) => "service account key",
        BigQueryCredentials::KeyPath(_) => "service account key file",
        BigQueryCredentials::ApplicationDefault => "application default credentials",
    };

    debug!(
        project_id = config.project_id,
        dataset_id = config.dataset_id,
        credentials,
        "using bigquery destination config"
    );
}

fn log_pipeline_config(config: &PipelineConfig) {
    debug!(
        data_dir = %config.data_dir.display(),
        recent_days_back = config.recent_days_back,
        backfill_start = %config.backfill_start,
        backfill_step_days = config.backfill_step_days,
        "using pipeline config"
    );
}
