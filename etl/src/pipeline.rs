//! Jobs of the sync binary, built on the VM Pay client, the CSV files of the data
//! directory and a [`Destination`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Days, NaiveDate, NaiveTime, Utc};
use config::shared::{JobConfig, PipelineConfig};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::bail;
use crate::csv_io::{read_table, write_table};
use crate::destination::{Destination, UpsertReport};
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::flatten::flatten_records;
use crate::merge::{MergeSummary, RAW_ID_COLUMN, TRANSACTION_ID_COLUMN, merge_history};
use crate::schema::TableRules;
use crate::source::{DateWindow, Endpoint, VmPayClient};

const RAW_CSV_DIR: &str = "raw_csv_outputs";
const HISTORY_DIR: &str = "historical_cashless";
const CASHLESS_FULL_FILE: &str = "cashless_facts_full.csv";
const RECENT_CASHLESS_FILE: &str = "cashless_data.csv";

pub const CASHLESS_TABLE: &str = "cashless";

/// A warehouse table fed by one VM Pay endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub endpoint: Endpoint,
    pub id_column: &'static str,
}

impl TableSpec {
    /// CSV file loaded into this table by [`Pipeline::load_csvs`].
    pub fn csv_path(&self, data_dir: &Path) -> PathBuf {
        if self.name == CASHLESS_TABLE {
            data_dir.join(CASHLESS_FULL_FILE)
        } else {
            data_dir.join(RAW_CSV_DIR).join(format!("{}.csv", self.name))
        }
    }

    pub fn rules(&self) -> TableRules {
        TableRules::for_table(self.name)
    }
}

const fn reference(name: &'static str, endpoint: Endpoint) -> TableSpec {
    TableSpec {
        name,
        endpoint,
        id_column: RAW_ID_COLUMN,
    }
}

/// Every table the pipeline maintains, cashless facts first.
pub const TABLES: [TableSpec; 6] = [
    TableSpec {
        name: CASHLESS_TABLE,
        endpoint: Endpoint::CashlessFacts,
        id_column: TRANSACTION_ID_COLUMN,
    },
    reference("categories", Endpoint::Categories),
    reference("clients", Endpoint::Clients),
    reference("locations", Endpoint::Locations),
    reference("manufacturers", Endpoint::Manufacturers),
    reference("products", Endpoint::Products),
];

/// The reference tables, fetched without date windows.
pub fn reference_tables() -> impl Iterator<Item = &'static TableSpec> {
    TABLES.iter().filter(|spec| spec.name != CASHLESS_TABLE)
}

/// Outcome of [`Pipeline::load_csvs`].
#[derive(Debug, Default)]
pub struct LoadSummary {
    pub succeeded: Vec<UpsertReport>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, EtlError)>,
}

impl LoadSummary {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Outcome of [`Pipeline::backfill`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackfillSummary {
    pub written: usize,
    pub skipped_existing: usize,
    pub empty: usize,
}

/// Runs the sync jobs against a VM Pay client and a destination.
///
/// Both ends are optional: jobs only working on local files need neither, and a job
/// missing the end it needs fails with a configuration error.
pub struct Pipeline<D> {
    config: PipelineConfig,
    source: Option<VmPayClient>,
    destination: Option<D>,
}

impl<D> Pipeline<D>
where
    D: Destination,
{
    pub fn new(
        config: PipelineConfig,
        source: Option<VmPayClient>,
        destination: Option<D>,
    ) -> Self {
        Self {
            config,
            source,
            destination,
        }
    }

    pub async fn run(&self, job: &JobConfig) -> EtlResult<()> {
        info!(?job, destination = D::name(), "starting job");

        match job {
            JobConfig::DailySync { date } => self.daily_sync(*date).await,
            JobConfig::Extract => self.extract_recent().await,
            JobConfig::Backfill { end } => self.backfill(*end).await.map(|_| ()),
            JobConfig::MergeHistory => self.merge_history().map(|_| ()),
            JobConfig::Load => self.load_job().await,
            JobConfig::Full => self.full().await,
        }
    }

    /// Writes the last `recent_days_back` days of cashless facts and every reference table
    /// to the raw CSV directory.
    pub async fn extract_recent(&self) -> EtlResult<()> {
        let source = self.source()?;
        let raw_dir = self.config.data_dir.join(RAW_CSV_DIR);

        let window = DateWindow::last_days(Utc::now(), self.config.recent_days_back);
        let records = source.fetch_cashless(&window).await?;
        write_records(&raw_dir.join(RECENT_CASHLESS_FILE), &records)?;

        for spec in reference_tables() {
            let records = source.fetch_reference(spec.endpoint).await?;
            write_records(&spec.csv_path(&self.config.data_dir), &records)?;
        }

        Ok(())
    }

    /// Writes one historical cashless file per window from `backfill_start` to `end`
    /// (default now).
    ///
    /// Windows whose file already exists are skipped, so an interrupted backfill resumes
    /// where it stopped. Windows without data write no file.
    pub async fn backfill(&self, end: Option<NaiveDate>) -> EtlResult<BackfillSummary> {
        let source = self.source()?;
        let history_dir = self.config.data_dir.join(HISTORY_DIR);

        let start = self.config.backfill_start.and_time(NaiveTime::MIN).and_utc();
        let end = match end {
            Some(end) => end.and_time(NaiveTime::MIN).and_utc(),
            None => Utc::now(),
        };
        let windows = DateWindow::new(start, end).split(self.config.backfill_step_days);
        let delay = Duration::from_millis(self.config.backfill_delay_ms);

        let mut summary = BackfillSummary::default();
        for (i, window) in windows.iter().enumerate() {
            let path = history_dir.join(format!("cashless_{}.csv", window.file_label()));
            if path.exists() {
                info!(file = %path.display(), "historical file exists, skipping window");
                summary.skipped_existing += 1;
                continue;
            }

            let records = source.fetch_cashless(window).await?;
            if records.is_empty() {
                info!(window = %window.file_label(), "no cashless facts in window");
                summary.empty += 1;
            } else {
                write_records(&path, &records)?;
                summary.written += 1;
            }

            if i + 1 < windows.len() {
                sleep(delay).await;
            }
        }

        info!(
            windows = windows.len(),
            written = summary.written,
            skipped = summary.skipped_existing,
            empty = summary.empty,
            "backfill finished"
        );

        Ok(summary)
    }

    /// Consolidates the historical files into the full cashless file.
    pub fn merge_history(&self) -> EtlResult<MergeSummary> {
        merge_history(
            &self.config.data_dir.join(HISTORY_DIR),
            &self.config.data_dir.join(CASHLESS_FULL_FILE),
        )
    }

    /// Upserts the CSV file of every table. Missing files are skipped and a failing table
    /// does not stop the others.
    pub async fn load_csvs(&self) -> EtlResult<LoadSummary> {
        let destination = self.destination()?;
        let mut summary = LoadSummary::default();

        for spec in &TABLES {
            let path = spec.csv_path(&self.config.data_dir);
            if !path.exists() {
                warn!(
                    table = spec.name,
                    file = %path.display(),
                    "csv file not found, skipping table"
                );
                summary.skipped.push(spec.name.to_string());
                continue;
            }

            let result = match read_table(&path, &spec.rules()) {
                Ok(table) => destination.upsert_table(spec.name, spec.id_column, table).await,
                Err(err) => Err(err),
            };

            match result {
                Ok(report) => summary.succeeded.push(report),
                Err(err) => {
                    error!(table = spec.name, error = %err, "failed to load table");
                    summary.failed.push((spec.name.to_string(), err));
                }
            }
        }

        info!(
            succeeded = summary.succeeded.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "finished loading csv files"
        );

        Ok(summary)
    }

    /// Fetches one day of cashless facts and every reference table and upserts them.
    ///
    /// `date` defaults to yesterday's calendar day in UTC, from `00:00:00Z` up to today's
    /// `00:00:00Z`, not the 24 hours before now. Facts recorded since midnight UTC are left
    /// for the next run.
    ///
    /// Cashless failures are returned. Reference tables are best effort: their failures are
    /// logged and the run goes on.
    pub async fn daily_sync(&self, date: Option<NaiveDate>) -> EtlResult<()> {
        let source = self.source()?;
        let destination = self.destination()?;

        let date = match date {
            Some(date) => date,
            None => yesterday(),
        };
        let window = DateWindow::day(date);

        let records = source.fetch_cashless(&window).await?;
        if records.is_empty() {
            info!(%date, "no cashless facts for day, skipping cashless upsert");
        } else {
            let mut table = flatten_records(&records)?;
            table.rename_column(RAW_ID_COLUMN, TRANSACTION_ID_COLUMN);
            destination
                .upsert_table(CASHLESS_TABLE, TRANSACTION_ID_COLUMN, table)
                .await?;
        }

        let mut failed = 0;
        for spec in reference_tables() {
            if let Err(err) = self.sync_reference(source, destination, spec).await {
                error!(table = spec.name, error = %err, "failed to sync reference table");
                failed += 1;
            }
        }

        info!(%date, failed_reference_tables = failed, "daily sync finished");

        Ok(())
    }

    async fn sync_reference(
        &self,
        source: &VmPayClient,
        destination: &D,
        spec: &TableSpec,
    ) -> EtlResult<UpsertReport> {
        let records = source.fetch_reference(spec.endpoint).await?;
        let table = flatten_records(&records)?;

        destination.upsert_table(spec.name, spec.id_column, table).await
    }

    async fn load_job(&self) -> EtlResult<()> {
        let summary = self.load_csvs().await?;
        if summary.has_failures() {
            let errors: Vec<EtlError> = summary.failed.into_iter().map(|(_, err)| err).collect();
            return Err(errors.into());
        }

        Ok(())
    }

    /// Extracts recent data, consolidates the history when there is one and loads
    /// everything.
    async fn full(&self) -> EtlResult<()> {
        self.extract_recent().await?;

        if let Err(err) = self.merge_history() {
            warn!(error = %err, "historical merge failed, loading existing files");
        }

        self.load_job().await
    }

    fn source(&self) -> EtlResult<&VmPayClient> {
        match &self.source {
            Some(source) => Ok(source),
            None => bail!(
                ErrorKind::ConfigError,
                "Job requires the VM Pay source configuration"
            ),
        }
    }

    fn destination(&self) -> EtlResult<&D> {
        match &self.destination {
            Some(destination) => Ok(destination),
            None => bail!(
                ErrorKind::ConfigError,
                "Job requires the destination configuration"
            ),
        }
    }
}

impl<D> fmt::Debug for Pipeline<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("source", &self.source)
            .field("has_destination", &self.destination.is_some())
            .finish()
    }
}

fn yesterday() -> NaiveDate {
    let today = Utc::now().date_naive();
    today.checked_sub_days(Days::new(1)).unwrap_or(today)
}

fn write_records(path: &Path, records: &[Value]) -> EtlResult<()> {
    let table = flatten_records(records)?;
    write_table(path, &table)?;
    info!(file = %path.display(), rows = table.len(), "wrote csv file");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::memory::MemoryDestination;
    use config::shared::{RetryConfig, VmPayConfig};
    use secrecy::SecretString;
    use serde_json::json;
    use std::fs;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer) -> VmPayClient {
        let config = VmPayConfig {
            base_url: server.uri(),
            access_token: SecretString::new("token".to_string()),
            per_page: 100,
            page_delay_ms: 0,
            request_timeout_secs: 5,
            retry: RetryConfig {
                max_attempts: 1,
                initial_delay_ms: 1,
                max_delay_ms: 1,
                backoff_factor: 1.0,
            },
        };
        VmPayClient::new(&config).unwrap()
    }

    fn pipeline_config(data_dir: &Path) -> PipelineConfig {
        PipelineConfig {
            data_dir: data_dir.to_path_buf(),
            recent_days_back: 7,
            backfill_start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            backfill_step_days: 7,
            backfill_delay_ms: 0,
        }
    }

    async fn mount_json(server: &MockServer, endpoint: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/{endpoint}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[test]
    fn table_specs_point_at_their_files() {
        let data_dir = Path::new("data");

        assert_eq!(TABLES[0].csv_path(data_dir), data_dir.join("cashless_facts_full.csv"));
        assert_eq!(TABLES[0].id_column, "transaction_id");
        assert_eq!(
            TABLES[5].csv_path(data_dir),
            data_dir.join("raw_csv_outputs").join("products.csv")
        );
        assert_eq!(reference_tables().count(), 5);
    }

    #[tokio::test]
    async fn extract_writes_cashless_and_reference_files() {
        let server = MockServer::start().await;
        mount_json(&server, "cashless_facts", json!([{"id": 1, "client": {"id": 7}}])).await;
        for spec in reference_tables() {
            mount_json(&server, spec.endpoint.path(), json!([{"id": 1, "name": spec.name}])).await;
        }
        let dir = tempfile::tempdir().unwrap();
        let pipeline: Pipeline<MemoryDestination> =
            Pipeline::new(pipeline_config(dir.path()), Some(source(&server)), None);

        pipeline.extract_recent().await.unwrap();

        let cashless =
            fs::read_to_string(dir.path().join("raw_csv_outputs/cashless_data.csv")).unwrap();
        assert_eq!(cashless, "id,client.id\n1,7\n");
        let products = fs::read_to_string(dir.path().join("raw_csv_outputs/products.csv")).unwrap();
        assert_eq!(products, "id,name\n1,products\n");
    }

    #[tokio::test]
    async fn backfill_skips_existing_and_empty_windows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cashless_facts"))
            .and(query_param("start_date", "2025-01-01T00:00:00Z"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cashless_facts"))
            .and(query_param("start_date", "2025-01-08T00:00:00Z"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 2}])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cashless_facts"))
            .and(query_param("start_date", "2025-01-15T00:00:00Z"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let history = dir.path().join("historical_cashless");
        fs::create_dir_all(&history).unwrap();
        fs::write(history.join("cashless_2025-01-01_to_2025-01-08.csv"), "id\n1\n").unwrap();

        let pipeline: Pipeline<MemoryDestination> =
            Pipeline::new(pipeline_config(dir.path()), Some(source(&server)), None);
        let summary = pipeline
            .backfill(NaiveDate::from_ymd_opt(2025, 1, 20))
            .await
            .unwrap();

        assert_eq!(
            summary,
            BackfillSummary {
                written: 1,
                skipped_existing: 1,
                empty: 1
            }
        );
        let written =
            fs::read_to_string(history.join("cashless_2025-01-08_to_2025-01-15.csv")).unwrap();
        assert_eq!(written, "id\n2\n");
        assert!(!history.join("cashless_2025-01-15_to_2025-01-20.csv").exists());
    }

    #[tokio::test]
    async fn load_continues_after_a_failing_table() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw_csv_outputs");
        fs::create_dir_all(&raw).unwrap();
        fs::write(
            dir.path().join("cashless_facts_full.csv"),
            "transaction_id,value\n10,2.5\n10,3.5\n11,1.0\n",
        )
        .unwrap();
        fs::write(raw.join("clients.csv"), "name\nno id here\n").unwrap();
        fs::write(raw.join("products.csv"), "id,barcode\n1,007\n").unwrap();

        let destination = MemoryDestination::new();
        let pipeline = Pipeline::new(pipeline_config(dir.path()), None, Some(destination.clone()));

        let summary = pipeline.load_csvs().await.unwrap();

        assert_eq!(summary.succeeded.len(), 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "clients");
        assert_eq!(summary.failed[0].1.kind(), ErrorKind::ValidationError);
        assert_eq!(summary.skipped, ["categories", "locations", "manufacturers"]);
        assert_eq!(destination.table("cashless").await.unwrap().len(), 2);
        let products = destination.table("products").await.unwrap();
        assert_eq!(products.value(0, "barcode"), Some(&json!("007")));

        let err = pipeline.run(&JobConfig::Load).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn daily_sync_upserts_cashless_and_tolerates_reference_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cashless_facts"))
            .and(query_param("start_date", "2025-03-10T00:00:00Z"))
            .and(query_param("end_date", "2025-03-11T00:00:00Z"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 1, "value": 2.0, "occurred_at": "2025-03-10T10:00:00Z"},
                {"id": 2, "value": 4.0, "occurred_at": "2025-03-10T11:00:00Z"}
            ])))
            .mount(&server)
            .await;
        mount_json(&server, "categories", json!([{"id": 3, "name": "drinks"}])).await;
        Mock::given(method("GET"))
            .and(path("/clients"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount_json(&server, "locations", json!([])).await;
        mount_json(&server, "manufacturers", json!([])).await;
        mount_json(&server, "products", json!([{"id": 5, "category": {"id": 3}}])).await;

        let dir = tempfile::tempdir().unwrap();
        let destination = MemoryDestination::new();
        let pipeline = Pipeline::new(
            pipeline_config(dir.path()),
            Some(source(&server)),
            Some(destination.clone()),
        );

        pipeline
            .run(&JobConfig::DailySync {
                date: NaiveDate::from_ymd_opt(2025, 3, 10),
            })
            .await
            .unwrap();

        let cashless = destination.table("cashless").await.unwrap();
        assert_eq!(cashless.columns()[0], "transaction_id");
        assert_eq!(cashless.len(), 2);
        let products = destination.table("products").await.unwrap();
        assert_eq!(products.columns(), ["id", "category_id"]);
        assert!(destination.table("clients").await.is_none());
        assert!(!destination.upserts().await.contains(&"clients".to_string()));
    }

    #[tokio::test]
    async fn daily_sync_defaults_to_the_previous_utc_day() {
        let today = Utc::now().date_naive();
        let yesterday = today.pred_opt().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cashless_facts"))
            .and(query_param("start_date", format!("{yesterday}T00:00:00Z")))
            .and(query_param("end_date", format!("{today}T00:00:00Z")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
            .expect(1)
            .mount(&server)
            .await;
        for spec in reference_tables() {
            mount_json(&server, spec.endpoint.path(), json!([])).await;
        }

        let dir = tempfile::tempdir().unwrap();
        let destination = MemoryDestination::new();
        let pipeline = Pipeline::new(
            pipeline_config(dir.path()),
            Some(source(&server)),
            Some(destination.clone()),
        );

        pipeline.daily_sync(None).await.unwrap();

        assert_eq!(destination.table("cashless").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn jobs_without_their_source_fail() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline: Pipeline<MemoryDestination> =
            Pipeline::new(pipeline_config(dir.path()), None, None);

        let err = pipeline.run(&JobConfig::Extract).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
