use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use gcp_bigquery_client::storage::{ColumnMode, StorageApi};
use gcp_bigquery_client::yup_oauth2::parse_service_account_key;
use gcp_bigquery_client::{
    Client,
    error::BQError,
    model::{
        get_query_results_parameters::GetQueryResultsParameters,
        query_parameter::QueryParameter, query_parameter_type::QueryParameterType,
        query_parameter_value::QueryParameterValue, query_request::QueryRequest,
        query_response::{QueryResponse, ResultSet},
    },
    storage::{ColumnType as StorageColumnType, FieldDescriptor, StreamName, TableDescriptor},
};
use rand::Rng;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::bigquery::encoding::BigQueryTableRow;
use crate::bigquery::loader::TableStore;
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::types::{ColumnSchema, ColumnType, TableRow, TableSchema};
use crate::{bail, etl_error};

/// Maximum number of bytes sent in a single append request.
const MAX_SIZE_BYTES: usize = 9 * 1024 * 1024;
/// Trace identifier attached to Storage Write API requests.
const ETL_TRACE_ID: &str = "vmpay-etl BigQueryClient";

/// Maximum number of retry attempts for transient append errors.
const MAX_RETRY_ATTEMPTS: u32 = 5;
/// Initial backoff delay in milliseconds for exponential backoff.
const INITIAL_BACKOFF_MS: u64 = 500;
/// Maximum backoff delay in milliseconds to cap exponential growth.
const MAX_BACKOFF_MS: u64 = 30_000;

/// How long a query request waits before BigQuery answers with an incomplete job.
const QUERY_TIMEOUT_MS: i32 = 120_000;
/// How long an incomplete query job is polled before giving up.
const QUERY_DEADLINE: Duration = Duration::from_secs(30 * 60);

/// gRPC status codes, as carried by [`BQError::TonicStatusError`].
mod grpc_code {
    pub const DEADLINE_EXCEEDED: i32 = 4;
    pub const NOT_FOUND: i32 = 5;
    pub const PERMISSION_DENIED: i32 = 7;
    pub const RESOURCE_EXHAUSTED: i32 = 8;
    pub const ABORTED: i32 = 10;
    pub const INTERNAL: i32 = 13;
    pub const UNAVAILABLE: i32 = 14;
    pub const UNAUTHENTICATED: i32 = 16;
}

/// BigQuery project identifier.
pub type BigQueryProjectId = String;
/// BigQuery dataset identifier.
pub type BigQueryDatasetId = String;

/// Calculates exponential backoff delay with full jitter.
fn calculate_backoff(attempt: u32) -> Duration {
    let exponential = INITIAL_BACKOFF_MS
        .saturating_mul(1u64 << attempt.min(10))
        .min(MAX_BACKOFF_MS);
    let jitter = rand::thread_rng().gen_range(0..=exponential);

    Duration::from_millis(jitter)
}

/// Checks if an append error is transient and the rows were not persisted.
///
/// Appends go to the default stream, which has no offsets, so errors after which the rows
/// may have been written (deadline exceeded, internal) are not retried. `NOT_FOUND` is
/// retried because a freshly created table takes a moment to accept streamed rows.
fn is_retryable_bq_error(error: &BQError) -> bool {
    match error {
        BQError::TonicTransportError(_) => true,
        BQError::TonicStatusError(status) => matches!(
            status.code() as i32,
            grpc_code::UNAVAILABLE
                | grpc_code::ABORTED
                | grpc_code::RESOURCE_EXHAUSTED
                | grpc_code::NOT_FOUND
        ),
        _ => false,
    }
}

/// Converts a [`BQError`] into an [`EtlError`] with an appropriate kind.
fn bq_error_to_etl_error(err: BQError) -> EtlError {
    let (kind, description) = match &err {
        BQError::InvalidServiceAccountKey(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account key",
        ),
        BQError::InvalidServiceAccountAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account authenticator",
        ),
        BQError::InvalidApplicationDefaultCredentialsAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery application default credentials",
        ),
        BQError::AuthError(_) => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication error",
        ),
        BQError::YupAuthError(_) => (
            ErrorKind::AuthenticationError,
            "BigQuery OAuth authentication error",
        ),
        BQError::NoToken => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication token missing",
        ),

        BQError::RequestError(_) => (
            ErrorKind::DestinationConnectionFailed,
            "BigQuery request failed",
        ),
        BQError::TonicTransportError(_) => {
            (ErrorKind::DestinationIoError, "BigQuery transport error")
        }

        BQError::ResponseError { .. } => {
            (ErrorKind::DestinationQueryFailed, "BigQuery response error")
        }
        BQError::NoDataAvailable => (
            ErrorKind::DestinationQueryFailed,
            "BigQuery result set positioning error",
        ),
        BQError::InvalidColumnIndex { .. } => {
            (ErrorKind::InvalidData, "BigQuery invalid column index")
        }
        BQError::InvalidColumnName { .. } => {
            (ErrorKind::InvalidData, "BigQuery invalid column name")
        }
        BQError::InvalidColumnType { .. } => {
            (ErrorKind::ConversionError, "BigQuery column type mismatch")
        }

        BQError::SerializationError(_) => (
            ErrorKind::SerializationError,
            "BigQuery JSON serialization error",
        ),

        BQError::TonicStatusError(status) => match status.code() as i32 {
            grpc_code::UNAVAILABLE => (ErrorKind::DestinationIoError, "BigQuery unavailable"),
            grpc_code::INTERNAL => (ErrorKind::DestinationIoError, "BigQuery internal error"),
            grpc_code::ABORTED => (ErrorKind::DestinationIoError, "BigQuery operation aborted"),
            grpc_code::DEADLINE_EXCEEDED => {
                (ErrorKind::DestinationIoError, "BigQuery deadline exceeded")
            }
            grpc_code::RESOURCE_EXHAUSTED => {
                (ErrorKind::DestinationIoError, "BigQuery resource exhausted")
            }
            grpc_code::NOT_FOUND => (
                ErrorKind::DestinationQueryFailed,
                "BigQuery entity not found",
            ),
            grpc_code::PERMISSION_DENIED | grpc_code::UNAUTHENTICATED => (
                ErrorKind::AuthenticationError,
                "BigQuery permission denied",
            ),
            _ => (ErrorKind::DestinationQueryFailed, "BigQuery append failed"),
        },

        #[allow(unreachable_patterns)]
        _ => (ErrorKind::DestinationQueryFailed, "BigQuery client error"),
    };

    etl_error!(kind, description, err.to_string(), source: err)
}

impl From<BQError> for EtlError {
    #[track_caller]
    fn from(err: BQError) -> Self {
        bq_error_to_etl_error(err)
    }
}

/// Sanitizes a BigQuery identifier for safe backtick quoting.
///
/// Rejects empty identifiers and identifiers containing control characters. Backticks and
/// backslashes are escaped with a backslash so the value can be wrapped in backticks.
pub fn sanitize_identifier(identifier: &str, context: &str) -> EtlResult<String> {
    if identifier.is_empty() {
        bail!(
            ErrorKind::DestinationTableNameInvalid,
            "Invalid BigQuery identifier",
            format!("{context} cannot be empty")
        );
    }

    if identifier.chars().any(char::is_control) {
        bail!(
            ErrorKind::DestinationTableNameInvalid,
            "Invalid BigQuery identifier",
            format!("{context} contains control characters")
        );
    }

    let mut escaped = String::with_capacity(identifier.len());
    for ch in identifier.chars() {
        match ch {
            '`' => escaped.push_str("\\`"),
            '\\' => escaped.push_str("\\\\"),
            _ => escaped.push(ch),
        }
    }

    Ok(escaped)
}

/// Returns `identifier` sanitized and wrapped in backticks.
pub fn quote_identifier(identifier: &str, context: &str) -> EtlResult<String> {
    sanitize_identifier(identifier, context).map(|escaped| format!("`{escaped}`"))
}

/// Failure of a single append request.
enum AppendFailure {
    /// The request itself failed and may be retried if transient.
    Request(BQError),
    /// BigQuery refused some of the rows.
    RowErrors(EtlError),
}

/// Client for the BigQuery tables of one project.
///
/// Wraps [`gcp_bigquery_client::Client`] with the table management, streaming and query
/// operations the loader needs. All errors are returned as [`EtlError`]s.
pub struct BigQueryClient {
    project_id: BigQueryProjectId,
    client: Client,
}

impl BigQueryClient {
    /// Creates a new [`BigQueryClient`] from a service account key JSON string.
    pub async fn new_with_key(project_id: BigQueryProjectId, sa_key: &str) -> EtlResult<Self> {
        let sa_key = parse_service_account_key(sa_key).map_err(BQError::from)?;
        let client = Client::from_service_account_key(sa_key, false).await?;

        Ok(BigQueryClient { project_id, client })
    }

    /// Creates a new [`BigQueryClient`] from a service account key file.
    pub async fn new_with_key_path(
        project_id: BigQueryProjectId,
        sa_key_path: &str,
    ) -> EtlResult<Self> {
        let client = Client::from_service_account_key_file(sa_key_path).await?;

        Ok(BigQueryClient { project_id, client })
    }

    /// Creates a new [`BigQueryClient`] using Application Default Credentials.
    pub async fn new_with_adc(project_id: BigQueryProjectId) -> EtlResult<Self> {
        let client = Client::from_application_default_credentials().await?;

        Ok(BigQueryClient { project_id, client })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub(crate) fn qualified_table_name(
        project_id: &str,
        dataset_id: &str,
        table_id: &str,
    ) -> EtlResult<String> {
        let project_id = sanitize_identifier(project_id, "BigQuery project id")?;
        let dataset_id = sanitize_identifier(dataset_id, "BigQuery dataset id")?;
        let table_id = sanitize_identifier(table_id, "BigQuery table id")?;

        Ok(format!("`{project_id}.{dataset_id}.{table_id}`"))
    }

    /// Checks whether a table exists in the dataset.
    pub async fn table_exists(&self, dataset_id: &str, table_id: &str) -> EtlResult<bool> {
        let table = self
            .client
            .table()
            .get(&self.project_id, dataset_id, table_id, None)
            .await;

        match table {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(bq_error_to_etl_error(err)),
        }
    }

    async fn append_chunk_with_retry(
        &mut self,
        stream: &StreamName,
        table_descriptor: &TableDescriptor,
        table_rows: &[BigQueryTableRow],
    ) -> EtlResult<usize> {
        let mut attempt = 0;
        loop {
            match self.append_chunk(stream, table_descriptor, table_rows).await {
                Ok(num_processed_rows) => return Ok(num_processed_rows),
                Err(AppendFailure::Request(err))
                    if is_retryable_bq_error(&err) && attempt < MAX_RETRY_ATTEMPTS =>
                {
                    let backoff = calculate_backoff(attempt);
                    attempt += 1;
                    warn!(
                        error = %err,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "transient bigquery append error, retrying"
                    );
                    sleep(backoff).await;
                }
                Err(AppendFailure::Request(err)) => return Err(bq_error_to_etl_error(err)),
                Err(AppendFailure::RowErrors(err)) => return Err(err),
            }
        }
    }

    /// Appends the rows fitting in one request and returns how many were sent.
    async fn append_chunk(
        &mut self,
        stream: &StreamName,
        table_descriptor: &TableDescriptor,
        table_rows: &[BigQueryTableRow],
    ) -> Result<usize, AppendFailure> {
        let (rows, num_processed_rows) =
            StorageApi::create_rows(table_descriptor, table_rows, MAX_SIZE_BYTES);

        let mut response_stream = self
            .client
            .storage_mut()
            .append_rows(stream, rows, ETL_TRACE_ID.to_owned())
            .await
            .map_err(AppendFailure::Request)?;

        while let Some(response) = response_stream.next().await {
            let response =
                response.map_err(|status| AppendFailure::Request(BQError::from(status)))?;

            // Row errors come from the data itself and are never retried.
            if let Some(row_error) = response.row_errors.first() {
                return Err(AppendFailure::RowErrors(etl_error!(
                    ErrorKind::InvalidData,
                    "BigQuery rejected streamed rows",
                    format!(
                        "{} rows rejected, first at index {}: {}",
                        response.row_errors.len(),
                        row_error.index,
                        row_error.message
                    )
                )));
            }
        }

        Ok(num_processed_rows)
    }

    /// Executes a query and returns its first page of results.
    pub async fn query(&self, request: QueryRequest) -> EtlResult<ResultSet> {
        let query_response = self.run_query(request).await?;

        Ok(ResultSet::new_from_query_response(query_response))
    }

    async fn run_query(&self, mut request: QueryRequest) -> EtlResult<QueryResponse> {
        request.timeout_ms = Some(QUERY_TIMEOUT_MS);

        let job = self.client.job();
        let project_id = self.project_id.as_str();
        let query_response = job.query(project_id, request).await?;

        wait_for_query(query_response, QUERY_DEADLINE, |job_id, location| async move {
            let parameters = GetQueryResultsParameters {
                location,
                timeout_ms: Some(QUERY_TIMEOUT_MS),
                ..Default::default()
            };

            job.get_query_results(project_id, &job_id, parameters)
                .await
                .map(QueryResponse::from)
        })
        .await
    }

    /// Builds the Storage Write API descriptor of a schema.
    ///
    /// Timestamps are sent as strings, which BigQuery converts on ingestion.
    pub fn table_descriptor(table_schema: &TableSchema) -> TableDescriptor {
        let field_descriptors = (1..)
            .zip(&table_schema.column_schemas)
            .map(|(number, column_schema)| {
                let typ = match column_schema.typ {
                    ColumnType::String | ColumnType::Timestamp => StorageColumnType::String,
                    ColumnType::Int64 => StorageColumnType::Int64,
                    ColumnType::Float64 => StorageColumnType::Double,
                    ColumnType::Bool => StorageColumnType::Bool,
                };

                FieldDescriptor {
                    number,
                    name: column_schema.name.clone(),
                    typ,
                    mode: ColumnMode::Nullable,
                }
            })
            .collect();

        TableDescriptor { field_descriptors }
    }

    /// Generates the SQL column specification of a `CREATE TABLE` statement.
    pub(crate) fn create_columns_spec(column_schemas: &[ColumnSchema]) -> EtlResult<String> {
        let columns = column_schemas
            .iter()
            .map(Self::column_spec)
            .collect::<EtlResult<Vec<_>>>()?
            .join(",");

        Ok(format!("({columns})"))
    }

    pub(crate) fn add_columns_statement(
        full_table_name: &str,
        column_schemas: &[ColumnSchema],
    ) -> EtlResult<String> {
        let additions = column_schemas
            .iter()
            .map(|column_schema| {
                Self::column_spec(column_schema)
                    .map(|spec| format!("add column if not exists {spec}"))
            })
            .collect::<EtlResult<Vec<_>>>()?
            .join(", ");

        Ok(format!("alter table {full_table_name} {additions}"))
    }

    fn column_spec(column_schema: &ColumnSchema) -> EtlResult<String> {
        let column_name = quote_identifier(&column_schema.name, "BigQuery column name")?;

        Ok(format!("{column_name} {}", column_schema.typ.as_bigquery()))
    }
}

impl TableStore for BigQueryClient {
    fn full_table_name(&self, dataset_id: &str, table_id: &str) -> EtlResult<String> {
        Self::qualified_table_name(&self.project_id, dataset_id, table_id)
    }

    /// Reads the column names and types of an existing table.
    ///
    /// Returns `None` when the table has no columns, which is the case when it does not exist.
    async fn table_schema(
        &self,
        dataset_id: &str,
        table_id: &str,
    ) -> EtlResult<Option<TableSchema>> {
        let project_id = sanitize_identifier(&self.project_id, "BigQuery project id")?;
        let dataset = sanitize_identifier(dataset_id, "BigQuery dataset id")?;
        let query = format!(
            "select column_name, data_type \
             from `{project_id}.{dataset}.INFORMATION_SCHEMA.COLUMNS` \
             where table_name = @table_name order by ordinal_position"
        );

        let mut request = QueryRequest::new(query);
        request.query_parameters = Some(vec![string_parameter("table_name", table_id)]);

        let result_set = self.query(request).await?;

        schema_from_columns(table_id, result_set)
    }

    async fn create_table_if_missing(
        &self,
        dataset_id: &str,
        table_id: &str,
        column_schemas: &[ColumnSchema],
    ) -> EtlResult<bool> {
        if self.table_exists(dataset_id, table_id).await? {
            return Ok(false);
        }

        let full_table_name = self.full_table_name(dataset_id, table_id)?;
        let columns_spec = Self::create_columns_spec(column_schemas)?;

        info!(%full_table_name, "creating table in bigquery");

        let query = format!("create table if not exists {full_table_name} {columns_spec}");
        self.query(QueryRequest::new(query)).await?;

        Ok(true)
    }

    async fn create_or_replace_table(
        &self,
        dataset_id: &str,
        table_id: &str,
        column_schemas: &[ColumnSchema],
    ) -> EtlResult<()> {
        let full_table_name = self.full_table_name(dataset_id, table_id)?;
        let columns_spec = Self::create_columns_spec(column_schemas)?;

        info!(%full_table_name, "creating or replacing table in bigquery");

        let query = format!("create or replace table {full_table_name} {columns_spec}");
        self.query(QueryRequest::new(query)).await?;

        Ok(())
    }

    async fn add_columns(
        &self,
        dataset_id: &str,
        table_id: &str,
        column_schemas: &[ColumnSchema],
    ) -> EtlResult<()> {
        if column_schemas.is_empty() {
            return Ok(());
        }

        let full_table_name = self.full_table_name(dataset_id, table_id)?;
        let query = Self::add_columns_statement(&full_table_name, column_schemas)?;

        info!(
            %full_table_name,
            columns = column_schemas.len(),
            "adding columns to table in bigquery"
        );

        self.query(QueryRequest::new(query)).await?;

        Ok(())
    }

    async fn drop_table(&self, dataset_id: &str, table_id: &str) -> EtlResult<()> {
        let full_table_name = self.full_table_name(dataset_id, table_id)?;

        info!(%full_table_name, "dropping table from bigquery");

        let query = format!("drop table if exists {full_table_name}");
        self.query(QueryRequest::new(query)).await?;

        Ok(())
    }

    /// Streams rows into a table through the default stream of the Storage Write API.
    ///
    /// Rows are sent in chunks under the request size limit. Transient failures of a chunk
    /// are retried with jittered exponential backoff.
    async fn stream_rows(
        &mut self,
        dataset_id: &str,
        table_id: &str,
        table_schema: &TableSchema,
        table_rows: Vec<TableRow>,
    ) -> EtlResult<()> {
        let table_descriptor = Self::table_descriptor(table_schema);
        let table_rows: Vec<BigQueryTableRow> =
            table_rows.into_iter().map(BigQueryTableRow).collect();
        let mut remaining = table_rows.as_slice();

        let default_stream = StreamName::new_default(
            self.project_id.clone(),
            dataset_id.to_string(),
            table_id.to_string(),
        );

        while !remaining.is_empty() {
            let num_processed_rows = self
                .append_chunk_with_retry(&default_stream, &table_descriptor, remaining)
                .await?;

            debug!(table = table_id, rows = num_processed_rows, "appended rows to bigquery");
            remaining = &remaining[num_processed_rows..];
        }

        Ok(())
    }

    async fn execute_dml(&self, statement: String) -> EtlResult<u64> {
        let query_response = self.run_query(QueryRequest::new(statement)).await?;

        affected_rows(&query_response)
    }
}

/// Checks if a REST error is BigQuery reporting a missing entity.
fn is_not_found(error: &BQError) -> bool {
    matches!(error, BQError::ResponseError { error } if error.error.code == 404)
}

/// Builds a table schema from an `INFORMATION_SCHEMA.COLUMNS` listing.
///
/// Column types this pipeline never creates are reported as `STRING`.
fn schema_from_columns(
    table_id: &str,
    mut result_set: ResultSet,
) -> EtlResult<Option<TableSchema>> {
    let mut column_schemas = Vec::new();
    while result_set.next_row() {
        let name = result_set.get_string_by_name("column_name")?.ok_or_else(|| {
            etl_error!(
                ErrorKind::DestinationQueryFailed,
                "Column listing returned a row without a name"
            )
        })?;
        let data_type = result_set.get_string_by_name("data_type")?.unwrap_or_default();
        let typ = ColumnType::from_bigquery(&data_type).unwrap_or_else(|| {
            warn!(
                table = table_id,
                column = %name,
                %data_type,
                "unsupported destination column type, treating as string"
            );
            ColumnType::String
        });
        column_schemas.push(ColumnSchema::new(name, typ));
    }

    if column_schemas.is_empty() {
        return Ok(None);
    }

    Ok(Some(TableSchema::new(table_id, column_schemas)))
}

fn affected_rows(query_response: &QueryResponse) -> EtlResult<u64> {
    match &query_response.num_dml_affected_rows {
        Some(rows) => Ok(rows.parse::<u64>()?),
        None => Ok(0),
    }
}

/// Waits until a query job completes.
///
/// BigQuery answers a query with an incomplete job when it runs past the request timeout.
/// The job is then polled through `poll`, given its id and location, until it completes.
/// Fails once `deadline` has passed with the job still running.
async fn wait_for_query<F, Fut>(
    mut query_response: QueryResponse,
    deadline: Duration,
    mut poll: F,
) -> EtlResult<QueryResponse>
where
    F: FnMut(String, Option<String>) -> Fut,
    Fut: Future<Output = Result<QueryResponse, BQError>>,
{
    let started = Instant::now();

    while query_response.job_complete == Some(false) {
        let job_reference = query_response.job_reference.take().unwrap_or_default();
        let Some(job_id) = job_reference.job_id else {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "BigQuery returned an incomplete query without a job id"
            );
        };

        if started.elapsed() >= deadline {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "BigQuery query did not complete in time",
                format!("job {job_id} still running after {} s", deadline.as_secs())
            );
        }

        debug!(%job_id, "query still running, polling for results");
        query_response = poll(job_id, job_reference.location).await?;
    }

    Ok(query_response)
}

fn string_parameter(name: &str, value: &str) -> QueryParameter {
    QueryParameter {
        name: Some(name.to_string()),
        parameter_type: Some(QueryParameterType {
            r#type: "STRING".to_string(),
            array_type: None,
            struct_types: None,
        }),
        parameter_value: Some(QueryParameterValue {
            value: Some(value.to_string()),
            array_values: None,
            struct_values: None,
        }),
    }
}

impl fmt::Debug for BigQueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigQueryClient")
            .field("project_id", &self.project_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn query_response(value: serde_json::Value) -> QueryResponse {
        serde_json::from_value(value).unwrap()
    }

    fn running_job() -> QueryResponse {
        query_response(json!({
            "jobComplete": false,
            "jobReference": { "jobId": "job_42", "location": "US", "projectId": "proj" }
        }))
    }

    #[test]
    fn sanitizes_identifiers() {
        assert_eq!(sanitize_identifier("cashless", "table").unwrap(), "cashless");
        assert_eq!(sanitize_identifier("we`ird\\", "table").unwrap(), "we\\`ird\\\\");
        assert_eq!(
            sanitize_identifier("", "table").unwrap_err().kind(),
            ErrorKind::DestinationTableNameInvalid
        );
        assert_eq!(
            sanitize_identifier("bad\nname", "table").unwrap_err().kind(),
            ErrorKind::DestinationTableNameInvalid
        );
    }

    #[test]
    fn qualifies_table_names() {
        let name = BigQueryClient::qualified_table_name("proj", "vmpay", "temp_products").unwrap();

        assert_eq!(name, "`proj.vmpay.temp_products`");
    }

    #[test]
    fn builds_create_and_alter_statements() {
        let columns = vec![
            ColumnSchema::new("id", ColumnType::String),
            ColumnSchema::new("value", ColumnType::Float64),
            ColumnSchema::new("occurred_at", ColumnType::Timestamp),
        ];

        assert_eq!(
            BigQueryClient::create_columns_spec(&columns).unwrap(),
            "(`id` string,`value` float64,`occurred_at` timestamp)"
        );
        assert_eq!(
            BigQueryClient::add_columns_statement("`p.d.t`", &columns[1..]).unwrap(),
            "alter table `p.d.t` add column if not exists `value` float64, \
             add column if not exists `occurred_at` timestamp"
        );
    }

    #[test]
    fn descriptor_numbers_fields_in_column_order() {
        let schema = TableSchema::new(
            "t",
            vec![
                ColumnSchema::new("id", ColumnType::String),
                ColumnSchema::new("count", ColumnType::Int64),
                ColumnSchema::new("at", ColumnType::Timestamp),
            ],
        );

        let descriptor = BigQueryClient::table_descriptor(&schema);

        let fields: Vec<_> = descriptor
            .field_descriptors
            .iter()
            .map(|field| (field.number, field.name.as_str()))
            .collect();
        assert_eq!(fields, [(1, "id"), (2, "count"), (3, "at")]);
    }

    #[test]
    fn backoff_is_capped() {
        for attempt in 0..20 {
            assert!(calculate_backoff(attempt) <= Duration::from_millis(MAX_BACKOFF_MS));
        }
    }

    #[tokio::test]
    async fn polls_running_queries_until_they_complete() {
        let mut responses = vec![
            query_response(json!({ "jobComplete": true, "numDmlAffectedRows": "7" })),
            running_job(),
        ];
        let mut polls = Vec::new();

        let completed = wait_for_query(running_job(), Duration::from_secs(60), |job_id, location| {
            polls.push((job_id, location));
            let next = responses.pop().unwrap();
            async move { Ok::<_, BQError>(next) }
        })
        .await
        .unwrap();

        assert_eq!(
            polls,
            [
                ("job_42".to_string(), Some("US".to_string())),
                ("job_42".to_string(), Some("US".to_string())),
            ]
        );
        assert_eq!(affected_rows(&completed).unwrap(), 7);
    }

    #[tokio::test]
    async fn complete_queries_are_not_polled() {
        let done = query_response(json!({ "jobComplete": true }));

        let completed = wait_for_query(done, Duration::ZERO, |_, _| async {
            Err::<QueryResponse, _>(BQError::NoToken)
        })
        .await
        .unwrap();

        assert_eq!(completed.job_complete, Some(true));
        assert_eq!(affected_rows(&completed).unwrap(), 0);
    }

    #[tokio::test]
    async fn running_queries_fail_after_the_deadline() {
        let err = wait_for_query(running_job(), Duration::ZERO, |_, _| async {
            Ok::<_, BQError>(running_job())
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DestinationQueryFailed);
        assert!(err.detail().unwrap().contains("job_42"));
    }

    #[tokio::test]
    async fn running_queries_need_a_job_id() {
        let orphan = query_response(json!({ "jobComplete": false }));

        let err = wait_for_query(orphan, Duration::from_secs(60), |_, _| async {
            Ok::<_, BQError>(running_job())
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DestinationQueryFailed);
    }

    #[test]
    fn not_found_responses_are_recognized() {
        let error: BQError = BQError::ResponseError {
            error: serde_json::from_value(json!({
                "error": { "code": 404, "errors": [], "message": "Not found: Table proj:vmpay.t" }
            }))
            .unwrap(),
        };
        assert!(is_not_found(&error));

        let error: BQError = BQError::ResponseError {
            error: serde_json::from_value(json!({
                "error": { "code": 403, "errors": [], "message": "Access Denied" }
            }))
            .unwrap(),
        };
        assert!(!is_not_found(&error));
        assert_eq!(
            bq_error_to_etl_error(error).kind(),
            ErrorKind::DestinationQueryFailed
        );
    }

    #[test]
    fn reads_schemas_from_column_listings() {
        let listing = query_response(json!({
            "jobComplete": true,
            "schema": { "fields": [
                { "name": "column_name", "type": "STRING" },
                { "name": "data_type", "type": "STRING" }
            ] },
            "rows": [
                { "f": [{ "v": "id" }, { "v": "STRING" }] },
                { "f": [{ "v": "value" }, { "v": "FLOAT64" }] },
                { "f": [{ "v": "tags" }, { "v": "ARRAY<STRING>" }] }
            ]
        }));

        let schema = schema_from_columns("cashless", ResultSet::new_from_query_response(listing))
            .unwrap()
            .unwrap();

        assert_eq!(schema.name, "cashless");
        assert_eq!(
            schema.column_schemas,
            [
                ColumnSchema::new("id", ColumnType::String),
                ColumnSchema::new("value", ColumnType::Float64),
                ColumnSchema::new("tags", ColumnType::String),
            ]
        );
    }

    #[test]
    fn empty_column_listings_mean_missing_tables() {
        let listing = query_response(json!({
            "jobComplete": true,
            "schema": { "fields": [
                { "name": "column_name", "type": "STRING" },
                { "name": "data_type", "type": "STRING" }
            ] }
        }));

        let schema =
            schema_from_columns("cashless", ResultSet::new_from_query_response(listing)).unwrap();

        assert!(schema.is_none());
    }

    #[test]
    fn unparsable_affected_rows_are_errors() {
        let response = query_response(json!({ "jobComplete": true, "numDmlAffectedRows": "many" }));

        assert!(affected_rows(&response).is_err());
    }
}
