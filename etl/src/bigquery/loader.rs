use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::bigquery::client::BigQueryClient;
use crate::bigquery::merge::merge_statement;
use crate::destination::{Destination, UpsertReport, prepare_upsert};
use crate::error::EtlResult;
use crate::schema::{TableRules, infer_schema, normalize_rows, reconcile};
use crate::types::{ColumnSchema, RecordTable, TableRow, TableSchema};

/// Prefix of the per-run staging tables merged into the final tables.
const STAGING_TABLE_PREFIX: &str = "temp_";

/// Table operations an upsert runs against a dataset.
///
/// [`BigQueryClient`] is the production implementation.
pub trait TableStore {
    /// Returns the fully qualified, quoted name `` `project.dataset.table` ``.
    fn full_table_name(&self, dataset_id: &str, table_id: &str) -> EtlResult<String>;

    /// Returns the schema of an existing table, or `None` when it does not exist.
    fn table_schema(
        &self,
        dataset_id: &str,
        table_id: &str,
    ) -> impl Future<Output = EtlResult<Option<TableSchema>>> + Send;

    /// Creates a table if it doesn't already exist.
    ///
    /// Returns `true` if the table was created, `false` if it already existed.
    fn create_table_if_missing(
        &self,
        dataset_id: &str,
        table_id: &str,
        column_schemas: &[ColumnSchema],
    ) -> impl Future<Output = EtlResult<bool>> + Send;

    /// Creates a table, replacing any existing table of the same name and its rows.
    fn create_or_replace_table(
        &self,
        dataset_id: &str,
        table_id: &str,
        column_schemas: &[ColumnSchema],
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Adds nullable columns to an existing table.
    fn add_columns(
        &self,
        dataset_id: &str,
        table_id: &str,
        column_schemas: &[ColumnSchema],
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Drops a table if it exists.
    fn drop_table(
        &self,
        dataset_id: &str,
        table_id: &str,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Appends rows laid out as `table_schema` to a table.
    fn stream_rows(
        &mut self,
        dataset_id: &str,
        table_id: &str,
        table_schema: &TableSchema,
        table_rows: Vec<TableRow>,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Executes a DML statement and returns the number of affected rows.
    fn execute_dml(&self, statement: String) -> impl Future<Output = EtlResult<u64>> + Send;
}

#[derive(Debug)]
struct Inner<S> {
    store: S,
    dataset_id: String,
}

/// Upserts tables into a BigQuery dataset through staging tables and `MERGE`.
#[derive(Debug)]
pub struct BigQueryLoader<S = BigQueryClient> {
    inner: Arc<Mutex<Inner<S>>>,
}

impl<S> Clone for BigQueryLoader<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Returns the staging table name of `table_name`.
pub fn staging_table_name(table_name: &str) -> String {
    format!("{STAGING_TABLE_PREFIX}{table_name}")
}

impl<S> BigQueryLoader<S>
where
    S: TableStore + Send + Sync,
{
    pub fn new(store: S, dataset_id: String) -> Self {
        let inner = Inner { store, dataset_id };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Upserts `table` into `table_name`.
    ///
    /// The final table is created from the inferred schema when missing, or extended with
    /// the columns it lacks. Rows are streamed into a fresh staging table which is merged
    /// into the final table and then dropped, also when the merge fails.
    pub async fn upsert(
        &self,
        table_name: &str,
        id_column: &str,
        table: RecordTable,
    ) -> EtlResult<UpsertReport> {
        if table.is_empty() {
            info!(table = table_name, "no rows to upsert");
            return Ok(UpsertReport::empty(table_name));
        }

        let prepared = prepare_upsert(table_name, id_column, table)?;
        if prepared.table.is_empty() {
            warn!(table = table_name, "no rows left to upsert after filtering");
            return Ok(UpsertReport {
                dropped_missing_ids: prepared.dropped_missing_ids,
                dropped_duplicates: prepared.dropped_duplicates,
                ..UpsertReport::empty(table_name)
            });
        }

        let mut inner = self.inner.lock().await;
        let Inner { store, dataset_id } = &mut *inner;
        let dataset_id = dataset_id.as_str();

        let rules = TableRules::for_table(table_name);
        let inferred = infer_schema(table_name, &prepared.table, &rules);

        let (schema, created_table, added_columns) =
            match store.table_schema(dataset_id, table_name).await? {
                Some(existing) => {
                    let (schema, missing) = reconcile(&inferred, &existing);
                    if !missing.is_empty() {
                        store.add_columns(dataset_id, table_name, &missing).await?;
                    }
                    (schema, false, missing.len())
                }
                None => {
                    let created = store
                        .create_table_if_missing(dataset_id, table_name, &inferred.column_schemas)
                        .await?;
                    (inferred, created, 0)
                }
            };

        let staging_table = staging_table_name(table_name);
        store
            .create_or_replace_table(dataset_id, &staging_table, &schema.column_schemas)
            .await?;

        let result = Self::load_and_merge(
            store,
            dataset_id,
            &staging_table,
            &schema,
            &prepared.id_column,
            &prepared.table,
            &rules,
        )
        .await;

        if let Err(drop_err) = store.drop_table(dataset_id, &staging_table).await {
            warn!(table = %staging_table, error = %drop_err, "failed to drop staging table");
        }

        let affected_rows = match result {
            Ok(affected_rows) => affected_rows,
            Err(err) => {
                error!(table = table_name, error = %err, "upsert failed");
                return Err(err);
            }
        };

        info!(
            table = table_name,
            rows = prepared.table.len(),
            affected_rows,
            created_table,
            added_columns,
            "upserted table into bigquery"
        );

        Ok(UpsertReport {
            table_name: table_name.to_string(),
            rows_loaded: prepared.table.len(),
            dropped_missing_ids: prepared.dropped_missing_ids,
            dropped_duplicates: prepared.dropped_duplicates,
            affected_rows,
            created_table,
            added_columns,
        })
    }

    /// Streams the rows into the staging table and merges it into the final table.
    async fn load_and_merge(
        store: &mut S,
        dataset_id: &str,
        staging_table: &str,
        schema: &TableSchema,
        id_column: &str,
        table: &RecordTable,
        rules: &TableRules,
    ) -> EtlResult<u64> {
        let rows = normalize_rows(table, schema, rules);
        store
            .stream_rows(dataset_id, staging_table, schema, rows)
            .await?;

        let final_name = store.full_table_name(dataset_id, &schema.name)?;
        let staging_name = store.full_table_name(dataset_id, staging_table)?;
        let columns: Vec<String> = schema.column_names().map(str::to_string).collect();
        let statement = merge_statement(&final_name, &staging_name, id_column, &columns)?;

        store.execute_dml(statement).await
    }
}

impl<S> Destination for BigQueryLoader<S>
where
    S: TableStore + Send + Sync,
{
    fn name() -> &'static str {
        "bigquery"
    }

    async fn upsert_table(
        &self,
        table_name: &str,
        id_column: &str,
        table: RecordTable,
    ) -> EtlResult<UpsertReport> {
        self.upsert(table_name, id_column, table).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;
    use crate::etl_error;
    use crate::types::ColumnType;

    /// Store that records every operation and answers from canned state.
    #[derive(Debug, Default)]
    struct RecordingStore {
        existing: Option<TableSchema>,
        fail_merge: bool,
        calls: Arc<StdMutex<Vec<String>>>,
    }

    impl RecordingStore {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl TableStore for RecordingStore {
        fn full_table_name(&self, dataset_id: &str, table_id: &str) -> EtlResult<String> {
            BigQueryClient::qualified_table_name("proj", dataset_id, table_id)
        }

        async fn table_schema(
            &self,
            _dataset_id: &str,
            table_id: &str,
        ) -> EtlResult<Option<TableSchema>> {
            self.record(format!("schema {table_id}"));
            Ok(self.existing.clone())
        }

        async fn create_table_if_missing(
            &self,
            _dataset_id: &str,
            table_id: &str,
            _column_schemas: &[ColumnSchema],
        ) -> EtlResult<bool> {
            self.record(format!("create {table_id}"));
            Ok(true)
        }

        async fn create_or_replace_table(
            &self,
            _dataset_id: &str,
            table_id: &str,
            _column_schemas: &[ColumnSchema],
        ) -> EtlResult<()> {
            self.record(format!("replace {table_id}"));
            Ok(())
        }

        async fn add_columns(
            &self,
            _dataset_id: &str,
            table_id: &str,
            column_schemas: &[ColumnSchema],
        ) -> EtlResult<()> {
            let names: Vec<&str> = column_schemas.iter().map(|c| c.name.as_str()).collect();
            self.record(format!("add {table_id} {}", names.join(",")));
            Ok(())
        }

        async fn drop_table(&self, _dataset_id: &str, table_id: &str) -> EtlResult<()> {
            self.record(format!("drop {table_id}"));
            Ok(())
        }

        async fn stream_rows(
            &mut self,
            _dataset_id: &str,
            table_id: &str,
            _table_schema: &TableSchema,
            table_rows: Vec<TableRow>,
        ) -> EtlResult<()> {
            self.record(format!("stream {table_id} {}", table_rows.len()));
            Ok(())
        }

        async fn execute_dml(&self, statement: String) -> EtlResult<u64> {
            let target = statement.lines().next().unwrap_or_default().to_string();
            self.record(target);
            if self.fail_merge {
                return Err(etl_error!(ErrorKind::DestinationQueryFailed, "merge failed"));
            }
            Ok(2)
        }
    }

    fn products() -> RecordTable {
        RecordTable::from_parts(
            vec!["id".to_string(), "name".to_string()],
            vec![
                vec![json!("1"), json!("water")],
                vec![json!("2"), json!("soda")],
                vec![json!(""), json!("orphan")],
            ],
        )
        .unwrap()
    }

    fn calls(store: &RecordingStore) -> Arc<StdMutex<Vec<String>>> {
        Arc::clone(&store.calls)
    }

    #[test]
    fn staging_tables_are_prefixed() {
        assert_eq!(staging_table_name("cashless"), "temp_cashless");
    }

    #[tokio::test]
    async fn creates_missing_tables_and_merges_through_staging() {
        let store = RecordingStore::default();
        let calls = calls(&store);
        let loader = BigQueryLoader::new(store, "vmpay".to_string());

        let report = loader.upsert("products", "id", products()).await.unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            [
                "schema products",
                "create products",
                "replace temp_products",
                "stream temp_products 2",
                "merge `proj.vmpay.products` T",
                "drop temp_products",
            ]
        );
        assert!(report.created_table);
        assert_eq!(report.rows_loaded, 2);
        assert_eq!(report.dropped_missing_ids, 1);
        assert_eq!(report.affected_rows, 2);
    }

    #[tokio::test]
    async fn existing_tables_gain_missing_columns() {
        let store = RecordingStore {
            existing: Some(TableSchema::new(
                "products",
                vec![ColumnSchema::new("id", ColumnType::String)],
            )),
            ..Default::default()
        };
        let calls = calls(&store);
        let loader = BigQueryLoader::new(store, "vmpay".to_string());

        let report = loader.upsert("products", "id", products()).await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls[..2], ["schema products", "add products name"]);
        assert!(!calls.iter().any(|call| call.starts_with("create")));
        assert!(!report.created_table);
        assert_eq!(report.added_columns, 1);
    }

    #[tokio::test]
    async fn staging_is_dropped_when_the_merge_fails() {
        let store = RecordingStore {
            fail_merge: true,
            ..Default::default()
        };
        let calls = calls(&store);
        let loader = BigQueryLoader::new(store, "vmpay".to_string());

        let err = loader.upsert("products", "id", products()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DestinationQueryFailed);
        assert_eq!(calls.lock().unwrap().last().unwrap(), "drop temp_products");
    }

    #[tokio::test]
    async fn empty_tables_touch_nothing() {
        let store = RecordingStore::default();
        let calls = calls(&store);
        let loader = BigQueryLoader::new(store, "vmpay".to_string());

        let report = loader
            .upsert("products", "id", RecordTable::new(vec!["id".to_string()]))
            .await
            .unwrap();

        assert_eq!(report, UpsertReport::empty("products"));
        assert!(calls.lock().unwrap().is_empty());
    }
}
