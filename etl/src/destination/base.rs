use std::future::Future;

use serde_json::Value;
use tracing::{info, warn};

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::merge::dedupe_by_id;
use crate::types::{RecordTable, sanitize_column_name};

/// Trait for systems that tables can be upserted into.
///
/// An upsert merges rows by id: existing rows with a matching id are updated and the
/// others are inserted. Running the same upsert twice must leave the destination unchanged.
pub trait Destination {
    /// Returns the name of the destination.
    fn name() -> &'static str;

    /// Upserts `table` into the destination table `table_name`, matching rows on `id_column`.
    ///
    /// Column names are sanitized before loading, so `id_column` may be given in either
    /// form. An empty table is a no-op.
    fn upsert_table(
        &self,
        table_name: &str,
        id_column: &str,
        table: RecordTable,
    ) -> impl Future<Output = EtlResult<UpsertReport>> + Send;
}

/// Outcome of one upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub table_name: String,
    /// Rows sent to the destination after filtering and deduplication.
    pub rows_loaded: usize,
    pub dropped_missing_ids: usize,
    pub dropped_duplicates: usize,
    /// Rows inserted or updated, as reported by the destination.
    pub affected_rows: u64,
    pub created_table: bool,
    pub added_columns: usize,
}

impl UpsertReport {
    pub fn empty(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            ..Default::default()
        }
    }
}

/// A table ready to be merged: sanitized names, one row per non-empty id.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTable {
    pub table: RecordTable,
    pub id_column: String,
    pub dropped_missing_ids: usize,
    pub dropped_duplicates: usize,
}

/// Sanitizes column names, validates the id column and drops rows a merge cannot handle.
///
/// Rows without an id are removed, and of rows sharing an id only the last one is kept since
/// a `MERGE` fails when several source rows match the same target row.
pub fn prepare_upsert(
    table_name: &str,
    id_column: &str,
    mut table: RecordTable,
) -> EtlResult<PreparedTable> {
    table.sanitize_column_names();
    let id_column = sanitize_column_name(id_column);

    let Some(id_index) = table.column_index(&id_column) else {
        bail!(
            ErrorKind::ValidationError,
            "Id column not found in table",
            format!(
                "table `{table_name}` has no column `{id_column}`, columns are {:?}",
                table.columns()
            )
        );
    };

    let before = table.len();
    table.retain_rows(|row| match &row[id_index] {
        Value::Null => false,
        Value::String(id) => !id.trim().is_empty(),
        _ => true,
    });
    let dropped_missing_ids = before - table.len();
    if dropped_missing_ids > 0 {
        warn!(table = table_name, rows = dropped_missing_ids, "dropped rows without an id");
    }

    let (table, dropped_duplicates) = dedupe_by_id(table, &id_column)?;
    if dropped_duplicates > 0 {
        info!(
            table = table_name,
            rows = dropped_duplicates,
            "dropped duplicate ids, keeping the last row"
        );
    }

    Ok(PreparedTable {
        table,
        id_column,
        dropped_missing_ids,
        dropped_duplicates,
    })
}
