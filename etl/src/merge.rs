//! Deduplication of cashless facts and consolidation of historical extracts.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;

use crate::csv_io::{read_table, write_table};
use crate::error::{ErrorKind, EtlResult};
use crate::schema::{TableRules, parse_timestamp, render_string};
use crate::types::RecordTable;
use crate::{bail, etl_error};

/// Prefix and extension of the weekly historical extracts.
const HISTORY_FILE_PREFIX: &str = "cashless_";
const HISTORY_FILE_EXTENSION: &str = "csv";

/// Column holding the API identifier of a cashless fact.
pub const RAW_ID_COLUMN: &str = "id";
pub const TRANSACTION_ID_COLUMN: &str = "transaction_id";
pub const OCCURRED_AT_COLUMN: &str = "occurred_at";

/// Outcome of [`merge_history`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    pub files: usize,
    pub rows: usize,
    pub duplicates: usize,
}

/// Keeps only the most recent row of each id.
///
/// Rows are stably sorted by `order_column`, read as a timestamp with missing or
/// unparseable values first, and the last row of every id wins. Rows without an id are
/// all kept. Returns the deduplicated table and the number of dropped rows.
pub fn dedupe_latest(
    mut table: RecordTable,
    id_column: &str,
    order_column: &str,
) -> EtlResult<(RecordTable, usize)> {
    let id_index = required_column(&table, id_column)?;
    let order_index = required_column(&table, order_column)?;

    let mut rows = table.take_rows();
    rows.sort_by_cached_key(|row| order_key(&row[order_index]));
    table.replace_rows(rows);

    Ok(keep_last_per_id(table, id_index))
}

/// Keeps the last row of each id in the current row order.
pub fn dedupe_by_id(table: RecordTable, id_column: &str) -> EtlResult<(RecordTable, usize)> {
    let id_index = required_column(&table, id_column)?;

    Ok(keep_last_per_id(table, id_index))
}

/// Combines every `cashless_*.csv` of `input_dir` into `output_path`.
///
/// Files are read in name order, `id` is renamed to `transaction_id` and each transaction
/// is kept once, at its latest `occurred_at`.
pub fn merge_history(input_dir: &Path, output_path: &Path) -> EtlResult<MergeSummary> {
    let files = history_files(input_dir)?;
    if files.is_empty() {
        bail!(
            ErrorKind::InvalidData,
            "No historical cashless files to merge",
            input_dir.display()
        );
    }

    let rules = TableRules::for_table("cashless");
    let mut tables = Vec::with_capacity(files.len());
    for file in &files {
        let table = read_table(file, &rules)?;
        info!(file = %file.display(), rows = table.len(), "read historical cashless file");
        tables.push(table);
    }

    let mut combined = RecordTable::concat(tables);
    let total = combined.len();
    combined.rename_column(RAW_ID_COLUMN, TRANSACTION_ID_COLUMN);

    let (merged, duplicates) = dedupe_latest(combined, TRANSACTION_ID_COLUMN, OCCURRED_AT_COLUMN)?;
    write_table(output_path, &merged)?;

    info!(
        files = files.len(),
        rows = merged.len(),
        duplicates,
        total,
        output = %output_path.display(),
        "merged historical cashless files"
    );

    Ok(MergeSummary {
        files: files.len(),
        rows: merged.len(),
        duplicates,
    })
}

fn history_files(input_dir: &Path) -> EtlResult<Vec<PathBuf>> {
    let entries = fs::read_dir(input_dir).map_err(|err| {
        etl_error!(
            ErrorKind::IoError,
            "Failed to list historical cashless directory",
            input_dir.display(),
            source: err
        )
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_history_file = path.is_file()
            && path.extension().is_some_and(|ext| ext == HISTORY_FILE_EXTENSION)
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(HISTORY_FILE_PREFIX));
        if is_history_file {
            files.push(path);
        }
    }
    files.sort();

    Ok(files)
}

fn required_column(table: &RecordTable, column: &str) -> EtlResult<usize> {
    table.column_index(column).ok_or_else(|| {
        etl_error!(
            ErrorKind::InvalidData,
            "Column required for deduplication is missing",
            format!("column `{column}` not in {:?}", table.columns())
        )
    })
}

fn order_key(value: &Value) -> Option<DateTime<Utc>> {
    value.as_str().and_then(parse_timestamp)
}

fn id_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        other => Some(render_string(other)),
    }
}

fn keep_last_per_id(mut table: RecordTable, id_index: usize) -> (RecordTable, usize) {
    let mut last_seen: HashMap<String, usize> = HashMap::new();
    for (position, row) in table.rows().iter().enumerate() {
        if let Some(id) = id_key(&row[id_index]) {
            last_seen.insert(id, position);
        }
    }

    let before = table.len();
    let mut position = 0;
    table.retain_rows(|row| {
        let keep = id_key(&row[id_index]).is_none_or(|id| last_seen.get(&id) == Some(&position));
        position += 1;
        keep
    });

    let dropped = before - table.len();
    (table, dropped)
}
