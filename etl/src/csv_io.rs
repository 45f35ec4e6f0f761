//! Reading and writing [`RecordTable`]s as CSV files.

use std::fs;
use std::path::Path;

use serde_json::{Number, Value};
use tracing::debug;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::schema::TableRules;
use crate::types::{RecordTable, sanitize_column_name};

/// Writes `table` to `path` with a header line, creating parent directories as needed.
///
/// Nulls become empty fields and arrays or objects are written as compact JSON.
pub fn write_table(path: &Path, table: &RecordTable) -> EtlResult<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            etl_error!(
                ErrorKind::IoError,
                "Failed to create CSV output directory",
                parent.display(),
                source: err
            )
        })?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    if !table.columns().is_empty() {
        writer.write_record(table.columns())?;
    }
    for row in table.rows() {
        writer.write_record(row.iter().map(render_field))?;
    }
    writer.flush()?;

    debug!(path = %path.display(), rows = table.len(), "wrote csv file");

    Ok(())
}

/// Reads a CSV file written by [`write_table`] or by earlier runs of the pipeline.
///
/// Empty fields are null. Columns that `rules` mark as strings are kept verbatim so that
/// identifiers with leading zeros survive; every other field is typed with [`parse_field`].
pub fn read_table(path: &Path, rules: &TableRules) -> EtlResult<RecordTable> {
    let mut reader = csv::ReaderBuilder::new().from_path(path)?;

    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let verbatim: Vec<bool> = columns
        .iter()
        .map(|column| rules.is_string(&sanitize_column_name(column)))
        .collect();

    let mut table = RecordTable::new(columns);
    for record in reader.records() {
        let record = record?;
        let row = record
            .iter()
            .zip(&verbatim)
            .map(|(field, &verbatim)| match field {
                "" => Value::Null,
                field if verbatim => Value::String(field.to_string()),
                field => parse_field(field),
            })
            .collect();
        table.push_row(row)?;
    }

    debug!(path = %path.display(), rows = table.len(), "read csv file");

    Ok(table)
}

/// Renders one value as a CSV field.
pub fn render_field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Types a non-empty CSV field.
///
/// Digit strings with a leading zero, and integers too large for `i64`, stay strings since
/// they are codes rather than quantities.
pub fn parse_field(field: &str) -> Value {
    match field {
        "true" | "True" | "TRUE" => return Value::Bool(true),
        "false" | "False" | "FALSE" => return Value::Bool(false),
        _ => {}
    }

    if looks_numeric(field) {
        let digits = field.trim_start_matches(['-', '+']);
        let is_integer_literal = digits.bytes().all(|b| b.is_ascii_digit());

        if is_integer_literal {
            if digits.len() > 1 && digits.starts_with('0') {
                return Value::String(field.to_string());
            }
            return field
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(field.to_string()));
        }

        if let Some(number) = field.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(number);
        }
    }

    if (field.starts_with('[') || field.starts_with('{'))
        && let Ok(value @ (Value::Array(_) | Value::Object(_))) =
            serde_json::from_str::<Value>(field)
    {
        return value;
    }

    Value::String(field.to_string())
}

fn looks_numeric(field: &str) -> bool {
    field.bytes().any(|b| b.is_ascii_digit())
        && field
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'-' | b'+' | b'.' | b'e' | b'E'))
}
