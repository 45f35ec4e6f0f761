use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::warn;

use crate::schema::TableRules;
use crate::types::{Cell, ColumnSchema, ColumnType, RecordTable, TableRow, TableSchema};

/// Columns holding a list of scalars, stored as one comma-separated string.
const JOINED_LIST_COLUMNS: &[&str] = &["tags"];
/// Columns holding a list of `{"value": ...}` objects, stored as their joined values.
const JOINED_VALUE_LIST_COLUMNS: &[&str] = &["additional_barcodes"];
const LIST_SEPARATOR: &str = ", ";

static NULL: Value = Value::Null;

/// Naive formats accepted for timestamps without an offset; they are read as UTC.
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parses an ISO 8601 date-time, with or without offset.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Some(timestamp.with_timezone(&Utc));
    }
    if let Ok(timestamp) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(timestamp.with_timezone(&Utc));
    }

    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

/// Renders a JSON value the way it is stored in a `STRING` column.
///
/// Integral floats drop their fractional part so that identifiers read back as `12.0`
/// are stored as `12`.
pub fn render_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(number) => match (number.as_i64(), number.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if is_integral(f) => format!("{f:.0}"),
            _ => number.to_string(),
        },
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Coerces every row of `table` into the column order and types of `schema`.
///
/// Values that cannot be coerced become null and are reported once per column.
pub fn normalize_rows(
    table: &RecordTable,
    schema: &TableSchema,
    rules: &TableRules,
) -> Vec<TableRow> {
    let sources: Vec<Option<usize>> = schema
        .column_schemas
        .iter()
        .map(|column| table.column_index(&column.name))
        .collect();
    let mut failures: HashMap<&str, usize> = HashMap::new();

    let rows = table
        .rows()
        .iter()
        .map(|row| {
            let values = schema
                .column_schemas
                .iter()
                .zip(&sources)
                .map(|(column, source)| {
                    let value = source.map_or(&NULL, |index| &row[index]);
                    let cell = coerce(value, column, rules.is_string(&column.name));
                    if cell.is_null() && !value.is_null() {
                        *failures.entry(column.name.as_str()).or_default() += 1;
                    }
                    cell
                })
                .collect();

            TableRow::new(values)
        })
        .collect();

    for (column, count) in failures {
        warn!(
            table = %schema.name,
            column,
            count,
            "values could not be coerced and were set to null"
        );
    }

    rows
}

/// Aligns an inferred schema with the schema of an existing destination table.
///
/// Columns the destination already has keep its type. The returned list holds the
/// inferred columns the destination lacks, which must be added before loading.
pub fn reconcile(
    inferred: &TableSchema,
    existing: &TableSchema,
) -> (TableSchema, Vec<ColumnSchema>) {
    let mut missing = Vec::new();

    let column_schemas = inferred
        .column_schemas
        .iter()
        .map(|column| match existing.column(&column.name) {
            Some(current) => ColumnSchema::new(column.name.clone(), current.typ),
            None => {
                missing.push(column.clone());
                column.clone()
            }
        })
        .collect();

    (TableSchema::new(inferred.name.clone(), column_schemas), missing)
}

fn coerce(value: &Value, column: &ColumnSchema, explicit_string: bool) -> Cell {
    match column.typ {
        ColumnType::String => match value {
            Value::Null if explicit_string => Cell::String(String::new()),
            Value::Null => Cell::Null,
            _ => Cell::String(render_column_string(&column.name, value)),
        },
        ColumnType::Int64 => to_i64(value).map_or(Cell::Null, Cell::I64),
        ColumnType::Float64 => to_f64(value).map_or(Cell::Null, Cell::F64),
        ColumnType::Bool => to_bool(value).map_or(Cell::Null, Cell::Bool),
        ColumnType::Timestamp => value
            .as_str()
            .and_then(parse_timestamp)
            .map_or(Cell::Null, Cell::Timestamp),
    }
}

fn render_column_string(column: &str, value: &Value) -> String {
    let joined_list = JOINED_LIST_COLUMNS.contains(&column);
    let joined_values = JOINED_VALUE_LIST_COLUMNS.contains(&column);
    if !(joined_list || joined_values) {
        return render_string(value);
    }

    // Lists read back from CSV arrive as their JSON text.
    let parsed;
    let items = match value {
        Value::Array(items) => items,
        Value::String(text) if text.trim_start().starts_with('[') => {
            match serde_json::from_str::<Value>(text) {
                Ok(Value::Array(items)) => {
                    parsed = items;
                    &parsed
                }
                _ => return text.clone(),
            }
        }
        other => return render_string(other),
    };

    items
        .iter()
        .filter(|item| !item.is_null())
        .map(|item| match item {
            Value::Object(object) if joined_values => {
                object.get("value").map(render_string).unwrap_or_default()
            }
            other => render_string(other),
        })
        .collect::<Vec<_>>()
        .join(LIST_SEPARATOR)
}

fn to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| is_integral(*f)).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| is_integral(*f))
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

fn to_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    parsed.filter(|f| f.is_finite())
}

fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Whether `f` holds a whole number that survives conversion to `i64`.
fn is_integral(f: f64) -> bool {
    f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15
}
