//! Flattening of nested API records into a [`RecordTable`].

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::types::RecordTable;

/// Separator joining the keys of nested objects into a column name.
pub const KEY_SEPARATOR: char = '.';

/// Turns each top-level object of `records` into one row.
///
/// Nested objects are expanded into `parent.child` columns while arrays and scalars stay
/// as leaf values. Columns appear in the order they are first seen across all records.
pub fn flatten_records(records: &[Value]) -> EtlResult<RecordTable> {
    let mut columns: Vec<String> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut flat_rows: Vec<Vec<(usize, Value)>> = Vec::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        let Value::Object(object) = record else {
            bail!(
                ErrorKind::InvalidData,
                "API record is not a JSON object",
                format!("record {index} is {}", value_kind(record))
            );
        };

        let mut leaves = Vec::new();
        flatten_object(object, None, &mut leaves);

        let row = leaves
            .into_iter()
            .map(|(key, value)| {
                let position = *positions.entry(key.clone()).or_insert_with(|| {
                    columns.push(key);
                    columns.len() - 1
                });
                (position, value)
            })
            .collect();
        flat_rows.push(row);
    }

    let width = columns.len();
    let mut table = RecordTable::new(columns);
    for flat_row in flat_rows {
        let mut row = vec![Value::Null; width];
        for (position, value) in flat_row {
            row[position] = value;
        }
        table.push_row(row)?;
    }

    Ok(table)
}

fn flatten_object(
    object: &Map<String, Value>,
    prefix: Option<&str>,
    out: &mut Vec<(String, Value)>,
) {
    for (key, value) in object {
        let name = match prefix {
            Some(prefix) => format!("{prefix}{KEY_SEPARATOR}{key}"),
            None => key.clone(),
        };

        match value {
            Value::Object(nested) if !nested.is_empty() => flatten_object(nested, Some(&name), out),
            // An empty object carries no columns of its own.
            Value::Object(_) => out.push((name, Value::Null)),
            leaf => out.push((name, leaf.clone())),
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
