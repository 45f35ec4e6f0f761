use serde_json::Value;

use crate::schema::TableRules;
use crate::schema::normalize::parse_timestamp;
use crate::types::{ColumnSchema, ColumnType, RecordTable, TableSchema};

/// Derives the warehouse schema of `table`.
///
/// Explicit rules win over the data, in the order string, timestamp, numeric. Remaining
/// columns are typed from their non-null values and fall back to `STRING`.
pub fn infer_schema(name: &str, table: &RecordTable, rules: &TableRules) -> TableSchema {
    let column_schemas = table
        .columns()
        .iter()
        .enumerate()
        .map(|(index, column)| {
            let typ = if rules.is_string(column) {
                ColumnType::String
            } else if rules.is_timestamp(column) {
                ColumnType::Timestamp
            } else if rules.is_numeric(column) {
                ColumnType::Float64
            } else {
                infer_column_type(table.rows().iter().map(|row| &row[index]))
            };

            ColumnSchema::new(column.clone(), typ)
        })
        .collect();

    TableSchema::new(name, column_schemas)
}

fn infer_column_type<'a, I>(values: I) -> ColumnType
where
    I: Iterator<Item = &'a Value>,
{
    let mut all_integers = true;
    let mut all_numbers = true;
    let mut all_bools = true;
    let mut all_timestamps = true;
    let mut seen = false;

    for value in values.filter(|value| !value.is_null()) {
        seen = true;
        all_integers &= value.is_i64();
        all_numbers &= value.is_number();
        all_bools &= value.is_boolean();
        all_timestamps &= value.as_str().is_some_and(|s| parse_timestamp(s).is_some());

        if !(all_integers || all_numbers || all_bools || all_timestamps) {
            return ColumnType::String;
        }
    }

    if !seen {
        return ColumnType::String;
    }

    if all_integers {
        ColumnType::Int64
    } else if all_numbers {
        ColumnType::Float64
    } else if all_bools {
        ColumnType::Bool
    } else if all_timestamps {
        ColumnType::Timestamp
    } else {
        ColumnType::String
    }
}
