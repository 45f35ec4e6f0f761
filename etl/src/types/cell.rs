use std::fmt;

use chrono::{DateTime, Utc};

/// A typed value ready to be written to the warehouse.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    String(String),
    I64(i64),
    F64(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

/// Column types supported by the warehouse tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    String,
    Int64,
    Float64,
    Bool,
    Timestamp,
}

impl ColumnType {
    /// Returns the BigQuery standard SQL name of the type.
    pub fn as_bigquery(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Int64 => "int64",
            ColumnType::Float64 => "float64",
            ColumnType::Bool => "bool",
            ColumnType::Timestamp => "timestamp",
        }
    }

    /// Maps a type name reported by BigQuery back to a [`ColumnType`].
    ///
    /// Legacy aliases (`INTEGER`, `FLOAT`, `BOOLEAN`) are accepted. Returns `None` for types
    /// this pipeline never creates.
    pub fn from_bigquery(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "STRING" => Some(ColumnType::String),
            "INT64" | "INTEGER" => Some(ColumnType::Int64),
            "FLOAT64" | "FLOAT" => Some(ColumnType::Float64),
            "BOOL" | "BOOLEAN" => Some(ColumnType::Bool),
            "TIMESTAMP" => Some(ColumnType::Timestamp),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_bigquery())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bigquery_names_round_trip_including_legacy_aliases() {
        assert_eq!(ColumnType::from_bigquery("INTEGER"), Some(ColumnType::Int64));
        assert_eq!(ColumnType::from_bigquery("float"), Some(ColumnType::Float64));
        assert_eq!(ColumnType::from_bigquery("BOOLEAN"), Some(ColumnType::Bool));
        assert_eq!(
            ColumnType::from_bigquery(ColumnType::Timestamp.as_bigquery()),
            Some(ColumnType::Timestamp)
        );
        assert_eq!(ColumnType::from_bigquery("NUMERIC"), None);
    }
}
