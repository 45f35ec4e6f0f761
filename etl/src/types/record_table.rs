use std::collections::HashMap;

use serde_json::Value;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};

/// Rows of loosely typed JSON values sharing one ordered list of columns.
///
/// Every row has exactly one value per column; absent values are [`Value::Null`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl RecordTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Builds a table from columns and rows, failing when a row width differs from the header.
    pub fn from_parts(columns: Vec<String>, rows: Vec<Vec<Value>>) -> EtlResult<Self> {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row)?;
        }

        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> EtlResult<()> {
        if row.len() != self.columns.len() {
            bail!(
                ErrorKind::InvalidData,
                "Row width does not match the table columns",
                format!("expected {} values, got {}", self.columns.len(), row.len())
            );
        }

        self.rows.push(row);

        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Returns the value at `row` for the column `name`, if both exist.
    pub fn value(&self, row: usize, name: &str) -> Option<&Value> {
        let index = self.column_index(name)?;
        self.rows.get(row).map(|values| &values[index])
    }

    /// Keeps only the rows for which `keep` returns `true`.
    pub fn retain_rows<F>(&mut self, mut keep: F)
    where
        F: FnMut(&[Value]) -> bool,
    {
        self.rows.retain(|row| keep(row));
    }

    /// Moves the rows out, leaving the columns in place.
    pub(crate) fn take_rows(&mut self) -> Vec<Vec<Value>> {
        std::mem::take(&mut self.rows)
    }

    /// Puts back rows obtained from [`RecordTable::take_rows`]; widths are not rechecked.
    pub(crate) fn replace_rows(&mut self, rows: Vec<Vec<Value>>) {
        self.rows = rows;
    }

    /// Renames column `from` to `to`, returning whether `from` existed.
    ///
    /// An existing column already named `to` is dropped first.
    pub fn rename_column(&mut self, from: &str, to: &str) -> bool {
        if from == to {
            return self.column_index(from).is_some();
        }

        let Some(index) = self.column_index(from) else {
            return false;
        };

        self.columns[index] = to.to_string();
        if let Some(shadowed) = self
            .columns
            .iter()
            .enumerate()
            .position(|(i, column)| i != index && column == to)
        {
            self.remove_column(shadowed);
        }

        true
    }

    /// Replaces `.` with `_` in every column name.
    ///
    /// When two columns collapse onto the same name the first one is kept and its nulls
    /// are filled from the later ones.
    pub fn sanitize_column_names(&mut self) {
        let mut first_by_name: HashMap<String, usize> = HashMap::new();
        let mut duplicates = Vec::new();

        for index in 0..self.columns.len() {
            let sanitized = sanitize_column_name(&self.columns[index]);
            match first_by_name.get(&sanitized) {
                Some(&first) => duplicates.push((first, index)),
                None => {
                    first_by_name.insert(sanitized.clone(), index);
                }
            }
            self.columns[index] = sanitized;
        }

        for &(first, duplicate) in &duplicates {
            for row in &mut self.rows {
                if row[first].is_null() {
                    row[first] = std::mem::take(&mut row[duplicate]);
                }
            }
        }

        for &(_, duplicate) in duplicates.iter().rev() {
            self.remove_column(duplicate);
        }
    }

    /// Concatenates tables vertically over the union of their columns.
    ///
    /// Columns keep the order in which they are first seen; cells for columns a table
    /// lacks are null.
    pub fn concat<I>(tables: I) -> RecordTable
    where
        I: IntoIterator<Item = RecordTable>,
    {
        let mut result = RecordTable::default();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for table in tables {
            let mapping: Vec<usize> = table
                .columns
                .iter()
                .map(|column| {
                    *positions.entry(column.clone()).or_insert_with(|| {
                        result.columns.push(column.clone());
                        for row in &mut result.rows {
                            row.push(Value::Null);
                        }
                        result.columns.len() - 1
                    })
                })
                .collect();

            for row in table.rows {
                let mut merged = vec![Value::Null; result.columns.len()];
                for (value, &target) in row.into_iter().zip(&mapping) {
                    merged[target] = value;
                }
                result.rows.push(merged);
            }
        }

        result
    }

    fn remove_column(&mut self, index: usize) {
        self.columns.remove(index);
        for row in &mut self.rows {
            row.remove(index);
        }
    }
}

/// Returns `name` with every `.` replaced by `_`.
pub fn sanitize_column_name(name: &str) -> String {
    name.replace('.', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(columns: &[&str], rows: Vec<Vec<Value>>) -> RecordTable {
        RecordTable::from_parts(columns.iter().map(|c| c.to_string()).collect(), rows).unwrap()
    }

    #[test]
    fn rejects_rows_with_wrong_width() {
        let mut table = RecordTable::new(vec!["id".to_string()]);
        let err = table.push_row(vec![json!(1), json!(2)]).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn concat_unions_columns_in_first_seen_order() {
        let first = table(&["id", "a"], vec![vec![json!(1), json!("x")]]);
        let second = table(&["b", "id"], vec![vec![json!(true), json!(2)]]);

        let merged = RecordTable::concat([first, second]);

        assert_eq!(merged.columns(), ["id", "a", "b"]);
        assert_eq!(
            merged.rows(),
            [
                vec![json!(1), json!("x"), Value::Null],
                vec![json!(2), Value::Null, json!(true)],
            ]
        );
    }

    #[test]
    fn rename_replaces_shadowed_column() {
        let mut t = table(
            &["id", "transaction_id", "value"],
            vec![vec![json!("7"), json!("old"), json!(1.5)]],
        );

        assert!(t.rename_column("id", "transaction_id"));
        assert_eq!(t.columns(), ["transaction_id", "value"]);
        assert_eq!(t.value(0, "transaction_id"), Some(&json!("7")));
        assert!(!t.rename_column("missing", "other"));
    }

    #[test]
    fn sanitize_merges_colliding_columns() {
        let mut t = table(
            &["client.id", "client_id", "name"],
            vec![
                vec![json!("1"), Value::Null, json!("a")],
                vec![Value::Null, json!("2"), json!("b")],
            ],
        );

        t.sanitize_column_names();

        assert_eq!(t.columns(), ["client_id", "name"]);
        assert_eq!(t.value(0, "client_id"), Some(&json!("1")));
        assert_eq!(t.value(1, "client_id"), Some(&json!("2")));
    }
}
