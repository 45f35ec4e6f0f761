use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::destination::{Destination, UpsertReport, prepare_upsert};
use crate::error::EtlResult;
use crate::merge::dedupe_by_id;
use crate::types::RecordTable;

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, RecordTable>,
    upserts: Vec<String>,
}

/// In-memory destination for testing and development purposes.
///
/// Tables are merged in memory with the same id semantics as the warehouse: an upserted
/// row replaces the stored row with the same id.
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the stored table, if any rows were upserted into it.
    pub async fn table(&self, table_name: &str) -> Option<RecordTable> {
        let inner = self.inner.lock().await;
        inner.tables.get(table_name).cloned()
    }

    /// Returns the names of the tables upserted so far, in call order.
    pub async fn upserts(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.upserts.clone()
    }
}

impl Destination for MemoryDestination {
    fn name() -> &'static str {
        "memory"
    }

    async fn upsert_table(
        &self,
        table_name: &str,
        id_column: &str,
        table: RecordTable,
    ) -> EtlResult<UpsertReport> {
        let mut inner = self.inner.lock().await;
        inner.upserts.push(table_name.to_string());

        if table.is_empty() {
            return Ok(UpsertReport::empty(table_name));
        }

        let prepared = prepare_upsert(table_name, id_column, table)?;
        let rows_loaded = prepared.table.len();

        let created_table = !inner.tables.contains_key(table_name);
        let merged = match inner.tables.remove(table_name) {
            Some(existing) => {
                let combined = RecordTable::concat([existing, prepared.table]);
                dedupe_by_id(combined, &prepared.id_column)?.0
            }
            None => prepared.table,
        };

        info!(
            table = table_name,
            rows = rows_loaded,
            total = merged.len(),
            "upserted rows in memory"
        );
        inner.tables.insert(table_name.to_string(), merged);

        Ok(UpsertReport {
            table_name: table_name.to_string(),
            rows_loaded,
            dropped_missing_ids: prepared.dropped_missing_ids,
            dropped_duplicates: prepared.dropped_duplicates,
            affected_rows: rows_loaded as u64,
            created_table,
            added_columns: 0,
        })
    }
}
