//! BigQuery destination: table management, row streaming and `MERGE` based upserts.

mod client;
mod encoding;
mod loader;
mod merge;

pub use client::{
    BigQueryClient, BigQueryDatasetId, BigQueryProjectId, quote_identifier, sanitize_identifier,
};
pub use encoding::BigQueryTableRow;
pub use loader::{BigQueryLoader, TableStore, staging_table_name};
pub use merge::merge_statement;
