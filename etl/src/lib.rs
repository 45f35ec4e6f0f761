//! Batch sync of VM Pay data into BigQuery.
//!
//! Records are fetched from the VM Pay REST API ([`source`]), flattened into tables
//! ([`flatten`]), staged as CSV files ([`csv_io`]), deduplicated ([`merge`]) and upserted
//! into BigQuery with `MERGE` statements ([`bigquery`]). The [`pipeline`] module wires these
//! steps into the jobs run by the sync binary.

mod macros;

pub mod bigquery;
pub mod csv_io;
pub mod destination;
pub mod error;
pub mod flatten;
pub mod merge;
pub mod pipeline;
pub mod schema;
pub mod source;
pub mod types;
