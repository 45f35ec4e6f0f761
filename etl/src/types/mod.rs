//! Data types flowing through the pipeline.
//!
//! Raw API records are held in a [`RecordTable`] of JSON values until they are normalized
//! into typed [`TableRow`]s that match a [`TableSchema`].

mod cell;
mod record_table;
mod schema;
mod table_row;

pub use cell::*;
pub use record_table::*;
pub use schema::*;
pub use table_row::*;
