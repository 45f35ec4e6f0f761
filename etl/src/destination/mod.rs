//! Destinations that cashless facts and reference tables are upserted into.
//!
//! This module provides the [`Destination`] trait, the row preparation shared by every
//! implementation and an in-memory destination. The BigQuery destination lives in
//! [`crate::bigquery`].

mod base;
pub mod memory;

pub use base::{Destination, PreparedTable, UpsertReport, prepare_upsert};
