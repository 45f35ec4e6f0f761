//! Mapping of loosely typed records onto typed warehouse columns.

mod infer;
mod normalize;
mod rules;

pub use infer::infer_schema;
pub use normalize::{normalize_rows, parse_timestamp, reconcile, render_string};
pub use rules::TableRules;
