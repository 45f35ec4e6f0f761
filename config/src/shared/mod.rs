mod base;
mod destination;
mod job;
mod pipeline;
mod source;
mod sync;

pub use base::ValidationError;
pub use destination::{BigQueryConfig, BigQueryCredentials};
pub use job::JobConfig;
pub use pipeline::PipelineConfig;
pub use source::{RetryConfig, VmPayConfig};
pub use sync::SyncConfig;
