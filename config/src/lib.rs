//! Configuration loading and shared configuration types for the VM Pay sync job.

pub mod environment;
mod load;
pub mod shared;

pub use load::{LoadConfigError, load_config, load_config_from};
