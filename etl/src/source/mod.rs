//! Client for the VM Pay REST API.

mod client;
mod window;

pub use client::{Endpoint, VmPayClient};
pub use window::DateWindow;
