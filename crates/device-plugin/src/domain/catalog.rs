use core::error::Error;

use error_stack::Report;

use super::device::Device;

/// Errors raised while enumerating device nodes.
#[derive(Debug, derive_more::Display)]
pub enum CatalogError {
    #[display("Device directory is not readable: {path}")]
    DirectoryUnreadable { path: String },
    #[display("Invalid device pattern: {pattern}")]
    InvalidPattern { pattern: String },
    #[display("Failed to read device entry: {message}")]
    EntryUnreadable { message: String },
}

impl Error for CatalogError {}

/// Source of the accelerator devices present on this host.
///
/// `scan` returning an empty list is a successful scan; callers decide
/// whether zero devices is acceptable. `is_healthy` must stay cheap
/// (a single stat) as it is polled by the health monitor.
pub trait DeviceCatalog: Send + Sync {
    fn scan(&self) -> Result<Vec<Device>, Report<CatalogError>>;

    fn is_healthy(&self, device: &Device) -> bool;
}
