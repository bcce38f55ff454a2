//! Device domain: the accelerator model, the catalog contract and the
//! in-memory registry the plugin serves from.

pub mod catalog;
pub mod device;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod registry;

pub use catalog::CatalogError;
pub use catalog::DeviceCatalog;
pub use device::Device;
pub use device::DeviceHealth;
pub use registry::DeviceRegistry;
