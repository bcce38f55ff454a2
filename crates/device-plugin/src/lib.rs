pub mod app;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod platform;
pub mod plugin;

pub use domain::Device;
pub use domain::DeviceCatalog;
pub use domain::DeviceHealth;
pub use domain::DeviceRegistry;
pub use plugin::AcceleratorPlugin;
pub use plugin::PluginState;
