pub mod detector;
pub mod health_monitor;

pub use detector::FsDeviceCatalog;
pub use health_monitor::HealthMonitor;
