//! Test adapter implementing [`DeviceCatalog`]
//!
//! Lets tests script scan results and flip device health without touching
//! the host filesystem.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::PoisonError;

use error_stack::Report;

use super::catalog::CatalogError;
use super::catalog::DeviceCatalog;
use super::device::Device;
use super::device::DeviceHealth;

/// Mock catalog for testing
#[derive(Debug, Default)]
pub struct MockDeviceCatalog {
    devices: Mutex<Vec<Device>>,
    health: Mutex<HashMap<String, bool>>,
    fail_scan: Mutex<bool>,
}

impl MockDeviceCatalog {
    pub fn new(devices: Vec<Device>) -> Self {
        let health = devices
            .iter()
            .map(|device| (device.id.clone(), device.health == DeviceHealth::Healthy))
            .collect();
        Self {
            devices: Mutex::new(devices),
            health: Mutex::new(health),
            fail_scan: Mutex::new(false),
        }
    }

    /// Catalog whose scan always fails, as with an unreadable device directory
    pub fn failing() -> Self {
        let catalog = Self::default();
        catalog.set_scan_error(true);
        catalog
    }

    pub fn set_scan_error(&self, enabled: bool) {
        *self.fail_scan.lock().unwrap_or_else(PoisonError::into_inner) = enabled;
    }

    /// Change what the next liveness probe reports for a device
    pub fn set_healthy(&self, id: &str, healthy: bool) {
        self.health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), healthy);
    }
}

impl DeviceCatalog for MockDeviceCatalog {
    fn scan(&self) -> Result<Vec<Device>, Report<CatalogError>> {
        if *self.fail_scan.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(Report::new(CatalogError::DirectoryUnreadable {
                path: "mock".to_string(),
            }));
        }
        Ok(self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn is_healthy(&self, device: &Device) -> bool {
        self.health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&device.id)
            .copied()
            .unwrap_or(false)
    }
}
