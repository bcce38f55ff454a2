//! Registry of known devices and their last reported health.

use std::sync::PoisonError;
use std::sync::RwLock;

use tokio::sync::watch;
use tracing::debug;
use tracing::warn;

use super::device::Device;
use super::device::DeviceHealth;

/// In-memory device table served by `ListAndWatch`.
///
/// Devices keep the order they were filled in, so every snapshot lists them
/// identically. Each effective change bumps a revision published on a
/// `watch` channel; subscribers re-read [`DeviceRegistry::snapshot`] when woken.
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: RwLock<Vec<Device>>,
    revision: watch::Sender<u64>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            devices: RwLock::new(Vec::new()),
            revision,
        }
    }

    /// Replace the registry content with a fresh catalog scan.
    pub fn fill(&self, devices: Vec<Device>) {
        {
            let mut current = self.devices.write().unwrap_or_else(PoisonError::into_inner);
            *current = devices;
        }
        self.revision.send_modify(|revision| *revision += 1);
    }

    pub fn snapshot(&self) -> Vec<Device> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<Device> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|device| device.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set the health of a known device.
    ///
    /// Returns `true` only when the stored health actually changed. Unknown
    /// identifiers are ignored, the device may have vanished since the scan.
    pub fn apply_transition(&self, id: &str, health: DeviceHealth) -> bool {
        let changed = {
            let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
            match devices.iter_mut().find(|device| device.id == id) {
                None => {
                    warn!(device_id = %id, %health, "ignoring health transition for unknown device");
                    return false;
                }
                Some(device) if device.health == health => false,
                Some(device) => {
                    device.health = health;
                    true
                }
            }
        };

        if changed {
            self.revision.send_modify(|revision| *revision += 1);
            debug!(device_id = %id, %health, revision = self.revision(), "registry updated");
        }
        changed
    }

    /// Receiver woken on every effective change. The current revision is
    /// already marked as seen.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }
}
