//! Filesystem device catalog: device nodes matching a glob pattern under a
//! device directory.

use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;
use glob::Pattern;
use tracing::debug;
use tracing::warn;

use crate::config::PluginConfig;
use crate::domain::CatalogError;
use crate::domain::Device;
use crate::domain::DeviceCatalog;
use crate::domain::DeviceHealth;

#[derive(Debug, Clone)]
pub struct FsDeviceCatalog {
    device_dir: PathBuf,
    pattern: String,
    architecture: String,
}

impl FsDeviceCatalog {
    pub fn new(
        device_dir: impl Into<PathBuf>,
        pattern: impl Into<String>,
        architecture: impl Into<String>,
    ) -> Self {
        Self {
            device_dir: device_dir.into(),
            pattern: pattern.into(),
            architecture: architecture.into(),
        }
    }

    pub fn from_config(config: &PluginConfig) -> Self {
        Self::new(
            config.device_dir.clone(),
            config.device_pattern.clone(),
            config.architecture.clone(),
        )
    }

    fn full_pattern(&self) -> String {
        // the directory part is literal, only the file pattern may glob
        let dir = Pattern::escape(&self.device_dir.to_string_lossy());
        format!("{}/{}", dir.trim_end_matches('/'), self.pattern)
    }
}

/// A device is usable when its node exists and is a character or block device.
fn is_device_node(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(metadata) => {
            let file_type = metadata.file_type();
            file_type.is_char_device() || file_type.is_block_device()
        }
        Err(e) => {
            debug!(path = %path.display(), "device probe failed: {e}");
            false
        }
    }
}

impl DeviceCatalog for FsDeviceCatalog {
    fn scan(&self) -> Result<Vec<Device>, Report<CatalogError>> {
        let device_dir = self.device_dir.display().to_string();
        fs::read_dir(&self.device_dir)
            .change_context(CatalogError::DirectoryUnreadable {
                path: device_dir.clone(),
            })
            .attach_printable(format!("scanning for {}", self.pattern))?;

        let pattern = self.full_pattern();
        let matches = glob::glob(&pattern).change_context(CatalogError::InvalidPattern {
            pattern: self.pattern.clone(),
        })?;

        let mut devices = Vec::new();
        for entry in matches {
            let path = entry.change_context(CatalogError::EntryUnreadable {
                message: format!("while matching {pattern}"),
            })?;
            let Some(id) = path.file_name().and_then(|name| name.to_str()) else {
                warn!(path = %path.display(), "skipping device with non UTF-8 name");
                continue;
            };
            let health = DeviceHealth::from_probe(is_device_node(&path));
            devices.push(Device::new(
                id.to_string(),
                path.clone(),
                self.architecture.clone(),
                health,
            ));
        }

        debug!(
            device_dir = %device_dir,
            pattern = %self.pattern,
            count = devices.len(),
            "device scan finished"
        );
        Ok(devices)
    }

    fn is_healthy(&self, device: &Device) -> bool {
        is_device_node(&device.path)
    }
}
