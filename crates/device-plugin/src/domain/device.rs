use std::path::PathBuf;

use derive_more::Display;

/// Liveness of a device as reported to the kubelet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum DeviceHealth {
    #[display("Healthy")]
    Healthy,
    #[display("Unhealthy")]
    Unhealthy,
}

impl DeviceHealth {
    pub fn from_probe(healthy: bool) -> Self {
        if healthy {
            Self::Healthy
        } else {
            Self::Unhealthy
        }
    }

    /// Wire representation used by the device plugin API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "Healthy",
            Self::Unhealthy => "Unhealthy",
        }
    }
}

/// An accelerator device node found on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// device node file name, e.g. "hailo0"
    pub id: String,
    /// full host path of the device node
    pub path: PathBuf,
    /// accelerator architecture tag, e.g. "HAILO10H"
    pub architecture: String,
    pub health: DeviceHealth,
}

impl Device {
    pub fn new(
        id: impl Into<String>,
        path: impl Into<PathBuf>,
        architecture: impl Into<String>,
        health: DeviceHealth,
    ) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            architecture: architecture.into(),
            health,
        }
    }
}
