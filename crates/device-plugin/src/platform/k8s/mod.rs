//! Kubernetes device plugin integration.
//!
//! The kubelet talks to device plugins over gRPC on Unix sockets in its
//! device plugin directory:
//! - [`registration`]: the one-shot `Register` call announcing this plugin
//! - [`device_plugin`]: the `DevicePlugin` service the kubelet consumes

use core::error::Error;
use std::time::Duration;

pub mod device_plugin;
pub mod registration;

#[allow(clippy::doc_markdown)]
pub mod api {
    #![allow(clippy::doc_overindented_list_items)]
    tonic::include_proto!("v1beta1");
}

/// Device plugin API version spoken by this plugin.
pub const API_VERSION: &str = "v1beta1";

/// Errors that abort the device plugin lifecycle.
#[derive(Debug, derive_more::Display)]
pub enum PluginError {
    #[display("Failed to discover devices")]
    DiscoveryFailed,
    #[display("No devices found matching {pattern} in {device_dir}")]
    NoDevicesFound { device_dir: String, pattern: String },
    #[display("Failed to remove stale socket {path}")]
    SocketRemoval { path: String },
    #[display("Failed to listen on socket {path}")]
    SocketBind { path: String },
    #[display("Failed to connect to kubelet: {message}")]
    ClientConnection { message: String },
    #[display("Failed to register with kubelet: {message}")]
    RegistrationFailed { message: String },
    #[display("Kubelet registration timed out after {timeout:?}")]
    RegistrationTimeout { timeout: Duration },
    #[display("Invalid lifecycle transition: {message}")]
    InvalidState { message: String },
}

impl Error for PluginError {}
