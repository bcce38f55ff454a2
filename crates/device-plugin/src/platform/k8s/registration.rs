use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tonic::transport::Uri;
use tonic::Request;
use tower::service_fn;
use tracing::info;

use super::api::registration_client::RegistrationClient;
use super::api::DevicePluginOptions;
use super::api::RegisterRequest;
use super::PluginError;
use super::API_VERSION;

/// What the plugin announces to the kubelet.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    /// resource name (e.g. "hailo.ai/h10")
    pub resource_name: String,
    /// socket file name relative to the device plugin directory
    pub endpoint: String,
    pub options: DevicePluginOptions,
}

impl ResourceDescriptor {
    pub fn new(resource_name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            resource_name: resource_name.into(),
            endpoint: endpoint.into(),
            options: DevicePluginOptions {
                pre_start_required: false,
                get_preferred_allocation_available: false,
            },
        }
    }

    pub fn to_request(&self) -> RegisterRequest {
        RegisterRequest {
            version: API_VERSION.to_string(),
            endpoint: self.endpoint.clone(),
            resource_name: self.resource_name.clone(),
            options: Some(self.options),
        }
    }
}

/// Register the device plugin with the kubelet.
///
/// A single attempt over an unauthenticated Unix socket, bounded by `timeout`.
pub async fn register_with_kubelet(
    descriptor: &ResourceDescriptor,
    kubelet_socket: &Path,
    timeout: Duration,
) -> Result<(), Report<PluginError>> {
    info!(
        kubelet_socket = %kubelet_socket.display(),
        resource = %descriptor.resource_name,
        endpoint = %descriptor.endpoint,
        "registering device plugin with kubelet"
    );

    let registration = async {
        let channel = connect_uds(kubelet_socket).await?;
        let mut client = RegistrationClient::new(channel);

        client
            .register(Request::new(descriptor.to_request()))
            .await
            .map_err(|status| {
                Report::new(PluginError::RegistrationFailed {
                    message: format!("kubelet rejected resource {}", descriptor.resource_name),
                })
                .attach_printable(format!("kubelet status: {status}"))
            })?;
        Ok::<(), Report<PluginError>>(())
    };

    match tokio::time::timeout(timeout, registration).await {
        Ok(result) => result,
        Err(elapsed) => {
            Err(Report::new(elapsed).change_context(PluginError::RegistrationTimeout { timeout }))
        }
    }
}

/// Open a gRPC channel over a Unix domain socket.
pub async fn connect_uds(socket_path: &Path) -> Result<Channel, Report<PluginError>> {
    let path: PathBuf = socket_path.to_path_buf();

    // the URL is a placeholder, the connector always dials the socket
    Endpoint::from_static("http://tonic")
        .connect_with_connector(service_fn(move |_: Uri| {
            let path = path.clone();
            async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?)) }
        }))
        .await
        .change_context(PluginError::ClientConnection {
            message: format!("unable to dial {}", socket_path.display()),
        })
}
