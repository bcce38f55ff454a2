use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::select;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::Request;
use tonic::Response;
use tonic::Result as TonicResult;
use tonic::Status;
use tracing::debug;
use tracing::info;

use super::api;
use super::api::device_plugin_server::DevicePlugin;
use super::api::AllocateRequest;
use super::api::AllocateResponse;
use super::api::ContainerAllocateResponse;
use super::api::DevicePluginOptions;
use super::api::DeviceSpec;
use super::api::Empty;
use super::api::ListAndWatchResponse;
use super::api::PreStartContainerRequest;
use super::api::PreStartContainerResponse;
use super::api::PreferredAllocationRequest;
use super::api::PreferredAllocationResponse;
use crate::domain::Device;
use crate::domain::DeviceRegistry;

/// Permissions granted on every allocated device node.
pub const DEVICE_PERMISSIONS: &str = "rw";
/// Environment variable carrying the first allocated device id.
pub const DEVICE_ENV_VAR: &str = "HAILO_DEVICE";

/// Pushes queued per watcher before the streaming task waits on the client.
const WATCH_BUFFER: usize = 4;

/// DevicePlugin service implementation backed by the device registry
#[derive(Debug)]
pub struct DevicePluginService {
    registry: Arc<DeviceRegistry>,
    /// directory device ids are resolved against
    device_dir: PathBuf,
    options: DevicePluginOptions,
    /// stops every streaming task when the plugin shuts down
    cancellation_token: CancellationToken,
}

impl DevicePluginService {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        device_dir: PathBuf,
        options: DevicePluginOptions,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            registry,
            device_dir,
            options,
            cancellation_token,
        }
    }
}

fn to_api_device(device: &Device) -> api::Device {
    api::Device {
        id: device.id.clone(),
        health: device.health.as_str().to_string(),
        topology: None,
    }
}

fn list_response(registry: &DeviceRegistry) -> ListAndWatchResponse {
    ListAndWatchResponse {
        devices: registry.snapshot().iter().map(to_api_device).collect(),
    }
}

/// Map requested device ids to device specs.
///
/// Derived from the request alone: device health is deliberately not
/// consulted, the kubelet already committed to these devices.
///
/// Ids that are empty, contain `/` or start with `.` would resolve outside
/// `device_dir`; any such id fails the whole request with `InvalidArgument`.
pub fn allocate_devices(
    device_dir: &Path,
    request: AllocateRequest,
) -> Result<AllocateResponse, Status> {
    let mut container_responses = Vec::with_capacity(request.container_requests.len());

    for container_req in request.container_requests {
        let mut devices = Vec::with_capacity(container_req.devices_ids.len());
        for device_id in &container_req.devices_ids {
            if device_id.is_empty() || device_id.contains('/') || device_id.starts_with('.') {
                return Err(Status::invalid_argument(format!(
                    "invalid device id: {device_id:?}"
                )));
            }
            let device_path = device_dir.join(device_id).to_string_lossy().into_owned();
            devices.push(DeviceSpec {
                container_path: device_path.clone(),
                host_path: device_path,
                permissions: DEVICE_PERMISSIONS.to_string(),
            });
        }

        let mut envs = HashMap::new();
        if let Some(first) = container_req.devices_ids.first() {
            envs.insert(DEVICE_ENV_VAR.to_string(), first.clone());
        }

        container_responses.push(ContainerAllocateResponse {
            envs,
            mounts: Vec::new(),
            devices,
            annotations: HashMap::new(),
            cdi_devices: Vec::new(),
        });
    }

    Ok(AllocateResponse {
        container_responses,
    })
}

#[tonic::async_trait]
impl DevicePlugin for DevicePluginService {
    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<DevicePluginOptions>> {
        debug!("getting device plugin options");

        Ok(Response::new(self.options))
    }

    type ListAndWatchStream =
        Pin<Box<dyn Stream<Item = Result<ListAndWatchResponse, Status>> + Send>>;

    /// Send the full device list, then again after every registry change.
    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<Self::ListAndWatchStream>> {
        info!("ListAndWatch called");

        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let registry = self.registry.clone();
        let cancellation_token = self.cancellation_token.clone();
        // subscribe before the first snapshot so no change slips in between
        let mut changes = registry.subscribe();

        tokio::spawn(async move {
            if tx.send(Ok(list_response(&registry))).await.is_err() {
                debug!("watcher left before the initial device list");
                return;
            }

            loop {
                select! {
                    _ = cancellation_token.cancelled() => {
                        info!("device watch stopped: plugin shutting down");
                        break;
                    }
                    _ = tx.closed() => {
                        info!("device watcher disconnected");
                        break;
                    }
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let revision = *changes.borrow_and_update();
                        let response = list_response(&registry);
                        debug!(revision, devices = response.devices.len(), "pushing device list");
                        if tx.send(Ok(response)).await.is_err() {
                            info!("device watcher disconnected");
                            break;
                        }
                    }
                }
            }
        });

        let stream = ReceiverStream::new(rx);
        Ok(Response::new(Box::pin(stream)))
    }

    async fn get_preferred_allocation(
        &self,
        request: Request<PreferredAllocationRequest>,
    ) -> TonicResult<Response<PreferredAllocationResponse>> {
        let req = request.into_inner();
        debug!("getting preferred device allocation: {:?}", req);
        Ok(Response::new(PreferredAllocationResponse {
            container_responses: vec![],
        }))
    }

    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> TonicResult<Response<AllocateResponse>> {
        let req = request.into_inner();
        info!(containers = req.container_requests.len(), "allocate called");
        for (index, container_req) in req.container_requests.iter().enumerate() {
            info!(
                container_index = index,
                device_ids = ?container_req.devices_ids,
                "container requesting devices"
            );
        }

        let response = allocate_devices(&self.device_dir, req)?;
        Ok(Response::new(response))
    }

    async fn pre_start_container(
        &self,
        request: Request<PreStartContainerRequest>,
    ) -> TonicResult<Response<PreStartContainerResponse>> {
        debug!("pre-start container: {:?}", request.into_inner());
        Ok(Response::new(PreStartContainerResponse {}))
    }
}
