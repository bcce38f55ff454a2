//! Device plugin lifecycle: discovery, serving, registration and shutdown.

use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use derive_more::Display;
use error_stack::Report;
use error_stack::ResultExt;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::config::PluginConfig;
use crate::domain::DeviceCatalog;
use crate::domain::DeviceRegistry;
use crate::infrastructure::HealthMonitor;
use crate::platform::k8s::api::device_plugin_server::DevicePluginServer;
use crate::platform::k8s::device_plugin::DevicePluginService;
use crate::platform::k8s::registration::register_with_kubelet;
use crate::platform::k8s::registration::ResourceDescriptor;
use crate::platform::k8s::PluginError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PluginState {
    Created,
    Discovering,
    Serving,
    Stopped,
    Failed,
}

/// Accelerator device plugin.
///
/// `start` walks `Created -> Discovering -> Serving`, any startup error
/// leaves the plugin `Failed`. `stop` is valid from every state and ends in
/// `Stopped`.
pub struct AcceleratorPlugin {
    config: PluginConfig,
    catalog: Arc<dyn DeviceCatalog>,
    registry: Arc<DeviceRegistry>,
    descriptor: ResourceDescriptor,
    state: PluginState,
    cancellation_token: CancellationToken,
    server_task: Option<JoinHandle<()>>,
    health_monitor_task: Option<JoinHandle<()>>,
    /// set once this plugin owns the socket file
    socket_bound: bool,
}

impl AcceleratorPlugin {
    /// The plugin stops its background work when `shutdown` is cancelled.
    pub fn new(
        config: PluginConfig,
        catalog: Arc<dyn DeviceCatalog>,
        shutdown: &CancellationToken,
    ) -> Self {
        let descriptor =
            ResourceDescriptor::new(config.resource_name.clone(), config.socket_name());
        Self {
            config,
            catalog,
            registry: Arc::new(DeviceRegistry::new()),
            descriptor,
            state: PluginState::Created,
            cancellation_token: shutdown.child_token(),
            server_task: None,
            health_monitor_task: None,
            socket_bound: false,
        }
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    pub fn socket_path(&self) -> PathBuf {
        self.config.socket_path()
    }

    /// Discover devices, serve the device plugin API and register with the kubelet.
    pub async fn start(&mut self) -> Result<(), Report<PluginError>> {
        if self.state != PluginState::Created {
            return Err(Report::new(PluginError::InvalidState {
                message: format!("cannot start from {}", self.state),
            }));
        }

        self.state = PluginState::Discovering;
        if let Err(e) = self.discover_devices() {
            self.state = PluginState::Failed;
            return Err(e);
        }

        if let Err(e) = self.serve().await {
            self.state = PluginState::Failed;
            self.shutdown_tasks().await;
            return Err(e);
        }

        self.spawn_health_monitor();
        self.state = PluginState::Serving;
        Ok(())
    }

    fn discover_devices(&self) -> Result<(), Report<PluginError>> {
        let devices = self
            .catalog
            .scan()
            .change_context(PluginError::DiscoveryFailed)?;

        if devices.is_empty() {
            return Err(Report::new(PluginError::NoDevicesFound {
                device_dir: self.config.device_dir.display().to_string(),
                pattern: self.config.device_pattern.clone(),
            }));
        }

        for device in &devices {
            info!(
                device_id = %device.id,
                architecture = %device.architecture,
                health = %device.health,
                "discovered device"
            );
        }
        info!(count = devices.len(), "discovered devices");

        self.registry.fill(devices);
        Ok(())
    }

    async fn serve(&mut self) -> Result<(), Report<PluginError>> {
        let socket_path = self.config.socket_path();
        remove_stale_socket(&socket_path)?;

        let listener =
            UnixListener::bind(&socket_path).change_context(PluginError::SocketBind {
                path: socket_path.display().to_string(),
            })?;
        self.socket_bound = true;

        let service = DevicePluginService::new(
            self.registry.clone(),
            self.config.device_dir.clone(),
            self.descriptor.options,
            self.cancellation_token.clone(),
        );
        let token = self.cancellation_token.clone();

        self.server_task = Some(tokio::spawn(async move {
            info!(socket = %socket_path.display(), "starting gRPC server");
            let result = Server::builder()
                .add_service(DevicePluginServer::new(service))
                .serve_with_incoming_shutdown(UnixListenerStream::new(listener), async move {
                    token.cancelled().await;
                    info!("shutting down gRPC server");
                })
                .await;
            if let Err(e) = result {
                error!("gRPC server error: {e}");
            }
        }));

        // the kubelet dials back as soon as it accepts the registration
        tokio::time::sleep(self.config.server_startup_delay).await;

        register_with_kubelet(
            &self.descriptor,
            &self.config.kubelet_socket,
            self.config.registration_timeout,
        )
        .await?;
        info!(resource = %self.descriptor.resource_name, "registered with kubelet");
        Ok(())
    }

    fn spawn_health_monitor(&mut self) {
        let monitor = HealthMonitor::new(
            self.catalog.clone(),
            self.registry.clone(),
            self.config.health_check_interval,
        );
        let token = self.cancellation_token.clone();
        self.health_monitor_task = Some(tokio::spawn(async move {
            monitor.run(token).await;
        }));
    }

    /// Stop background loops and the gRPC server.
    pub async fn stop(&mut self) {
        if self.state == PluginState::Stopped {
            debug!("device plugin already stopped");
            return;
        }

        info!(state = %self.state, "stopping device plugin");
        self.shutdown_tasks().await;

        if self.socket_bound {
            match std::fs::remove_file(self.config.socket_path()) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to remove plugin socket: {e}"),
            }
            self.socket_bound = false;
        }

        self.state = PluginState::Stopped;
        info!("device plugin stopped");
    }

    async fn shutdown_tasks(&mut self) {
        self.cancellation_token.cancel();

        // both loops observe the token; together they get one probe interval
        let grace = self.config.health_check_interval;
        let deadline = Instant::now() + grace;
        for (name, task) in [
            ("health monitor", self.health_monitor_task.take()),
            ("gRPC server", self.server_task.take()),
        ] {
            let Some(mut task) = task else {
                continue;
            };
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => debug!("{name} task finished"),
                Ok(Err(e)) => error!("{name} task failed: {e}"),
                Err(_) => {
                    warn!("{name} task did not stop within {grace:?}, aborting");
                    task.abort();
                }
            }
        }
    }
}

impl Drop for AcceleratorPlugin {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

/// A leftover socket from a previous run blocks `bind`.
fn remove_stale_socket(path: &Path) -> Result<(), Report<PluginError>> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(socket = %path.display(), "removed stale socket");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Report::new(e).change_context(PluginError::SocketRemoval {
            path: path.display().to_string(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::domain::mock::MockDeviceCatalog;
    use crate::domain::Device;
    use crate::domain::DeviceHealth;

    fn config(dir: &Path) -> PluginConfig {
        PluginConfig {
            plugin_dir: dir.to_path_buf(),
            kubelet_socket: dir.join("kubelet.sock"),
            health_check_interval: Duration::from_millis(50),
            server_startup_delay: Duration::from_millis(10),
            registration_timeout: Duration::from_millis(500),
            ..PluginConfig::default()
        }
    }

    fn plugin(
        dir: &Path,
        catalog: MockDeviceCatalog,
        token: &CancellationToken,
    ) -> AcceleratorPlugin {
        AcceleratorPlugin::new(config(dir), Arc::new(catalog), token)
    }

    fn devices() -> Vec<Device> {
        vec![
            Device::new("accel0", "/dev/accel0", "HAILO10H", DeviceHealth::Healthy),
            Device::new("accel1", "/dev/accel1", "HAILO10H", DeviceHealth::Unhealthy),
        ]
    }

    #[test(tokio::test)]
    async fn no_devices_is_distinct_from_discovery_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let token = CancellationToken::new();

        let mut empty = plugin(dir.path(), MockDeviceCatalog::new(vec![]), &token);
        let err = empty.start().await.expect_err("no devices");
        assert!(matches!(
            err.current_context(),
            PluginError::NoDevicesFound { .. }
        ));
        assert_eq!(empty.state(), PluginState::Failed);

        let mut broken = plugin(dir.path(), MockDeviceCatalog::failing(), &token);
        let err = broken.start().await.expect_err("discovery error");
        assert!(matches!(err.current_context(), PluginError::DiscoveryFailed));
        assert_eq!(broken.state(), PluginState::Failed);
    }

    #[test(tokio::test)]
    async fn failed_registration_shuts_server_down() {
        let dir = tempfile::tempdir().expect("tempdir");
        let token = CancellationToken::new();
        let mut plugin = plugin(dir.path(), MockDeviceCatalog::new(devices()), &token);

        let err = plugin.start().await.expect_err("no kubelet listening");
        assert!(matches!(
            err.current_context(),
            PluginError::ClientConnection { .. }
        ));
        assert_eq!(plugin.state(), PluginState::Failed);
        // the registry was filled before serving
        assert_eq!(plugin.registry().len(), 2);

        plugin.stop().await;
        assert_eq!(plugin.state(), PluginState::Stopped);
        assert!(!plugin.socket_path().exists());
    }

    #[test(tokio::test)]
    async fn socket_removal_failure_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        // a non-empty directory cannot be unlinked like a socket
        std::fs::create_dir_all(config.socket_path().join("busy")).expect("create dir");
        let token = CancellationToken::new();
        let mut plugin =
            AcceleratorPlugin::new(config, Arc::new(MockDeviceCatalog::new(devices())), &token);

        let err = plugin.start().await.expect_err("socket removal");
        assert!(matches!(
            err.current_context(),
            PluginError::SocketRemoval { .. }
        ));
        assert_eq!(plugin.state(), PluginState::Failed);
    }

    #[test(tokio::test)]
    async fn missing_plugin_dir_fails_bind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = PluginConfig {
            plugin_dir: dir.path().join("absent"),
            ..config(dir.path())
        };
        let token = CancellationToken::new();
        let mut plugin =
            AcceleratorPlugin::new(config, Arc::new(MockDeviceCatalog::new(devices())), &token);

        let err = plugin.start().await.expect_err("bind fails");
        assert!(matches!(
            err.current_context(),
            PluginError::SocketBind { .. }
        ));
        assert_eq!(plugin.state(), PluginState::Failed);

        plugin.stop().await;
        assert_eq!(plugin.state(), PluginState::Stopped);
    }

    #[test(tokio::test)]
    async fn stuck_tasks_share_one_grace_period() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = PluginConfig {
            health_check_interval: Duration::from_millis(300),
            ..config(dir.path())
        };
        let token = CancellationToken::new();
        let mut plugin =
            AcceleratorPlugin::new(config, Arc::new(MockDeviceCatalog::new(devices())), &token);
        // tasks that ignore cancellation must be aborted
        plugin.health_monitor_task = Some(tokio::spawn(std::future::pending()));
        plugin.server_task = Some(tokio::spawn(std::future::pending()));

        let started = Instant::now();
        plugin.stop().await;

        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(plugin.state(), PluginState::Stopped);
    }

    #[test(tokio::test)]
    async fn stop_without_start_is_safe() {
        let dir = tempfile::tempdir().expect("tempdir");
        let token = CancellationToken::new();
        let mut plugin = plugin(dir.path(), MockDeviceCatalog::new(devices()), &token);

        plugin.stop().await;
        assert_eq!(plugin.state(), PluginState::Stopped);

        tokio::time::timeout(Duration::from_secs(1), plugin.stop())
            .await
            .expect("second stop returns promptly");
        assert_eq!(plugin.state(), PluginState::Stopped);

        let err = plugin.start().await.expect_err("cannot restart");
        assert!(matches!(
            err.current_context(),
            PluginError::InvalidState { .. }
        ));
    }
}
