use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::app::signals::wait_for_shutdown_signal;
use crate::config::PluginConfig;
use crate::domain::DeviceCatalog;
use crate::infrastructure::FsDeviceCatalog;
use crate::plugin::AcceleratorPlugin;

/// Application core structure with explicit dependencies
pub struct Application {
    plugin: AcceleratorPlugin,
    cancellation_token: CancellationToken,
}

impl Application {
    /// Build the application around the filesystem device catalog
    pub fn new(config: PluginConfig) -> Self {
        let catalog = Arc::new(FsDeviceCatalog::from_config(&config));
        Self::with_catalog(config, catalog, CancellationToken::new())
    }

    /// Build the application with an explicit catalog and shutdown token
    pub fn with_catalog(
        config: PluginConfig,
        catalog: Arc<dyn DeviceCatalog>,
        cancellation_token: CancellationToken,
    ) -> Self {
        let plugin = AcceleratorPlugin::new(config, catalog, &cancellation_token);
        Self {
            plugin,
            cancellation_token,
        }
    }

    pub fn plugin(&self) -> &AcceleratorPlugin {
        &self.plugin
    }

    /// Start the plugin, serve until SIGINT/SIGTERM or cancellation, then stop.
    ///
    /// Startup failures are returned after the partially started plugin has
    /// been torn down.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!("Starting device plugin...");

        // main prints the returned error
        if let Err(report) = self.plugin.start().await {
            self.plugin.stop().await;
            return Err(anyhow::anyhow!("Failed to start device plugin: {report:?}"));
        }

        let result = wait_for_shutdown_signal(&self.cancellation_token).await;

        self.shutdown().await;
        result
    }

    /// Gracefully shutdown application
    pub async fn shutdown(&mut self) {
        tracing::info!("Shutting down application...");
        self.cancellation_token.cancel();
        self.plugin.stop().await;
        tracing::info!("Application shutdown completed");
    }
}
