use anyhow::Result;
use clap::Parser;
use device_plugin::app::Application;
use device_plugin::config::Cli;
use device_plugin::config::PluginConfig;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    utils::logging::init(cli.log_format.into());

    let config = PluginConfig::from(&cli.plugin);
    tracing::info!(
        resource_name = %config.resource_name,
        architecture = %config.architecture,
        "Starting device plugin {}",
        &**version::VERSION
    );

    Application::new(config).run().await
}
