use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

pub const DEFAULT_RESOURCE_NAME: &str = "hailo.ai/h10";
pub const DEFAULT_ARCHITECTURE: &str = "HAILO10H";
pub const DEFAULT_DEVICE_PATH: &str = "/dev";
pub const DEFAULT_DEVICE_PATTERN: &str = "hailo*";
pub const DEFAULT_DEVICE_PLUGIN_PATH: &str = "/var/lib/kubelet/device-plugins";
pub const KUBELET_SOCKET_NAME: &str = "kubelet.sock";

#[derive(Parser, Clone, Debug)]
pub struct PluginArgs {
    #[arg(
        long,
        env = "HAILO_RESOURCE_NAME",
        default_value = DEFAULT_RESOURCE_NAME,
        help = "Extended resource name advertised to the kubelet, e.g. hailo.ai/h10"
    )]
    pub resource_name: String,

    #[arg(
        long,
        env = "HAILO_ARCHITECTURE",
        default_value = DEFAULT_ARCHITECTURE,
        help = "Accelerator architecture tag attached to discovered devices"
    )]
    pub architecture: String,

    #[arg(
        long,
        env = "HAILO_DEVICE_PATH",
        default_value = DEFAULT_DEVICE_PATH,
        value_hint = clap::ValueHint::DirPath,
        help = "Directory holding the accelerator device nodes"
    )]
    pub device_path: PathBuf,

    #[arg(
        long,
        env = "HAILO_DEVICE_PATTERN",
        default_value = DEFAULT_DEVICE_PATTERN,
        help = "Glob pattern matching device node file names"
    )]
    pub device_pattern: String,

    #[arg(
        long,
        env = "DEVICE_PLUGIN_PATH",
        default_value = DEFAULT_DEVICE_PLUGIN_PATH,
        value_hint = clap::ValueHint::DirPath,
        help = "Kubelet device plugin directory where the plugin socket is created"
    )]
    pub device_plugin_path: PathBuf,

    #[arg(
        long,
        env = "KUBELET_SOCKET",
        value_hint = clap::ValueHint::FilePath,
        help = "Kubelet registration socket (defaults to kubelet.sock in the device plugin directory)"
    )]
    pub kubelet_socket: Option<PathBuf>,

    #[arg(
        long,
        default_value = "10",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Seconds between device health probes"
    )]
    pub health_check_interval_secs: u64,

    #[arg(
        long,
        default_value = "1000",
        help = "Milliseconds to wait after the gRPC server is bound before registering"
    )]
    pub server_startup_delay_ms: u64,

    #[arg(
        long,
        default_value = "5",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Deadline in seconds for the kubelet registration call"
    )]
    pub registration_timeout_secs: u64,
}

/// Runtime configuration of the device plugin.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub resource_name: String,
    pub architecture: String,
    pub device_dir: PathBuf,
    pub device_pattern: String,
    pub plugin_dir: PathBuf,
    pub kubelet_socket: PathBuf,
    pub health_check_interval: Duration,
    pub server_startup_delay: Duration,
    pub registration_timeout: Duration,
}

impl Default for PluginConfig {
    fn default() -> Self {
        let plugin_dir = PathBuf::from(DEFAULT_DEVICE_PLUGIN_PATH);
        Self {
            resource_name: DEFAULT_RESOURCE_NAME.to_string(),
            architecture: DEFAULT_ARCHITECTURE.to_string(),
            device_dir: PathBuf::from(DEFAULT_DEVICE_PATH),
            device_pattern: DEFAULT_DEVICE_PATTERN.to_string(),
            kubelet_socket: plugin_dir.join(KUBELET_SOCKET_NAME),
            plugin_dir,
            health_check_interval: Duration::from_secs(10),
            server_startup_delay: Duration::from_secs(1),
            registration_timeout: Duration::from_secs(5),
        }
    }
}

impl PluginConfig {
    /// Socket file name announced to the kubelet, derived from the resource name.
    pub fn socket_name(&self) -> String {
        socket_name_for(&self.resource_name)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.plugin_dir.join(self.socket_name())
    }
}

impl From<&PluginArgs> for PluginConfig {
    fn from(args: &PluginArgs) -> Self {
        let kubelet_socket = args
            .kubelet_socket
            .clone()
            .unwrap_or_else(|| args.device_plugin_path.join(KUBELET_SOCKET_NAME));
        Self {
            resource_name: args.resource_name.clone(),
            architecture: args.architecture.clone(),
            device_dir: args.device_path.clone(),
            device_pattern: args.device_pattern.clone(),
            plugin_dir: args.device_plugin_path.clone(),
            kubelet_socket,
            health_check_interval: Duration::from_secs(args.health_check_interval_secs),
            server_startup_delay: Duration::from_millis(args.server_startup_delay_ms),
            registration_timeout: Duration::from_secs(args.registration_timeout_secs),
        }
    }
}

/// `hailo.ai/h10` -> `hailo-ai-h10.sock`
pub fn socket_name_for(resource_name: &str) -> String {
    let stem: String = resource_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("{stem}.sock")
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn socket_name_from_resource() {
        assert_eq!(socket_name_for("hailo.ai/h10"), "hailo-ai-h10.sock");
        assert_eq!(socket_name_for("vendor/accel_x"), "vendor-accel_x.sock");
    }

    #[test]
    fn defaults_match_kubelet_layout() {
        let config = PluginConfig::default();
        assert_eq!(
            config.socket_path(),
            PathBuf::from("/var/lib/kubelet/device-plugins/hailo-ai-h10.sock")
        );
        assert_eq!(
            config.kubelet_socket,
            PathBuf::from("/var/lib/kubelet/device-plugins/kubelet.sock")
        );
        assert_eq!(config.health_check_interval, Duration::from_secs(10));
    }

    #[test]
    fn kubelet_socket_follows_plugin_dir() {
        let args = PluginArgs::try_parse_from([
            "device-plugin",
            "--device-plugin-path",
            "/tmp/plugins",
            "--resource-name",
            "vendor/accel",
        ])
        .expect("valid args");
        let config = PluginConfig::from(&args);

        assert_eq!(config.kubelet_socket, PathBuf::from("/tmp/plugins/kubelet.sock"));
        assert_eq!(config.socket_path(), PathBuf::from("/tmp/plugins/vendor-accel.sock"));
    }

    #[test]
    fn explicit_kubelet_socket_wins() {
        let args = PluginArgs::try_parse_from([
            "device-plugin",
            "--kubelet-socket",
            "/run/kubelet.sock",
            "--health-check-interval-secs",
            "3",
        ])
        .expect("valid args");
        let config = PluginConfig::from(&args);

        assert_eq!(config.kubelet_socket, PathBuf::from("/run/kubelet.sock"));
        assert_eq!(config.health_check_interval, Duration::from_secs(3));
    }

    #[test]
    fn zero_interval_and_timeout_are_rejected() {
        for flag in ["--health-check-interval-secs", "--registration-timeout-secs"] {
            let result = PluginArgs::try_parse_from(["device-plugin", flag, "0"]);
            assert!(result.is_err(), "{flag} 0 should be rejected");
        }
    }
}
