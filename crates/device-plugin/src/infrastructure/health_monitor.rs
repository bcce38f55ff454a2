use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::time::interval_at;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::domain::DeviceCatalog;
use crate::domain::DeviceHealth;
use crate::domain::DeviceRegistry;

/// Periodically re-probes every registered device and records health
/// transitions in the registry. It never waits on watchers: delivery is the
/// registry subscribers' job.
pub struct HealthMonitor {
    catalog: Arc<dyn DeviceCatalog>,
    registry: Arc<DeviceRegistry>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(
        catalog: Arc<dyn DeviceCatalog>,
        registry: Arc<DeviceRegistry>,
        interval: Duration,
    ) -> Self {
        Self {
            catalog,
            registry,
            interval,
        }
    }

    /// Probe all devices once, returning how many changed health.
    pub fn probe_once(&self) -> usize {
        let mut changed = 0;
        for device in self.registry.snapshot() {
            let health = DeviceHealth::from_probe(self.catalog.is_healthy(&device));
            if self.registry.apply_transition(&device.id, health) {
                info!(device_id = %device.id, %health, "device health changed");
                changed += 1;
            }
        }
        changed
    }

    #[tracing::instrument(skip_all, fields(interval = ?self.interval))]
    pub async fn run(&self, cancellation_token: CancellationToken) {
        info!("Starting health monitor");

        // first probe one interval after start, the initial scan just ran
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = cancellation_token.cancelled() => {
                    info!("Health monitor shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    self.probe_once();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::domain::mock::MockDeviceCatalog;
    use crate::domain::Device;

    fn setup() -> (Arc<MockDeviceCatalog>, Arc<DeviceRegistry>) {
        let devices = vec![
            Device::new("accel0", "/dev/accel0", "HAILO10H", DeviceHealth::Healthy),
            Device::new("accel1", "/dev/accel1", "HAILO10H", DeviceHealth::Unhealthy),
        ];
        let catalog = Arc::new(MockDeviceCatalog::new(devices.clone()));
        let registry = Arc::new(DeviceRegistry::new());
        registry.fill(devices);
        (catalog, registry)
    }

    #[test]
    fn probe_without_changes() {
        let (catalog, registry) = setup();
        let monitor = HealthMonitor::new(catalog, registry.clone(), Duration::from_secs(10));

        assert_eq!(monitor.probe_once(), 0);
    }

    #[test]
    fn probe_records_transitions() {
        let (catalog, registry) = setup();
        let monitor = HealthMonitor::new(catalog.clone(), registry.clone(), Duration::from_secs(10));

        catalog.set_healthy("accel0", false);
        catalog.set_healthy("accel1", true);

        assert_eq!(monitor.probe_once(), 2);
        assert_eq!(
            registry.get("accel0").map(|d| d.health),
            Some(DeviceHealth::Unhealthy)
        );
        assert_eq!(
            registry.get("accel1").map(|d| d.health),
            Some(DeviceHealth::Healthy)
        );
        // second pass sees the same state
        assert_eq!(monitor.probe_once(), 0);
    }

    #[test(tokio::test)]
    async fn run_publishes_changes_and_stops_on_cancel() {
        let (catalog, registry) = setup();
        let monitor = Arc::new(HealthMonitor::new(
            catalog.clone(),
            registry.clone(),
            Duration::from_millis(20),
        ));
        let mut changes = registry.subscribe();
        let token = CancellationToken::new();

        let handle = tokio::spawn({
            let monitor = monitor.clone();
            let token = token.clone();
            async move { monitor.run(token).await }
        });

        catalog.set_healthy("accel0", false);
        tokio::time::timeout(Duration::from_secs(2), changes.changed())
            .await
            .expect("change within timeout")
            .expect("registry alive");
        assert_eq!(
            registry.get("accel0").map(|d| d.health),
            Some(DeviceHealth::Unhealthy)
        );

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor exits promptly")
            .expect("monitor task");
    }
}
