//! Background health monitoring driven by the manager

use mockgate_common::config::HealthCheckConfig;
use mockgate_plugin::{ManagerConfig, PluginManager, PluginState};
use mockgate_tests::{Counters, TestPlugin};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn monitored_manager(enabled: bool) -> PluginManager {
    PluginManager::builder()
        .config(ManagerConfig {
            lifecycle_timeout: Duration::from_secs(5),
            health_check: HealthCheckConfig {
                enabled,
                interval: Duration::from_secs(10),
                timeout: Duration::from_secs(1),
            },
        })
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_plugin_moves_to_error() {
    let manager = monitored_manager(true);
    let healthy = Arc::new(AtomicBool::new(true));
    let counters = TestPlugin::new("upstream")
        .health_checked(healthy.clone())
        .register(&manager);
    manager.load_plugin("upstream", Default::default()).await.unwrap();
    manager.enable_plugin("upstream").unwrap();

    assert!(manager.start());

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(Counters::get(&counters.health), 1);
    let info = manager.plugin_info("upstream").unwrap();
    assert_eq!(info.state, PluginState::Enabled);
    assert!(info.health.unwrap().healthy);

    healthy.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(10)).await;
    let info = manager.plugin_info("upstream").unwrap();
    assert_eq!(info.state, PluginState::Error);
    assert_eq!(info.last_error.as_deref(), Some("dependency unreachable"));

    // Plugins in error are no longer probed
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(Counters::get(&counters.health), 2);

    let report = manager.shutdown().await;
    assert!(report.is_clean());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_health_loop() {
    let manager = monitored_manager(true);
    let counters = TestPlugin::new("upstream")
        .health_checked(Arc::new(AtomicBool::new(true)))
        .register(&manager);
    manager.load_plugin("upstream", Default::default()).await.unwrap();
    manager.enable_plugin("upstream").unwrap();
    assert!(manager.start());

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(Counters::get(&counters.health), 2);

    manager.shutdown().await;
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(Counters::get(&counters.health), 2);
}

#[tokio::test]
async fn test_start_with_health_checks_disabled() {
    let manager = monitored_manager(false);
    assert!(!manager.start());
    assert!(manager.shutdown().await.is_clean());
}
