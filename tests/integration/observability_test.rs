//! Prometheus export of manager and pipeline activity

use mockgate_observability::PrometheusMetrics;
use mockgate_plugin::PluginManager;
use mockgate_tests::{ok_handler, request, TestPlugin};
use std::sync::Arc;

#[tokio::test]
async fn test_prometheus_sink_records_lifecycle_and_requests() {
    let metrics = Arc::new(PrometheusMetrics::new().unwrap());
    let manager = PluginManager::builder()
        .metrics(metrics.clone())
        .build()
        .unwrap();
    TestPlugin::new("auth")
        .middleware(0)
        .rejecting(401)
        .register(&manager);
    TestPlugin::new("volatile")
        .middleware(5)
        .panicking()
        .register(&manager);

    for name in ["auth", "volatile"] {
        manager.load_plugin(name, Default::default()).await.unwrap();
    }
    manager.enable_plugin("volatile").unwrap();

    let response = manager.pipeline().execute(request("/"), &ok_handler).await;
    assert_eq!(response.status(), 500);

    let text = metrics.gather().unwrap();
    assert!(text.contains(
        r#"mockgate_plugin_operations_total{operation="load",outcome="success",plugin="auth"} 1"#
    ));
    assert!(text.contains(
        r#"mockgate_plugin_operations_total{operation="pre_process",outcome="failure",plugin="volatile"} 1"#
    ));
    assert!(text.contains(r#"mockgate_plugin_errors_total{category="panic",plugin="volatile"} 1"#));
    assert!(text.contains(r#"mockgate_plugin_state{plugin="auth",state="loaded"} 1"#));
    assert!(text.contains(r#"mockgate_plugin_state{plugin="volatile",state="enabled"} 1"#));

    manager.unload_plugin("auth").await.unwrap();
    let text = metrics.gather().unwrap();
    assert!(!text.contains(r#"mockgate_plugin_state{plugin="auth""#));
}

#[tokio::test]
async fn test_init_observability_returns_usable_sink() {
    let config = mockgate_observability::TracingConfig {
        filter: Some("warn".to_string()),
        ..Default::default()
    };
    let metrics = mockgate_observability::init_observability(config, true)
        .unwrap()
        .expect("metrics were requested");

    let manager = PluginManager::builder()
        .metrics(metrics.clone())
        .build()
        .unwrap();
    TestPlugin::new("echo").register(&manager);
    manager.load_plugin("echo", Default::default()).await.unwrap();

    let text = metrics.gather().unwrap();
    assert!(text.contains(r#"mockgate_plugin_state{plugin="echo",state="loaded"} 1"#));

    let disabled = mockgate_observability::init_observability(
        mockgate_observability::TracingConfig::default(),
        false,
    )
    .unwrap();
    assert!(disabled.is_none());
}
