//! Loading a whole plugin list from configuration

use mockgate_plugin::{
    EnvSubstitutor, InMemoryMetrics, Operation, PluginConfig, PluginError, PluginManager,
    PluginSpec, PluginState,
};
use mockgate_tests::{config, TestPlugin};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_specs_may_precede_their_dependencies() {
    let manager = PluginManager::new();
    TestPlugin::new("audit").depends_on("auth").register(&manager);
    TestPlugin::new("auth").middleware(0).register(&manager);

    let specs = [
        PluginSpec::new("audit").enabled(),
        PluginSpec::new("auth").enabled(),
    ];
    let report = manager.load_from_config(&specs).await;

    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(report.loaded, ["audit", "auth"]);
    assert_eq!(report.enabled, ["auth", "audit"]);
    assert_eq!(manager.plugin_state("audit"), Some(PluginState::Enabled));
}

#[tokio::test]
async fn test_failures_are_collected() {
    let validator = |plugin: &str, config: &PluginConfig| -> Vec<String> {
        if plugin == "strict" && !config.contains_key("mode") {
            vec!["mode is required".to_string()]
        } else {
            Vec::new()
        }
    };
    let manager = PluginManager::builder()
        .validator(Arc::new(validator))
        .build()
        .unwrap();
    TestPlugin::new("strict").register(&manager);
    TestPlugin::new("fragile").register(&manager);
    TestPlugin::new("steady").register(&manager);
    TestPlugin::new("dependent").depends_on("fragile").register(&manager);

    let specs = [
        PluginSpec::new("ghost").enabled(),
        PluginSpec::new("strict").enabled(),
        PluginSpec::new("fragile")
            .enabled()
            .with_config(config(json!({"fail": true}))),
        PluginSpec::new("steady"),
        PluginSpec::new("dependent").enabled(),
    ];
    let report = manager.load_from_config(&specs).await;

    assert!(!report.is_success());
    assert_eq!(report.loaded, ["steady", "dependent"]);
    assert!(report.enabled.is_empty());
    assert_eq!(report.failures.len(), 4);
    assert!(matches!(report.failures[0], PluginError::FactoryNotFound(_)));
    assert!(matches!(report.failures[1], PluginError::InvalidConfig { .. }));
    assert_eq!(report.failures[2].operation(), Some(Operation::Init));
    assert!(matches!(
        report.failures[3],
        PluginError::DependencyNotEnabled { ref dependency, .. } if dependency == "fragile"
    ));

    // Loaded without the enabled flag
    assert_eq!(manager.plugin_state("steady"), Some(PluginState::Loaded));
    assert_eq!(manager.plugin_state("dependent"), Some(PluginState::Loaded));
}

#[tokio::test]
async fn test_panicking_init_does_not_stop_later_specs() {
    let manager = PluginManager::new();
    TestPlugin::new("volatile").panicking_init().register(&manager);
    TestPlugin::new("steady").register(&manager);

    let specs = [
        PluginSpec::new("volatile").enabled(),
        PluginSpec::new("steady").enabled(),
    ];
    let report = manager.load_from_config(&specs).await;

    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        report.failures[0],
        PluginError::Panic { operation: Operation::Init, .. }
    ));
    assert_eq!(report.loaded, ["steady"]);
    assert_eq!(report.enabled, ["steady"]);
    assert!(manager.plugin_state("volatile").is_none());
}

#[tokio::test]
async fn test_enables_from_config_are_recorded() {
    let metrics = Arc::new(InMemoryMetrics::new());
    let manager = PluginManager::builder()
        .metrics(metrics.clone())
        .build()
        .unwrap();
    TestPlugin::new("audit").depends_on("auth").register(&manager);
    TestPlugin::new("auth").register(&manager);

    let specs = [
        PluginSpec::new("audit").enabled(),
        PluginSpec::new("auth").enabled(),
    ];
    let report = manager.load_from_config(&specs).await;
    assert!(report.is_success(), "{:?}", report.failures);

    for name in ["audit", "auth"] {
        let enable = metrics.plugin(name).unwrap().operation(Operation::Enable);
        assert_eq!(enable.successes, 1, "{name}");
        assert_eq!(enable.failures, 0, "{name}");
    }
}

#[tokio::test]
async fn test_environment_substitution() {
    let substitutor = EnvSubstitutor::with_lookup(|name| match name {
        "MOCK_UPSTREAM" => Some("http://localhost:9000".to_string()),
        _ => None,
    });
    let manager = PluginManager::builder()
        .substitutor(Arc::new(substitutor))
        .build()
        .unwrap();
    TestPlugin::new("proxy").register(&manager);

    let specs = [PluginSpec::new("proxy").with_config(config(json!({
        "upstream": "${MOCK_UPSTREAM}",
        "retries": "${MOCK_RETRIES:3}",
        "routes": [{"target": "${MOCK_UPSTREAM}/v1"}],
        "token": "${MOCK_TOKEN}"
    })))];
    let report = manager.load_from_config(&specs).await;
    assert!(report.is_success());

    let info = manager.plugin_info("proxy").unwrap();
    assert_eq!(info.config["upstream"], "http://localhost:9000");
    assert_eq!(info.config["retries"], "3");
    assert_eq!(info.config["routes"][0]["target"], "http://localhost:9000/v1");
    assert_eq!(info.config["token"], "${MOCK_TOKEN}");
}

#[tokio::test]
async fn test_specs_from_json() {
    let manager = PluginManager::new();
    mockgate_plugin::builtin::register_builtins(manager.registry()).unwrap();

    let specs: Vec<PluginSpec> = serde_json::from_value(json!([
        {"name": "request-logger", "enabled": true},
        {"name": "cors", "enabled": true, "config": {"allowed_origins": ["https://app.example.com"]}},
        {"name": "rate-limit"}
    ]))
    .unwrap();
    let report = manager.load_from_config(&specs).await;

    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(report.enabled, ["request-logger", "cors"]);
    assert_eq!(manager.plugin_state("rate-limit"), Some(PluginState::Loaded));
    manager.shutdown().await;
}
