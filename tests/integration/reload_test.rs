//! Hot reload and the recreate fallback

use mockgate_plugin::{
    ConfigValidator, ErrorCategory, PluginConfig, PluginError, PluginManager, PluginState,
};
use mockgate_tests::{config, ok_handler, request, Counters, TestPlugin};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_hot_reload_keeps_instance() {
    let manager = PluginManager::new();
    let counters = TestPlugin::new("greeter")
        .middleware(10)
        .hot_reloadable()
        .register(&manager);

    manager
        .load_plugin("greeter", config(json!({"greeting": "hello"})))
        .await
        .unwrap();
    manager.enable_plugin("greeter").unwrap();
    manager
        .pipeline()
        .execute(mockgate_tests::request("/"), &mockgate_tests::ok_handler)
        .await;
    let before = manager.plugin_info("greeter").unwrap();

    manager
        .reload_plugin("greeter", config(json!({"greeting": "bonjour"})))
        .await
        .unwrap();

    let after = manager.plugin_info("greeter").unwrap();
    assert_eq!(after.state, PluginState::Enabled);
    assert_eq!(after.config["greeting"], "bonjour");
    assert_eq!(after.loaded_at, before.loaded_at);
    assert_eq!(after.metrics, before.metrics);
    assert_eq!(Counters::get(&counters.inits), 1);
    assert_eq!(Counters::get(&counters.reloads), 1);
    assert_eq!(Counters::get(&counters.cleanups), 0);
}

#[tokio::test]
async fn test_failed_hot_reload_keeps_old_config() {
    let manager = PluginManager::new();
    TestPlugin::new("greeter").hot_reloadable().register(&manager);
    manager
        .load_plugin("greeter", config(json!({"greeting": "hello"})))
        .await
        .unwrap();
    manager.enable_plugin("greeter").unwrap();

    let err = manager
        .reload_plugin("greeter", config(json!({"fail": true})))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Lifecycle);

    let info = manager.plugin_info("greeter").unwrap();
    assert_eq!(info.state, PluginState::Enabled);
    assert_eq!(info.config["greeting"], "hello");
    assert!(info.last_error.unwrap().contains("config rejected"));
}

#[tokio::test]
async fn test_fallback_reload_recreates_instance() {
    let manager = PluginManager::new();
    let counters = TestPlugin::new("static").middleware(1).register(&manager);

    manager
        .load_plugin("static", config(json!({"generation": 1})))
        .await
        .unwrap();
    manager.enable_plugin("static").unwrap();
    manager.pipeline().execute(request("/"), &ok_handler).await;
    let before = manager.plugin_info("static").unwrap();
    assert_eq!(before.metrics.requests_processed, 1);

    tokio::time::sleep(Duration::from_millis(5)).await;
    manager
        .reload_plugin("static", config(json!({"generation": 2})))
        .await
        .unwrap();

    let after = manager.plugin_info("static").unwrap();
    assert_eq!(after.state, PluginState::Enabled);
    assert_eq!(after.config["generation"], 2);
    // A fresh entry: new load time, counters start over
    assert!(after.loaded_at > before.loaded_at);
    assert_eq!(after.metrics.requests_processed, 0);
    assert_eq!(Counters::get(&counters.inits), 2);
    assert_eq!(Counters::get(&counters.cleanups), 1);
    assert_eq!(Counters::get(&counters.reloads), 0);
}

#[tokio::test]
async fn test_fallback_reload_of_loaded_plugin_stays_loaded() {
    let manager = PluginManager::new();
    TestPlugin::new("static").register(&manager);
    manager.load_plugin("static", Default::default()).await.unwrap();

    manager
        .reload_plugin("static", config(json!({"generation": 2})))
        .await
        .unwrap();
    assert_eq!(manager.plugin_state("static"), Some(PluginState::Loaded));
}

#[tokio::test]
async fn test_fallback_reload_checks_dependencies_first() {
    let manager = PluginManager::new();
    TestPlugin::new("auth").register(&manager);
    let counters = TestPlugin::new("audit").depends_on("auth").register(&manager);

    manager.load_plugin("auth", Default::default()).await.unwrap();
    manager.enable_plugin("auth").unwrap();
    manager.load_plugin("audit", Default::default()).await.unwrap();
    manager.enable_plugin("audit").unwrap();
    manager.disable_plugin("auth").unwrap();

    let err = manager
        .reload_plugin("audit", config(json!({"generation": 2})))
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::DependencyNotEnabled { .. }));

    // Nothing was torn down
    assert_eq!(manager.plugin_state("audit"), Some(PluginState::Enabled));
    assert_eq!(Counters::get(&counters.inits), 1);
    assert_eq!(Counters::get(&counters.cleanups), 0);
}

#[tokio::test]
async fn test_fallback_reload_with_failing_init_unloads_plugin() {
    let manager = PluginManager::new();
    let counters = TestPlugin::new("static").register(&manager);
    manager.load_plugin("static", Default::default()).await.unwrap();
    manager.enable_plugin("static").unwrap();

    let err = manager
        .reload_plugin("static", config(json!({"fail": true})))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("config rejected"));
    assert!(manager.plugin_state("static").is_none());
    assert_eq!(Counters::get(&counters.cleanups), 1);
}

struct RequireGreeting;

impl ConfigValidator for RequireGreeting {
    fn validate(&self, _plugin: &str, config: &PluginConfig) -> Vec<String> {
        if config.contains_key("greeting") {
            Vec::new()
        } else {
            vec!["greeting is required".to_string()]
        }
    }
}

#[tokio::test]
async fn test_validator_rejection_leaves_plugin_untouched() {
    let manager = PluginManager::builder()
        .validator(Arc::new(RequireGreeting))
        .build()
        .unwrap();
    let counters = TestPlugin::new("greeter").hot_reloadable().register(&manager);
    manager
        .load_plugin("greeter", config(json!({"greeting": "hello"})))
        .await
        .unwrap();

    let err = manager
        .reload_plugin("greeter", config(json!({"salutation": "hey"})))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PluginError::InvalidConfig { ref errors, .. } if errors == &["greeting is required"]
    ));
    assert_eq!(err.category(), ErrorCategory::Config);

    let info = manager.plugin_info("greeter").unwrap();
    assert_eq!(info.config["greeting"], "hello");
    assert_eq!(Counters::get(&counters.reloads), 0);
}

#[tokio::test]
async fn test_reload_unknown_plugin() {
    let manager = PluginManager::new();
    let err = manager
        .reload_plugin("ghost", Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::NotLoaded(ref name) if name == "ghost"));
}
