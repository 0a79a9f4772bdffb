//! Requests flowing through plugins managed by a `PluginManager`

use mockgate_plugin::{builtin, ErrorCategory, PluginManager, PluginState, RequestHandler};
use mockgate_tests::{config, init_test_logging, ok_handler, request, CallLog, Counters, TestPlugin};
use serde_json::json;

#[tokio::test]
async fn test_auth_rejection_skips_later_plugins() {
    init_test_logging();
    let manager = PluginManager::new();
    let auth = TestPlugin::new("auth")
        .middleware(0)
        .rejecting(401)
        .register(&manager);
    let logging = TestPlugin::new("logging").middleware(100).register(&manager);

    for name in ["auth", "logging"] {
        manager.load_plugin(name, Default::default()).await.unwrap();
        manager.enable_plugin(name).unwrap();
    }

    let handler = manager.pipeline().wrap(ok_handler);
    let response = handler.handle(request("/api/users")).await.unwrap();

    assert_eq!(response.status(), 401);
    assert_eq!(Counters::get(&auth.pre), 1);
    assert_eq!(Counters::get(&logging.pre), 0);
    // Nothing ran before the rejecting plugin, so nothing is post-processed
    assert_eq!(Counters::get(&auth.post), 0);

    let metrics = manager.plugin_metrics();
    assert_eq!(metrics.per_plugin["auth"].requests_processed, 1);
    assert_eq!(metrics.per_plugin["logging"].requests_processed, 0);
}

#[tokio::test]
async fn test_chain_order_and_post_process_reversal() {
    let manager = PluginManager::new();
    let log = CallLog::default();
    for (name, priority) in [("late", 20), ("early", 5), ("middle", 10)] {
        TestPlugin::new(name)
            .middleware(priority)
            .with_log(log.clone())
            .register(&manager);
        manager.load_plugin(name, Default::default()).await.unwrap();
        manager.enable_plugin(name).unwrap();
    }

    let response = manager
        .pipeline()
        .execute(request("/"), &ok_handler)
        .await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.body(), b"mocked");
    assert_eq!(
        *log.lock().unwrap(),
        [
            "pre:early",
            "pre:middle",
            "pre:late",
            "post:late",
            "post:middle",
            "post:early"
        ]
    );
}

#[tokio::test]
async fn test_only_enabled_middlewares_run() {
    let manager = PluginManager::new();
    let enabled = TestPlugin::new("enabled").middleware(1).register(&manager);
    let loaded = TestPlugin::new("loaded").middleware(2).register(&manager);
    let disabled = TestPlugin::new("disabled").middleware(3).register(&manager);

    for name in ["enabled", "loaded", "disabled"] {
        manager.load_plugin(name, Default::default()).await.unwrap();
    }
    manager.enable_plugin("enabled").unwrap();
    manager.enable_plugin("disabled").unwrap();
    manager.disable_plugin("disabled").unwrap();

    let response = manager.pipeline().execute(request("/"), &ok_handler).await;
    assert_eq!(response.status(), 200);
    assert_eq!(Counters::get(&enabled.pre), 1);
    assert_eq!(Counters::get(&loaded.pre), 0);
    assert_eq!(Counters::get(&disabled.pre), 0);
}

#[tokio::test]
async fn test_panicking_plugin_is_contained() {
    let manager = PluginManager::new();
    TestPlugin::new("volatile")
        .middleware(0)
        .panicking()
        .register(&manager);
    let after = TestPlugin::new("after").middleware(1).register(&manager);
    for name in ["volatile", "after"] {
        manager.load_plugin(name, Default::default()).await.unwrap();
        manager.enable_plugin(name).unwrap();
    }

    let handler = manager.pipeline().wrap(ok_handler);
    for _ in 0..2 {
        let response = handler.handle(request("/")).await.unwrap();
        assert_eq!(response.status(), 500);
    }
    assert_eq!(Counters::get(&after.pre), 0);

    let info = manager.plugin_info("volatile").unwrap();
    // Pipeline failures do not change lifecycle state
    assert_eq!(info.state, PluginState::Enabled);
    assert_eq!(info.metrics.requests_processed, 2);
    assert_eq!(info.metrics.error_count, 2);
    assert!(info.last_error.unwrap().contains("volatile exploded"));

    let totals = manager.plugin_metrics();
    assert_eq!(totals.total_plugins, 2);
    assert_eq!(totals.enabled_plugins, 2);
    assert_eq!(totals.total_requests, 2);
    assert_eq!(totals.total_errors, 2);
}

#[tokio::test]
async fn test_panic_reaches_metrics_collector() {
    let metrics = std::sync::Arc::new(mockgate_plugin::InMemoryMetrics::new());
    let manager = PluginManager::builder()
        .metrics(metrics.clone())
        .build()
        .unwrap();
    TestPlugin::new("volatile")
        .middleware(0)
        .panicking()
        .register(&manager);
    manager.load_plugin("volatile", Default::default()).await.unwrap();
    manager.enable_plugin("volatile").unwrap();

    manager.pipeline().execute(request("/"), &ok_handler).await;

    let stats = metrics.plugin("volatile").unwrap();
    assert_eq!(stats.errors(ErrorCategory::Panic), 1);
}

async fn builtin_manager() -> PluginManager {
    let manager = PluginManager::new();
    builtin::register_builtins(manager.registry()).unwrap();
    manager
        .load_plugin(
            builtin::auth::NAME,
            config(json!({
                "keys": {"secret-1": "alice"},
                "public_paths": ["/health"]
            })),
        )
        .await
        .unwrap();
    manager
        .load_plugin(
            builtin::cors::NAME,
            config(json!({"allowed_origins": ["https://app.example.com"]})),
        )
        .await
        .unwrap();
    manager
        .load_plugin(
            builtin::rate_limit::NAME,
            config(json!({"requests_per_second": 1, "burst": 2})),
        )
        .await
        .unwrap();
    manager
        .load_plugin(builtin::logger::NAME, Default::default())
        .await
        .unwrap();
    for name in manager.registry().names() {
        manager.enable_plugin(&name).unwrap();
    }
    manager
}

fn authed(path: &str) -> mockgate_plugin::HttpRequest {
    http::Request::builder()
        .uri(path)
        .header("x-api-key", "secret-1")
        .header("x-forwarded-for", "10.0.0.7")
        .body(Vec::new())
        .unwrap()
}

#[tokio::test]
async fn test_builtins_end_to_end() {
    let manager = builtin_manager().await;
    let handler = manager.pipeline().wrap(ok_handler);

    // Missing key
    let response = handler.handle(request("/api/users")).await.unwrap();
    assert_eq!(response.status(), 401);

    // Public path needs no key
    let response = handler.handle(request("/health")).await.unwrap();
    assert_eq!(response.status(), 200);

    // Burst of two, then throttled
    for _ in 0..2 {
        let response = handler.handle(authed("/api/users")).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.body(), b"mocked");
    }
    let response = handler.handle(authed("/api/users")).await.unwrap();
    assert_eq!(response.status(), 429);
    assert!(response.headers().contains_key("retry-after"));

    let metrics = manager.plugin_metrics();
    assert_eq!(metrics.enabled_plugins, 4);
    assert_eq!(metrics.total_errors, 0);

    let report = manager.shutdown().await;
    assert!(report.is_clean());
    assert_eq!(report.unloaded.len(), 4);
}

#[tokio::test]
async fn test_cors_preflight_short_circuits_before_auth() {
    let manager = builtin_manager().await;
    let handler = manager.pipeline().wrap(ok_handler);

    let preflight = http::Request::builder()
        .method("OPTIONS")
        .uri("/api/users")
        .header("origin", "https://app.example.com")
        .header("access-control-request-method", "POST")
        .body(Vec::new())
        .unwrap();
    let response = handler.handle(preflight).await.unwrap();
    assert_eq!(response.status(), 204);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://app.example.com"
    );

    let foreign = http::Request::builder()
        .method("OPTIONS")
        .uri("/api/users")
        .header("origin", "https://evil.example.com")
        .header("access-control-request-method", "POST")
        .body(Vec::new())
        .unwrap();
    let response = handler.handle(foreign).await.unwrap();
    assert_eq!(response.status(), 403);

    manager.shutdown().await;
}
