use async_trait::async_trait;
use mockgate_plugin::{
    BoxError, HttpRequest, HttpResponse, Middleware, Plugin, PluginAction, PluginConfig,
    PluginContext, PluginManager, RequestContext, RequestHandler,
};

/// Example plugin that adds a custom header to requests
pub struct HelloPlugin {
    greeting: String,
}

impl HelloPlugin {
    pub fn new() -> Self {
        Self {
            greeting: "Hello".to_string(),
        }
    }
}

#[async_trait]
impl Plugin for HelloPlugin {
    fn name(&self) -> &str {
        "hello-plugin"
    }

    // Optional: read configuration on load
    async fn init(&mut self, _ctx: &PluginContext, config: &PluginConfig) -> Result<(), BoxError> {
        if let Some(greeting) = config.get("greeting").and_then(|v| v.as_str()) {
            self.greeting = greeting.to_string();
        }
        println!("Plug: HelloPlugin initialized with greeting: {}", self.greeting);
        Ok(())
    }

    fn as_middleware(&self) -> Option<&dyn Middleware> {
        Some(self)
    }
}

#[async_trait]
impl Middleware for HelloPlugin {
    fn priority(&self) -> i32 {
        50
    }

    async fn pre_process(&self, ctx: &mut RequestContext) -> Result<PluginAction, BoxError> {
        // Add custom header to all requests
        ctx.request_mut()
            .headers_mut()
            .insert("X-Custom-Greeting", self.greeting.parse()?);
        Ok(PluginAction::Continue)
    }
}

async fn echo_greeting(req: HttpRequest) -> Result<HttpResponse, BoxError> {
    let greeting = req
        .headers()
        .get("X-Custom-Greeting")
        .map(|v| v.as_bytes().to_vec())
        .unwrap_or_default();
    Ok(http::Response::new(greeting))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Setup logging
    tracing_subscriber::fmt().init();

    let manager = PluginManager::new();

    println!("Registering HelloPlugin...");
    manager.register_plugin("hello-plugin", || Ok(Box::new(HelloPlugin::new()) as Box<dyn Plugin>))?;

    let mut config = PluginConfig::new();
    config.insert("greeting".into(), "Hello from Example!".into());
    manager.load_plugin("hello-plugin", config).await?;
    manager.enable_plugin("hello-plugin")?;

    println!("HelloPlugin loaded and enabled successfully!");

    // Simulate request
    let handler = manager.pipeline().wrap(echo_greeting);
    let req = http::Request::builder()
        .uri("http://example.com")
        .body(vec![])?;

    println!("Simulating request processing...");
    let response = handler.handle(req).await?;
    println!(
        "Handler saw greeting: {}",
        String::from_utf8_lossy(response.body())
    );

    let report = manager.shutdown().await;
    println!("Unloaded: {:?}", report.unloaded);
    Ok(())
}
