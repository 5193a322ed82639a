//! AdaSplit router - splits chat-completion traffic into LONG and SHORT
//! classes and adapts the backend partition to the LONG backlog.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use adasplit_router::{app, AppState, Config, HttpForwarder};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    println!("adasplit-router {}", VERSION);
}

fn config_path(args: &[String]) -> Option<&str> {
    args.iter()
        .position(|a| a == "--config" || a == "-c")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle --version / -V
    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        print_version();
        return Ok(());
    }

    // Load configuration
    let config = Config::load(config_path(&args)).map_err(|e| {
        format!(
            "{}. Check config.toml (or --config <path>) and ROUTER__SECTION__KEY environment variables.",
            e
        )
    })?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting AdaSplit router {}", VERSION);
    for (i, backend) in config.scheduler.backends.iter().enumerate() {
        tracing::info!("Backend {}: {}", i + 1, backend);
    }

    let forwarder = Arc::new(HttpForwarder::new(&config.forwarding)?);
    let state = Arc::new(AppState::new(config.clone(), forwarder)?);

    // Background loops
    state.scheduler.spawn_rebalancer();
    state.monitor.spawn_reporter(
        Duration::from_secs(config.monitor.report_interval_secs.max(1)),
        config.classifier.threshold,
    );

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = app(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
