use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use feedhook::{Backends, Config, FeedService, HttpFetcher, WebServer, WebhookNotifier};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    // Load configuration
    let config = match Config::load_with_env(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {config_path}: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = feedhook::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        feedhook::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = config.validate() {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> feedhook::Result<()> {
    info!("feedhook {}", env!("CARGO_PKG_VERSION"));

    let backends = Backends::open(&config.database, &config.seen).await?;
    let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);
    let notifier = Arc::new(WebhookNotifier::new(&config.notify)?);
    let service = Arc::new(FeedService::new(
        backends.registry,
        backends.store,
        fetcher,
        notifier,
        config.scheduler.clone(),
    ));

    // Storage trouble during reconciliation is fatal
    service.start().await?;

    if config.server.enabled {
        let server = WebServer::new(&config.server, service.clone())?;
        server.run(shutdown_signal()).await?;
    } else {
        info!("HTTP server disabled");
        shutdown_signal().await;
    }

    info!("Shutting down");
    service.shutdown().await;
    if let Some(db) = backends.database {
        db.close().await;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
