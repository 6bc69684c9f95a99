use signal_bot::config;
use signal_bot::router::{Command, CommandRouter, HandlerError, HandlerResult, Trigger};
use signal_bot::Application;
use signal_bot::Context;
use tracing::info;

async fn ping_handler(ctx: Context) -> HandlerResult {
    ctx.reply("pong")
        .await
        .map_err(|e| HandlerError::transient(e.to_string()))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "signal-bot starting");

    let cfg = match config::load_config() {
        Ok(cfg) => {
            info!(
                worker_pool_size = cfg.worker_pool_size,
                queue_capacity = cfg.queue_capacity,
                "config loaded"
            );
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let commands = vec![Command::new(
        "ping",
        vec![Trigger::Literal {
            text: "!ping".to_string(),
            case_sensitive: false,
        }],
        None,
        ping_handler,
    )];
    let router = CommandRouter::new(commands);
    let middlewares = Vec::new();

    let app = match Application::build(cfg, router, middlewares) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("FATAL: failed to build application: {e}");
            std::process::exit(1);
        }
    };

    let handle = match app.start().await {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("FATAL: failed to start application: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("failed to listen for shutdown signal: {e}");
    }
    info!("shutdown signal received, draining");
    handle.stop().await;
}
