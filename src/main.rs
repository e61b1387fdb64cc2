//! Chathub - real-time WebSocket chat hub
//!
//! Accepts WebSocket connections, keeps a registry of online users and fans
//! chat messages and presence updates out to everyone connected.

use std::env;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    fmt::{self, MakeWriter},
    prelude::*,
    EnvFilter, Layer, Registry,
};

use chathub::{
    config::{LogFormat, LogTarget, LoggingConfig},
    create_router, middleware, AppConfig, AppState,
};

fn main() -> Result<()> {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    // Check for --help flag
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(());
    }

    // Check for --version flag
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        println!("Chathub {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load configuration first (before logging, so we know log format)
    let config = AppConfig::load().context("Failed to load configuration")?;

    if args.iter().any(|arg| arg == "--print-config") {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    // The guard must be kept alive for the duration of the program
    // to ensure log messages are flushed to files
    let _log_guard = init_logging(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers.max(1))
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: AppConfig) -> Result<()> {
    info!("Starting Chathub v{}", env!("CARGO_PKG_VERSION"));
    info!(
        workers = config.server.workers,
        ws_path = %config.server.ws_path,
        max_message_bytes = config.chat.max_message_bytes,
        "Configuration loaded"
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address configuration")?;

    let state = AppState::new(config.clone());

    if config.rate_limit.enabled {
        middleware::spawn_rate_limit_cleanup(state.rate_limit.clone());
    } else {
        warn!("WebSocket handshake rate limiting is disabled");
    }

    if config.chat.announce_token.is_none() {
        warn!("No announce_token configured, announcements are accepted from anyone");
    }

    let app = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(
        "Chat hub listening on ws://{}{}",
        addr, config.server.ws_path
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(state))
    .await
    .context("HTTP server error")?;

    info!("Chathub stopped");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM, closing every chat connection first
async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }

    state.begin_shutdown();
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize logging based on configuration
///
/// Returns the file writer guard when logging to a file.
fn init_logging(config: &AppConfig) -> Option<WorkerGuard> {
    let log_config = &config.logging;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_config.level));

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if matches!(log_config.target, LogTarget::Console | LogTarget::Both) {
        layers.push(fmt_layer(&log_config.format, std::io::stdout));
    }

    if matches!(log_config.target, LogTarget::File | LogTarget::Both) {
        let (writer, file_guard) = create_file_writer(log_config);
        layers.push(fmt_layer(&log_config.format, writer));
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .init();

    guard
}

fn fmt_layer<W>(format: &LogFormat, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(writer)
            .boxed(),
    }
}

/// Create a file writer with optional daily rotation
fn create_file_writer(log_config: &LoggingConfig) -> (NonBlocking, WorkerGuard) {
    if let Err(e) = std::fs::create_dir_all(&log_config.log_dir) {
        eprintln!(
            "Warning: Failed to create log directory {:?}: {}",
            log_config.log_dir, e
        );
    }

    let file_appender = if log_config.daily_rotation {
        tracing_appender::rolling::daily(&log_config.log_dir, &log_config.log_prefix)
    } else {
        tracing_appender::rolling::never(&log_config.log_dir, &log_config.log_prefix)
    };

    tracing_appender::non_blocking(file_appender)
}

fn print_help() {
    println!(
        r#"Chathub {}

USAGE:
    chathub [OPTIONS]

OPTIONS:
    -h, --help              Print this help message
    -V, --version           Print version information
    --print-config          Print the effective configuration as YAML and exit

ENVIRONMENT:
    CHATHUB_CONFIG          Path to configuration file (default: config.yaml)
    CHATHUB_HOST            Listen address
    CHATHUB_PORT            Listen port
    CHATHUB_WORKERS         Number of runtime worker threads
    CHATHUB_ANNOUNCE_TOKEN  Bearer token required for announcements
    RUST_LOG                Log filter (overrides logging.level)

CONFIGURATION:
    The application looks for configuration files in the following order:
    1. Path specified by CHATHUB_CONFIG environment variable
    2. ./config.yaml
    3. ./config/config.yaml
    4. /etc/chathub/config.yaml
    5. <user config dir>/chathub/config.yaml

Clients connect with: ws://<host>:<port>/ws?username=<name>"#,
        env!("CARGO_PKG_VERSION")
    );
}
