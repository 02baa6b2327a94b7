//! Strata: an HTTP(S) edge server.
//!
//! This is the application entry point. It loads configuration, initializes
//! tracing, builds the router, starts the listeners and then parks until a
//! termination signal drains the server.

use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use strata::config::{parse_port, AppConfig, LoggingConfig, DEFAULT_LOG_FILTER};
use strata::http::{self, shutdown};
use strata::routes::create_router;
use strata::session;
use strata::state::AppState;
use strata::templates::init_templates;

/// Strata: HTTP(S) server with negotiated compression and automatic TLS
#[derive(Parser, Debug)]
#[command(name = "strata", version, about)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Host name or address to listen on (overrides config and STRATA_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config and STRATA_PORT)
    #[arg(short, long, value_parser = parse_port)]
    port: Option<u16>,

    /// Log level filter (e.g., "strata=debug,tower_http=info")
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Layering: defaults < file < environment < command line
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.http.host = host;
    }
    if let Some(port) = args.port {
        config.http.port = port;
    }
    config.validate()?;

    // Initialize tracing with priority: CLI > env > default
    let log_filter = args
        .log_level
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    init_tracing(&log_filter, &config.logging)?;

    tracing::info!(
        host = %config.http.host,
        port = config.http.port,
        tls = config.tls.enabled,
        acme = config.tls.acme,
        static_dir = %config.content.static_dir,
        "Loaded configuration"
    );

    let tera = init_templates(&config.content.template_glob())?;
    tracing::info!("Initialized templates");

    let cookie_key = session::cookie_key(&config.auth)?;
    let deadline = Duration::from_secs(config.http.shutdown_timeout_seconds);

    let state = AppState::new(config.clone(), tera, cookie_key);
    let app = create_router(state);

    let handle = http::start(app, &config).await?;
    tracing::info!(
        mode = ?handle.mode(),
        addr = %handle.local_addr(),
        "Server ready"
    );

    shutdown::run(handle, deadline).await?;
    Ok(())
}

/// Install the global subscriber: stderr always, plus an append-mode copy in
/// `logging.file` when configured.
fn init_tracing(filter: &str, logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let file = match &logging.file {
        Some(path) => Some(Arc::new(
            OpenOptions::new().create(true).append(true).open(path)?,
        )),
        None => None,
    };

    let registry = tracing_subscriber::registry().with(EnvFilter::new(filter));

    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(file.map(|file| fmt::layer().json().with_writer(file)))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(file.map(|file| fmt::layer().with_ansi(false).with_writer(file)))
            .init();
    }

    Ok(())
}
