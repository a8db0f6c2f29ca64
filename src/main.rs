use std::{net::SocketAddr, sync::Arc};

use axum::{Router, routing::any};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use rudder::{
    adapters::{HealthChecker, HttpClientAdapter, ProxyState, admin_router, proxy_handler},
    config,
    core::BalancerService,
    metrics,
    ports::http_client::HttpClient,
    tracing_setup,
};
use tower_http::trace::TraceLayer;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.toml")]
    config: String,

    /// Emit JSON logs instead of the console format
    #[clap(long)]
    log_json: bool,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Write a starter configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Start the load balancer (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
}

const STARTER_CONFIG: &str = r#"listen_addr = "127.0.0.1:8080"
default_algorithm = "LEAST_CONNECTIONS"

[health_check]
enabled = true
interval_secs = 10
timeout_secs = 5
path = "/api/health"

[[servers]]
url = "http://localhost:5001"
weight = 2

[[servers]]
url = "http://localhost:5002"
weight = 1

[[servers]]
url = "http://localhost:5003"
weight = 1
"#;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_command(&config),
        Some(Commands::Init { config }) => init_command(&config),
        Some(Commands::Serve { config }) => serve(&config, args.log_json).await,
        None => serve(&args.config, args.log_json).await,
    }
}

fn validate_command(config_path: &str) -> Result<()> {
    let config = config::load_config(config_path)?;
    match config::validate(&config) {
        Ok(()) => {
            println!("Configuration {config_path} is valid");
            Ok(())
        }
        Err(errors) => {
            for error in &errors {
                eprintln!("- {error}");
            }
            Err(eyre!(
                "configuration {config_path} has {} problem(s)",
                errors.len()
            ))
        }
    }
}

fn init_command(config_path: &str) -> Result<()> {
    if std::path::Path::new(config_path).exists() {
        return Err(eyre!("{config_path} already exists, refusing to overwrite"));
    }
    std::fs::write(config_path, STARTER_CONFIG)
        .wrap_err_with(|| format!("Failed to write {config_path}"))?;
    println!("Wrote starter configuration to {config_path}");
    Ok(())
}

async fn serve(config_path: &str, log_json: bool) -> Result<()> {
    if log_json {
        tracing_setup::init_tracing()?;
    } else {
        tracing_setup::init_console_tracing()?;
    }

    let config = config::load_config(config_path)
        .wrap_err_with(|| format!("Failed to load configuration from {config_path}"))?;
    config::validate(&config).map_err(|errors| {
        eyre!(
            "invalid configuration: {}",
            errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        )
    })?;

    metrics::init_metrics();

    let listen_addr: SocketAddr = config
        .listen_addr
        .parse()
        .wrap_err_with(|| format!("Invalid listen address {}", config.listen_addr))?;

    let config = Arc::new(config);
    let service = Arc::new(BalancerService::new(config.clone()));
    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().wrap_err("Failed to create HTTP client")?);

    let health_checker = HealthChecker::new(service.clone(), http_client.clone());
    tokio::spawn(async move {
        if let Err(err) = health_checker.run().await {
            tracing::error!(%err, "Health checker terminated");
        }
    });

    let proxy_state = ProxyState::new(service.clone(), http_client);
    let app = Router::new()
        .nest("/admin", admin_router(service.clone()))
        .fallback_service(any(proxy_handler).with_state(proxy_state))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .wrap_err_with(|| format!("Failed to bind {listen_addr}"))?;

    tracing::info!(
        %listen_addr,
        algorithm = %service.algorithm(),
        servers = config.servers.len(),
        health_interval_secs = config.health_check.interval_secs,
        "Rudder load balancer ready"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .wrap_err("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutting down load balancer");
}
