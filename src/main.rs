//! liveset-bridge - control bridge for a live DAW session
//!
//! Connects to the host's datagram listener (or an in-memory simulated
//! session), then serves named operations from an interactive REPL.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(30);

use crate::cli::ReplCommand;
use liveset_bridge::config::{AppConfig, ConfigWatcher};
use liveset_bridge::host::MemorySession;
use liveset_bridge::service::Bridge;
use liveset_bridge::transport::{udp, InProcessTransport, Transport, UdpTransport};

/// Live-set control bridge - drive a DAW session from the command line
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Run against an in-memory demo session instead of a real host
    #[arg(long)]
    simulate: bool,

    /// Like --simulate, but through a local UDP listener to exercise the wire path
    #[arg(long, conflicts_with = "simulate")]
    simulate_udp: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level, args.log_json)?;

    info!("Starting liveset-bridge v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    // Hot reload only when there is a file to watch
    let (config_watcher, config) = if Path::new(&args.config).exists() {
        let (watcher, config) = ConfigWatcher::new(args.config.clone()).await?;
        info!("Configuration loaded successfully with hot-reload enabled");
        (Some(watcher), config)
    } else {
        warn!(
            "⚠️  Config file {} not found, running with defaults (hot-reload disabled)",
            args.config
        );
        (None, AppConfig::default())
    };

    let transport = connect_transport(&args, &config).await?;
    let bridge = Bridge::from_config(transport, &config);
    info!("Bridge ready");

    run_app(bridge, config_watcher, shutdown_signal()).await?;

    info!("liveset-bridge shutdown complete");
    Ok(())
}

async fn connect_transport(args: &Args, config: &AppConfig) -> Result<Arc<dyn Transport>> {
    if args.simulate {
        info!("🧪 Simulated host: in-memory demo session");
        let session = Arc::new(MemorySession::demo());
        return Ok(Arc::new(InProcessTransport::new(session)));
    }

    if args.simulate_udp {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .context("Failed to bind simulated host listener")?;
        let addr = socket.local_addr()?.to_string();
        info!("🧪 Simulated host: demo session listening on {}", addr);

        tokio::spawn(async move {
            if let Err(e) = udp::serve(socket, Arc::new(MemorySession::demo())).await {
                warn!("Simulated host listener stopped: {}", e);
            }
        });

        let transport = UdpTransport::connect("127.0.0.1:0", &addr, config.host.timeout()).await?;
        return Ok(Arc::new(transport));
    }

    let transport = UdpTransport::connect(&config.host.bind, &config.host.addr(), config.host.timeout())
        .await
        .with_context(|| format!("Failed to reach host listener at {}", config.host.addr()))?;
    Ok(Arc::new(transport))
}

async fn run_app(
    bridge: Bridge,
    mut config_watcher: Option<ConfigWatcher>,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let mut commands = cli::spawn_repl()?;
    info!("Type 'help' for the list of operations");

    tokio::pin!(shutdown);

    let mut purge = tokio::time::interval(CACHE_PURGE_INTERVAL);
    purge.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Handle REPL input
            command = commands.recv() => match command {
                Some(ReplCommand::Run { op, params }) => {
                    let response = bridge.handle(&op, &params).await;
                    cli::print_response(&response);
                }
                Some(ReplCommand::Help) => cli::print_help(),
                Some(ReplCommand::Quit) | None => {
                    info!("REPL closed, stopping");
                    break;
                }
            },

            // Handle config reload
            Some(new_config) = next_config(&mut config_watcher) => {
                info!("📝 Configuration file changed, reloading...");
                bridge.apply_config(&new_config);
            }

            // Expired reads would otherwise linger until their key is read again
            _ = purge.tick() => {
                bridge.purge_cache();
            }

            // Handle shutdown signal
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }

    info!("Shutting down...");
    bridge.shutdown().await;

    Ok(())
}

/// Next reloaded config; never resolves without a watcher
async fn next_config(watcher: &mut Option<ConfigWatcher>) -> Option<AppConfig> {
    match watcher {
        Some(watcher) => watcher.next_config().await,
        None => std::future::pending().await,
    }
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .init();
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
