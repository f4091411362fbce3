//! strata: intent runtime over pluggable storage
//!
//! Usage:
//!   strata                         → serve the HTTP gateway
//!   strata --data-dir /var/strata  → serve with filesystem adapters under that dir
//!   strata reconcile               → sweep orphaned blobs and rebuild the file index
//!   strata config                  → print the effective configuration as TOML
//!   strata version                 → show version

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use strata_core::{AuthMode, BindMode, StrataConfig};
use strata_foundation::FoundationService;
use strata_orchestrator::{default_registry, IntentRuntime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

#[derive(Parser)]
#[command(
    name = "strata",
    about = "Intent runtime with layered storage protocols",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the config file (TOML)
    #[arg(short, long, global = true, default_value = "strata.toml")]
    config: PathBuf,

    /// Port for the gateway server
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind mode: lan or loopback
    #[arg(short, long)]
    bind: Option<String>,

    /// Auth token (or set STRATA_GATEWAY_TOKEN). Enables token auth.
    #[arg(short, long)]
    token: Option<String>,

    /// Disable authentication
    #[arg(long, default_value_t = false)]
    no_auth: bool,

    /// Root directory for filesystem-backed adapters
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Write logs to a daily rolling file in this directory (in addition to stderr)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sweep orphaned blobs and rebuild missing file index entries
    Reconcile,
    /// Print the effective configuration
    Config,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("strata v{}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Config) => {
            print!("{}", load_config(&cli)?.to_toml());
        }
        Some(Commands::Reconcile) => {
            let _guard = init_tracing(&cli)?;
            reconcile(load_config(&cli)?).await?;
        }
        None => {
            let _guard = init_tracing(&cli)?;
            serve(load_config(&cli)?).await?;
        }
    }

    Ok(())
}

/// File config, then `STRATA_*` env, then CLI flags. A config file that does
/// not parse stops startup rather than silently selecting default storage.
fn load_config(cli: &Cli) -> anyhow::Result<StrataConfig> {
    let mut config = StrataConfig::try_load(&cli.config)?.with_env_overrides();
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    if let Some(bind) = &cli.bind {
        config.gateway.bind = match bind.as_str() {
            "loopback" | "localhost" | "127.0.0.1" => BindMode::Loopback,
            _ => BindMode::Lan,
        };
    }
    if let Some(token) = &cli.token {
        config.gateway.auth.mode = AuthMode::Token;
        config.gateway.auth.token = Some(token.clone());
    }
    if cli.no_auth {
        config.gateway.auth.mode = AuthMode::None;
        config.gateway.auth.token = None;
    }
    if let Some(dir) = &cli.data_dir {
        config.foundation.data_dir = dir.clone();
    }
    Ok(config)
}

fn init_tracing(cli: &Cli) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "strata=info,tower_http=info".into())
    };

    let stderr = if cli.json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file, guard) = match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "strata.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr.with_filter(filter()))
        .with(file)
        .init();
    Ok(guard)
}

async fn serve(config: StrataConfig) -> anyhow::Result<()> {
    let foundation = FoundationService::new(config.clone());
    let registry = default_registry(&config)?;
    let runtime = IntentRuntime::start(foundation.clone(), registry).await?;

    tracing::info!("Data dir: {}", config.foundation.data_dir.display());
    let result = strata_gateway::serve(&config.gateway, runtime, shutdown_signal()).await;

    foundation.shutdown().await;
    result
}

async fn reconcile(config: StrataConfig) -> anyhow::Result<()> {
    let foundation = FoundationService::new(config);
    foundation.initialize().await?;
    let report = foundation.file_storage()?.reconcile().await;
    foundation.shutdown().await;
    let report = report?;
    println!(
        "orphans removed: {}, orphan markers cleared: {}, index entries rebuilt: {}",
        report.orphans_removed, report.markers_cleared, report.index_entries_rebuilt
    );
    for failure in &report.failures {
        println!("  failed: {}", failure);
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
