// InkHub entry point.
//
// Startup sequence:
// 1. Parse CLI and initialize tracing
// 2. Load config (copying defaults on first run)
// 3. Open database
// 4. Build the payment gateway and the marketplace
// 5. Run the requested command (serve, or backfill verification codes)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use inkhub_core::config;
use inkhub_core::db::Database;
use inkhub_core::mail::LogMailer;
use inkhub_core::Marketplace;
use inkhub_paymongo::Gateway;
use inkhub_server::{serve_http, shutdown_signal, ws_server};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "inkhub", version, about = "Freelance marketplace backend")]
struct Cli {
    /// Directory containing `config/` and `defaults/`.
    #[arg(long, global = true, default_value = ".")]
    base_dir: PathBuf,

    /// Write logs to this file instead of stdout.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP and WebSocket servers (default).
    Serve,
    /// Issue verification codes to every user that has none.
    GenerateVerificationCodes,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. CLI + tracing
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;
    info!("InkHub starting up");

    // 2. Config
    let config = config::load_config(&cli.base_dir).context("failed to load configuration")?;
    info!(
        "Config loaded: http port {}, websocket port {}",
        config.http_port, config.ws_port
    );

    // 3. Database
    let db = Database::open(&config.db_path).context("failed to open database")?;
    info!("Database opened at {}", config.db_path);

    // 4. Gateway + marketplace
    let gateway = Gateway::from_config(&config);
    if gateway.is_active() {
        info!("PayMongo gateway initialized (secret key configured)");
    } else {
        info!("PayMongo gateway disabled (no secret key)");
    }
    let (http_port, ws_port) = (config.http_port, config.ws_port);
    let market = Arc::new(Marketplace::new(
        db,
        config,
        Arc::new(LogMailer),
        Arc::new(gateway),
    ));

    // 5. Command
    match cli.command.unwrap_or(Command::Serve) {
        Command::GenerateVerificationCodes => {
            let emails = market
                .generate_missing_codes()
                .context("failed to generate verification codes")?;
            for email in &emails {
                println!("{email}");
            }
            info!("Generated verification codes for {} users", emails.len());
        }
        Command::Serve => {
            let ws_market = market.clone();
            let ws_handle = tokio::spawn(async move {
                if let Err(e) = ws_server::run(ws_port, ws_market).await {
                    error!("WebSocket server error: {}", e);
                }
            });

            if let Err(e) = serve_http(http_port, market, shutdown_signal()).await {
                error!("HTTP server error: {}", e);
            }

            // The WebSocket server loops forever.
            ws_handle.abort();
            info!("InkHub shut down cleanly");
        }
    }
    Ok(())
}

/// Initialize tracing to stdout, or to `log_file` without ANSI colours.
fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let builder = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("inkhub=info,warn")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    match log_file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let subscriber = builder.with_writer(file).with_ansi(false).finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("failed to set tracing subscriber")?;
        }
        None => {
            tracing::subscriber::set_global_default(builder.finish())
                .context("failed to set tracing subscriber")?;
        }
    }
    Ok(())
}
