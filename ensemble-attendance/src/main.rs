//! ensemble-attendance - attendance service and live view client
//!
//! `serve` runs the HTTP service over the local database.
//! `watch` polls a running service and logs every refreshed sheet.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ensemble_attendance::sync::{HttpLedgerSource, LiveViewSynchronizer, Synchronizer, DEFAULT_POLL_INTERVAL};
use ensemble_attendance::{build_router, AppState};
use ensemble_common::attendance::EventId;
use ensemble_common::config::{RootFolderInitializer, RootFolderResolver, TomlConfig};
use ensemble_common::db::init_database;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ensemble-attendance")]
#[command(about = "Attendance tracking for ensemble rehearsals and performances")]
#[command(version)]
struct Cli {
    /// Bootstrap configuration file
    #[arg(short, long, global = true, env = "ENSEMBLE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the attendance HTTP service
    Serve {
        /// Root folder holding ensemble.db (falls back to ENSEMBLE_ROOT_FOLDER)
        #[arg(short, long)]
        root_folder: Option<PathBuf>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Poll a running service and log the attendance sheet
    Watch {
        /// Base URL of the attendance service
        #[arg(long, default_value = "http://127.0.0.1:5760", env = "ENSEMBLE_ATTENDANCE_URL")]
        url: String,

        /// Event to watch
        #[arg(short, long)]
        event: EventId,

        /// Polling interval in milliseconds (defaults to the service setting)
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = TomlConfig::load_or_default(cli.config.as_deref());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .init();

    info!(
        "Starting ensemble-attendance v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    match cli.command {
        Command::Serve { root_folder, port } => serve(&config, root_folder, port).await,
        Command::Watch {
            url,
            event,
            interval_ms,
        } => watch(&url, event, interval_ms.map(Duration::from_millis)).await,
    }
}

async fn serve(config: &TomlConfig, root_folder: Option<PathBuf>, port: Option<u16>) -> Result<()> {
    let root_folder = RootFolderResolver::new()
        .with_cli_arg(root_folder)
        .with_toml_config(config)
        .resolve();

    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to create root folder")?;

    let db_path = initializer.database_path();
    info!("Database path: {}", db_path.display());

    let pool = init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    let app = build_router(AppState::new(pool));

    let port = port.unwrap_or(config.port);
    let addr: SocketAddr = format!("{}:{}", config.bind_address, port)
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", config.bind_address))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("ensemble-attendance listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn watch(url: &str, event_id: EventId, interval: Option<Duration>) -> Result<()> {
    let source = HttpLedgerSource::new(url, Duration::from_secs(10)).context("Failed to create HTTP client")?;
    let interval = match interval {
        Some(interval) => interval,
        None => source.poll_interval().await.unwrap_or_else(|e| {
            warn!("Could not read polling interval from service, using default: {}", e);
            DEFAULT_POLL_INTERVAL
        }),
    };
    let sync = LiveViewSynchronizer::new(event_id, Arc::new(source));
    let mut views = sync.subscribe();

    sync.start(interval).await;

    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                match (&view.sheet, view.consecutive_failures) {
                    (Some(sheet), 0) => {
                        let s = sheet.summary;
                        info!(
                            event_id,
                            total = s.total,
                            present = s.present,
                            late = s.late,
                            absent = s.absent,
                            excused = s.excused,
                            unmarked = s.unmarked,
                            "Attendance refreshed"
                        );
                    }
                    (_, failures) => warn!(
                        event_id,
                        failures,
                        error = view.last_error.as_deref().unwrap_or(""),
                        "Showing last known attendance"
                    ),
                }
            }
            _ = shutdown_signal() => break,
        }
    }

    sync.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
