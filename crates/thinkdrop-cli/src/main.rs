use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use thinkdrop_config::ConfigLoader;
use thinkdrop_embed::MiniLmBackend;
use thinkdrop_gateway::Application;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "thinkdrop",
    version,
    about = "ThinkDrop - per-user long-term memory service"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the memory service
    Start {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },

    /// Stop a running service
    Stop,

    /// Show service status
    Status,
}

fn thinkdrop_dir() -> PathBuf {
    ConfigLoader::default_config_dir()
}

fn pid_file_path() -> PathBuf {
    thinkdrop_dir().join("thinkdrop.pid")
}

fn read_pid() -> Option<u32> {
    std::fs::read_to_string(pid_file_path())
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    // Signal 0 checks existence without sending anything.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    false
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    let loader = ConfigLoader::new()?;
    loader.ensure_dirs()?;
    let mut config = loader.load()?;

    match cli.command {
        Commands::Start { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            if let Some(pid) = read_pid()
                && is_process_running(pid)
            {
                anyhow::bail!("service already running (pid {pid})");
            }

            // Model load is fatal at boot: a memory service that cannot
            // embed has nothing to offer.
            let backend = tokio::task::spawn_blocking(MiniLmBackend::load)
                .await
                .context("model load task panicked")?
                .context("failed to load embedding model")?;

            let screens_dir = loader.config_dir().join("screens");
            let app = Application::build(config, Arc::new(backend), Some(screens_dir))
                .await
                .context("failed to build application")?;

            std::fs::write(pid_file_path(), std::process::id().to_string())?;

            tokio::select! {
                result = app.serve() => {
                    result.context("server failed")?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received");
                }
            }

            app.shutdown().await;
            let _ = std::fs::remove_file(pid_file_path());
        }

        Commands::Stop => {
            let Some(pid) = read_pid() else {
                println!("no pid file, service does not appear to be running");
                return Ok(());
            };

            #[cfg(unix)]
            {
                if unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } == 0 {
                    println!("sent SIGTERM to pid {pid}");
                } else {
                    println!("process {pid} not running, cleaning up pid file");
                }
            }
            #[cfg(not(unix))]
            println!("stop is only supported on unix; pid was {pid}");

            let _ = std::fs::remove_file(pid_file_path());
        }

        Commands::Status => {
            match read_pid() {
                Some(pid) if is_process_running(pid) => println!("running (pid {pid})"),
                Some(pid) => println!("stale pid file (pid {pid} not running)"),
                None => println!("not running"),
            }

            let url = format!(
                "http://{}:{}/service.health",
                config.server.host, config.server.port
            );
            match reqwest::get(&url).await {
                Ok(response) => {
                    let health: serde_json::Value = response.json().await?;
                    println!("{}", serde_json::to_string_pretty(&health)?);
                }
                Err(e) => println!("health check failed ({url}): {e}"),
            }
        }
    }

    Ok(())
}
