//! Mars - recording HTTP(S) proxy with replay.
//!
//! Main entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use directories::ProjectDirs;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mars_app::{wiring, Args, Config};
use mars_proxy::{ProxyConfig, ProxyServer};
use mars_server::{AppState, Server, ServerConfig};

/// Get the logs directory path.
fn logs_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "mars", "mars").map(|dirs| dirs.data_dir().join("logs"))
}

/// Initialize console logging, plus a rolling log file when possible.
fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = if args.debug { "debug" } else { &args.log_level };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mars={},warn", log_level)));

    if let Some(log_dir) = logs_dir() {
        if std::fs::create_dir_all(&log_dir).is_ok() {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(5)
                .filename_prefix("mars")
                .filename_suffix("log")
                .build(&log_dir)
                .ok();

            if let Some(appender) = file_appender {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(std::io::stdout))
                    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                    .init();

                tracing::info!("Logging to {:?}", log_dir);
                return Some(guard);
            }
        }
    }

    // Fallback: console logging only
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::warn!("File logging unavailable, using console only");
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Keep the guard alive for the duration of the program
    let _log_guard = init_logging(&args);

    let config = Config::from_args(&args).context("failed to load configuration")?;
    tracing::info!("Starting Mars...");
    tracing::debug!("Config: {:?}", config);

    let recorder = wiring::build_recorder(&config)?;

    let proxy_config = ProxyConfig {
        addr: config.proxy.listen,
        ca_manager: wiring::ca_manager(&config)?,
    };
    let proxy = ProxyServer::new(proxy_config, recorder.clone())
        .context("failed to start proxy (is the root CA provisioned?)")?
        .start()?;
    tracing::info!("Proxy listening on {}", proxy.addr());

    if config.api.enabled {
        let server = Server::with_state(
            ServerConfig::default().with_addr(config.api.listen),
            AppState::new(recorder),
        )?;
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!("API server error: {}", e);
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("Mars shutting down");
    proxy.stop().await;
    Ok(())
}
