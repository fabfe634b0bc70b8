//! Command-line arguments.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Mars - recording HTTP(S) proxy with replay
#[derive(Parser, Debug)]
#[command(name = "mars", version, about)]
pub struct Args {
    /// TOML configuration file
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Proxy listen address
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// API listen address
    #[arg(long)]
    pub api_listen: Option<SocketAddr>,

    /// Do not start the API server
    #[arg(long)]
    pub no_api: bool,

    /// SQLite database path
    #[arg(long, conflicts_with = "memory")]
    pub db: Option<PathBuf>,

    /// Keep transactions in memory only
    #[arg(long)]
    pub memory: bool,

    /// Append transactions to a JSON-lines file
    #[arg(long)]
    pub jsonl: Option<PathBuf>,

    /// Root CA certificate (PEM)
    #[arg(long)]
    pub ca_cert: Option<PathBuf>,

    /// Root CA private key (PEM)
    #[arg(long)]
    pub ca_key: Option<PathBuf>,

    /// Disable response rewriting
    #[arg(long)]
    pub no_rewrite: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
