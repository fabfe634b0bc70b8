//! Configuration file and command-line overrides.
//!
//! Every field has a default, so an absent or partial file is fine. Command
//! line flags are applied on top of whatever the file says.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use mars_core::RewriteRule;
use mars_storage::DEFAULT_CAPACITY;
use serde::Deserialize;
use thiserror::Error;

use crate::cli::Args;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub proxy: ProxySection,
    pub api: ApiSection,
    pub storage: StorageSection,
    pub output: OutputSection,
    pub rewrite: RewriteSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    pub listen: SocketAddr,
    pub ca_cert: Option<PathBuf>,
    pub ca_key: Option<PathBuf>,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], mars_proxy::DEFAULT_PROXY_PORT)),
            ca_cert: None,
            ca_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub enabled: bool,
    pub listen: SocketAddr,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: SocketAddr::from(([127, 0, 0, 1], mars_server::DEFAULT_PORT)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub kind: StorageKind,
    /// SQLite file; the data directory is used when unset.
    pub path: Option<PathBuf>,
    /// Transactions kept by the memory backend.
    pub capacity: usize,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            kind: StorageKind::Sqlite,
            path: None,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    /// Log a summary line per transaction.
    pub log: bool,
    /// Append transactions to this JSON-lines file.
    pub jsonl: Option<PathBuf>,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            log: true,
            jsonl: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RewriteSection {
    pub enabled: bool,
    #[serde(flatten)]
    pub rule: RewriteRule,
}

impl Default for RewriteSection {
    fn default() -> Self {
        Self {
            enabled: true,
            rule: RewriteRule::default(),
        }
    }
}

impl Config {
    /// Reads a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Loads the file named by `--config` (if any) and applies the flags.
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_args(&mut self, args: &Args) {
        if let Some(listen) = args.listen {
            self.proxy.listen = listen;
        }
        if let Some(listen) = args.api_listen {
            self.api.listen = listen;
        }
        if args.no_api {
            self.api.enabled = false;
        }
        if args.memory {
            self.storage.kind = StorageKind::Memory;
        }
        if let Some(db) = &args.db {
            self.storage.kind = StorageKind::Sqlite;
            self.storage.path = Some(db.clone());
        }
        if let Some(jsonl) = &args.jsonl {
            self.output.jsonl = Some(jsonl.clone());
        }
        if let Some(cert) = &args.ca_cert {
            self.proxy.ca_cert = Some(cert.clone());
        }
        if let Some(key) = &args.ca_key {
            self.proxy.ca_key = Some(key.clone());
        }
        if args.no_rewrite {
            self.rewrite.enabled = false;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proxy.ca_cert.is_some() != self.proxy.ca_key.is_some() {
            return Err(ConfigError::Invalid(
                "ca_cert and ca_key must be given together".to_string(),
            ));
        }
        if self.storage.kind == StorageKind::Memory && self.storage.capacity == 0 {
            return Err(ConfigError::Invalid(
                "storage.capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The rewrite rule in effect, `None` when rewriting is disabled.
    pub fn rewrite_rule(&self) -> Option<RewriteRule> {
        self.rewrite.enabled.then(|| self.rewrite.rule.clone())
    }
}
