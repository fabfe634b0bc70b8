//! Assembles runtime components from configuration.

use std::sync::Arc;

use anyhow::Context;
use mars_proxy::{CaManager, Recorder, UpstreamProxy};
use mars_storage::{
    Database, FanOutOutput, JsonLinesOutput, LogOutput, MemoryStorage, Output, Storage,
};

use crate::config::{Config, OutputSection, StorageKind, StorageSection};

/// Opens the configured storage backend.
pub fn build_storage(section: &StorageSection) -> anyhow::Result<Arc<dyn Storage>> {
    match section.kind {
        StorageKind::Memory => {
            tracing::info!("Keeping up to {} transactions in memory", section.capacity);
            Ok(Arc::new(MemoryStorage::new(section.capacity)))
        }
        StorageKind::Sqlite => {
            let db = match &section.path {
                Some(path) => Database::with_path(path),
                None => Database::new(),
            }
            .context("failed to open transaction database")?;
            Ok(Arc::new(db))
        }
    }
}

/// Builds the configured outputs; `None` when all are disabled.
pub fn build_output(section: &OutputSection) -> anyhow::Result<Option<Arc<dyn Output>>> {
    let mut outputs: Vec<Arc<dyn Output>> = Vec::new();

    if section.log {
        outputs.push(Arc::new(LogOutput));
    }
    if let Some(path) = &section.jsonl {
        let jsonl = JsonLinesOutput::open(path)
            .with_context(|| format!("failed to open {:?}", path))?;
        outputs.push(Arc::new(jsonl));
    }

    Ok(match outputs.len() {
        0 => None,
        1 => outputs.pop(),
        _ => Some(Arc::new(
            outputs
                .into_iter()
                .fold(FanOutOutput::new(), FanOutOutput::with),
        )),
    })
}

/// Builds the recorder shared by the proxy and the API.
pub fn build_recorder(config: &Config) -> anyhow::Result<Recorder> {
    let mut builder = Recorder::builder()
        .storage(build_storage(&config.storage)?)
        .rewrite_rule(config.rewrite_rule())
        .upstream(UpstreamProxy::from_env());

    if let Some(output) = build_output(&config.output)? {
        builder = builder.output(output);
    }

    builder.build().context("failed to build recorder")
}

/// Locates the root CA from configuration or the data directory.
pub fn ca_manager(config: &Config) -> anyhow::Result<CaManager> {
    match (&config.proxy.ca_cert, &config.proxy.ca_key) {
        (Some(cert), Some(key)) => Ok(CaManager::from_files(cert, key)),
        _ => CaManager::with_default_dir().context("failed to locate CA directory"),
    }
}
