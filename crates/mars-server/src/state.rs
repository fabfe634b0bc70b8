//! Application state for the API server.

use std::sync::Arc;

use mars_proxy::Recorder;
use mars_storage::Storage;

use crate::error::{ApiError, Result};

/// Shared application state.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Recorder shared with the proxy; replays go through it.
    pub recorder: Recorder,
}

impl AppState {
    pub fn new(recorder: Recorder) -> Self {
        Self { recorder }
    }

    /// The recorder's storage backend.
    pub fn storage(&self) -> Result<&Arc<dyn Storage>> {
        self.recorder.storage().ok_or(ApiError::NoStorage)
    }
}
