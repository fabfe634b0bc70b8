//! Mars - recording HTTP(S) proxy with replay.
//!
//! This crate wires the library crates into the `mars` binary:
//!
//! - [`cli`]: command-line arguments
//! - [`config`]: TOML configuration with command-line overrides
//! - [`wiring`]: builds storage, output and the recorder from a [`Config`]

pub mod cli;
pub mod config;
pub mod wiring;

pub use cli::Args;
pub use config::{Config, ConfigError, StorageKind};
