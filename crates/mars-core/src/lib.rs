//! Mars Core - transaction records and response rewriting.
//!
//! This crate holds the pieces of the Mars recording proxy that do not depend
//! on the proxy engine:
//!
//! - [`Transaction`] and its request/response snapshots, with
//!   [`RequestDump::restore`] to rebuild a request for replay
//! - [`RewriteRule`], the JSON settings rewrite applied to selected responses
//!
//! # Example
//!
//! ```
//! use mars_core::RewriteRule;
//!
//! let rule = RewriteRule::default();
//! let body = br#"{"records":[{"settingId":"DigitalSignage.PlayEnabled","value":"false"}]}"#;
//!
//! let rewritten = rule.rewrite_body(body).unwrap();
//! assert!(String::from_utf8(rewritten).unwrap().contains(r#""value":"true""#));
//! ```

pub mod error;
pub mod rewrite;
pub mod transaction;

pub use error::{RestoreError, Result};
pub use rewrite::{media_type, RewriteRule};
pub use transaction::{HeaderBytes, RequestDump, ResponseDump, ResponseOutcome, Transaction};
