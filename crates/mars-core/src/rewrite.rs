//! Response body rewriting.
//!
//! A [`RewriteRule`] selects JSON responses by request host and path prefix
//! and forces matching settings records to a fixed value. Eligible bodies look
//! like:
//!
//! ```json
//! {"records": [{"settingId": "DigitalSignage.PlayEnabled", "value": "false"}]}
//! ```
//!
//! Anything that does not fit that shape passes through untouched. The
//! transform never fails: a body it cannot understand is simply not modified.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Default host prefix for the rewrite rule.
pub const DEFAULT_HOST_PREFIX: &str = "xmnup-rxe-1-api.lab.nordigy.ru";

/// Default path prefix for the rewrite rule.
pub const DEFAULT_PATH_PREFIX: &str = "/restapi/v1.0/rooms-client/account";

/// Default settings id prefix for the rewrite rule.
pub const DEFAULT_SETTING_PREFIX: &str = "DigitalSignage.PlayEnabled";

/// Value written into matching records.
pub const DEFAULT_REPLACEMENT: &str = "true";

/// Media type assumed when a response has no usable `Content-Type`.
pub const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";

const JSON_MEDIA_TYPE: &str = "application/json";

/// Rule selecting responses to rewrite and the settings to force.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteRule {
    /// Request host must start with this.
    pub host_prefix: String,
    /// Request path must start with this.
    pub path_prefix: String,
    /// `settingId` values starting with this are rewritten.
    pub setting_prefix: String,
    /// String stored into the `value` field of matching records.
    pub replacement: String,
}

impl Default for RewriteRule {
    fn default() -> Self {
        Self {
            host_prefix: DEFAULT_HOST_PREFIX.to_string(),
            path_prefix: DEFAULT_PATH_PREFIX.to_string(),
            setting_prefix: DEFAULT_SETTING_PREFIX.to_string(),
            replacement: DEFAULT_REPLACEMENT.to_string(),
        }
    }
}

/// An eligible body: a JSON object whose `records` member is an array.
///
/// The document is kept as an ordered map, so re-serializing it reproduces
/// the original key order everywhere except the values that were replaced.
#[derive(Deserialize, Serialize)]
#[serde(transparent)]
struct SettingsPage(Map<String, Value>);

impl SettingsPage {
    fn records_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self.0.get_mut("records") {
            Some(Value::Array(records)) => Some(records),
            _ => None,
        }
    }
}

impl RewriteRule {
    /// Whether a response to `host` + `path` with the given `Content-Type`
    /// header value should go through [`rewrite_body`](Self::rewrite_body).
    pub fn applies_to(&self, host: &str, path: &str, content_type: Option<&str>) -> bool {
        host.starts_with(&self.host_prefix)
            && path.starts_with(&self.path_prefix)
            && media_type(content_type).starts_with(JSON_MEDIA_TYPE)
    }

    /// Rewrites matching records in `body`.
    ///
    /// Returns the new bytes, or `None` when nothing was modified, in which
    /// case the caller keeps the original body.
    pub fn rewrite_body(&self, body: &[u8]) -> Option<Vec<u8>> {
        let mut page: SettingsPage = match serde_json::from_slice(body) {
            Ok(page) => page,
            Err(e) => {
                debug!("Body is not a settings page: {}", e);
                return None;
            }
        };

        let Some(records) = page.records_mut() else {
            debug!("Body has no records array");
            return None;
        };

        let mut modified = false;
        for record in records {
            let Value::Object(fields) = record else {
                continue;
            };
            let matches = matches!(
                fields.get("settingId"),
                Some(Value::String(id)) if id.starts_with(&self.setting_prefix)
            );
            if matches {
                fields.insert(
                    "value".to_string(),
                    Value::String(self.replacement.clone()),
                );
                modified = true;
            }
        }

        if !modified {
            return None;
        }

        match serde_json::to_vec(&page) {
            Ok(bytes) => {
                debug!("Rewrote settings page ({} bytes)", bytes.len());
                Some(bytes)
            }
            Err(e) => {
                debug!("Failed to serialize rewritten page: {}", e);
                None
            }
        }
    }
}

/// Extracts the media type from a `Content-Type` header value.
///
/// Parameters after `;` are dropped; an absent or empty value yields
/// [`FALLBACK_MEDIA_TYPE`].
pub fn media_type(content_type: Option<&str>) -> &str {
    let essence = content_type
        .and_then(|value| value.trim().split(';').next())
        .map(str::trim)
        .unwrap_or_default();

    if essence.is_empty() {
        FALLBACK_MEDIA_TYPE
    } else {
        essence
    }
}
