//! Parent proxy selection.
//!
//! Mirrors the conventional `HTTP_PROXY` / `HTTPS_PROXY` / `NO_PROXY`
//! environment policy. Requests to loopback hosts always go direct.

use std::net::IpAddr;

use reqwest::Url;

use crate::error::UpstreamError;

/// Environment-derived parent proxy policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamProxy {
    http: Option<String>,
    https: Option<String>,
    no_proxy: Vec<NoProxyEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NoProxyEntry {
    /// `*`: nothing is proxied.
    Any,
    /// A host or IP literal, optionally restricted to one port. A leading
    /// dot matches subdomains only.
    Host { name: String, port: Option<u16> },
}

impl UpstreamProxy {
    /// Never uses a parent proxy.
    pub fn direct() -> Self {
        Self::default()
    }

    /// Reads the policy from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the policy through `lookup`; upper-case names win over
    /// lower-case ones.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |upper: &str, lower: &str| {
            lookup(upper)
                .or_else(|| lookup(lower))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Self {
            http: get("HTTP_PROXY", "http_proxy"),
            https: get("HTTPS_PROXY", "https_proxy"),
            no_proxy: get("NO_PROXY", "no_proxy")
                .map(|value| parse_no_proxy(&value))
                .unwrap_or_default(),
        }
    }

    /// Whether any parent proxy is configured.
    pub fn is_direct(&self) -> bool {
        self.http.is_none() && self.https.is_none()
    }

    /// Picks the parent proxy for `url`, or `None` to connect directly.
    pub fn resolve(&self, url: &Url) -> Result<Option<Url>, UpstreamError> {
        let configured = match url.scheme() {
            "https" => self.https.as_deref(),
            "http" => self.http.as_deref(),
            _ => None,
        };
        let Some(raw) = configured else {
            return Ok(None);
        };

        let host = url
            .host_str()
            .unwrap_or_default()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_ascii_lowercase();
        if is_loopback(&host) || self.bypassed(&host, url.port_or_known_default()) {
            return Ok(None);
        }

        parse_proxy_url(raw).map(Some)
    }

    fn bypassed(&self, host: &str, port: Option<u16>) -> bool {
        self.no_proxy.iter().any(|entry| match entry {
            NoProxyEntry::Any => true,
            NoProxyEntry::Host { name, port: want } => {
                if want.is_some() && *want != port {
                    return false;
                }
                match name.strip_prefix('.') {
                    Some(suffix) => host.ends_with(&format!(".{}", suffix)),
                    None => host == name || host.ends_with(&format!(".{}", name)),
                }
            }
        })
    }
}

fn is_loopback(host: &str) -> bool {
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

fn parse_no_proxy(value: &str) -> Vec<NoProxyEntry> {
    value
        .split(',')
        .map(|entry| entry.trim().to_ascii_lowercase())
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            if entry == "*" {
                return NoProxyEntry::Any;
            }
            let entry = entry.strip_prefix("*.").map(|s| format!(".{}", s)).unwrap_or(entry);
            split_port(&entry)
        })
        .collect()
}

fn split_port(entry: &str) -> NoProxyEntry {
    // Bracketed IPv6, possibly with a port.
    if let Some(rest) = entry.strip_prefix('[') {
        if let Some((addr, tail)) = rest.split_once(']') {
            return NoProxyEntry::Host {
                name: addr.to_string(),
                port: tail.strip_prefix(':').and_then(|p| p.parse().ok()),
            };
        }
    }
    if entry.parse::<IpAddr>().is_ok() {
        return NoProxyEntry::Host {
            name: entry.to_string(),
            port: None,
        };
    }
    match entry.rsplit_once(':') {
        Some((name, port)) if port.parse::<u16>().is_ok() => NoProxyEntry::Host {
            name: name.to_string(),
            port: port.parse().ok(),
        },
        _ => NoProxyEntry::Host {
            name: entry.to_string(),
            port: None,
        },
    }
}

/// Parses a proxy setting; bare `host:port` values are taken as `http://`.
fn parse_proxy_url(raw: &str) -> Result<Url, UpstreamError> {
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };

    let url = Url::parse(&candidate).map_err(|e| UpstreamError {
        value: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.host_str().is_none() {
        return Err(UpstreamError {
            value: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(url)
}
