//! Transaction records.
//!
//! A [`Transaction`] is the durable record of one proxied exchange: who asked,
//! who answered, when, for how long, and byte-exact snapshots of the request
//! and of the response (or of the transport error that replaced it).
//!
//! Snapshots are taken from already-buffered bodies. Callers collect the body
//! once, capture it here, and rebuild the live message from the same bytes, so
//! the one-shot body stream is never lost for the forwarding path.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use hyper::{HeaderMap, Method, Request, Uri};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::RestoreError;

/// Durable record of one request/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Opaque identifier, empty until a storage backend assigns one.
    #[serde(default)]
    pub id: String,
    /// Address of the client that issued the request.
    pub client_ip: String,
    /// Address of the upstream server, filled in once the connection is known.
    #[serde(default)]
    pub server_ip: String,
    /// Wall-clock time the request was received.
    pub start_time: DateTime<Utc>,
    /// Time from request received to response processed.
    #[serde(default)]
    pub duration: Duration,
    /// Snapshot of the forwarded request.
    pub request: RequestDump,
    /// Snapshot of the response, or the transport error.
    #[serde(default)]
    pub response: Option<ResponseOutcome>,
}

impl Transaction {
    /// Starts a transaction for a request received now.
    pub fn begin(client_ip: impl Into<String>, request: RequestDump) -> Self {
        Self {
            id: String::new(),
            client_ip: client_ip.into(),
            server_ip: String::new(),
            start_time: Utc::now(),
            duration: Duration::ZERO,
            request,
            response: None,
        }
    }

    /// Sets `duration` to the time elapsed since `start_time`.
    pub fn stamp_duration(&mut self) {
        self.duration = (Utc::now() - self.start_time)
            .to_std()
            .unwrap_or_default();
    }

    /// Records a completed response.
    pub fn record_response(&mut self, response: ResponseDump) {
        self.response = Some(ResponseOutcome::Completed(response));
    }

    /// Records a transport failure in place of a response.
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.response = Some(ResponseOutcome::Failed {
            error: error.into(),
        });
    }

    /// Response status, if a response was received.
    pub fn status(&self) -> Option<u16> {
        match &self.response {
            Some(ResponseOutcome::Completed(response)) => Some(response.status),
            _ => None,
        }
    }

    /// Transport error, if the exchange failed.
    pub fn error(&self) -> Option<&str> {
        match &self.response {
            Some(ResponseOutcome::Failed { error }) => Some(error),
            _ => None,
        }
    }
}

/// Snapshot of an outbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDump {
    pub method: String,
    /// Absolute request URL.
    pub url: String,
    /// Header pairs in wire order; repeated names are kept.
    pub headers: Vec<(String, HeaderBytes)>,
    #[serde(with = "body_base64")]
    pub body: Bytes,
}

impl RequestDump {
    /// Captures a request from its head and buffered body.
    pub fn capture(parts: &hyper::http::request::Parts, body: &Bytes) -> Self {
        Self {
            method: parts.method.to_string(),
            url: parts.uri.to_string(),
            headers: header_pairs(&parts.headers),
            body: body.clone(),
        }
    }

    /// Rebuilds an equivalent request, suitable for sending again.
    ///
    /// The URL must be absolute. `Content-Length` and `Transfer-Encoding` are
    /// dropped since the body is already materialized and the sender frames it.
    pub fn restore(&self) -> Result<Request<Bytes>, RestoreError> {
        let method = Method::from_bytes(self.method.as_bytes())
            .map_err(|_| RestoreError::InvalidMethod(self.method.clone()))?;

        let uri: Uri = self.url.parse().map_err(|e: hyper::http::uri::InvalidUri| {
            RestoreError::InvalidUrl {
                url: self.url.clone(),
                reason: e.to_string(),
            }
        })?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(RestoreError::InvalidUrl {
                url: self.url.clone(),
                reason: "not an absolute URL".to_string(),
            });
        }

        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| RestoreError::InvalidHeader(name.clone()))?;
            if header_name == CONTENT_LENGTH || header_name == TRANSFER_ENCODING {
                continue;
            }
            let header_value = HeaderValue::from_bytes(value.as_bytes())
                .map_err(|_| RestoreError::InvalidHeader(name.clone()))?;
            builder = builder.header(header_name, header_value);
        }

        Ok(builder.body(self.body.clone())?)
    }

    /// First value of the named header, if present.
    pub fn header(&self, name: &str) -> Option<&HeaderBytes> {
        find_header(&self.headers, name)
    }
}

/// Snapshot of a received response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseDump {
    pub status: u16,
    pub headers: Vec<(String, HeaderBytes)>,
    #[serde(with = "body_base64")]
    pub body: Bytes,
}

impl ResponseDump {
    /// Captures a response from its head and buffered body.
    pub fn capture(parts: &hyper::http::response::Parts, body: &Bytes) -> Self {
        Self {
            status: parts.status.as_u16(),
            headers: header_pairs(&parts.headers),
            body: body.clone(),
        }
    }

    /// First value of the named header, if present.
    pub fn header(&self, name: &str) -> Option<&HeaderBytes> {
        find_header(&self.headers, name)
    }
}

/// How an exchange ended: with a response or with a transport error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseOutcome {
    Completed(ResponseDump),
    Failed { error: String },
}

/// Raw bytes of one header value.
///
/// Serialized as a plain string when the bytes are valid UTF-8 and as
/// `{"base64": "..."}` otherwise, so restoring a request sends exactly the
/// bytes that were captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBytes(Bytes);

impl HeaderBytes {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The value as text, if it is valid UTF-8.
    pub fn to_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl From<&str> for HeaderBytes {
    fn from(value: &str) -> Self {
        Self(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<&HeaderValue> for HeaderBytes {
    fn from(value: &HeaderValue) -> Self {
        Self(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl PartialEq<str> for HeaderBytes {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for HeaderBytes {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Serialize for HeaderBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.to_str() {
            Some(text) => serializer.serialize_str(text),
            None => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("base64", &body_base64::encode(&self.0))?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for HeaderBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Binary { base64: String },
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => Ok(Self(Bytes::from(text))),
            Repr::Binary { base64 } => body_base64::decode(&base64)
                .map(Self)
                .map_err(serde::de::Error::custom),
        }
    }
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, HeaderBytes)> {
    headers
        .iter()
        .map(|(name, value)| (name.as_str().to_string(), HeaderBytes::from(value)))
        .collect()
}

fn find_header<'a>(headers: &'a [(String, HeaderBytes)], name: &str) -> Option<&'a HeaderBytes> {
    headers
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
}

mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use hyper::body::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn encode(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    pub fn decode(encoded: &str) -> Result<Bytes, base64::DecodeError> {
        STANDARD.decode(encoded).map(Bytes::from)
    }

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        decode(&encoded).map_err(serde::de::Error::custom)
    }
}
