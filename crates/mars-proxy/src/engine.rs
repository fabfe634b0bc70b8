//! Execution engine for requests that do not arrive over a client
//! connection, i.e. replays.

use hudsucker::hyper::{Request, Response};
use hudsucker::Body;
use reqwest::redirect::Policy;
use tracing::warn;

use crate::body::{buffer, full, Outcome};
use crate::context::ConnTrace;
use crate::error::{ProxyError, Result, TransportError};
use crate::upstream::UpstreamProxy;

/// Sends requests upstream through the configured parent proxy policy.
#[derive(Debug, Clone)]
pub struct ReplayEngine {
    client: reqwest::Client,
}

impl ReplayEngine {
    pub fn new(upstream: UpstreamProxy) -> Result<Self> {
        let proxy = reqwest::Proxy::custom(move |url| match upstream.resolve(url) {
            Ok(parent) => parent,
            Err(e) => {
                warn!("Ignoring parent proxy for {}: {}", url, e);
                None
            }
        });

        let client = reqwest::Client::builder()
            .proxy(proxy)
            .redirect(Policy::none())
            .build()
            .map_err(|e| ProxyError::Http(e.to_string()))?;

        Ok(Self { client })
    }

    /// Sends `req` and buffers the whole response.
    ///
    /// A [`ConnTrace`] in the request extensions is told the peer address.
    pub async fn execute(&self, req: Request<Body>) -> Outcome {
        let trace = req.extensions().get::<ConnTrace>().cloned();
        let (parts, body) = req.into_parts();
        let body = buffer(body).await.map_err(TransportError::new)?;

        let url = reqwest::Url::parse(&parts.uri.to_string())
            .map_err(|e| TransportError::new(format!("invalid URL {}: {}", parts.uri, e)))?;

        let upstream = self
            .client
            .request(parts.method, url)
            .headers(parts.headers)
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::from_error(&e))?;

        if let (Some(trace), Some(remote)) = (&trace, upstream.remote_addr()) {
            trace.got_conn(remote);
        }

        let status = upstream.status();
        let version = upstream.version();
        let headers = upstream.headers().clone();
        let bytes = upstream
            .bytes()
            .await
            .map_err(|e| TransportError::from_error(&e))?;

        let mut response = Response::new(full(bytes));
        *response.status_mut() = status;
        *response.version_mut() = version;
        *response.headers_mut() = headers;
        Ok(response)
    }
}
