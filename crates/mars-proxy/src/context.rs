//! Per-request state carried between the recorder hooks.
//!
//! The engine creates one [`RequestContext`] per request and threads it
//! through `connect`, `before_request`, `before_response` and `finish`. The
//! recorder keeps the [`Transaction`] here; interceptors may read it and use
//! the free-form [`RequestContext::data`] slot, but only this crate writes the
//! transaction.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use hudsucker::hyper::http::request::Parts;
use hudsucker::hyper::http::Extensions;
use hudsucker::hyper::header::HOST;
use mars_core::Transaction;
use once_cell::sync::OnceCell;

/// Client address attached to a request's extensions.
///
/// Requests that do not arrive over a client connection (replays) carry their
/// originating address this way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

/// One-shot record of the upstream peer address.
///
/// Cloned into the request extensions so whichever engine sends the request
/// can report the address it connected to. Only the first report is kept.
#[derive(Debug, Clone, Default)]
pub struct ConnTrace {
    server: Arc<OnceCell<IpAddr>>,
}

impl ConnTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports the address of the established upstream connection.
    pub fn got_conn(&self, remote: SocketAddr) {
        let _ = self.server.set(remote.ip());
    }

    /// The upstream address, if a connection has been reported.
    pub fn server_ip(&self) -> Option<IpAddr> {
        self.server.get().copied()
    }
}

/// Where a request is going.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestTarget {
    pub url: String,
    pub host: String,
    pub path: String,
}

impl RequestTarget {
    pub(crate) fn of(parts: &Parts) -> Self {
        let host = match parts.uri.host() {
            Some(host) => host.to_string(),
            None => parts
                .headers
                .get(HOST)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.split(':').next().unwrap_or_default().to_string())
                .unwrap_or_default(),
        };

        Self {
            url: parts.uri.to_string(),
            host,
            path: parts.uri.path().to_string(),
        }
    }
}

/// State for a single request as it moves through the hooks.
#[derive(Debug)]
pub struct RequestContext {
    client_addr: SocketAddr,
    target: RequestTarget,
    transaction: Option<Transaction>,
    conn_trace: ConnTrace,
    data: Extensions,
}

impl RequestContext {
    pub fn new(client_addr: SocketAddr) -> Self {
        Self {
            client_addr,
            target: RequestTarget::default(),
            transaction: None,
            conn_trace: ConnTrace::new(),
            data: Extensions::new(),
        }
    }

    /// Address of the client that sent the request.
    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Target of the request, empty until `before_request` has run.
    pub fn target(&self) -> &RequestTarget {
        &self.target
    }

    /// The transaction being recorded, if any.
    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    pub fn conn_trace(&self) -> &ConnTrace {
        &self.conn_trace
    }

    /// Interceptor-owned per-request data.
    pub fn data(&self) -> &Extensions {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Extensions {
        &mut self.data
    }

    pub(crate) fn begin(&mut self, target: RequestTarget, tx: Transaction, trace: ConnTrace) {
        self.target = target;
        self.transaction = Some(tx);
        self.conn_trace = trace;
    }

    pub(crate) fn exchange_mut(&mut self) -> Option<(&RequestTarget, &mut Transaction)> {
        let target = &self.target;
        self.transaction.as_mut().map(|tx| (target, tx))
    }

    pub(crate) fn take_transaction(&mut self) -> Option<Transaction> {
        self.transaction.take()
    }
}
