//! Mars Proxy - recording MITM proxy.
//!
//! [`ProxyServer`] terminates client TLS with certificates signed by a
//! provisioned root CA and hands every exchange to a [`Recorder`], which
//! captures it as a [`Transaction`](mars_core::Transaction), optionally
//! rewrites the response body and passes the result to the configured
//! storage and output. Stored transactions can be replayed with
//! [`Recorder::replay`].

pub mod body;
pub mod ca;
pub mod context;
pub mod engine;
pub mod error;
pub mod handler;
pub mod interceptor;
pub mod proxy;
pub mod recorder;
pub mod upstream;

pub use body::Outcome;
pub use ca::CaManager;
pub use context::{ClientAddr, ConnTrace, RequestContext, RequestTarget};
pub use engine::ReplayEngine;
pub use error::{CaError, ProxyError, ReplayError, Result, TransportError, UpstreamError};
pub use handler::RecordingHandler;
pub use interceptor::{Interceptor, NoopInterceptor};
pub use proxy::{ProxyConfig, ProxyHandle, ProxyServer};
pub use recorder::{Recorder, RecorderBuilder, DEBUG_HEADER, OVERRIDE_HOST_HEADER};
pub use upstream::UpstreamProxy;

/// Default proxy port.
pub const DEFAULT_PROXY_PORT: u16 = 8888;
