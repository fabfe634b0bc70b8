//! Pluggable request/response logic.

use async_trait::async_trait;
use hudsucker::hyper::{Request, Response};
use hudsucker::Body;

use crate::body::Outcome;
use crate::context::RequestContext;

/// User logic invoked by the recorder before its own bookkeeping.
///
/// Every method has a pass-through default, so implementors override only
/// the hooks they need.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Called for CONNECT and plain-HTTP proxy requests. Returning a response
    /// answers the client directly and nothing is recorded.
    fn connect(&self, _ctx: &RequestContext, _req: &Request<Body>) -> Option<Response<Body>> {
        None
    }

    /// May inspect or replace the outbound request.
    async fn before_request(&self, _ctx: &mut RequestContext, req: Request<Body>) -> Request<Body> {
        req
    }

    /// Sees the upstream outcome before any rewriting and may replace it.
    async fn before_response(&self, _ctx: &mut RequestContext, outcome: Outcome) -> Outcome {
        outcome
    }
}

/// Interceptor that changes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInterceptor;

#[async_trait]
impl Interceptor for NoopInterceptor {}
