//! Body buffering helpers shared by the recorder and the engines.

use hyper::body::Bytes;
use hudsucker::hyper::header::{HeaderValue, CONTENT_TYPE};
use hudsucker::hyper::{Response, StatusCode};
use hudsucker::Body;
use http_body_util::{BodyExt, Full};

use crate::error::TransportError;

/// Upstream result seen by the response hooks: a response, or the transport
/// error that prevented one.
pub type Outcome = Result<Response<Body>, TransportError>;

/// Wraps bytes in a hudsucker body.
pub fn full(bytes: impl Into<Bytes>) -> Body {
    Body::from(Full::new(bytes.into()))
}

/// Collects a body into memory.
pub async fn buffer(body: Body) -> Result<Bytes, String> {
    body.collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| e.to_string())
}

/// Turns an outcome into something the client can be sent.
pub(crate) fn into_response(outcome: Outcome) -> Response<Body> {
    match outcome {
        Ok(response) => response,
        Err(err) => bad_gateway(&err),
    }
}

fn bad_gateway(err: &TransportError) -> Response<Body> {
    let mut response = Response::new(full(err.message().to_string()));
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
