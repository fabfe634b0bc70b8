//! hudsucker adapter driving the recorder hooks.

use std::net::SocketAddr;

use hudsucker::hyper::header::{HeaderName, CONNECTION, UPGRADE};
use hudsucker::hyper::http::uri::Scheme;
use hudsucker::hyper::{Method, Request, Response};
use hudsucker::hyper_util::client::legacy::connect::HttpInfo;
use hudsucker::hyper_util::client::legacy::Error as ClientError;
use hudsucker::{Body, HttpContext, HttpHandler, RequestOrResponse};
use tracing::debug;

use crate::body::into_response;
use crate::context::RequestContext;
use crate::error::TransportError;
use crate::recorder::Recorder;

/// Per-request HTTP handler.
///
/// hudsucker clones the handler for every request, so each clone carries
/// that request's [`RequestContext`] from `handle_request` to
/// `handle_response` or `handle_error`.
pub struct RecordingHandler {
    recorder: Recorder,
    ctx: Option<RequestContext>,
}

impl RecordingHandler {
    pub fn new(recorder: Recorder) -> Self {
        Self {
            recorder,
            ctx: None,
        }
    }

    async fn on_request(&mut self, client_addr: SocketAddr, req: Request<Body>) -> RequestOrResponse {
        let mut ctx = RequestContext::new(client_addr);

        if is_proxy_level(&req) {
            if let Some(response) = self.recorder.connect(&ctx, &req) {
                return RequestOrResponse::Response(response);
            }
            if req.method() == Method::CONNECT {
                return RequestOrResponse::Request(req);
            }
        }

        // hudsucker relays upgrades itself and never reports a response for them
        if is_websocket_upgrade(&req) {
            debug!("Not recording websocket upgrade [{}]", req.uri());
            return RequestOrResponse::Request(req);
        }

        match self.recorder.before_request(&mut ctx, req).await {
            Ok(req) => {
                self.ctx = Some(ctx);
                RequestOrResponse::Request(req)
            }
            Err(err) => {
                let outcome = self.recorder.before_response(&mut ctx, Err(err)).await;
                self.recorder.finish(&mut ctx);
                RequestOrResponse::Response(into_response(outcome))
            }
        }
    }

    async fn on_response(&mut self, res: Response<Body>) -> Response<Body> {
        let Some(mut ctx) = self.ctx.take() else {
            return res;
        };

        if let Some(info) = res.extensions().get::<HttpInfo>() {
            ctx.conn_trace().got_conn(info.remote_addr());
        }

        let outcome = self.recorder.before_response(&mut ctx, Ok(res)).await;
        self.recorder.finish(&mut ctx);
        into_response(outcome)
    }

    async fn on_error(&mut self, err: TransportError) -> Response<Body> {
        let Some(mut ctx) = self.ctx.take() else {
            return into_response(Err(err));
        };

        let outcome = self.recorder.before_response(&mut ctx, Err(err)).await;
        self.recorder.finish(&mut ctx);
        into_response(outcome)
    }
}

impl Clone for RecordingHandler {
    fn clone(&self) -> Self {
        Self::new(self.recorder.clone())
    }
}

/// Requests that reach the proxy without a tunnel: CONNECT itself and
/// plain-HTTP proxy requests.
fn is_proxy_level(req: &Request<Body>) -> bool {
    req.method() == Method::CONNECT || req.uri().scheme() == Some(&Scheme::HTTP)
}

fn is_websocket_upgrade(req: &Request<Body>) -> bool {
    has_token(req, CONNECTION, "upgrade") && has_token(req, UPGRADE, "websocket")
}

fn has_token(req: &Request<Body>, name: HeaderName, token: &str) -> bool {
    req.headers().get_all(name).iter().any(|value| {
        value
            .to_str()
            .map(|value| value.split(',').any(|item| item.trim().eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    })
}

impl HttpHandler for RecordingHandler {
    async fn handle_request(&mut self, http_ctx: &HttpContext, req: Request<Body>) -> RequestOrResponse {
        self.on_request(http_ctx.client_addr, req).await
    }

    async fn handle_response(&mut self, _http_ctx: &HttpContext, res: Response<Body>) -> Response<Body> {
        self.on_response(res).await
    }

    async fn handle_error(&mut self, _http_ctx: &HttpContext, err: ClientError) -> Response<Body> {
        self.recorder.error_log(&err);
        self.on_error(TransportError::from_error(&err)).await
    }
}
