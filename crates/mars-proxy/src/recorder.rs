//! Transaction recording around proxied requests.
//!
//! The [`Recorder`] is driven by an engine through four hooks, in order:
//! [`connect`](Recorder::connect), [`before_request`](Recorder::before_request),
//! [`before_response`](Recorder::before_response) and
//! [`finish`](Recorder::finish). Each hook hands control to the configured
//! [`Interceptor`] first and then does its own bookkeeping on the
//! [`RequestContext`]. [`replay`](Recorder::replay) re-issues a stored
//! request through the same hooks.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use hyper::body::Bytes;
use hudsucker::hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use hudsucker::hyper::http::uri::{Authority, PathAndQuery};
use hudsucker::hyper::{Request, Response, Uri};
use hudsucker::Body;
use mars_core::{RequestDump, ResponseDump, RewriteRule, Transaction};
use mars_storage::{Output, Storage};
use reqwest::Url;
use tracing::{debug, error, info, warn};

use crate::body::{buffer, full, Outcome};
use crate::context::{ClientAddr, ConnTrace, RequestContext, RequestTarget};
use crate::engine::ReplayEngine;
use crate::error::{ReplayError, Result, TransportError, UpstreamError};
use crate::interceptor::{Interceptor, NoopInterceptor};
use crate::upstream::UpstreamProxy;

/// Header naming the host a request is sent to instead of its own.
pub const OVERRIDE_HOST_HEADER: &str = "x-mars-host";

/// Control header stripped before forwarding.
pub const DEBUG_HEADER: &str = "x-mars-debug";

/// Port attributed to the client of a replayed request.
pub const REPLAY_CLIENT_PORT: u16 = 80;

/// Records proxied exchanges as transactions.
///
/// Cheap to clone; all clones share the same sinks and interceptor.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<Inner>,
}

struct Inner {
    storage: Option<Arc<dyn Storage>>,
    output: Option<Arc<dyn Output>>,
    interceptor: Arc<dyn Interceptor>,
    rewrite: Option<RewriteRule>,
    upstream: UpstreamProxy,
    engine: ReplayEngine,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("storage", &self.inner.storage.is_some())
            .field("output", &self.inner.output.is_some())
            .field("rewrite", &self.inner.rewrite)
            .field("upstream", &self.inner.upstream)
            .finish()
    }
}

/// Builder for [`Recorder`].
pub struct RecorderBuilder {
    storage: Option<Arc<dyn Storage>>,
    output: Option<Arc<dyn Output>>,
    interceptor: Option<Arc<dyn Interceptor>>,
    rewrite: Option<RewriteRule>,
    upstream: UpstreamProxy,
}

impl Default for RecorderBuilder {
    fn default() -> Self {
        Self {
            storage: None,
            output: None,
            interceptor: None,
            rewrite: Some(RewriteRule::default()),
            upstream: UpstreamProxy::direct(),
        }
    }
}

impl RecorderBuilder {
    /// Where finished transactions are persisted.
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Where finished transactions are emitted.
    pub fn output(mut self, output: Arc<dyn Output>) -> Self {
        self.output = Some(output);
        self
    }

    /// User logic run before the recorder's own work in each hook.
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Response rewrite rule; `None` disables rewriting.
    pub fn rewrite_rule(mut self, rule: Option<RewriteRule>) -> Self {
        self.rewrite = rule;
        self
    }

    /// Parent proxy policy for replayed requests.
    pub fn upstream(mut self, upstream: UpstreamProxy) -> Self {
        self.upstream = upstream;
        self
    }

    pub fn build(self) -> Result<Recorder> {
        let engine = ReplayEngine::new(self.upstream.clone())?;

        Ok(Recorder {
            inner: Arc::new(Inner {
                storage: self.storage,
                output: self.output,
                interceptor: self
                    .interceptor
                    .unwrap_or_else(|| Arc::new(NoopInterceptor)),
                rewrite: self.rewrite,
                upstream: self.upstream,
                engine,
            }),
        })
    }
}

impl Recorder {
    pub fn builder() -> RecorderBuilder {
        RecorderBuilder::default()
    }

    /// The configured storage backend.
    pub fn storage(&self) -> Option<&Arc<dyn Storage>> {
        self.inner.storage.as_ref()
    }

    pub fn rewrite_rule(&self) -> Option<&RewriteRule> {
        self.inner.rewrite.as_ref()
    }

    /// Short-circuit point for CONNECT and plain-HTTP proxy requests.
    pub fn connect(&self, ctx: &RequestContext, req: &Request<Body>) -> Option<Response<Body>> {
        self.inner.interceptor.connect(ctx, req)
    }

    /// Prepares a request for forwarding and opens its transaction.
    ///
    /// Fails when the request body cannot be read. The transaction is still
    /// open on `ctx` in that case; the caller must not forward anything and
    /// settles the exchange by passing the error to
    /// [`before_response`](Self::before_response).
    pub async fn before_request(
        &self,
        ctx: &mut RequestContext,
        mut req: Request<Body>,
    ) -> std::result::Result<Request<Body>, TransportError> {
        apply_host_override(&mut req);

        let req = self.inner.interceptor.before_request(ctx, req).await;

        let (mut parts, body) = req.into_parts();
        let client_ip = ctx.client_addr().ip().to_string();
        let trace = ConnTrace::new();

        match buffer(body).await {
            Ok(body) => {
                let tx = Transaction::begin(client_ip, RequestDump::capture(&parts, &body));
                parts.extensions.insert(trace.clone());
                ctx.begin(RequestTarget::of(&parts), tx, trace);
                Ok(Request::from_parts(parts, full(body)))
            }
            Err(e) => {
                let tx = Transaction::begin(client_ip, RequestDump::capture(&parts, &Bytes::new()));
                ctx.begin(RequestTarget::of(&parts), tx, trace);
                warn!("Failed to read request body [{}]: {}", ctx.target().url, e);
                Err(TransportError::new(format!("failed to read request body: {}", e)))
            }
        }
    }

    /// Settles the transaction with the upstream outcome, rewriting the
    /// response body when the rewrite rule applies.
    pub async fn before_response(&self, ctx: &mut RequestContext, outcome: Outcome) -> Outcome {
        let outcome = self.inner.interceptor.before_response(ctx, outcome).await;

        let server_ip = ctx.conn_trace().server_ip();
        let Some((target, tx)) = ctx.exchange_mut() else {
            return outcome;
        };

        tx.stamp_duration();

        let outcome = match outcome {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                match buffer(body).await {
                    Ok(mut body) => {
                        if let Some(rewritten) = self.rewrite(target, &parts.headers, &body) {
                            info!("Rewrote response body [{}]", target.url);
                            parts
                                .headers
                                .insert(CONTENT_LENGTH, HeaderValue::from(rewritten.len()));
                            body = rewritten;
                        }

                        tx.record_response(ResponseDump::capture(&parts, &body));
                        Ok(Response::from_parts(parts, full(body)))
                    }
                    Err(e) => {
                        warn!("Failed to read response body [{}]: {}", target.url, e);
                        let err = TransportError::new(format!("failed to read response body: {}", e));
                        tx.record_error(err.message());
                        Err(err)
                    }
                }
            }
            Err(err) => {
                tx.record_error(err.message());
                Err(err)
            }
        };

        if let Some(ip) = server_ip {
            tx.server_ip = ip.to_string();
        }

        outcome
    }

    fn rewrite(
        &self,
        target: &RequestTarget,
        headers: &hudsucker::hyper::HeaderMap,
        body: &Bytes,
    ) -> Option<Bytes> {
        let rule = self.inner.rewrite.as_ref()?;
        let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        if !rule.applies_to(&target.host, &target.path, content_type) {
            return None;
        }
        rule.rewrite_body(body).map(Bytes::from)
    }

    /// Hands the finished transaction to storage and output.
    ///
    /// Does nothing when no transaction is open on `ctx`. A failing sink is
    /// logged and does not prevent the other from running.
    pub fn finish(&self, ctx: &mut RequestContext) {
        let Some(mut tx) = ctx.take_transaction() else {
            return;
        };
        let url = &ctx.target().url;

        if let Some(storage) = &self.inner.storage {
            if let Err(e) = storage.put(&mut tx) {
                warn!("Failed to store transaction [{}]: {}", url, e);
            }
        }

        if let Some(output) = &self.inner.output {
            if let Err(e) = output.write(&tx) {
                warn!("Failed to output transaction [{}]: {}", url, e);
            }
        }
    }

    /// Reports an engine-level error.
    pub fn error_log(&self, err: &dyn std::error::Error) {
        error!("{}", err);
    }

    /// Parent proxy to use for `url`, `None` for a direct connection.
    pub fn parent_proxy(&self, url: &Url) -> std::result::Result<Option<Url>, UpstreamError> {
        self.inner.upstream.resolve(url)
    }

    /// Re-sends a stored request as a new exchange.
    ///
    /// Lookup and reconstruction happen synchronously; the request itself
    /// runs on a detached task and is recorded as a new transaction. Must be
    /// called from within a Tokio runtime.
    pub fn replay(&self, id: &str) -> std::result::Result<(), ReplayError> {
        let storage = self.inner.storage.as_ref().ok_or(ReplayError::NotConfigured)?;

        let tx = storage.get(id).map_err(|source| ReplayError::Lookup {
            id: id.to_string(),
            source,
        })?;
        let restored = tx.request.restore().map_err(|source| ReplayError::Restore {
            id: id.to_string(),
            source,
        })?;

        let client_ip = tx
            .client_ip
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let (mut parts, body) = restored.into_parts();
        parts
            .extensions
            .insert(ClientAddr(SocketAddr::new(client_ip, REPLAY_CLIENT_PORT)));
        let req = Request::from_parts(parts, full(body));

        info!("Replaying transaction {} [{}]", id, tx.request.url);
        let recorder = self.clone();
        tokio::spawn(async move {
            recorder.do_request(req).await;
        });

        Ok(())
    }

    /// Runs a request that did not arrive over a client connection through
    /// the full hook sequence.
    pub async fn do_request(&self, req: Request<Body>) {
        let client_addr = req
            .extensions()
            .get::<ClientAddr>()
            .map(|addr| addr.0)
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0));
        let mut ctx = RequestContext::new(client_addr);

        let outcome = match self.before_request(&mut ctx, req).await {
            Ok(req) => self.inner.engine.execute(req).await,
            Err(err) => Err(err),
        };
        let outcome = self.before_response(&mut ctx, outcome).await;

        if let Err(e) = &outcome {
            debug!("Request failed [{}]: {}", ctx.target().url, e);
        }
        drop(outcome);

        self.finish(&mut ctx);
    }
}

/// Applies `X-Mars-Host` and strips the control headers.
///
/// A non-empty override retargets the request: the URI authority becomes the
/// given host (keeping the original port unless the override names one) and
/// `Host` follows it. Scheme, path and query are unchanged.
fn apply_host_override(req: &mut Request<Body>) {
    let headers = req.headers_mut();
    let host = headers.remove(OVERRIDE_HOST_HEADER);
    headers.remove(DEBUG_HEADER);

    let Some(host) = host.filter(|value| !value.is_empty()) else {
        return;
    };
    let Some(authority) = override_authority(req.uri(), &host) else {
        warn!("Ignoring invalid {} value {:?}", OVERRIDE_HOST_HEADER, host);
        return;
    };

    if let Some(uri) = retarget(req.uri(), authority.clone()) {
        *req.uri_mut() = uri;
    }
    if let Ok(value) = HeaderValue::from_str(authority.as_str()) {
        req.headers_mut().insert(HOST, value);
    }
}

fn override_authority(uri: &Uri, host: &HeaderValue) -> Option<Authority> {
    let authority: Authority = host.to_str().ok()?.trim().parse().ok()?;
    match (authority.port_u16(), uri.port_u16()) {
        (None, Some(port)) => format!("{}:{}", authority, port).parse().ok(),
        _ => Some(authority),
    }
}

/// Swaps the authority of an absolute URI; origin-form URIs yield `None`.
fn retarget(uri: &Uri, authority: Authority) -> Option<Uri> {
    let mut parts = uri.clone().into_parts();
    parts.scheme.as_ref()?;
    parts.authority = Some(authority);
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    Uri::from_parts(parts).ok()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::body::buffer;
    use crate::error::TransportError;
    use async_trait::async_trait;
    use hudsucker::hyper::StatusCode;
    use mars_storage::{MemoryStorage, StorageError};
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const SETTINGS_URL: &str =
        "https://xmnup-rxe-1-api.lab.nordigy.ru/restapi/v1.0/rooms-client/account/~/settings";
    const SETTINGS_BODY: &str =
        r#"{"records":[{"settingId":"DigitalSignage.PlayEnabled.x","value":"false"}]}"#;

    #[derive(Default)]
    pub(crate) struct CollectingOutput {
        seen: Mutex<Vec<Transaction>>,
    }

    impl CollectingOutput {
        pub(crate) fn transactions(&self) -> Vec<Transaction> {
            self.seen.lock().clone()
        }

        /// Polls until at least one transaction has been written.
        pub(crate) async fn wait_for_one(&self) -> Vec<Transaction> {
            for _ in 0..100 {
                let seen = self.transactions();
                if !seen.is_empty() {
                    return seen;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            self.transactions()
        }
    }

    impl Output for CollectingOutput {
        fn write(&self, tx: &Transaction) -> mars_storage::Result<()> {
            self.seen.lock().push(tx.clone());
            Ok(())
        }
    }

    struct FailingStorage;

    impl Storage for FailingStorage {
        fn get(&self, id: &str) -> mars_storage::Result<Transaction> {
            Err(StorageError::NotFound(id.to_string()))
        }

        fn put(&self, _tx: &mut Transaction) -> mars_storage::Result<()> {
            Err(StorageError::Backend("disk full".to_string()))
        }
    }

    /// Records the body it sees before the recorder touches the response.
    #[derive(Default)]
    pub(crate) struct Spy {
        response_bodies: Mutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl Interceptor for Spy {
        fn connect(&self, _ctx: &RequestContext, req: &Request<Body>) -> Option<Response<Body>> {
            (req.uri().host() == Some("blocked.test")).then(|| {
                let mut response = Response::new(full("blocked"));
                *response.status_mut() = StatusCode::FORBIDDEN;
                response
            })
        }

        async fn before_response(&self, _ctx: &mut RequestContext, outcome: Outcome) -> Outcome {
            let response = outcome?;
            let (parts, body) = response.into_parts();
            let body = buffer(body).await.unwrap();
            self.response_bodies.lock().push(body.clone());
            Ok(Response::from_parts(parts, full(body)))
        }
    }

    fn client() -> SocketAddr {
        "192.168.1.20:50123".parse().unwrap()
    }

    /// A body that yields some bytes and then fails.
    pub(crate) fn broken_body() -> Body {
        Body::from_stream(hudsucker::futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ]))
    }

    fn json_response(body: &str) -> Response<Body> {
        Response::builder()
            .status(200)
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .header(CONTENT_LENGTH, body.len())
            .body(full(body.to_string()))
            .unwrap()
    }

    async fn exchange(recorder: &Recorder, url: &str, response: Outcome) -> (RequestContext, Outcome) {
        let mut ctx = RequestContext::new(client());
        let req = Request::get(url).body(full("")).unwrap();
        let _forwarded = recorder.before_request(&mut ctx, req).await.unwrap();
        let outcome = recorder.before_response(&mut ctx, response).await;
        (ctx, outcome)
    }

    #[tokio::test]
    async fn rewrites_eligible_response() {
        let output = Arc::new(CollectingOutput::default());
        let recorder = Recorder::builder().output(output.clone()).build().unwrap();

        let (mut ctx, outcome) =
            exchange(&recorder, SETTINGS_URL, Ok(json_response(SETTINGS_BODY))).await;
        let response = outcome.unwrap();

        let expected =
            r#"{"records":[{"settingId":"DigitalSignage.PlayEnabled.x","value":"true"}]}"#;
        assert_eq!(
            response.headers()[CONTENT_LENGTH],
            expected.len().to_string().as_str()
        );
        let body = buffer(response.into_body()).await.unwrap();
        assert_eq!(body.as_ref(), expected.as_bytes());

        recorder.finish(&mut ctx);
        let recorded = output.transactions();
        assert_eq!(recorded.len(), 1);
        match &recorded[0].response {
            Some(mars_core::ResponseOutcome::Completed(dump)) => {
                assert_eq!(dump.body.as_ref(), expected.as_bytes());
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn other_settings_pass_through() {
        let recorder = Recorder::builder().build().unwrap();
        let body = r#"{"records":[{"settingId":"Other.Setting","value":"false"}]}"#;

        let (_ctx, outcome) = exchange(&recorder, SETTINGS_URL, Ok(json_response(body))).await;
        let response = outcome.unwrap();

        assert_eq!(response.headers()[CONTENT_LENGTH], body.len().to_string().as_str());
        let bytes = buffer(response.into_body()).await.unwrap();
        assert_eq!(bytes.as_ref(), body.as_bytes());
    }

    #[tokio::test]
    async fn rewriting_can_be_disabled() {
        let recorder = Recorder::builder().rewrite_rule(None).build().unwrap();

        let (_ctx, outcome) =
            exchange(&recorder, SETTINGS_URL, Ok(json_response(SETTINGS_BODY))).await;
        let bytes = buffer(outcome.unwrap().into_body()).await.unwrap();
        assert_eq!(bytes.as_ref(), SETTINGS_BODY.as_bytes());
    }

    #[tokio::test]
    async fn other_hosts_are_not_rewritten() {
        let recorder = Recorder::builder().build().unwrap();

        let (_ctx, outcome) = exchange(
            &recorder,
            "https://api.example.com/restapi/v1.0/rooms-client/account/~/settings",
            Ok(json_response(SETTINGS_BODY)),
        )
        .await;
        let bytes = buffer(outcome.unwrap().into_body()).await.unwrap();
        assert_eq!(bytes.as_ref(), SETTINGS_BODY.as_bytes());
    }

    #[tokio::test]
    async fn interceptor_sees_response_before_rewrite() {
        let spy = Arc::new(Spy::default());
        let recorder = Recorder::builder().interceptor(spy.clone()).build().unwrap();

        let (_ctx, outcome) =
            exchange(&recorder, SETTINGS_URL, Ok(json_response(SETTINGS_BODY))).await;
        let final_body = buffer(outcome.unwrap().into_body()).await.unwrap();

        let seen = spy.response_bodies.lock().clone();
        assert_eq!(seen, vec![Bytes::from_static(SETTINGS_BODY.as_bytes())]);
        assert_ne!(final_body, seen[0]);
    }

    #[tokio::test]
    async fn connect_delegates_to_interceptor() {
        let recorder = Recorder::builder()
            .interceptor(Arc::new(Spy::default()))
            .build()
            .unwrap();
        let ctx = RequestContext::new(client());

        let blocked = Request::get("http://blocked.test/").body(full("")).unwrap();
        let response = recorder.connect(&ctx, &blocked).unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let allowed = Request::get("http://example.com/").body(full("")).unwrap();
        assert!(recorder.connect(&ctx, &allowed).is_none());
        assert!(ctx.transaction().is_none());
    }

    #[tokio::test]
    async fn before_request_opens_transaction() {
        let recorder = Recorder::builder().build().unwrap();
        let mut ctx = RequestContext::new(client());

        let req = Request::post("http://api.example.com/v1/items")
            .header(CONTENT_TYPE, "application/json")
            .body(full("{\"a\":1}"))
            .unwrap();
        let forwarded = recorder.before_request(&mut ctx, req).await.unwrap();

        assert!(forwarded.extensions().get::<ConnTrace>().is_some());
        let body = buffer(forwarded.into_body()).await.unwrap();
        assert_eq!(body.as_ref(), b"{\"a\":1}");

        let tx = ctx.transaction().unwrap();
        assert_eq!(tx.client_ip, "192.168.1.20");
        assert_eq!(tx.request.method, "POST");
        assert_eq!(tx.request.url, "http://api.example.com/v1/items");
        assert_eq!(tx.request.body.as_ref(), b"{\"a\":1}");
        assert!(tx.response.is_none());
        assert_eq!(ctx.target().host, "api.example.com");
    }

    #[tokio::test]
    async fn host_override_retargets_request_and_strips_control_headers() {
        let recorder = Recorder::builder().build().unwrap();
        let mut ctx = RequestContext::new(client());

        let req = Request::get("http://api.example.com/status?verbose=1")
            .header(HOST, "api.example.com")
            .header(OVERRIDE_HOST_HEADER, "internal.example")
            .header(DEBUG_HEADER, "1")
            .body(full(""))
            .unwrap();
        let forwarded = recorder.before_request(&mut ctx, req).await.unwrap();

        assert_eq!(forwarded.uri(), "http://internal.example/status?verbose=1");
        assert_eq!(forwarded.headers()[HOST], "internal.example");
        assert!(forwarded.headers().get(OVERRIDE_HOST_HEADER).is_none());
        assert!(forwarded.headers().get(DEBUG_HEADER).is_none());

        let dumped = &ctx.transaction().unwrap().request;
        assert_eq!(dumped.url, "http://internal.example/status?verbose=1");
        assert_eq!(dumped.header("host").unwrap(), "internal.example");
        assert!(!dumped.headers.iter().any(|(name, _)| name.starts_with("x-mars-")));
        assert_eq!(ctx.target().host, "internal.example");
    }

    #[test]
    fn host_override_keeps_port_unless_given() {
        let mut req = Request::get("https://api.example.com:8443/a")
            .header(OVERRIDE_HOST_HEADER, "internal.example")
            .body(full(""))
            .unwrap();
        apply_host_override(&mut req);
        assert_eq!(req.uri(), "https://internal.example:8443/a");

        let mut req = Request::get("http://api.example.com/a")
            .header(OVERRIDE_HOST_HEADER, " internal.example:9000 ")
            .body(full(""))
            .unwrap();
        apply_host_override(&mut req);
        assert_eq!(req.uri(), "http://internal.example:9000/a");
        assert_eq!(req.headers()[HOST], "internal.example:9000");
    }

    #[test]
    fn invalid_host_override_is_ignored() {
        let mut req = Request::get("http://api.example.com/a")
            .header(OVERRIDE_HOST_HEADER, "not a host")
            .body(full(""))
            .unwrap();
        apply_host_override(&mut req);

        assert_eq!(req.uri(), "http://api.example.com/a");
        assert!(req.headers().get(OVERRIDE_HOST_HEADER).is_none());
    }

    #[tokio::test]
    async fn empty_override_keeps_host_but_is_stripped() {
        let recorder = Recorder::builder().build().unwrap();
        let mut ctx = RequestContext::new(client());

        let req = Request::get("http://api.example.com/status")
            .header(HOST, "api.example.com")
            .header(OVERRIDE_HOST_HEADER, "")
            .body(full(""))
            .unwrap();
        let forwarded = recorder.before_request(&mut ctx, req).await.unwrap();

        assert_eq!(forwarded.uri(), "http://api.example.com/status");
        assert_eq!(forwarded.headers()[HOST], "api.example.com");
        assert!(forwarded.headers().get(OVERRIDE_HOST_HEADER).is_none());
    }

    #[tokio::test]
    async fn transport_error_is_recorded() {
        let output = Arc::new(CollectingOutput::default());
        let recorder = Recorder::builder().output(output.clone()).build().unwrap();

        let (mut ctx, outcome) = exchange(
            &recorder,
            "http://api.example.com/",
            Err(TransportError::new("connection refused")),
        )
        .await;
        assert!(outcome.is_err());

        recorder.finish(&mut ctx);
        let recorded = output.transactions();
        assert_eq!(recorded[0].error(), Some("connection refused"));
        assert_eq!(recorded[0].status(), None);
    }

    #[tokio::test]
    async fn unreadable_response_body_fails_the_exchange() {
        let output = Arc::new(CollectingOutput::default());
        let recorder = Recorder::builder().output(output.clone()).build().unwrap();
        let response = Response::builder()
            .status(200)
            .header(CONTENT_LENGTH, "100")
            .body(broken_body())
            .unwrap();

        let (mut ctx, outcome) = exchange(&recorder, "http://api.example.com/", Ok(response)).await;
        let err = outcome.unwrap_err();
        assert!(err.message().starts_with("failed to read response body"));

        recorder.finish(&mut ctx);
        let recorded = output.transactions();
        assert_eq!(recorded[0].status(), None);
        assert!(recorded[0]
            .error()
            .unwrap()
            .starts_with("failed to read response body"));
    }

    #[tokio::test]
    async fn unreadable_request_body_keeps_transaction_open() {
        let output = Arc::new(CollectingOutput::default());
        let recorder = Recorder::builder().output(output.clone()).build().unwrap();
        let mut ctx = RequestContext::new(client());

        let req = Request::post("http://api.example.com/upload")
            .body(broken_body())
            .unwrap();
        let err = recorder.before_request(&mut ctx, req).await.unwrap_err();
        assert!(err.message().starts_with("failed to read request body"));
        assert_eq!(ctx.target().url, "http://api.example.com/upload");

        let outcome = recorder.before_response(&mut ctx, Err(err)).await;
        assert!(outcome.is_err());
        recorder.finish(&mut ctx);

        let recorded = output.transactions();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].request.method, "POST");
        assert!(recorded[0]
            .error()
            .unwrap()
            .starts_with("failed to read request body"));
    }

    #[tokio::test]
    async fn do_request_does_not_send_unreadable_request() {
        let output = Arc::new(CollectingOutput::default());
        let recorder = Recorder::builder().output(output.clone()).build().unwrap();

        let req = Request::post("http://127.0.0.1:9/upload")
            .body(broken_body())
            .unwrap();
        recorder.do_request(req).await;

        let recorded = output.transactions();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].server_ip, "");
        assert!(recorded[0]
            .error()
            .unwrap()
            .starts_with("failed to read request body"));
    }

    #[tokio::test]
    async fn server_ip_comes_from_trace() {
        let recorder = Recorder::builder().build().unwrap();
        let mut ctx = RequestContext::new(client());

        let req = Request::get("http://api.example.com/").body(full("")).unwrap();
        let forwarded = recorder.before_request(&mut ctx, req).await.unwrap();
        forwarded
            .extensions()
            .get::<ConnTrace>()
            .unwrap()
            .got_conn("203.0.113.7:80".parse().unwrap());

        let _ = recorder
            .before_response(&mut ctx, Ok(Response::new(full("ok"))))
            .await;
        assert_eq!(ctx.transaction().unwrap().server_ip, "203.0.113.7");
    }

    #[tokio::test]
    async fn server_ip_stays_empty_without_trace() {
        let recorder = Recorder::builder().build().unwrap();
        let (ctx, _) = exchange(
            &recorder,
            "http://api.example.com/",
            Ok(Response::new(full("ok"))),
        )
        .await;
        assert_eq!(ctx.transaction().unwrap().server_ip, "");
    }

    #[tokio::test]
    async fn before_response_without_transaction_is_untouched() {
        let recorder = Recorder::builder().build().unwrap();
        let mut ctx = RequestContext::new(client());

        let outcome = recorder
            .before_response(&mut ctx, Ok(json_response(SETTINGS_BODY)))
            .await;
        let bytes = buffer(outcome.unwrap().into_body()).await.unwrap();
        assert_eq!(bytes.as_ref(), SETTINGS_BODY.as_bytes());
        assert!(ctx.transaction().is_none());
    }

    #[tokio::test]
    async fn finish_without_transaction_is_noop() {
        let output = Arc::new(CollectingOutput::default());
        let recorder = Recorder::builder().output(output.clone()).build().unwrap();

        recorder.finish(&mut RequestContext::new(client()));
        assert!(output.transactions().is_empty());
    }

    #[tokio::test]
    async fn storage_failure_does_not_block_output() {
        let output = Arc::new(CollectingOutput::default());
        let recorder = Recorder::builder()
            .storage(Arc::new(FailingStorage))
            .output(output.clone())
            .build()
            .unwrap();

        let (mut ctx, _) = exchange(
            &recorder,
            "http://api.example.com/",
            Ok(Response::new(full("ok"))),
        )
        .await;
        recorder.finish(&mut ctx);

        assert_eq!(output.transactions().len(), 1);
        assert!(ctx.transaction().is_none());
    }

    #[tokio::test]
    async fn finish_assigns_storage_id_before_output() {
        let storage = Arc::new(MemoryStorage::new(10));
        let output = Arc::new(CollectingOutput::default());
        let recorder = Recorder::builder()
            .storage(storage.clone())
            .output(output.clone())
            .build()
            .unwrap();

        let (mut ctx, _) = exchange(
            &recorder,
            "http://api.example.com/",
            Ok(Response::new(full("ok"))),
        )
        .await;
        recorder.finish(&mut ctx);

        let id = output.transactions()[0].id.clone();
        assert!(!id.is_empty());
        assert_eq!(storage.get(&id).unwrap().request.url, "http://api.example.com/");
    }

    #[tokio::test]
    async fn replay_of_unknown_id_fails() {
        let output = Arc::new(CollectingOutput::default());
        let recorder = Recorder::builder()
            .storage(Arc::new(MemoryStorage::new(10)))
            .output(output.clone())
            .build()
            .unwrap();

        let err = recorder.replay("nope").unwrap_err();
        assert!(err.is_not_found());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(output.transactions().is_empty());
    }

    #[tokio::test]
    async fn replay_requires_storage() {
        let recorder = Recorder::builder().build().unwrap();
        assert!(matches!(
            recorder.replay("1"),
            Err(ReplayError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn replay_rejects_unrestorable_request() {
        let storage = Arc::new(MemoryStorage::new(10));
        let (parts, ()) = Request::get("http://example.com/").body(()).unwrap().into_parts();
        let mut dump = RequestDump::capture(&parts, &Bytes::new());
        dump.url = "/relative".to_string();
        let mut tx = Transaction::begin("10.0.0.1", dump);
        storage.put(&mut tx).unwrap();

        let recorder = Recorder::builder().storage(storage).build().unwrap();
        assert!(matches!(
            recorder.replay(&tx.id),
            Err(ReplayError::Restore { .. })
        ));
    }

    /// Serves one HTTP/1.1 response per connection, built from the request
    /// head by `respond`, then closes the connection.
    pub(crate) async fn spawn_upstream_with<F>(respond: F) -> SocketAddr
    where
        F: Fn(&str) -> Vec<u8> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let respond = Arc::new(respond);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let respond = respond.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut read = Vec::new();
                    while !read.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => read.extend_from_slice(&buf[..n]),
                        }
                    }
                    let head = String::from_utf8_lossy(&read).to_lowercase();
                    let _ = socket.write_all(&respond(&head)).await;
                });
            }
        });
        addr
    }

    /// Upstream answering every request with `200 pong`.
    pub(crate) async fn spawn_upstream() -> SocketAddr {
        spawn_upstream_with(|_| {
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 4\r\nConnection: close\r\n\r\npong"
                .to_vec()
        })
        .await
    }

    #[tokio::test]
    async fn replay_records_new_transaction() {
        let upstream = spawn_upstream().await;
        let storage = Arc::new(MemoryStorage::new(10));
        let output = Arc::new(CollectingOutput::default());
        let recorder = Recorder::builder()
            .storage(storage.clone())
            .output(output.clone())
            .build()
            .unwrap();

        let url = format!("http://{}/ping", upstream);
        let (parts, ()) = Request::get(url.as_str())
            .header("accept", "text/plain")
            .body(())
            .unwrap()
            .into_parts();
        let mut original = Transaction::begin("10.1.2.3", RequestDump::capture(&parts, &Bytes::new()));
        storage.put(&mut original).unwrap();

        recorder.replay(&original.id).unwrap();

        let recorded = output.wait_for_one().await;
        assert_eq!(recorded.len(), 1);
        let replayed = &recorded[0];
        assert_ne!(replayed.id, original.id);
        assert_eq!(replayed.client_ip, "10.1.2.3");
        assert_eq!(replayed.server_ip, "127.0.0.1");
        assert_eq!(replayed.request.url, url);
        assert_eq!(replayed.status(), Some(200));
        assert_eq!(storage.len(), 2);
    }
}
